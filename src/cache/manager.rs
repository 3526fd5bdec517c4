//! Cache Manager Module
//!
//! Thread-safe public entry point: keyed operations over the shared store plus
//! the lifecycle of the background sweeper.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cache::store::CacheStore;
use crate::cache::{CacheEntry, CacheStats, ExpirationPolicy};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_sweeper, sweep_expired, SweeperHandle};

// == Cache Manager ==
/// An in-memory cache whose entries expire by sliding window, absolute
/// deadline, or both.
///
/// Every method takes `&self` and may be called from any number of threads.
/// Expired entries are evicted by a background sweep every
/// [`CacheConfig::sweep_interval`], and reads never return an expired value
/// even between sweeps.
///
/// Dropping the manager disposes it.
pub struct CacheManager<V> {
    store: Arc<CacheStore<V>>,
    sweeper: Mutex<Option<SweeperHandle>>,
    config: CacheConfig,
}

impl<V> CacheManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates a manager with the default configuration and starts its
    /// sweeper.
    pub fn new() -> Result<Self> {
        Self::with_config(CacheConfig::default())
    }

    /// Creates an isolated manager with its own sweeper.
    ///
    /// # Errors
    /// - `CacheError::InvalidArgument` if the sweep interval is zero or longer
    ///   than [`MAX_SWEEP_INTERVAL`](crate::config::MAX_SWEEP_INTERVAL)
    /// - `CacheError::Sweeper` if the sweeper cannot be started
    pub fn with_config(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(CacheStore::new());
        let sweeper = spawn_sweeper(Arc::clone(&store), config.sweep_interval)?;
        debug!(sweep_interval = ?config.sweep_interval, "cache manager created");

        Ok(Self {
            store,
            sweeper: Mutex::new(Some(sweeper)),
            config,
        })
    }

    // == Add ==
    /// Inserts `value` under `key` unless a live entry already exists.
    ///
    /// Returns `true` if inserted, `false` if the key was taken; the existing
    /// value is left untouched. `None` for `policy` means never expire.
    pub fn add(
        &self,
        key: impl Into<String>,
        value: V,
        policy: Option<ExpirationPolicy<V>>,
    ) -> Result<bool> {
        self.store.add(key.into(), value, policy.unwrap_or_default())
    }

    // == Set ==
    /// Inserts or replaces the entry for `key`, including its policy and last
    /// access time.
    ///
    /// Returns the replaced value, if a live one existed.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: V,
        policy: Option<ExpirationPolicy<V>>,
    ) -> Result<Option<V>> {
        self.store.set(key.into(), value, policy.unwrap_or_default())
    }

    // == Get ==
    /// Returns the value for `key` and restarts its sliding window.
    ///
    /// `Ok(None)` if the key is absent or expired.
    pub fn get(&self, key: &str) -> Result<Option<V>> {
        self.store.get(key)
    }

    // == Get Or Add ==
    /// Returns the live value for `key`, creating it with `factory` if needed.
    ///
    /// `factory` runs at most once for concurrent first accesses of the same
    /// key; the other callers wait for it and receive the same value.
    pub fn get_or_add<F>(
        &self,
        key: &str,
        factory: F,
        policy: Option<ExpirationPolicy<V>>,
    ) -> Result<V>
    where
        F: FnOnce() -> V,
    {
        self.try_get_or_add(key, || Ok::<V, CacheError>(factory()), policy)
    }

    /// Like [`get_or_add`](Self::get_or_add) with a fallible factory.
    ///
    /// A factory error is returned to the caller that ran it and nothing is
    /// stored.
    pub fn try_get_or_add<F, E>(
        &self,
        key: &str,
        factory: F,
        policy: Option<ExpirationPolicy<V>>,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce() -> std::result::Result<V, E>,
        E: From<CacheError>,
    {
        self.store
            .get_or_try_add(key, factory, policy.unwrap_or_default())
    }

    // == Remove ==
    /// Removes `key`, returning its value if it had not expired.
    pub fn remove(&self, key: &str) -> Result<Option<V>> {
        self.store.remove(key)
    }

    // == Contains ==
    /// True if `key` holds a live entry. Does not restart the sliding window.
    pub fn contains(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    // == Get Cache Item ==
    /// Returns a detached snapshot of the entry for inspection.
    ///
    /// Changes to the snapshot do not affect the cache, and taking it does not
    /// count as a read.
    pub fn get_cache_item(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        self.store.get_cache_item(key)
    }

    // == Sweep Now ==
    /// Runs one sweep on the calling thread, outside the regular schedule.
    ///
    /// Expired callbacks are still dispatched off-thread. Returns the number
    /// of entries removed, or 0 once disposed.
    pub fn sweep_now(&self) -> usize {
        let runtime = match self.sweeper.lock().as_ref() {
            Some(sweeper) => sweeper.runtime().clone(),
            None => return 0,
        };
        sweep_expired(&self.store, &runtime)
    }
}

impl<V> CacheManager<V> {
    /// Number of entries currently stored.
    ///
    /// Entries past their deadline count until a sweep or a read drops them.
    pub fn count(&self) -> usize {
        self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Keys of every stored entry, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.store.keys()
    }

    /// Drops every entry without raising expired callbacks.
    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.sweeper.lock().is_none()
    }

    // == Dispose ==
    /// Stops the sweeper and, if configured, clears the cache.
    ///
    /// No sweep runs after this returns. The manager stays usable for direct
    /// reads and writes, with lazy expiration only. Calling it again is a
    /// no-op.
    pub fn dispose(&self) {
        // Take the handle out first so the lock is not held while joining.
        let sweeper = self.sweeper.lock().take();
        let Some(mut sweeper) = sweeper else {
            return;
        };
        sweeper.stop();

        if self.config.clear_on_dispose {
            self.store.clear();
        }
        info!("cache manager disposed");
    }
}

impl<V> Drop for CacheManager<V> {
    fn drop(&mut self) {
        self.dispose();
    }
}
