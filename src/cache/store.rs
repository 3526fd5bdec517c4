//! Cache Store Module
//!
//! Concurrent key-to-entry storage with lazy expiration, shared between the
//! manager's callers and the background sweeper.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::cache::pending::{Pending, PendingGuard};
use crate::cache::stats::StatsRecorder;
use crate::cache::{CacheEntry, CacheStats, ExpirationPolicy};
use crate::error::{CacheError, Result};

// == Cache Store ==
/// Sharded entry map plus in-flight get-or-add placeholders.
///
/// Every operation touches a single key under that key's shard lock. Scans
/// take shard read locks one shard at a time.
pub(crate) struct CacheStore<V> {
    entries: DashMap<String, CacheEntry<V>>,
    pending: DashMap<String, Pending<V>>,
    stats: StatsRecorder,
}

impl<V> CacheStore<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            pending: DashMap::new(),
            stats: StatsRecorder::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.entries.len())
    }

    // == Contains ==
    /// True if `key` holds an entry that has not expired. Does not refresh
    /// usage.
    pub fn contains(&self, key: &str) -> bool {
        let now = Utc::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return true,
            Some(_) => true,
            None => false,
        };
        if expired {
            self.expire_lazily(key, now);
        }
        false
    }

    // == Remove ==
    /// Removes `key` and returns its value if it had not expired.
    pub fn remove(&self, key: &str) -> Result<Option<V>> {
        validate_key(key)?;
        let now = Utc::now();

        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.is_expired(now))
            .map(CacheEntry::into_value))
    }

    // == Add ==
    /// Inserts only if `key` is absent or holds an expired entry.
    ///
    /// Returns true if the entry was inserted.
    pub fn add(&self, key: String, value: V, policy: ExpirationPolicy<V>) -> Result<bool> {
        let entry = CacheEntry::new(key, value, policy)?;
        let now = Utc::now();

        match self.entries.entry(entry.key().to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return Ok(false);
                }
                occupied.insert(entry);
                self.stats.record_lazy_expiration();
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(true)
            }
        }
    }

    // == Set ==
    /// Stores the entry unconditionally, replacing value, policy and last
    /// access of any existing one.
    ///
    /// Returns the replaced value if it had not expired.
    pub fn set(&self, key: String, value: V, policy: ExpirationPolicy<V>) -> Result<Option<V>> {
        let entry = CacheEntry::new(key, value, policy)?;
        let now = Utc::now();

        Ok(self
            .entries
            .insert(entry.key().to_string(), entry)
            .filter(|previous| !previous.is_expired(now))
            .map(CacheEntry::into_value))
    }

    // == Remove Expired ==
    /// Removes every entry expired at `now` and hands them back.
    ///
    /// An entry replaced after the scan is re-checked before removal, so a
    /// fresh `set` racing the sweep survives.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> Vec<CacheEntry<V>> {
        let candidates: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let removed: Vec<CacheEntry<V>> = candidates
            .into_iter()
            .filter_map(|key| {
                self.entries
                    .remove_if(&key, |_, entry| entry.is_expired(now))
            })
            .map(|(_, entry)| entry)
            .collect();

        self.stats.record_swept(removed.len());
        removed
    }

    /// Drops `key` if it is still expired at `now`. The expired callback is
    /// only raised by the sweeper, never here.
    fn expire_lazily(&self, key: &str, now: DateTime<Utc>) {
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            self.stats.record_lazy_expiration();
            trace!(key, "lazily expired entry on read");
        }
    }
}

impl<V: Clone> CacheStore<V> {
    // == Get ==
    /// Returns the value for `key` and refreshes its usage.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Result<Option<V>> {
        validate_key(key)?;

        match self.lookup(key, Utc::now()) {
            Some(value) => {
                self.stats.record_hit();
                Ok(Some(value))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    // == Get Cache Item ==
    /// Returns a detached copy of the entry without refreshing usage.
    pub fn get_cache_item(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        validate_key(key)?;
        let now = Utc::now();

        let expired = match self.entries.get(key) {
            Some(guard) => {
                let entry = guard.value();
                if !entry.is_expired(now) {
                    return Ok(Some(entry.clone()));
                }
                true
            }
            None => false,
        };
        if expired {
            self.expire_lazily(key, now);
        }
        Ok(None)
    }

    // == Get Or Add ==
    /// Returns the live value for `key`, or runs `factory` to create it.
    ///
    /// Concurrent callers for the same missing key share one placeholder: one
    /// of them runs the factory, the rest block until its value is installed.
    /// The factory runs without any map lock held. If it fails, nothing is
    /// installed and the error goes to the caller that ran it; a waiting caller
    /// then gets its own turn.
    pub fn get_or_try_add<F, E>(
        &self,
        key: &str,
        factory: F,
        policy: ExpirationPolicy<V>,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce() -> std::result::Result<V, E>,
        E: From<CacheError>,
    {
        if let Some(value) = self.get(key)? {
            return Ok(value);
        }

        let guard = PendingGuard::join(&self.pending, key);
        let value = guard.cell().get_or_try_init(|| -> std::result::Result<V, E> {
            // Another caller may have installed the value since our miss.
            if let Some(value) = self.lookup(key, Utc::now()) {
                return Ok(value);
            }
            debug!(key, "running get-or-add factory");
            let value = factory()?;
            Ok(self.install(key, value, policy)?)
        })?;

        Ok(value.clone())
    }

    /// Live value for `key` with usage refreshed; expired entries are dropped.
    fn lookup(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(guard) => {
                let entry = guard.value();
                if !entry.is_expired(now) {
                    entry.update_usage(now);
                    return Some(entry.value().clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.expire_lazily(key, now);
        }
        None
    }

    /// Add-if-absent for a factory result. A live entry stored concurrently by
    /// `add` or `set` wins and its value is returned instead.
    fn install(&self, key: &str, value: V, policy: ExpirationPolicy<V>) -> Result<V> {
        let entry = CacheEntry::new(key, value.clone(), policy)?;
        let now = Utc::now();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return Ok(occupied.get().value().clone());
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        Ok(value)
    }
}

/// Rejects the empty key shared by every keyed operation.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::empty_key());
    }
    Ok(())
}
