//! Expiration Policy Module
//!
//! Describes when a cache entry stops being valid and what to run once the
//! sweeper evicts it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::CacheEntry;

/// Callback raised with the evicted entry after a sweep removes it.
pub type ExpiredCallback<V> = Arc<dyn Fn(&CacheEntry<V>) + Send + Sync>;

// == Expiration Policy ==
/// Sliding and absolute expiration settings for a single entry.
///
/// `None` means "disabled" for both deadlines, so the default policy never
/// expires. A zero sliding duration is treated as disabled.
pub struct ExpirationPolicy<V> {
    sliding_expiration: Option<Duration>,
    absolute_expiration: Option<DateTime<Utc>>,
    expired_callback: Option<ExpiredCallback<V>>,
}

impl<V> ExpirationPolicy<V> {
    // == Constructors ==
    /// A policy that never expires.
    pub fn never() -> Self {
        Self {
            sliding_expiration: None,
            absolute_expiration: None,
            expired_callback: None,
        }
    }

    /// Expires once the entry has gone unread for `window`.
    pub fn sliding(window: Duration) -> Self {
        Self::never().with_sliding(window)
    }

    /// Expires at the fixed point in time `deadline`.
    pub fn absolute(deadline: DateTime<Utc>) -> Self {
        Self::never().with_absolute(deadline)
    }

    /// Expires `ttl` from now, regardless of reads.
    ///
    /// A `ttl` too large to represent as a deadline never expires.
    pub fn absolute_in(ttl: Duration) -> Self {
        let deadline = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        Self {
            absolute_expiration: deadline,
            ..Self::never()
        }
    }

    // == Builders ==
    /// Sets the sliding window. `Duration::ZERO` disables it.
    pub fn with_sliding(mut self, window: Duration) -> Self {
        self.sliding_expiration = Some(window).filter(|w| !w.is_zero());
        self
    }

    /// Sets the absolute deadline.
    pub fn with_absolute(mut self, deadline: DateTime<Utc>) -> Self {
        self.absolute_expiration = Some(deadline);
        self
    }

    /// Registers the callback raised when the sweeper evicts the entry.
    pub fn on_expired<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CacheEntry<V>) + Send + Sync + 'static,
    {
        self.expired_callback = Some(Arc::new(callback));
        self
    }

    // == Accessors ==
    pub fn sliding_expiration(&self) -> Option<Duration> {
        self.sliding_expiration
    }

    pub fn absolute_expiration(&self) -> Option<DateTime<Utc>> {
        self.absolute_expiration
    }

    pub fn expired_callback(&self) -> Option<&ExpiredCallback<V>> {
        self.expired_callback.as_ref()
    }

    /// True when either deadline is set.
    pub fn can_expire(&self) -> bool {
        self.sliding_expiration.is_some() || self.absolute_expiration.is_some()
    }
}

impl<V> Default for ExpirationPolicy<V> {
    fn default() -> Self {
        Self::never()
    }
}

// Derive would require `V: Clone`; the callback is shared, not duplicated.
impl<V> Clone for ExpirationPolicy<V> {
    fn clone(&self) -> Self {
        Self {
            sliding_expiration: self.sliding_expiration,
            absolute_expiration: self.absolute_expiration,
            expired_callback: self.expired_callback.clone(),
        }
    }
}

impl<V> fmt::Debug for ExpirationPolicy<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpirationPolicy")
            .field("sliding_expiration", &self.sliding_expiration)
            .field("absolute_expiration", &self.absolute_expiration)
            .field("has_callback", &self.expired_callback.is_some())
            .finish()
    }
}
