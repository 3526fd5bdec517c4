//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with sliding and
//! absolute expiration.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tracing::warn;

use crate::cache::ExpirationPolicy;
use crate::error::{CacheError, Result};

// == Cache Entry ==
/// A single cached value with its expiration policy and last access time.
///
/// Key, value and policy are fixed at construction. Only the last access time
/// changes, and it is stored atomically so a usage refresh never races an
/// expiration check.
#[derive(Debug)]
pub struct CacheEntry<V> {
    key: String,
    value: V,
    policy: ExpirationPolicy<V>,
    /// Last access timestamp (Unix microseconds)
    last_access_us: AtomicI64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry whose last access is now.
    ///
    /// # Errors
    /// `CacheError::InvalidArgument` if `key` is empty.
    pub fn new(key: impl Into<String>, value: V, policy: ExpirationPolicy<V>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(CacheError::empty_key());
        }

        Ok(Self {
            key,
            value,
            policy,
            last_access_us: AtomicI64::new(Utc::now().timestamp_micros()),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn policy(&self) -> &ExpirationPolicy<V> {
        &self.policy
    }

    /// Consumes the entry, returning the stored value.
    pub fn into_value(self) -> V {
        self.value
    }

    /// Returns the time of the last usage refresh.
    pub fn last_access(&self) -> DateTime<Utc> {
        from_micros(self.last_access_us.load(Ordering::Acquire))
    }

    // == Can Expire ==
    /// True when the policy has a sliding window or an absolute deadline.
    pub fn can_expire(&self) -> bool {
        self.policy.can_expire()
    }

    // == Is Expired ==
    /// Checks whether the entry has expired at `now`.
    ///
    /// Boundary condition: the entry is expired once `now - last_access`
    /// reaches the sliding window, or once `now` reaches the absolute
    /// deadline. Checking does not refresh usage.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if let Some(window) = self.policy.sliding_expiration() {
            let idle_us = now
                .timestamp_micros()
                .saturating_sub(self.last_access_us.load(Ordering::Acquire));
            if idle_us >= window_micros(window) {
                return true;
            }
        }

        match self.policy.absolute_expiration() {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    // == Update Usage ==
    /// Marks the entry as read at `now`, restarting its sliding window.
    pub fn update_usage(&self, now: DateTime<Utc>) {
        self.last_access_us
            .store(now.timestamp_micros(), Ordering::Release);
    }

    // == Expires At ==
    /// Returns the earliest moment the entry will be expired given no further
    /// reads, or None if it never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let sliding_deadline = self.policy.sliding_expiration().and_then(|window| {
            chrono::Duration::from_std(window)
                .ok()
                .and_then(|window| self.last_access().checked_add_signed(window))
        });

        match (sliding_deadline, self.policy.absolute_expiration()) {
            (Some(sliding), Some(absolute)) => Some(sliding.min(absolute)),
            (sliding, absolute) => sliding.or(absolute),
        }
    }

    // == Time To Live ==
    /// Returns the time left until expiration, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(Duration::ZERO)` if the entry has expired
    /// - `Some(remaining)` if the entry can expire and hasn't yet
    /// - `None` if the entry never expires
    pub fn ttl_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at()
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }
}

impl<V: Send + 'static> CacheEntry<V> {
    // == Raise Expired Callback ==
    /// Hands the evicted entry to its policy callback on the runtime's
    /// blocking pool and returns immediately.
    ///
    /// Consumes the entry, so the callback can be raised at most once. A
    /// panicking callback is caught and logged. Returns whether a callback was
    /// dispatched.
    pub fn raise_expired_callback(self, runtime: &Handle) -> bool {
        let Some(callback) = self.policy.expired_callback().cloned() else {
            return false;
        };

        runtime.spawn_blocking(move || {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&self))).is_err() {
                warn!(key = %self.key, "expired callback panicked");
            }
        });
        true
    }
}

// Snapshots handed out by the manager are detached copies.
impl<V: Clone> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            policy: self.policy.clone(),
            last_access_us: AtomicI64::new(self.last_access_us.load(Ordering::Acquire)),
        }
    }
}

/// Window length in whole microseconds, rounded up so any non-zero window
/// stays non-zero.
fn window_micros(window: Duration) -> i64 {
    i64::try_from(window.as_nanos().div_ceil(1_000)).unwrap_or(i64::MAX)
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}
