//! In-flight get-or-add placeholders.
//!
//! A racing `get_or_add` caller finds the winner's placeholder and blocks on it
//! instead of running its own factory. The guard removes the placeholder once
//! the caller is done with it, including when the factory panics.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;

/// Placeholder shared by every caller racing on one missing key.
pub(crate) type Pending<V> = Arc<OnceCell<V>>;

/// RAII guard over a placeholder in the manager's pending map.
pub(crate) struct PendingGuard<'a, V> {
    pending: &'a DashMap<String, Pending<V>>,
    key: &'a str,
    cell: Pending<V>,
}

impl<'a, V> PendingGuard<'a, V> {
    /// Joins the placeholder for `key`, installing one if none exists.
    ///
    /// A placeholder that is already filled belongs to a finished call whose
    /// guard has not dropped yet. Its value may already be gone from the map,
    /// so it is replaced with an empty one instead of being joined.
    ///
    /// The shard lock is released before this returns, so waiting on the cell
    /// never blocks other keys.
    pub fn join(pending: &'a DashMap<String, Pending<V>>, key: &'a str) -> Self {
        let cell = match pending.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().get().is_some() {
                    occupied.insert(Arc::new(OnceCell::new()));
                }
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => vacant.insert(Arc::new(OnceCell::new())).clone(),
        };
        Self { pending, key, cell }
    }

    pub fn cell(&self) -> &OnceCell<V> {
        &self.cell
    }
}

impl<V> Drop for PendingGuard<'_, V> {
    fn drop(&mut self) {
        // A newer placeholder for the same key belongs to someone else.
        self.pending
            .remove_if(self.key, |_, cell| Arc::ptr_eq(cell, &self.cell));
    }
}
