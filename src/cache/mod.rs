//! Cache Module
//!
//! Provides in-memory caching with sliding and absolute expiration.

mod entry;
mod manager;
mod pending;
mod policy;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use manager::CacheManager;
pub use policy::{ExpirationPolicy, ExpiredCallback};
pub use stats::CacheStats;

pub(crate) use store::CacheStore;
