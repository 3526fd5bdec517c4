//! Expiring Cache - a thread-safe in-memory key/value cache
//!
//! Entries expire by sliding window, absolute deadline, or both. A background
//! sweeper evicts expired entries and raises their expired callbacks, and reads
//! drop expired entries on the spot.
//!
//! ```
//! use std::time::Duration;
//! use expiring_cache::{CacheManager, ExpirationPolicy};
//!
//! let cache: CacheManager<String> = CacheManager::new()?;
//!
//! let policy = ExpirationPolicy::sliding(Duration::from_secs(30));
//! assert!(cache.add("user:1", "Ada".to_string(), Some(policy))?);
//! assert_eq!(cache.get("user:1")?, Some("Ada".to_string()));
//!
//! let name = cache.get_or_add("user:2", || "Grace".to_string(), None)?;
//! assert_eq!(name, "Grace");
//! # Ok::<(), expiring_cache::CacheError>(())
//! ```
//!
//! A process-wide cache is a lazily initialised static:
//!
//! ```no_run
//! use expiring_cache::CacheManager;
//! use once_cell::sync::Lazy;
//!
//! static CACHE: Lazy<CacheManager<String>> =
//!     Lazy::new(|| CacheManager::new().expect("cache sweeper failed to start"));
//!
//! CACHE.set("motd", "hello".to_string(), None).unwrap();
//! ```

pub mod cache;
pub mod config;
pub mod error;
mod tasks;

pub use cache::{CacheEntry, CacheManager, CacheStats, ExpirationPolicy, ExpiredCallback};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use tasks::SWEEPER_THREAD_NAME;
