//! Background Tasks Module
//!
//! Contains the background task that runs periodically for each cache manager.
//!
//! # Tasks
//! - Expiration sweep: evicts expired entries and raises their callbacks

mod sweeper;

pub use sweeper::SWEEPER_THREAD_NAME;
pub(crate) use sweeper::{spawn_sweeper, sweep_expired, SweeperHandle};
