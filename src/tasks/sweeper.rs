//! Expiration Sweeper
//!
//! Background task that periodically evicts expired cache entries and raises
//! their expired callbacks.

use std::io;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::cache::CacheStore;
use crate::error::Result;

/// Name of the dedicated sweeper thread.
pub const SWEEPER_THREAD_NAME: &str = "cache-sweeper";

// == Sweeper Handle ==
/// Owns the sweeper thread and the runtime that drives it.
///
/// The sweeper runs on its own current-thread runtime so a manager can be
/// built and used from plain threads as well as from async code.
#[derive(Debug)]
pub(crate) struct SweeperHandle {
    runtime: Handle,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Handle of the sweeper runtime, used to dispatch expired callbacks.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    // == Stop ==
    /// Signals the sweeper and waits for its thread to exit.
    ///
    /// An in-flight sweep completes first; no sweep starts after this
    /// returns. Callbacks already running are left to finish on their own.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            // Joining ourselves would deadlock.
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                debug!("cache sweeper thread panicked before shutdown");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawns the sweeper for `store`, sweeping every `interval`.
///
/// The runtime is built and dropped on the sweeper thread itself, so the
/// caller may be inside another runtime. Its handle comes back over a std
/// channel once it is ready.
///
/// # Errors
/// `CacheError::Sweeper` if the runtime or the thread cannot be created.
pub(crate) fn spawn_sweeper<V>(store: Arc<CacheStore<V>>, interval: Duration) -> Result<SweeperHandle>
where
    V: Send + Sync + 'static,
{
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (ready_tx, ready_rx) = mpsc::sync_channel::<io::Result<Handle>>(1);

    let thread = thread::Builder::new()
        .name(SWEEPER_THREAD_NAME.to_string())
        .spawn(move || {
            let runtime = match Builder::new_current_thread().enable_time().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if ready_tx.send(Ok(runtime.handle().clone())).is_err() {
                return;
            }
            runtime.block_on(run_sweeper(store, interval, shutdown_rx));
            runtime.shutdown_background();
        })?;

    let handle = match ready_rx.recv() {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => {
            let _ = thread.join();
            return Err(e.into());
        }
        Err(_) => {
            let _ = thread.join();
            return Err(io::Error::other("cache sweeper exited before starting").into());
        }
    };

    Ok(SweeperHandle {
        runtime: handle,
        shutdown_tx: Some(shutdown_tx),
        thread: Some(thread),
    })
}

/// Runs the sweep loop until shutdown is signalled or the handle is dropped.
async fn run_sweeper<V>(
    store: Arc<CacheStore<V>>,
    period: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    V: Send + Sync + 'static,
{
    info!(interval = ?period, "starting cache sweeper");

    let runtime = Handle::current();
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased; // Prioritize shutdown signal

            _ = &mut shutdown_rx => {
                debug!("cache sweeper received shutdown signal");
                break;
            }
            _ = interval.tick() => {
                sweep_expired(&store, &runtime);
            }
        }
    }

    info!("cache sweeper shutdown complete");
}

// == Sweep ==
/// Evicts every expired entry and dispatches its callback onto `runtime`.
///
/// Returns the number of entries removed.
pub(crate) fn sweep_expired<V>(store: &CacheStore<V>, runtime: &Handle) -> usize
where
    V: Send + 'static,
{
    let expired = store.remove_expired(Utc::now());
    let removed = expired.len();

    let callbacks = expired
        .into_iter()
        .map(|entry| entry.raise_expired_callback(runtime))
        .filter(|raised| *raised)
        .count();

    if removed > 0 {
        info!(removed, callbacks, "cache sweep: removed expired entries");
    } else {
        debug!("cache sweep: no expired entries found");
    }
    removed
}
