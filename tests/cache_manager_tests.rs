//! Integration Tests for the Cache Manager
//!
//! Exercises the public API end to end: expiration scenarios, concurrent
//! get-or-add, the background sweep and disposal.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread::{self, sleep};
use std::time::Duration;

use chrono::Utc;
use expiring_cache::{CacheConfig, CacheError, CacheManager, ExpirationPolicy};

// == Helper Functions ==

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "expiring_cache=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn create_test_cache(sweep_interval: Duration) -> CacheManager<String> {
    init_tracing();
    CacheManager::with_config(CacheConfig::default().with_sweep_interval(sweep_interval))
        .unwrap()
}

/// Polls `condition` every 10ms until it holds or `timeout` passes.
fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10));
    }
    condition()
}

// == Basic Operations ==

#[test]
fn test_add_then_contains_and_get() {
    let cache = create_test_cache(Duration::from_secs(1));

    assert!(cache.add("k", "v".to_string(), None).unwrap());
    assert!(cache.contains("k"));
    assert_eq!(cache.get("k").unwrap(), Some("v".to_string()));
}

#[test]
fn test_add_existing_key_returns_false() {
    let cache = create_test_cache(Duration::from_secs(1));

    cache.add("k", "first".to_string(), None).unwrap();
    assert!(!cache.add("k", "second".to_string(), None).unwrap());
    assert_eq!(cache.get("k").unwrap(), Some("first".to_string()));
}

#[test]
fn test_empty_key_is_invalid_argument() {
    let cache = create_test_cache(Duration::from_secs(1));

    assert!(matches!(
        cache.add("", "v".to_string(), None),
        Err(CacheError::InvalidArgument(_))
    ));
    assert!(matches!(
        cache.set("", "v".to_string(), None),
        Err(CacheError::InvalidArgument(_))
    ));
    assert!(matches!(cache.get(""), Err(CacheError::InvalidArgument(_))));
    assert!(matches!(cache.remove(""), Err(CacheError::InvalidArgument(_))));
    assert!(matches!(
        cache.get_cache_item(""),
        Err(CacheError::InvalidArgument(_))
    ));
    assert!(cache.is_empty());
}

#[test]
fn test_sweep_interval_out_of_range_is_invalid_argument() {
    init_tracing();

    for interval in [Duration::ZERO, Duration::MAX] {
        let result = CacheManager::<String>::with_config(
            CacheConfig::default().with_sweep_interval(interval),
        );
        assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
    }

    let longest = CacheManager::<String>::with_config(
        CacheConfig::default().with_sweep_interval(expiring_cache::config::MAX_SWEEP_INTERVAL),
    )
    .unwrap();
    longest.set("k", "v".to_string(), None).unwrap();
    assert_eq!(longest.get("k").unwrap(), Some("v".to_string()));
}

#[test]
fn test_remove_present_and_absent() {
    let cache = create_test_cache(Duration::from_secs(1));
    cache.set("k", "v".to_string(), None).unwrap();

    assert_eq!(cache.remove("k").unwrap(), Some("v".to_string()));
    assert!(!cache.contains("k"));
    assert_eq!(cache.remove("k").unwrap(), None);
}

#[test]
fn test_set_replaces_value() {
    let cache = create_test_cache(Duration::from_secs(1));

    assert_eq!(cache.set("k", "v1".to_string(), None).unwrap(), None);
    assert_eq!(
        cache.set("k", "v2".to_string(), None).unwrap(),
        Some("v1".to_string())
    );
    assert_eq!(cache.get("k").unwrap(), Some("v2".to_string()));
    assert_eq!(cache.count(), 1);
}

#[test]
fn test_stats_track_hits_and_misses() {
    let cache = create_test_cache(Duration::from_secs(1));
    cache.set("k", "v".to_string(), None).unwrap();

    cache.get("k").unwrap();
    cache.get("missing").unwrap();

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.hit_rate(), 0.5);
}

// == Expiration Scenarios ==

#[test]
fn test_sliding_expiration_scenario() {
    let cache = create_test_cache(Duration::from_secs(1));
    let policy = ExpirationPolicy::sliding(Duration::from_secs(2));

    cache.add("k", "v".to_string(), Some(policy)).unwrap();
    assert_eq!(cache.get("k").unwrap(), Some("v".to_string()));
    assert!(cache.contains("k"));

    sleep(Duration::from_secs(1));
    assert_eq!(cache.get("k").unwrap(), Some("v".to_string()));

    sleep(Duration::from_millis(1500));
    assert!(cache.contains("k"), "still inside the refreshed window");

    sleep(Duration::from_millis(2500));
    assert!(!cache.contains("k"), "idle for longer than the window");
}

#[test]
fn test_absolute_expiration_scenario() {
    let cache = create_test_cache(Duration::from_secs(1));
    let policy = ExpirationPolicy::absolute(Utc::now() + chrono::Duration::seconds(2));

    cache.add("k", "v".to_string(), Some(policy)).unwrap();
    assert!(cache.contains("k"));

    sleep(Duration::from_secs(1));
    assert_eq!(cache.get("k").unwrap(), Some("v".to_string()));
    assert!(cache.contains("k"));

    sleep(Duration::from_millis(1500));
    assert!(!cache.contains("k"));
}

#[test]
fn test_set_twice_reflects_latest_policy() {
    let cache = create_test_cache(Duration::from_secs(1));
    let first = Utc::now() + chrono::Duration::minutes(5);
    let second = Utc::now() + chrono::Duration::minutes(10);

    cache
        .set("k", "v".to_string(), Some(ExpirationPolicy::absolute(first)))
        .unwrap();
    cache
        .set("k", "v".to_string(), Some(ExpirationPolicy::absolute(second)))
        .unwrap();

    let item = cache.get_cache_item("k").unwrap().unwrap();
    assert_eq!(item.policy().absolute_expiration(), Some(second));
    assert_eq!(item.expires_at(), Some(second));
}

#[test]
fn test_get_cache_item_is_a_snapshot() {
    let cache = create_test_cache(Duration::from_secs(1));
    cache
        .set(
            "k",
            "v".to_string(),
            Some(ExpirationPolicy::sliding(Duration::from_secs(60))),
        )
        .unwrap();

    let item = cache.get_cache_item("k").unwrap().unwrap();
    item.update_usage(Utc::now() - chrono::Duration::hours(1));

    assert!(item.is_expired(Utc::now()));
    assert!(cache.contains("k"), "snapshot changes must not reach the cache");
}

#[test]
fn test_lazy_expiration_on_read_skips_callback() {
    let cache = create_test_cache(Duration::from_secs(3600));
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let policy = ExpirationPolicy::absolute_in(Duration::from_millis(100)).on_expired(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    cache.set("k", "v".to_string(), Some(policy)).unwrap();
    sleep(Duration::from_millis(200));

    assert_eq!(cache.get("k").unwrap(), None);
    assert_eq!(cache.count(), 0);
    assert_eq!(cache.stats().lazily_expired, 1);

    sleep(Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// == Get Or Add ==

#[test]
fn test_get_or_add_factory_runs_once_under_race() {
    const CALLERS: usize = 16;

    let cache = Arc::new(create_test_cache(Duration::from_secs(1)));
    let invocations = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let invocations = Arc::clone(&invocations);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_add(
                        "shared",
                        || {
                            let n = invocations.fetch_add(1, Ordering::SeqCst);
                            sleep(Duration::from_millis(100));
                            format!("value-{}", n)
                        },
                        None,
                    )
                    .unwrap()
            })
        })
        .collect();

    let values: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|v| v == "value-0"));
    assert_eq!(cache.get("shared").unwrap(), Some("value-0".to_string()));
}

#[test]
fn test_get_or_add_different_keys_do_not_block() {
    let cache = Arc::new(create_test_cache(Duration::from_secs(1)));
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();

    let slow_cache = Arc::clone(&cache);
    let slow = thread::spawn(move || {
        slow_cache
            .get_or_add(
                "slow",
                || {
                    started_tx.send(()).unwrap();
                    release_rx
                        .recv_timeout(Duration::from_secs(5))
                        .expect("fast key should not wait on the slow factory");
                    "slow".to_string()
                },
                None,
            )
            .unwrap()
    });

    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let fast = cache.get_or_add("fast", || "fast".to_string(), None).unwrap();
    assert_eq!(fast, "fast");
    assert!(!cache.contains("slow"));

    release_tx.send(()).unwrap();
    assert_eq!(slow.join().unwrap(), "slow");
    assert!(cache.contains("slow"));
}

#[test]
fn test_try_get_or_add_failure_allows_retry() {
    let cache = create_test_cache(Duration::from_secs(1));

    let failed: Result<String, CacheError> = cache.try_get_or_add(
        "k",
        || Err(CacheError::InvalidArgument("upstream unavailable".to_string())),
        None,
    );
    assert!(failed.is_err());
    assert!(!cache.contains("k"));

    let value = cache
        .try_get_or_add("k", || Ok::<_, CacheError>("v".to_string()), None)
        .unwrap();
    assert_eq!(value, "v");
}

#[test]
fn test_get_or_add_panicking_factory_allows_retry() {
    let cache = create_test_cache(Duration::from_secs(1));

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        cache.get_or_add("k", || panic!("factory blew up"), None)
    }));
    assert!(result.is_err());
    assert!(!cache.contains("k"));
    assert_eq!(cache.count(), 0);

    let value = cache.get_or_add("k", || "v".to_string(), None).unwrap();
    assert_eq!(value, "v");
    assert_eq!(cache.get("k").unwrap(), Some("v".to_string()));
}

#[test]
fn test_get_or_add_waiter_takes_over_after_panic() {
    let cache = create_test_cache(Duration::from_secs(1));
    let (started_tx, started_rx) = mpsc::channel();

    thread::scope(|s| {
        let winner = s.spawn(|| {
            cache.get_or_add(
                "k",
                || {
                    started_tx.send(()).unwrap();
                    sleep(Duration::from_millis(100));
                    panic!("winner factory blew up");
                },
                None,
            )
        });

        started_rx.recv().unwrap();
        // Blocks on the winner's placeholder, then runs its own factory once
        // the winner unwinds.
        let value = cache.get_or_add("k", || "waiter".to_string(), None).unwrap();
        assert_eq!(value, "waiter");
        assert!(winner.join().is_err());
    });

    assert_eq!(cache.get("k").unwrap(), Some("waiter".to_string()));
}

#[test]
fn test_get_or_add_replaces_expired_entry() {
    let cache = create_test_cache(Duration::from_secs(3600));
    let expired = ExpirationPolicy::absolute(Utc::now() - chrono::Duration::seconds(1));
    cache.set("k", "stale".to_string(), Some(expired)).unwrap();

    let value = cache.get_or_add("k", || "fresh".to_string(), None).unwrap();
    assert_eq!(value, "fresh");
    assert_eq!(cache.get("k").unwrap(), Some("fresh".to_string()));
}

// == Background Sweep ==

#[test]
fn test_sweep_evicts_and_raises_callback_once() {
    let cache = create_test_cache(Duration::from_millis(100));
    let calls = Arc::new(AtomicUsize::new(0));
    let (key_tx, key_rx) = mpsc::channel::<String>();
    let key_tx = parking_lot::Mutex::new(key_tx);

    let seen = Arc::clone(&calls);
    let policy = ExpirationPolicy::absolute_in(Duration::from_millis(200)).on_expired(move |entry| {
        seen.fetch_add(1, Ordering::SeqCst);
        let _ = key_tx.lock().send(entry.key().to_string());
    });
    cache.set("expiring", "v".to_string(), Some(policy)).unwrap();
    cache.set("durable", "v".to_string(), None).unwrap();
    assert_eq!(cache.count(), 2);

    let evicted = key_rx.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(evicted, "expiring");
    assert_eq!(cache.count(), 1);

    sleep(Duration::from_millis(400));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().swept, 1);
}

#[test]
fn test_panicking_callback_does_not_stop_sweeps() {
    let cache = create_test_cache(Duration::from_millis(50));
    let calls = Arc::new(AtomicUsize::new(0));

    let panicking = ExpirationPolicy::absolute_in(Duration::from_millis(50))
        .on_expired(|_| panic!("callback failure"));
    cache.set("first", "v".to_string(), Some(panicking)).unwrap();

    assert!(wait_for(Duration::from_secs(3), || cache.count() == 0));

    let seen = Arc::clone(&calls);
    let counting = ExpirationPolicy::absolute_in(Duration::from_millis(50)).on_expired(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    cache.set("second", "v".to_string(), Some(counting)).unwrap();

    assert!(wait_for(Duration::from_secs(3), || calls.load(Ordering::SeqCst) == 1));
    assert_eq!(cache.count(), 0);
}

#[test]
fn test_sweep_runs_on_dedicated_thread() {
    let cache = create_test_cache(Duration::from_millis(50));
    let (tx, rx) = mpsc::channel::<bool>();
    let tx = parking_lot::Mutex::new(tx);

    let policy = ExpirationPolicy::absolute_in(Duration::from_millis(50)).on_expired(move |_| {
        let name = thread::current().name().map(str::to_string);
        let _ = tx
            .lock()
            .send(name.as_deref() != Some(expiring_cache::SWEEPER_THREAD_NAME));
    });
    cache.set("k", "v".to_string(), Some(policy)).unwrap();

    let off_sweeper = rx.recv_timeout(Duration::from_secs(3)).unwrap();
    assert!(off_sweeper, "callback must not run on the sweeper thread");
}

// == Disposal ==

#[test]
fn test_dispose_stops_sweeps() {
    init_tracing();
    let cache: CacheManager<String> = CacheManager::with_config(
        CacheConfig::default()
            .with_sweep_interval(Duration::from_millis(50))
            .with_clear_on_dispose(false),
    )
    .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let policy = ExpirationPolicy::absolute_in(Duration::from_millis(200)).on_expired(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    cache.set("k", "v".to_string(), Some(policy)).unwrap();

    cache.dispose();
    sleep(Duration::from_millis(500));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(cache.count(), 1, "no sweep may run after dispose");
    assert!(!cache.contains("k"), "reads still expire lazily");
}

#[test]
fn test_dispose_races_with_sweep() {
    for _ in 0..10 {
        let cache = create_test_cache(Duration::from_millis(1));
        for i in 0..100 {
            let policy = ExpirationPolicy::absolute_in(Duration::from_millis(i % 5));
            cache.set(format!("key{}", i), "v".to_string(), Some(policy)).unwrap();
        }
        sleep(Duration::from_millis(3));
        cache.dispose();
        assert!(cache.is_disposed());
        assert!(cache.is_empty());
    }
}

#[tokio::test]
async fn test_manager_inside_async_runtime() {
    let cache = create_test_cache(Duration::from_millis(50));
    cache
        .set(
            "k",
            "v".to_string(),
            Some(ExpirationPolicy::absolute_in(Duration::from_millis(50))),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cache.count(), 0);
    drop(cache);
}

// == Concurrency ==

#[test]
fn test_concurrent_mixed_operations() {
    let cache = Arc::new(create_test_cache(Duration::from_millis(5)));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("key{}", i % 20);
                    match (t + i) % 5 {
                        0 => {
                            let policy = ExpirationPolicy::absolute_in(Duration::from_millis(2));
                            cache.set(key, format!("{}", i), Some(policy)).unwrap();
                        }
                        1 => {
                            cache.add(key, format!("{}", i), None).unwrap();
                        }
                        2 => {
                            cache.get(&key).unwrap();
                        }
                        3 => {
                            cache.remove(&key).unwrap();
                        }
                        _ => {
                            cache.get_or_add(&key, || format!("{}", i), None).unwrap();
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(cache.count() <= 20);
}
