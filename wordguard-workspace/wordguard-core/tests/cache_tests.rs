use lexicon::LexiconError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use wordguard_core::cache::{CacheSettings, LookupCache, loader};
use wordguard_core::services::MemorySink;

fn settings(refresh_ms: u64, retry_ms: u64, timeout_ms: u64) -> CacheSettings {
    CacheSettings {
        refresh_after: Duration::from_millis(refresh_ms),
        retry_after: Duration::from_millis(retry_ms),
        load_timeout: Duration::from_millis(timeout_ms),
    }
}

fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn concurrent_first_access_loads_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let cache: LookupCache<u32> = LookupCache::new(
        "test",
        loader(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            Ok(7)
        }),
        settings(60_000, 60_000, 2_000),
        Arc::new(MemorySink::new()),
    );

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                *cache.get("emoji").value()
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), 7);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn stale_entry_is_served_then_replaced_in_background() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let cache: LookupCache<usize> = LookupCache::new(
        "test",
        loader(move |_| Ok(c.fetch_add(1, Ordering::SeqCst) + 1)),
        settings(50, 50, 1_000),
        Arc::new(MemorySink::new()),
    );

    assert_eq!(*cache.get("k").value(), 1);
    thread::sleep(Duration::from_millis(80));

    // stale read returns right away with the old snapshot
    let stale = cache.get("k");
    assert_eq!(*stale.value(), 1);

    assert!(wait_until(Duration::from_secs(2), || *cache.get("k").value() >= 2));
    assert!(cache.get("k").generation() >= 2);
}

#[test]
fn background_reloads_are_single_flight() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let cache: LookupCache<usize> = LookupCache::new(
        "test",
        loader(move |_| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            if n > 0 {
                thread::sleep(Duration::from_millis(300));
            }
            Ok(n)
        }),
        settings(0, 0, 2_000),
        Arc::new(MemorySink::new()),
    );

    cache.get("k");
    for _ in 0..20 {
        cache.get("k");
    }
    assert!(cache.is_reloading("k"));
    assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) >= 2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn slow_loader_times_out_to_placeholder() {
    let sink = Arc::new(MemorySink::new());
    let cache: LookupCache<Vec<u32>> = LookupCache::new(
        "test",
        loader(|_| {
            thread::sleep(Duration::from_millis(1_000));
            Ok(vec![1])
        }),
        settings(60_000, 60_000, 50),
        sink.clone(),
    );

    let start = Instant::now();
    let lookup = cache.get("emoji");
    assert!(start.elapsed() < Duration::from_millis(800));
    assert!(!lookup.is_available());
    assert!(lookup.value().is_empty());

    let failures = sink.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "cache:emoji");
    assert!(failures[0].1.contains("timed out"));
}

#[test]
fn wedged_refresh_releases_in_flight_flag() {
    let first = Arc::new(AtomicBool::new(true));
    let f = first.clone();
    let cache: LookupCache<u32> = LookupCache::new(
        "test",
        loader(move |_| {
            if f.swap(false, Ordering::SeqCst) {
                Ok(1)
            } else {
                thread::sleep(Duration::from_secs(5));
                Ok(2)
            }
        }),
        settings(0, 0, 50),
        Arc::new(MemorySink::new()),
    );

    assert_eq!(*cache.get("k").value(), 1);
    cache.get("k");
    assert!(wait_until(Duration::from_secs(2), || !cache.is_reloading("k")));
    let after = cache.get("k");
    assert_eq!(*after.value(), 1);
    assert!(after.is_available());
}

#[test]
fn abandoned_loader_blocks_new_loads_for_its_key() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, p) = (active.clone(), peak.clone());
    let sink = Arc::new(MemorySink::new());
    let cache: LookupCache<u32> = LookupCache::new(
        "test",
        loader(move |_| {
            let now = a.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1_500));
            a.fetch_sub(1, Ordering::SeqCst);
            Ok(1)
        }),
        settings(10, 10, 50),
        sink.clone(),
    );

    for _ in 0..20 {
        assert!(!cache.get("emoji").is_available());
        thread::sleep(Duration::from_millis(30));
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    // a forced reload waits its turn too
    assert!(cache.is_loading("emoji"));
    let forced = cache.refresh_now("emoji");
    assert!(!forced.is_available());
    assert!(sink.failures().iter().any(|(_, r)| r == "load still in progress"));
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    assert!(wait_until(Duration::from_secs(5), || !cache.is_loading("emoji")));
}

#[test]
fn failed_refresh_keeps_previous_snapshot() {
    let fail = Arc::new(AtomicBool::new(false));
    let f = fail.clone();
    let sink = Arc::new(MemorySink::new());
    let cache: LookupCache<String> = LookupCache::new(
        "test",
        loader(move |key| {
            if f.load(Ordering::SeqCst) {
                Err(LexiconError::Unavailable(format!("{key} backend down")))
            } else {
                Ok("v1".to_string())
            }
        }),
        settings(60_000, 60_000, 1_000),
        sink.clone(),
    );

    assert_eq!(cache.get("terms").value(), "v1");
    fail.store(true, Ordering::SeqCst);

    let after = cache.refresh_now("terms");
    assert_eq!(after.value(), "v1");
    assert!(after.is_available());
    assert_eq!(after.failures(), 1);
    assert_eq!(after.generation(), 1);
    assert_eq!(sink.failed_stages(), vec!["cache:terms"]);

    fail.store(false, Ordering::SeqCst);
    let healed = cache.refresh_now("terms");
    assert_eq!(healed.failures(), 0);
    assert_eq!(healed.generation(), 2);
}

#[test]
fn readers_see_whole_snapshots_during_reloads() {
    let generation = Arc::new(AtomicUsize::new(0));
    let g = generation.clone();
    let cache: LookupCache<Vec<usize>> = LookupCache::new(
        "test",
        loader(move |_| {
            let n = g.fetch_add(1, Ordering::SeqCst);
            Ok(vec![n; 256])
        }),
        settings(0, 0, 1_000),
        Arc::new(MemorySink::new()),
    );
    cache.get("k");

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let lookup = cache.get("k");
                    let v = lookup.value();
                    assert!(v.iter().all(|x| *x == v[0]), "torn snapshot");
                }
            })
        })
        .collect();
    for _ in 0..20 {
        cache.refresh_now("k");
    }
    for r in readers {
        r.join().unwrap();
    }
    assert!(generation.load(Ordering::SeqCst) > 1);
}
