use argus_cache::{CacheConfig, CacheKey, Fingerprint, ResultCache};
use argus_core::{FileId, ScopeId};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn key(scope: &str, fingerprint: &str, files: &[&str]) -> CacheKey {
    CacheKey {
        fingerprint: Fingerprint::from_bytes(fingerprint),
        scope: ScopeId::new(scope),
        files: files.iter().map(|f| FileId::new(*f)).collect(),
    }
}

#[test]
fn memoizes_per_fingerprint() {
    let cache: ResultCache<String> = ResultCache::default();
    let calls = AtomicUsize::new(0);
    let k = key("scope", "a", &["f1"]);

    for _ in 0..3 {
        let value = cache
            .get_or_compute::<()>(&k, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("value".to_owned())
            })
            .unwrap();
        assert_eq!(*value, "value");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);
}

#[test]
fn concurrent_callers_share_one_computation() {
    const CALLERS: usize = 8;
    let cache: Arc<ResultCache<String>> = Arc::new(ResultCache::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(CALLERS));
    let k = key("scope", "shared", &["f1"]);

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            let k = k.clone();
            std::thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_compute::<()>(&k, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Keep the computation in flight long enough for the
                        // other callers to pile up behind it.
                        std::thread::sleep(Duration::from_millis(50));
                        Ok("value".to_owned())
                    })
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(*handle.join().unwrap(), "value");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, CALLERS as u64 - 1);
}

#[test]
fn failed_computation_is_not_memoized() {
    let cache: ResultCache<String> = ResultCache::default();
    let k = key("scope", "a", &["f1"]);

    let err = cache.get_or_compute(&k, || Err::<String, _>("boom"));
    assert_eq!(err.unwrap_err(), "boom");

    // The failure left no entry nor in-flight marker behind; the next call
    // recomputes and may succeed.
    let value = cache
        .get_or_compute::<()>(&k, || Ok("recovered".to_owned()))
        .unwrap();
    assert_eq!(*value, "recovered");
    assert_eq!(cache.stats().misses, 2);
}

#[test]
fn invalidating_overlapping_files_forces_recompute() {
    let cache: ResultCache<String> = ResultCache::default();
    let k = key("scope", "a", &["f1", "f2"]);
    let calls = AtomicUsize::new(0);
    let compute = || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, ()>("value".to_owned())
    };

    cache.get_or_compute(&k, compute).unwrap();

    let touched: BTreeSet<FileId> = [FileId::new("f2"), FileId::new("f9")].into();
    assert_eq!(cache.invalidate_files(&touched), 1);

    cache
        .get_or_compute::<()>(&k, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("value".to_owned())
        })
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn invalidation_ignores_disjoint_files() {
    let cache: ResultCache<String> = ResultCache::default();
    let k = key("scope", "a", &["f1"]);
    cache
        .get_or_compute::<()>(&k, || Ok("value".to_owned()))
        .unwrap();

    let touched: BTreeSet<FileId> = [FileId::new("unrelated")].into();
    assert_eq!(cache.invalidate_files(&touched), 0);
    assert_eq!(cache.stats().entries, 1);
}

#[test]
fn whole_scope_entries_are_dropped_on_any_file_change() {
    let cache: ResultCache<String> = ResultCache::default();
    // Empty contributing file set = "all files in scope".
    let k = key("scope", "whole", &[]);
    cache
        .get_or_compute::<()>(&k, || Ok("value".to_owned()))
        .unwrap();

    let touched: BTreeSet<FileId> = [FileId::new("any")].into();
    assert_eq!(cache.invalidate_files(&touched), 1);
}

#[test]
fn keeping_a_fingerprint_survives_file_invalidation() {
    let cache: ResultCache<String> = ResultCache::default();
    let stale = key("scope", "old", &["f1"]);
    let fresh = key("scope", "new", &["f1"]);
    cache
        .get_or_compute::<()>(&stale, || Ok("old".to_owned()))
        .unwrap();
    cache
        .get_or_compute::<()>(&fresh, || Ok("new".to_owned()))
        .unwrap();

    let touched: BTreeSet<FileId> = [FileId::new("f1")].into();
    assert_eq!(
        cache.invalidate_files_keeping(&touched, Some(&fresh.fingerprint)),
        1
    );
    assert_eq!(cache.stats().entries, 1);
}

#[test]
fn scope_teardown_drops_only_that_scope() {
    let cache: ResultCache<String> = ResultCache::default();
    cache
        .get_or_compute::<()>(&key("a", "fa", &["f1"]), || Ok("a".to_owned()))
        .unwrap();
    cache
        .get_or_compute::<()>(&key("b", "fb", &["f1"]), || Ok("b".to_owned()))
        .unwrap();

    assert_eq!(cache.invalidate_scope(&ScopeId::new("a")), 1);
    assert_eq!(cache.stats().entries, 1);
}

#[test]
fn evicts_least_recently_used_beyond_capacity() {
    let cache: ResultCache<String> = ResultCache::new(CacheConfig { capacity: 2 });
    let k1 = key("scope", "one", &["f1"]);
    let k2 = key("scope", "two", &["f2"]);
    let k3 = key("scope", "three", &["f3"]);

    cache
        .get_or_compute::<()>(&k1, || Ok("1".to_owned()))
        .unwrap();
    cache
        .get_or_compute::<()>(&k2, || Ok("2".to_owned()))
        .unwrap();
    // Touch k1 so that k2 becomes the eviction candidate.
    cache
        .get_or_compute::<()>(&k1, || Ok("1-again".to_owned()))
        .unwrap();
    cache
        .get_or_compute::<()>(&k3, || Ok("3".to_owned()))
        .unwrap();

    assert_eq!(cache.stats().entries, 2);
    // k2 was evicted: computing it again is a miss.
    let calls = AtomicUsize::new(0);
    cache
        .get_or_compute::<()>(&k2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("2".to_owned())
        })
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // k1 survived.
    cache
        .get_or_compute::<()>(&k1, || unreachable!("k1 should still be cached"))
        .unwrap();
}
