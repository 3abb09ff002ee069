use crate::Fingerprint;
use argus_core::{FileId, ScopeId};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of a cached analysis outcome.
///
/// The fingerprint is the cache key proper; scope and contributing files are
/// kept alongside the entry so that change-driven invalidation and scope
/// teardown can find it again without recomputing fingerprints.
#[derive(Debug, Clone)]
pub struct CacheKey {
    pub fingerprint: Fingerprint,
    pub scope: ScopeId,
    pub files: BTreeSet<FileId>,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Maximum number of memoized entries before LRU eviction kicks in.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 512 }
    }
}

/// Hit/miss counters and current size, exposed for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct Entry<V> {
    value: Arc<V>,
    scope: ScopeId,
    files: BTreeSet<FileId>,
    last_used: u64,
}

struct CacheInner<V> {
    entries: HashMap<Fingerprint, Entry<V>>,
    in_flight: HashSet<Fingerprint>,
    tick: u64,
}

/// In-memory memoization of analysis outcomes keyed by content fingerprint.
///
/// Guarantees at most one computation in flight per fingerprint: concurrent
/// callers for the same fingerprint wait on the in-flight computation instead
/// of duplicating it. Failed computations are never memoized; a waiter that
/// wakes up after a failure runs the computation itself.
///
/// There is no time-based expiry. Entries disappear through change-driven
/// invalidation, scope teardown, or LRU eviction once the configured capacity
/// is exceeded. The cache holds no persistent state and is rebuilt from
/// scratch on backend restart.
pub struct ResultCache<V> {
    inner: Mutex<CacheInner<V>>,
    ready: Condvar,
    hits: AtomicU64,
    misses: AtomicU64,
    capacity: usize,
}

impl<V> ResultCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                in_flight: HashSet::new(),
                tick: 0,
            }),
            ready: Condvar::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            capacity: config.capacity.max(1),
        }
    }

    /// Return the memoized value for `key`, computing it at most once across
    /// concurrent callers.
    ///
    /// The computation runs outside the cache lock, so unrelated fingerprints
    /// never serialize on each other. An `Err` from `compute` is returned to
    /// the caller and leaves no trace in the cache.
    pub fn get_or_compute<E>(
        &self,
        key: &CacheKey,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        loop {
            let mut inner = self.inner.lock();
            inner.tick += 1;
            let tick = inner.tick;
            if let Some(entry) = inner.entries.get_mut(&key.fingerprint) {
                entry.last_used = tick;
                let value = Arc::clone(&entry.value);
                drop(inner);
                let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(
                    target = "argus.cache",
                    fingerprint = %key.fingerprint,
                    hits,
                    misses = self.misses.load(Ordering::Relaxed),
                    "cache hit"
                );
                return Ok(value);
            }
            if inner.in_flight.contains(&key.fingerprint) {
                // Another caller is computing this fingerprint; wait for it to
                // publish a value (or fail) and re-check.
                self.ready.wait(&mut inner);
                continue;
            }
            inner.in_flight.insert(key.fingerprint.clone());
            break;
        }

        let misses = self.misses.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            target = "argus.cache",
            fingerprint = %key.fingerprint,
            hits = self.hits.load(Ordering::Relaxed),
            misses,
            "cache miss, computing"
        );

        // Clears the in-flight marker if `compute` fails or unwinds, so the
        // fingerprint is never poisoned for later callers.
        let guard = InFlightGuard { cache: self, key };
        let value = compute()?;
        let value = Arc::new(value);

        let mut inner = self.inner.lock();
        inner.in_flight.remove(&key.fingerprint);
        let tick = inner.tick;
        inner.entries.insert(
            key.fingerprint.clone(),
            Entry {
                value: Arc::clone(&value),
                scope: key.scope.clone(),
                files: key.files.clone(),
                last_used: tick,
            },
        );
        self.evict_to_capacity(&mut inner);
        drop(inner);
        self.ready.notify_all();
        std::mem::forget(guard);

        Ok(value)
    }

    /// Drop the entry for an exact fingerprint. Returns true if one existed.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        let removed = self.inner.lock().entries.remove(fingerprint).is_some();
        if removed {
            tracing::debug!(
                target = "argus.cache",
                fingerprint = %fingerprint,
                "invalidated cache entry"
            );
        }
        removed
    }

    /// Drop every entry whose contributing file set intersects `files`.
    ///
    /// Entries recorded with an empty file set cover their whole scope and are
    /// conservatively dropped on any file invalidation. Returns the number of
    /// entries removed.
    pub fn invalidate_files(&self, files: &BTreeSet<FileId>) -> usize {
        self.invalidate_files_keeping(files, None)
    }

    /// Like [`ResultCache::invalidate_files`], but keeps the entry for `keep`.
    ///
    /// Used by the worker loop after an analysis completes: older entries
    /// overlapping the analyzed files are stale, while the entry just computed
    /// reflects the current contents.
    pub fn invalidate_files_keeping(
        &self,
        files: &BTreeSet<FileId>,
        keep: Option<&Fingerprint>,
    ) -> usize {
        if files.is_empty() {
            return 0;
        }
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|fingerprint, entry| {
            if Some(fingerprint) == keep {
                return true;
            }
            let overlaps = entry.files.is_empty() || !entry.files.is_disjoint(files);
            !overlaps
        });
        let removed = before - inner.entries.len();
        if removed > 0 {
            tracing::debug!(
                target = "argus.cache",
                removed,
                touched_files = files.len(),
                "invalidated cache entries overlapping changed files"
            );
        }
        removed
    }

    /// Drop every entry belonging to `scope` (scope teardown).
    pub fn invalidate_scope(&self, scope: &ScopeId) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.scope != *scope);
        let removed = before - inner.entries.len();
        if removed > 0 {
            tracing::debug!(
                target = "argus.cache",
                scope = %scope,
                removed,
                "dropped cache entries for unregistered scope"
            );
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.inner.lock().entries.len(),
        }
    }

    fn evict_to_capacity(&self, inner: &mut CacheInner<V>) {
        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(fingerprint, _)| fingerprint.clone())
            else {
                return;
            };
            inner.entries.remove(&oldest);
            tracing::debug!(
                target = "argus.cache",
                fingerprint = %oldest,
                capacity = self.capacity,
                "evicted least recently used cache entry"
            );
        }
    }
}

impl<V> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

struct InFlightGuard<'a, V> {
    cache: &'a ResultCache<V>,
    key: &'a CacheKey,
}

impl<V> Drop for InFlightGuard<'_, V> {
    fn drop(&mut self) {
        let mut inner = self.cache.inner.lock();
        inner.in_flight.remove(&self.key.fingerprint);
        drop(inner);
        self.cache.ready.notify_all();
    }
}
