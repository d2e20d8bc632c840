//! The fingerprint-keyed query result cache.
//!
//! Maps canonical cache keys to computed results. Entries can be pinned
//! (exempt from eviction, surviving `clear_unpinned`), eviction is LRU
//! bounded both in entries and bytes, and for every key at most one
//! producer runs at any instant: concurrent requesters of a key that is
//! being computed wait on the in-progress slot and observe either the
//! produced result or the producer's error. The internal lock is never held
//! across a producer call.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::error::QueryError;
use crate::result::SharedResult;

/// Result cache sizing.
#[derive(Debug, Clone, Serialize)]
pub struct CacheConfig {
    /// Maximum number of cached results.
    pub max_num_entries: usize,
    /// Soft byte limit over all unpinned plus pinned entries. Pinned
    /// entries may push usage past it.
    pub max_size_bytes: usize,
    /// Largest single entry admitted without pinning.
    pub max_size_single_entry: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_num_entries: 1000,
            max_size_bytes: 1 << 30,
            max_size_single_entry: 1 << 28,
        }
    }
}

/// How a request was satisfied; recorded in the runtime information tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheStatus {
    /// The producer ran for this request.
    Computed,
    /// Served from the cache.
    CachedNotPinned,
    /// Served from the cache, entry is pinned.
    CachedPinned,
}

/// Counters exposed through the statistics endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStatistics {
    pub num_entries: usize,
    pub num_pinned_entries: usize,
    pub size_bytes: usize,
    pub pinned_size_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry {
    result: SharedResult,
    size_bytes: usize,
    pinned: bool,
    last_access: u64,
}

/// Completion slot for a key whose producer is still running.
#[derive(Default)]
struct InProgress {
    outcome: Mutex<Option<Result<SharedResult, QueryError>>>,
    done: Condvar,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Entry>,
    in_progress: HashMap<String, Arc<InProgress>>,
    size_bytes: usize,
    access_counter: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Shared, thread-safe result cache.
pub struct QueryResultCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl QueryResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Return the cached result for `key`, or run `producer` to compute it.
    ///
    /// The producer runs without the cache lock held. If another request is
    /// already producing this key, the call blocks until that producer
    /// finishes and then shares its outcome, error included.
    pub fn compute_if_absent<F>(
        &self,
        key: &str,
        pin: bool,
        producer: F,
    ) -> Result<(SharedResult, CacheStatus), QueryError>
    where
        F: FnOnce() -> Result<SharedResult, QueryError>,
    {
        let slot = {
            let mut state = self.state.lock();
            if state.entries.contains_key(key) {
                state.access_counter += 1;
                state.hits += 1;
                let counter = state.access_counter;
                let entry = state.entries.get_mut(key).expect("entry just seen");
                entry.last_access = counter;
                if pin && !entry.pinned {
                    entry.pinned = true;
                }
                let status = if entry.pinned {
                    CacheStatus::CachedPinned
                } else {
                    CacheStatus::CachedNotPinned
                };
                return Ok((entry.result.clone(), status));
            }
            if let Some(existing) = state.in_progress.get(key) {
                let slot = existing.clone();
                drop(state);
                return self.await_in_progress(&slot);
            }
            state.misses += 1;
            let slot = Arc::new(InProgress::default());
            state.in_progress.insert(key.to_string(), slot.clone());
            slot
        };

        let produced = producer();
        let mut state = self.state.lock();
        state.in_progress.remove(key);
        let outcome = match produced {
            Ok(result) => self
                .admit(&mut state, key, result.clone(), pin)
                .map(|()| result),
            Err(err) => Err(err),
        };
        drop(state);

        *slot.outcome.lock() = Some(outcome.clone());
        slot.done.notify_all();
        outcome.map(|result| (result, CacheStatus::Computed))
    }

    fn await_in_progress(
        &self,
        slot: &Arc<InProgress>,
    ) -> Result<(SharedResult, CacheStatus), QueryError> {
        let mut outcome = slot.outcome.lock();
        while outcome.is_none() {
            slot.done.wait(&mut outcome);
        }
        match outcome.as_ref().expect("waited for outcome") {
            Ok(result) => {
                self.state.lock().hits += 1;
                Ok((result.clone(), CacheStatus::Computed))
            }
            Err(err) => Err(err.clone()),
        }
    }

    /// Insert a produced result, evicting LRU unpinned entries to make
    /// room. Pinned inserts may exceed the soft byte limit.
    fn admit(
        &self,
        state: &mut CacheState,
        key: &str,
        result: SharedResult,
        pin: bool,
    ) -> Result<(), QueryError> {
        let size_bytes = result.size_bytes();
        if !pin && size_bytes > self.config.max_size_single_entry {
            return Err(QueryError::CacheFull(format!(
                "unpinned result of {size_bytes} bytes exceeds the single-entry limit"
            )));
        }
        while state.entries.len() >= self.config.max_num_entries
            || state.size_bytes + size_bytes > self.config.max_size_bytes
        {
            if !Self::evict_lru_unpinned(state) {
                if pin {
                    // Pinned entries are admitted past the soft limit.
                    break;
                }
                return Err(QueryError::CacheFull(
                    "only pinned entries remain and the new result is not pinned".into(),
                ));
            }
        }
        state.access_counter += 1;
        let last_access = state.access_counter;
        state.size_bytes += size_bytes;
        state.entries.insert(
            key.to_string(),
            Entry {
                result,
                size_bytes,
                pinned: pin,
                last_access,
            },
        );
        tracing::debug!(key, size_bytes, pinned = pin, "cached query result");
        Ok(())
    }

    fn evict_lru_unpinned(state: &mut CacheState) -> bool {
        let victim = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.pinned)
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => {
                let entry = state.entries.remove(&key).expect("victim just seen");
                state.size_bytes -= entry.size_bytes;
                state.evictions += 1;
                tracing::debug!(key, "evicted cache entry");
                true
            }
            None => false,
        }
    }

    /// Drop everything, pinned entries included.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.size_bytes = 0;
    }

    /// Drop only entries that are not pinned.
    pub fn clear_unpinned(&self) {
        let mut state = self.state.lock();
        let mut freed = 0usize;
        state.entries.retain(|_, entry| {
            if entry.pinned {
                true
            } else {
                freed += entry.size_bytes;
                false
            }
        });
        state.size_bytes -= freed;
    }

    pub fn num_entries(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True iff a finished result is cached under `key`. Does not touch the
    /// LRU order.
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    pub fn statistics(&self) -> CacheStatistics {
        let state = self.state.lock();
        let (num_pinned, pinned_bytes) = state
            .entries
            .values()
            .filter(|e| e.pinned)
            .fold((0usize, 0usize), |(n, b), e| (n + 1, b + e.size_bytes));
        CacheStatistics {
            num_entries: state.entries.len(),
            num_pinned_entries: num_pinned,
            size_bytes: state.size_bytes,
            pinned_size_bytes: pinned_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

impl Default for QueryResultCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::QueryResult;
    use corvus_core::{Id, IdTable, LocalVocab, TrackedAllocator};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn result_with_rows(rows: usize) -> SharedResult {
        let mut table = IdTable::with_columns(1, TrackedAllocator::unlimited());
        for i in 0..rows {
            table.push_row(&[Id::from_int(i as i64)]).unwrap();
        }
        Arc::new(QueryResult::new(table, vec![0], LocalVocab::new()))
    }

    #[test]
    fn second_request_is_a_hit() {
        let cache = QueryResultCache::default();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let (result, _) = cache
                .compute_if_absent("k", false, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(result_with_rows(4))
                })
                .unwrap();
            assert_eq!(result.id_table().num_rows(), 4);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.statistics();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn lru_eviction_spares_pinned_entries() {
        let cache = QueryResultCache::new(CacheConfig {
            max_num_entries: 2,
            ..CacheConfig::default()
        });
        cache
            .compute_if_absent("pinned", true, || Ok(result_with_rows(1)))
            .unwrap();
        cache
            .compute_if_absent("old", false, || Ok(result_with_rows(1)))
            .unwrap();
        cache
            .compute_if_absent("new", false, || Ok(result_with_rows(1)))
            .unwrap();
        let stats = cache.statistics();
        assert_eq!(stats.num_entries, 2);
        assert_eq!(stats.num_pinned_entries, 1);
        assert_eq!(stats.evictions, 1);
        // "old" was the LRU unpinned entry.
        let recomputed = AtomicUsize::new(0);
        cache
            .compute_if_absent("old", false, || {
                recomputed.fetch_add(1, Ordering::SeqCst);
                Ok(result_with_rows(1))
            })
            .unwrap();
        assert_eq!(recomputed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_unpinned_keeps_pins() {
        let cache = QueryResultCache::default();
        cache
            .compute_if_absent("pinned", true, || Ok(result_with_rows(1)))
            .unwrap();
        cache
            .compute_if_absent("plain", false, || Ok(result_with_rows(1)))
            .unwrap();
        cache.clear_unpinned();
        assert_eq!(cache.num_entries(), 1);
        cache.clear();
        assert_eq!(cache.num_entries(), 0);
    }

    #[test]
    fn cache_full_when_only_pins_remain() {
        let cache = QueryResultCache::new(CacheConfig {
            max_num_entries: 1,
            ..CacheConfig::default()
        });
        cache
            .compute_if_absent("pinned", true, || Ok(result_with_rows(1)))
            .unwrap();
        let outcome = cache.compute_if_absent("unpinned", false, || Ok(result_with_rows(1)));
        match outcome {
            Err(QueryError::CacheFull(_)) => {}
            other => panic!("expected CacheFull, got {other:?}"),
        }
        // A pinned insert may exceed the limits instead.
        cache
            .compute_if_absent("second-pin", true, || Ok(result_with_rows(1)))
            .unwrap();
        assert_eq!(cache.num_entries(), 2);
    }

    #[test]
    fn concurrent_requests_share_one_producer_run() {
        let cache = Arc::new(QueryResultCache::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let (result, _) = cache
                        .compute_if_absent("expensive", false, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(30));
                            Ok(result_with_rows(7))
                        })
                        .unwrap();
                    result.id_table().num_rows()
                })
            })
            .collect();
        for worker in workers {
            assert_eq!(worker.join().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn waiters_observe_the_producers_error() {
        let cache = Arc::new(QueryResultCache::default());
        let barrier = Arc::new(Barrier::new(2));
        let waiter = {
            let cache = cache.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                // Give the producer a head start into its sleep.
                std::thread::sleep(std::time::Duration::from_millis(10));
                cache.compute_if_absent("failing", false, || Ok(result_with_rows(1)))
            })
        };
        barrier.wait();
        let produced = cache.compute_if_absent("failing", false, || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            Err(QueryError::Index("broken permutation".into()))
        });
        assert!(matches!(produced, Err(QueryError::Index(_))));
        match waiter.join().unwrap() {
            Err(QueryError::Index(message)) => assert_eq!(message, "broken permutation"),
            other => panic!("waiter saw {other:?}"),
        }
        // The failure must not leave a cache entry or a stuck sentinel.
        assert_eq!(cache.num_entries(), 0);
        cache
            .compute_if_absent("failing", false, || Ok(result_with_rows(2)))
            .unwrap();
    }
}
