use std::sync::Arc;

use anyhow::{Result, ensure};
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};

mod entry;
mod index;

use entry::CacheEntry;
use index::CacheIndex;

/// Result of offering a response to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored { evicted: usize, replaced: bool },
    TooLarge { size: usize, limit: usize },
    Empty,
}

impl StoreOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StoreOutcome::Stored { .. } => "stored",
            StoreOutcome::TooLarge { .. } => "too_large",
            StoreOutcome::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes_in_use: usize,
    pub capacity: usize,
}

/// Shared in-memory response cache keyed by the exact request target.
///
/// Every operation takes the internal lock for the duration of one lookup or one
/// evict-then-insert sequence and never across I/O. Eviction is oldest-insertion first.
#[derive(Clone)]
pub struct HttpCache {
    state: Arc<CacheState>,
}

#[derive(Debug)]
struct CacheState {
    index: Mutex<CacheIndex>,
    max_object_size: usize,
}

impl HttpCache {
    pub fn new(capacity: usize, max_object_size: usize) -> Result<Self> {
        ensure!(capacity > 0, "cache capacity must be greater than zero");
        ensure!(
            max_object_size > 0,
            "maximum object size must be greater than zero"
        );
        Ok(Self {
            state: Arc::new(CacheState {
                index: Mutex::new(CacheIndex::new(capacity)),
                max_object_size: max_object_size.min(capacity),
            }),
        })
    }

    /// Returns the stored payload for `uri`. The returned `Bytes` shares the stored buffer,
    /// so the caller can write it out after the lock is released.
    pub fn lookup(&self, uri: &str) -> Option<Bytes> {
        let payload = {
            let guard = self.state.index.lock();
            guard.get(uri).map(|entry| entry.payload.clone())
        };
        crate::metrics::record_cache_lookup(payload.is_some());
        trace!(uri, hit = payload.is_some(), "cache lookup");
        payload
    }

    /// Stores `payload` under `uri`, replacing any previous entry for the same URI.
    ///
    /// Payloads over the object-size limit are refused, and any older entry for that URI is
    /// dropped so a stale copy is never served in place of the oversized response.
    pub fn insert(&self, uri: &str, payload: Bytes) -> StoreOutcome {
        self.insert_and_publish(uri, payload).0
    }

    /// Inserts and returns the usage published to the metrics, read under the same lock
    /// as the insert.
    fn insert_and_publish(&self, uri: &str, payload: Bytes) -> (StoreOutcome, Option<CacheStats>) {
        let size = payload.len();
        if size == 0 {
            return (StoreOutcome::Empty, None);
        }

        let (outcome, usage) = {
            let mut guard = self.state.index.lock();
            let outcome = if size > self.state.max_object_size || size > guard.capacity() {
                guard.remove(uri);
                StoreOutcome::TooLarge {
                    size,
                    limit: self.state.max_object_size,
                }
            } else {
                let report = guard.insert(uri.to_string(), CacheEntry::new(payload));
                if !report.evicted.is_empty() {
                    debug!(uri, evicted = ?report.evicted, "evicted cache entries");
                }
                crate::metrics::record_cache_evictions(report.evicted.len());
                StoreOutcome::Stored {
                    evicted: report.evicted.len(),
                    replaced: report.replaced,
                }
            };
            (outcome, publish_usage(&guard))
        };

        crate::metrics::record_cache_store(outcome.label());
        (outcome, Some(usage))
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.state.index.lock().get(uri).is_some()
    }

    pub fn max_object_size(&self) -> usize {
        self.state.max_object_size
    }

    pub fn stats(&self) -> CacheStats {
        stats_of(&self.state.index.lock())
    }

    /// Resident URIs in eviction order.
    pub fn uris_oldest_first(&self) -> Vec<String> {
        self.state.index.lock().uris_oldest_first()
    }

    /// Checks, under the lock, that the running byte total equals the sum of resident
    /// entries and stays within capacity.
    pub fn is_consistent(&self) -> bool {
        let guard = self.state.index.lock();
        guard.bytes_in_use() == guard.resident_bytes() && guard.bytes_in_use() <= guard.capacity()
    }
}

fn stats_of(index: &CacheIndex) -> CacheStats {
    CacheStats {
        entries: index.len(),
        bytes_in_use: index.bytes_in_use(),
        capacity: index.capacity(),
    }
}

/// Sets the usage gauges from `index`. Callers hold the cache lock, so concurrent writers
/// publish in the same order they mutate.
fn publish_usage(index: &CacheIndex) -> CacheStats {
    let stats = stats_of(index);
    crate::metrics::set_cache_usage(stats.entries, stats.bytes_in_use);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::thread;

    impl HttpCache {
        fn remove(&self, uri: &str) -> bool {
            let mut guard = self.state.index.lock();
            let removed = guard.remove(uri).is_some();
            publish_usage(&guard);
            removed
        }
    }

    fn payload(size: usize, fill: u8) -> Bytes {
        Bytes::from(vec![fill; size])
    }

    #[test]
    fn lookup_returns_inserted_bytes() {
        let cache = HttpCache::new(1024, 512).unwrap();
        let body = Bytes::from_static(b"HTTP/1.0 200 OK\r\n\r\nhello");
        assert!(cache.lookup("http://a.com/x").is_none());

        let outcome = cache.insert("http://a.com/x", body.clone());
        assert_eq!(
            outcome,
            StoreOutcome::Stored {
                evicted: 0,
                replaced: false
            }
        );
        assert_eq!(cache.lookup("http://a.com/x"), Some(body));
    }

    #[test]
    fn keys_are_exact_and_case_sensitive() {
        let cache = HttpCache::new(1024, 512).unwrap();
        cache.insert("http://a.com/X", payload(4, b'a'));
        assert!(cache.lookup("http://a.com/x").is_none());
        assert!(cache.lookup("http://a.com/X/").is_none());
        assert!(cache.lookup("a.com/X").is_none());
        assert!(cache.lookup("http://a.com/X").is_some());
    }

    #[test]
    fn rejects_payload_over_object_limit() {
        let cache = HttpCache::new(1024, 100).unwrap();
        let outcome = cache.insert("big", payload(101, b'b'));
        assert_eq!(
            outcome,
            StoreOutcome::TooLarge {
                size: 101,
                limit: 100
            }
        );
        assert!(!cache.contains("big"));
        assert_eq!(cache.stats().bytes_in_use, 0);
    }

    #[test]
    fn oversized_reinsert_drops_previous_entry() {
        let cache = HttpCache::new(1024, 100).unwrap();
        cache.insert("uri", payload(50, b'a'));
        assert!(cache.contains("uri"));

        cache.insert("uri", payload(200, b'b'));
        assert!(!cache.contains("uri"));
        assert_eq!(cache.stats().bytes_in_use, 0);
    }

    #[test]
    fn object_limit_is_clamped_to_capacity() {
        let cache = HttpCache::new(64, 1024).unwrap();
        assert_eq!(cache.max_object_size(), 64);
        assert!(matches!(
            cache.insert("too-big", payload(65, b'x')),
            StoreOutcome::TooLarge { .. }
        ));
    }

    #[test]
    fn ignores_empty_payload() {
        let cache = HttpCache::new(64, 64).unwrap();
        assert_eq!(cache.insert("empty", Bytes::new()), StoreOutcome::Empty);
        assert!(!cache.contains("empty"));
    }

    #[test]
    fn forced_overflow_evicts_oldest_first() {
        let cache = HttpCache::new(300, 100).unwrap();
        cache.insert("first", payload(100, b'1'));
        cache.insert("second", payload(100, b'2'));
        cache.insert("third", payload(100, b'3'));
        assert_eq!(cache.uris_oldest_first(), vec!["first", "second", "third"]);

        let outcome = cache.insert("fourth", payload(100, b'4'));
        assert_eq!(
            outcome,
            StoreOutcome::Stored {
                evicted: 1,
                replaced: false
            }
        );
        assert!(!cache.contains("first"));
        assert_eq!(cache.uris_oldest_first(), vec!["second", "third", "fourth"]);

        cache.insert("fifth", payload(100, b'5'));
        assert!(!cache.contains("second"));
        assert!(cache.contains("third"));
    }

    #[test]
    fn reinsert_replaces_without_duplicating() {
        let cache = HttpCache::new(300, 100).unwrap();
        cache.insert("uri", payload(40, b'a'));
        let outcome = cache.insert("uri", payload(60, b'b'));
        assert_eq!(
            outcome,
            StoreOutcome::Stored {
                evicted: 0,
                replaced: true
            }
        );
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.bytes_in_use, 60);
        assert_eq!(cache.lookup("uri"), Some(payload(60, b'b')));
    }

    #[test]
    fn remove_releases_bytes() {
        let cache = HttpCache::new(300, 100).unwrap();
        cache.insert("a", payload(10, b'a'));
        cache.insert("b", payload(10, b'b'));
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.stats().bytes_in_use, 10);
        assert!(cache.remove("b"));
        assert_eq!(cache.stats().entries, 0);
        assert!(cache.is_consistent());
    }

    #[test]
    fn published_usage_matches_state_after_each_insert() {
        let cache = HttpCache::new(250, 100).unwrap();
        let mut expected_bytes = 0;
        for (i, size) in [100usize, 100, 40, 100, 10].into_iter().enumerate() {
            let (outcome, usage) = cache.insert_and_publish(&format!("uri-{i}"), payload(size, b'u'));
            let usage = usage.expect("stored payloads publish usage");
            assert!(matches!(outcome, StoreOutcome::Stored { .. }));
            assert_eq!(usage, cache.stats());
            assert!(usage.bytes_in_use <= usage.capacity);
            expected_bytes = usage.bytes_in_use;
        }
        assert_eq!(cache.stats().bytes_in_use, expected_bytes);

        let (outcome, usage) = cache.insert_and_publish("uri-0", payload(200, b'x'));
        assert!(matches!(outcome, StoreOutcome::TooLarge { .. }));
        assert_eq!(usage, Some(cache.stats()));
        assert_eq!(cache.insert_and_publish("empty", Bytes::new()), (StoreOutcome::Empty, None));
    }

    #[test]
    fn concurrent_published_usage_never_exceeds_capacity() {
        const CAPACITY: usize = 2048;
        let cache = HttpCache::new(CAPACITY, 512).unwrap();
        let handles: Vec<_> = (0..8u64)
            .map(|seed| {
                let cache = cache.clone();
                thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed);
                    for _ in 0..300 {
                        let uri = format!("http://origin/{}", rng.gen_range(0..16));
                        let size = rng.gen_range(1..=512);
                        let (_, usage) = cache.insert_and_publish(&uri, payload(size, 0));
                        let usage = usage.expect("non-empty payload");
                        assert!(usage.bytes_in_use <= CAPACITY);
                        assert!(usage.entries >= 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread panicked");
        }
        assert!(cache.is_consistent());
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(HttpCache::new(0, 10).is_err());
        assert!(HttpCache::new(10, 0).is_err());
    }

    #[test]
    fn concurrent_inserts_keep_totals_consistent() {
        const THREADS: u64 = 8;
        const OPS: usize = 500;
        const CAPACITY: usize = 4096;

        let cache = HttpCache::new(CAPACITY, 1024).unwrap();
        let handles: Vec<_> = (0..THREADS)
            .map(|seed| {
                let cache = cache.clone();
                thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed);
                    for _ in 0..OPS {
                        let uri = format!("http://origin/{}", rng.gen_range(0..32));
                        match rng.gen_range(0..10) {
                            0 => {
                                cache.remove(&uri);
                            }
                            1..=3 => {
                                let _ = cache.lookup(&uri);
                            }
                            _ => {
                                let size = rng.gen_range(1..=1100);
                                cache.insert(&uri, Bytes::from(vec![0u8; size]));
                            }
                        }
                        assert!(cache.is_consistent());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker thread panicked");
        }

        let stats = cache.stats();
        assert!(stats.bytes_in_use <= CAPACITY);
        assert!(cache.is_consistent());
        for uri in cache.uris_oldest_first() {
            let entry = cache.lookup(&uri).expect("resident entry");
            assert!(entry.len() <= 1024);
        }
    }
}
