use lru::LruCache;

use super::CacheEntry;

/// Insertion-ordered map of URI to entry with a running byte total.
///
/// Entries are only reordered when they are (re)inserted; lookups use `peek`, so the
/// least-recently-used end of the underlying `LruCache` is always the oldest insertion.
#[derive(Debug)]
pub(super) struct CacheIndex {
    entries: LruCache<String, CacheEntry>,
    bytes_in_use: usize,
    capacity: usize,
}

#[derive(Debug, Default)]
pub(super) struct InsertReport {
    pub evicted: Vec<String>,
    pub replaced: bool,
}

impl CacheIndex {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            bytes_in_use: 0,
            capacity,
        }
    }

    pub(super) fn get(&self, uri: &str) -> Option<&CacheEntry> {
        self.entries.peek(uri)
    }

    pub(super) fn remove(&mut self, uri: &str) -> Option<CacheEntry> {
        let removed = self.entries.pop(uri)?;
        self.bytes_in_use -= removed.size();
        Some(removed)
    }

    /// Stores `entry` as the newest entry, evicting oldest entries until it fits.
    ///
    /// Callers must reject entries larger than the capacity beforehand.
    pub(super) fn insert(&mut self, uri: String, entry: CacheEntry) -> InsertReport {
        debug_assert!(entry.size() <= self.capacity);
        let mut report = InsertReport {
            replaced: self.remove(&uri).is_some(),
            ..InsertReport::default()
        };

        while self.bytes_in_use + entry.size() > self.capacity {
            match self.entries.pop_lru() {
                Some((evicted_uri, evicted)) => {
                    self.bytes_in_use -= evicted.size();
                    report.evicted.push(evicted_uri);
                }
                None => break,
            }
        }

        self.bytes_in_use += entry.size();
        self.entries.push(uri, entry);
        report
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(super) fn bytes_in_use(&self) -> usize {
        self.bytes_in_use
    }

    pub(super) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(super) fn uris_oldest_first(&self) -> Vec<String> {
        self.entries.iter().rev().map(|(uri, _)| uri.clone()).collect()
    }

    /// Sum of resident entry sizes, recomputed from scratch.
    pub(super) fn resident_bytes(&self) -> usize {
        self.entries.iter().map(|(_, entry)| entry.size()).sum()
    }
}
