// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use lru::LruCache;
use parking_lot::Mutex;

use crate::errors::{disposed_error, Result};
use crate::io::slice::SliceReader;
use crate::io::source::Source;

/// The default byte budget for a reader's range cache (64 MiB).
pub const DEFAULT_CACHE_BUDGET: usize = 64 * 1024 * 1024;

/// A cached byte range fetched from the source.
struct CachedRange {
    /// The file offset of the first byte.
    start: u64,
    /// The bytes. Shared with any outstanding slices, so eviction never invalidates a slice a
    /// parser is still holding.
    data: Arc<[u8]>,
}

impl CachedRange {
    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    fn contains(&self, start: u64, end: u64) -> bool {
        self.start <= start && end <= self.end()
    }
}

struct Cache {
    /// Cached ranges, sorted by start offset.
    ranges: Vec<CachedRange>,
    /// Recency order of cached ranges, keyed by start offset. The value is the byte length, used
    /// for budget accounting on eviction.
    order: LruCache<u64, usize>,
    /// Total bytes held by the cache.
    total: usize,
}

impl Cache {
    fn find(&mut self, start: u64, end: u64) -> Option<&CachedRange> {
        // The candidate range is the last one starting at or before `start`.
        let idx = match self.ranges.partition_point(|r| r.start <= start) {
            0 => return None,
            n => n - 1,
        };

        if self.ranges[idx].contains(start, end) {
            // Touch recency.
            self.order.get(&self.ranges[idx].start);
            Some(&self.ranges[idx])
        }
        else {
            None
        }
    }

    fn insert(&mut self, range: CachedRange, budget: usize) {
        let idx = self.ranges.partition_point(|r| r.start < range.start);

        // An identical or enclosing range may already be present if two cooperative callers
        // raced on the same fetch. Keep the larger one.
        if let Some(existing) = self.ranges.get(idx) {
            if existing.start == range.start && existing.data.len() >= range.data.len() {
                return;
            }
        }

        self.total += range.data.len();
        self.order.put(range.start, range.data.len());
        self.ranges.insert(idx, range);

        while self.total > budget {
            match self.order.pop_lru() {
                Some((start, len)) => {
                    self.total -= len;
                    if let Ok(idx) = self.ranges.binary_search_by_key(&start, |r| r.start) {
                        self.ranges.remove(idx);
                    }
                }
                None => break,
            }
        }
    }

    fn forget(&mut self, start: u64, end: u64) {
        self.ranges.retain(|range| {
            let keep = range.end() <= start || range.start >= end;
            if !keep {
                self.total -= range.data.len();
                self.order.pop(&range.start);
            }
            keep
        });
    }
}

/// A `Reader` maps random byte-range requests onto a [`Source`] and caches recently fetched
/// ranges so that parsers can re-read container structures without re-issuing I/O.
///
/// A request that hits the cache is answered synchronously via [`Reader::try_slice`]; a miss is
/// an explicit suspension point via [`Reader::slice`]. Cached ranges are evicted in LRU order
/// once the byte budget is exceeded. Because slices share ownership of the cached bytes, a slice
/// returned to a parser remains valid even if the range is evicted afterwards.
pub struct Reader {
    source: Arc<dyn Source>,
    cache: Mutex<Cache>,
    budget: usize,
    len: Mutex<Option<u64>>,
    disposed: AtomicBool,
}

impl Reader {
    /// Create a reader with the default cache budget.
    pub fn new(source: Arc<dyn Source>) -> Self {
        Reader::with_budget(source, DEFAULT_CACHE_BUDGET)
    }

    /// Create a reader with an explicit cache budget in bytes.
    pub fn with_budget(source: Arc<dyn Source>, budget: usize) -> Self {
        Reader {
            source,
            cache: Mutex::new(Cache {
                ranges: Vec::new(),
                order: LruCache::unbounded(),
                total: 0,
            }),
            budget: budget.max(1),
            len: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// Get the total length of the source in bytes. The length is fetched once and then cached.
    pub async fn byte_len(&self) -> Result<u64> {
        if self.disposed.load(Ordering::Acquire) {
            return disposed_error();
        }

        if let Some(len) = *self.len.lock() {
            return Ok(len);
        }

        let len = self.source.byte_len().await?;
        *self.len.lock() = Some(len);
        Ok(len)
    }

    /// Attempt to serve the byte range `[start, start + len)` synchronously from the cache.
    pub fn try_slice(&self, start: u64, len: u64) -> Option<SliceReader> {
        if self.disposed.load(Ordering::Acquire) {
            return None;
        }

        let end = start.checked_add(len)?;
        let mut cache = self.cache.lock();
        cache.find(start, end).map(|range| {
            SliceReader::new_windowed(
                range.data.clone(),
                range.start,
                (start - range.start) as usize,
                (end - range.start) as usize,
            )
        })
    }

    /// Get a slice over the byte range `[start, start + len)`, fetching from the source when the
    /// range is not cached.
    ///
    /// Returns `None` when `start` lies at or beyond the end of the source. A range that begins
    /// inside the source but runs past its end is clamped; callers that require the full length
    /// must check [`SliceReader::len`].
    pub async fn slice(&self, start: u64, len: u64) -> Result<Option<SliceReader>> {
        if self.disposed.load(Ordering::Acquire) {
            return disposed_error();
        }

        let size = self.byte_len().await?;
        if start >= size || len == 0 {
            return Ok(None);
        }

        let end = start.saturating_add(len).min(size);

        if let Some(slice) = self.try_slice(start, end - start) {
            return Ok(Some(slice));
        }

        let data = self.source.read_range(start, end).await?;

        if self.disposed.load(Ordering::Acquire) {
            return disposed_error();
        }

        let data: Arc<[u8]> = Arc::from(data);
        let slice = SliceReader::new(data.clone(), start);

        debug!("fetched range [{}, {}) ({} bytes)", start, end, data.len());

        self.cache.lock().insert(CachedRange { start, data }, self.budget);

        Ok(Some(slice))
    }

    /// Proactively drop any cached range lying wholly or partially within `[start, start + len)`.
    /// Outstanding slices remain valid.
    pub fn forget(&self, start: u64, len: u64) {
        self.cache.lock().forget(start, start.saturating_add(len));
    }

    /// Mark the reader disposed. Pending and future requests fail with
    /// [`crate::errors::Error::Disposed`].
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        let mut cache = self.cache.lock();
        cache.ranges.clear();
        cache.order.clear();
        cache.total = 0;
    }

    /// Returns true if the reader has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Reader, DEFAULT_CACHE_BUDGET};
    use crate::errors::Error;
    use crate::io::source::BufSource;

    fn reader_over(bytes: Vec<u8>, budget: usize) -> Reader {
        Reader::with_budget(Arc::new(BufSource::new(bytes)), budget)
    }

    #[tokio::test]
    async fn verify_cache_hit_is_synchronous() {
        let reader = reader_over((0u8..64).collect(), DEFAULT_CACHE_BUDGET);

        assert!(reader.try_slice(0, 16).is_none());

        let slice = reader.slice(0, 16).await.unwrap().unwrap();
        assert_eq!(slice.len(), 16);

        // A sub-range of the fetched range must now be a synchronous hit.
        let hit = reader.try_slice(4, 8).unwrap();
        assert_eq!(hit.file_pos(), 4);
        assert_eq!(hit.len(), 8);
    }

    #[tokio::test]
    async fn verify_out_of_range_reads() {
        let reader = reader_over(vec![0u8; 32], DEFAULT_CACHE_BUDGET);

        // Starting past the end yields no slice.
        assert!(reader.slice(32, 8).await.unwrap().is_none());

        // Running past the end is clamped.
        let slice = reader.slice(24, 100).await.unwrap().unwrap();
        assert_eq!(slice.len(), 8);
    }

    #[tokio::test]
    async fn verify_eviction_under_budget() {
        let reader = reader_over(vec![0u8; 256], 64);

        reader.slice(0, 32).await.unwrap().unwrap();
        reader.slice(32, 32).await.unwrap().unwrap();
        // This fetch exceeds the budget and must evict the oldest range.
        reader.slice(64, 32).await.unwrap().unwrap();

        assert!(reader.try_slice(0, 32).is_none());
        assert!(reader.try_slice(64, 32).is_some());
    }

    #[tokio::test]
    async fn verify_forget_and_dispose() {
        let reader = reader_over(vec![0u8; 64], DEFAULT_CACHE_BUDGET);

        reader.slice(0, 32).await.unwrap().unwrap();
        reader.forget(0, 32);
        assert!(reader.try_slice(0, 32).is_none());

        reader.dispose();
        assert!(matches!(reader.slice(0, 16).await, Err(Error::Disposed)));
    }
}
