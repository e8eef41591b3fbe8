//! Blob subsystem statistics.
//!
//! Counters are atomic and may be read while operations are in progress.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::clock::Clock;

/// Ticker counters for the blob subsystem.
///
/// One instance is shared process-wide through `ImmutableOptions`; every
/// counter is monotonically increasing.
#[derive(Debug, Default)]
pub struct Statistics {
    /// Blob cache lookups that found the blob in a cache tier.
    blob_cache_hit: AtomicU64,
    /// Blob cache lookups that missed every tier.
    blob_cache_miss: AtomicU64,
    /// Blobs admitted into the blob cache.
    blob_cache_add: AtomicU64,
    /// Blob cache inserts rejected by the cache.
    blob_cache_add_failure: AtomicU64,
    /// Bytes of blob payload written into the blob cache.
    blob_cache_bytes_write: AtomicU64,
    /// On-disk bytes read from blob files.
    blob_bytes_read: AtomicU64,
    /// Bytes written to blob files, including headers and footers.
    blob_bytes_written: AtomicU64,
    /// Blob files sealed with a footer.
    blob_files_created: AtomicU64,
    /// Blob files abandoned before a footer was written.
    blob_files_abandoned: AtomicU64,
    /// Time spent in the compression codec.
    blob_compression_micros: AtomicU64,
    /// Time spent in the decompression codec.
    blob_decompression_micros: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_cache_hit(&self) {
        self.blob_cache_hit.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.blob_cache_miss.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_add(&self, bytes: u64) {
        self.blob_cache_add.fetch_add(1, Ordering::Relaxed);
        self.blob_cache_bytes_write.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_add_failure(&self) {
        self.blob_cache_add_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_read(&self, bytes: u64) {
        self.blob_bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_written(&self, bytes: u64) {
        self.blob_bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_file_created(&self) {
        self.blob_files_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_file_abandoned(&self) {
        self.blob_files_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compression_micros(&self, micros: u64) {
        self.blob_compression_micros
            .fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn record_decompression_micros(&self, micros: u64) {
        self.blob_decompression_micros
            .fetch_add(micros, Ordering::Relaxed);
    }

    pub fn cache_hits(&self) -> u64 {
        self.blob_cache_hit.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.blob_cache_miss.load(Ordering::Relaxed)
    }

    pub fn cache_adds(&self) -> u64 {
        self.blob_cache_add.load(Ordering::Relaxed)
    }

    pub fn cache_add_failures(&self) -> u64 {
        self.blob_cache_add_failure.load(Ordering::Relaxed)
    }

    pub fn cache_bytes_written(&self) -> u64 {
        self.blob_cache_bytes_write.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.blob_bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.blob_bytes_written.load(Ordering::Relaxed)
    }

    pub fn files_created(&self) -> u64 {
        self.blob_files_created.load(Ordering::Relaxed)
    }

    pub fn files_abandoned(&self) -> u64 {
        self.blob_files_abandoned.load(Ordering::Relaxed)
    }

    pub fn compression_micros(&self) -> u64 {
        self.blob_compression_micros.load(Ordering::Relaxed)
    }

    pub fn decompression_micros(&self) -> u64 {
        self.blob_decompression_micros.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time snapshot of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            cache_adds: self.cache_adds(),
            cache_add_failures: self.cache_add_failures(),
            cache_bytes_written: self.cache_bytes_written(),
            bytes_read: self.bytes_read(),
            bytes_written: self.bytes_written(),
            files_created: self.files_created(),
            files_abandoned: self.files_abandoned(),
            compression_micros: self.compression_micros(),
            decompression_micros: self.decompression_micros(),
        }
    }
}

/// A plain copy of the counters, comparable and cheap to pass around.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_adds: u64,
    pub cache_add_failures: u64,
    pub cache_bytes_written: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub files_created: u64,
    pub files_abandoned: u64,
    pub compression_micros: u64,
    pub decompression_micros: u64,
}

/// Times a section of code against the shared clock; the elapsed time is
/// reported to the sink supplied at construction when the watch is dropped.
pub struct StopWatch<'a> {
    clock: &'a dyn Clock,
    start: u64,
    sink: &'a dyn Fn(u64),
}

impl<'a> StopWatch<'a> {
    pub fn new(clock: &'a dyn Clock, sink: &'a dyn Fn(u64)) -> Self {
        Self {
            clock,
            start: clock.now_micros(),
            sink,
        }
    }
}

impl Drop for StopWatch<'_> {
    fn drop(&mut self) {
        let elapsed = self.clock.now_micros().saturating_sub(self.start);
        (self.sink)(elapsed);
    }
}

/// Shared statistics handle.
pub type StatisticsHandle = Arc<Statistics>;
