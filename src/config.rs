//! Configuration for the blob storage subsystem.
//!
//! `ImmutableOptions` carries process-wide collaborators (filesystem, clock,
//! statistics, caches, listeners); `MutableBlobOptions` carries the per-job
//! knobs a flush or compaction captures when it starts. Both follow the
//! builder-setter convention used across emberdb.

use std::path::PathBuf;
use std::sync::Arc;

use crate::blob::blob_cache::BlobCache;
use crate::blob::meta::EventListener;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::fs::{FileSystem, StdFileSystem};
use crate::stats::Statistics;

/// Compression applied to every record of a blob file. Fixed at file
/// creation; the file header is the single source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    #[default]
    None,
    Snappy,
    Lz4,
    Zstd,
}

impl CompressionType {
    /// On-disk tag byte. The gaps are reserved for codecs not wired up yet.
    pub fn to_u8(self) -> u8 {
        match self {
            CompressionType::None => 0,
            CompressionType::Snappy => 1,
            CompressionType::Lz4 => 4,
            CompressionType::Zstd => 7,
        }
    }

    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Snappy),
            4 => Ok(CompressionType::Lz4),
            7 => Ok(CompressionType::Zstd),
            n => Err(Error::Corruption(format!("unknown compression tag: {n}"))),
        }
    }
}

/// Cache warm-up policy for freshly written blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrepopulateBlobCache {
    #[default]
    Disabled,
    FlushOnly,
}

/// How far a read is allowed to go for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadTier {
    /// Read caches first, then the filesystem.
    #[default]
    ReadAll,
    /// Cache-only: a miss returns `Error::Incomplete` and never opens a file.
    BlockCacheOnly,
}

/// Lowest cache tier the subsystem may use. The secondary (compressed)
/// cache tier is only engaged when this is `NonVolatileBlock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheTier {
    #[default]
    Volatile,
    NonVolatileBlock,
}

/// File categories for checksum handoff selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    WalFile,
    TableFile,
    ManifestFile,
    BlobFile,
}

/// A small set of file types, used to scope checksum handoff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTypeSet(u8);

impl FileTypeSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn bit(file_type: FileType) -> u8 {
        match file_type {
            FileType::WalFile => 1 << 0,
            FileType::TableFile => 1 << 1,
            FileType::ManifestFile => 1 << 2,
            FileType::BlobFile => 1 << 3,
        }
    }

    pub fn with(mut self, file_type: FileType) -> Self {
        self.0 |= Self::bit(file_type);
        self
    }

    pub fn contains(&self, file_type: FileType) -> bool {
        self.0 & Self::bit(file_type) != 0
    }
}

/// Per-read options recognized by `BlobSource`.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Verify the record CRC of every blob read from disk.
    pub verify_checksums: bool,
    /// Insert blobs read from disk into the blob cache.
    pub fill_cache: bool,
    pub read_tier: ReadTier,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            fill_cache: true,
            read_tier: ReadTier::ReadAll,
        }
    }
}

/// Knobs captured per flush/compaction job.
#[derive(Debug, Clone)]
pub struct MutableBlobOptions {
    /// Values shorter than this stay inline in the main store.
    pub min_blob_size: u64,
    /// Target rollover size. Advisory; a record is never split.
    pub blob_file_size: u64,
    pub blob_compression_type: CompressionType,
    pub prepopulate_blob_cache: PrepopulateBlobCache,
}

impl Default for MutableBlobOptions {
    fn default() -> Self {
        Self {
            min_blob_size: 0,
            blob_file_size: 256 * 1024 * 1024,
            blob_compression_type: CompressionType::None,
            prepopulate_blob_cache: PrepopulateBlobCache::Disabled,
        }
    }
}

impl MutableBlobOptions {
    pub fn min_blob_size(mut self, size: u64) -> Self {
        self.min_blob_size = size;
        self
    }

    pub fn blob_file_size(mut self, size: u64) -> Self {
        self.blob_file_size = size;
        self
    }

    pub fn blob_compression_type(mut self, compression: CompressionType) -> Self {
        self.blob_compression_type = compression;
        self
    }

    pub fn prepopulate_blob_cache(mut self, policy: PrepopulateBlobCache) -> Self {
        self.prepopulate_blob_cache = policy;
        self
    }
}

/// Process-wide collaborators and policies, shared by every builder and
/// every source.
#[derive(Clone)]
pub struct ImmutableOptions {
    pub fs: Arc<dyn FileSystem>,
    pub clock: Arc<dyn Clock>,
    pub stats: Arc<Statistics>,
    /// Column-family data directories; blob files go into the first one.
    pub cf_paths: Vec<PathBuf>,
    /// Primary blob cache; `None` disables blob caching entirely.
    pub blob_cache: Option<Arc<BlobCache>>,
    /// fsync (true) vs fdatasync (false) when sealing a file.
    pub use_fsync: bool,
    /// File types whose writers hand precomputed checksums to the filesystem.
    pub checksum_handoff_file_types: FileTypeSet,
    pub lowest_used_cache_tier: CacheTier,
    pub listeners: Vec<Arc<dyn EventListener>>,
    /// Capacity (number of open readers) of the blob file cache.
    pub blob_file_cache_capacity: usize,
    /// Maximum gap between records merged into one coalesced read.
    pub multi_read_coalesce_gap: u64,
}

impl Default for ImmutableOptions {
    fn default() -> Self {
        Self {
            fs: Arc::new(StdFileSystem),
            clock: Arc::new(SystemClock),
            stats: Arc::new(Statistics::new()),
            cf_paths: Vec::new(),
            blob_cache: None,
            use_fsync: false,
            checksum_handoff_file_types: FileTypeSet::new(),
            lowest_used_cache_tier: CacheTier::Volatile,
            listeners: Vec::new(),
            blob_file_cache_capacity: 64,
            multi_read_coalesce_gap: 4096,
        }
    }
}

impl std::fmt::Debug for ImmutableOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImmutableOptions")
            .field("cf_paths", &self.cf_paths)
            .field("blob_cache", &self.blob_cache.is_some())
            .field("use_fsync", &self.use_fsync)
            .field("checksum_handoff_file_types", &self.checksum_handoff_file_types)
            .field("lowest_used_cache_tier", &self.lowest_used_cache_tier)
            .field("blob_file_cache_capacity", &self.blob_file_cache_capacity)
            .field("multi_read_coalesce_gap", &self.multi_read_coalesce_gap)
            .finish()
    }
}

impl ImmutableOptions {
    /// Options rooted at the given column-family directory.
    pub fn new(cf_path: impl Into<PathBuf>) -> Self {
        Self {
            cf_paths: vec![cf_path.into()],
            ..Default::default()
        }
    }

    pub fn fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn stats(mut self, stats: Arc<Statistics>) -> Self {
        self.stats = stats;
        self
    }

    pub fn blob_cache(mut self, cache: Arc<BlobCache>) -> Self {
        self.blob_cache = Some(cache);
        self
    }

    pub fn use_fsync(mut self, use_fsync: bool) -> Self {
        self.use_fsync = use_fsync;
        self
    }

    pub fn checksum_handoff_file_types(mut self, set: FileTypeSet) -> Self {
        self.checksum_handoff_file_types = set;
        self
    }

    pub fn lowest_used_cache_tier(mut self, tier: CacheTier) -> Self {
        self.lowest_used_cache_tier = tier;
        self
    }

    pub fn add_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn blob_file_cache_capacity(mut self, capacity: usize) -> Self {
        self.blob_file_cache_capacity = capacity;
        self
    }

    pub fn multi_read_coalesce_gap(mut self, gap: u64) -> Self {
        self.multi_read_coalesce_gap = gap;
        self
    }
}
