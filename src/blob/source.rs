//! Read-side facade for blobs.
//!
//! `BlobSource` resolves `(file_number, offset, size)` triples from blob
//! indexes into values. Lookups go through the blob cache first (both the
//! real-size key and the builder's sentinel-size key, so warm-up entries
//! are visible), then through a shared `BlobFileReader` obtained from the
//! file cache. Batched lookups are grouped by file and serviced with
//! coalesced reads.
//!
//! The secondary cache tier is invisible here: the blob cache mediates
//! demotion and promotion on its own.

use std::sync::Arc;

use crate::config::{CompressionType, ImmutableOptions, ReadOptions, ReadTier};
use crate::error::{Error, Result};
use crate::stats::Statistics;

use super::blob_cache::{BlobCache, CachedBlob};
use super::cache_key::{CacheKey, OffsetableCacheKey, SENTINEL_FILE_SIZE};
use super::file_cache::BlobFileCache;
use super::reader::{BlobFileReader, BlobReadRequest};

/// A batch of lookups against a single blob file.
#[derive(Debug)]
pub struct BlobFileReadRequests<'a> {
    pub file_number: u64,
    pub file_size: u64,
    pub compression: CompressionType,
    pub requests: Vec<BlobReadRequest<'a>>,
}

pub struct BlobSource {
    db_id: String,
    db_session_id: String,
    stats: Arc<Statistics>,
    blob_file_cache: Arc<BlobFileCache>,
    blob_cache: Option<Arc<BlobCache>>,
    multi_read_coalesce_gap: u64,
}

impl BlobSource {
    pub fn new(
        options: &ImmutableOptions,
        db_id: impl Into<String>,
        db_session_id: impl Into<String>,
        blob_file_cache: Arc<BlobFileCache>,
    ) -> Self {
        Self {
            db_id: db_id.into(),
            db_session_id: db_session_id.into(),
            stats: Arc::clone(&options.stats),
            blob_file_cache,
            blob_cache: options.blob_cache.clone(),
            multi_read_coalesce_gap: options.multi_read_coalesce_gap,
        }
    }

    fn cache_keys(&self, file_number: u64, file_size: u64, offset: u64) -> (CacheKey, CacheKey) {
        let real = OffsetableCacheKey::new(&self.db_id, &self.db_session_id, file_number, file_size)
            .with_offset(offset);
        let sentinel = OffsetableCacheKey::new(
            &self.db_id,
            &self.db_session_id,
            file_number,
            SENTINEL_FILE_SIZE,
        )
        .with_offset(offset);
        (real, sentinel)
    }

    /// One logical cache lookup: the real-size key first, then the warm-up
    /// sentinel key. Records exactly one hit or miss.
    fn probe_cache(&self, file_number: u64, file_size: u64, offset: u64) -> Option<CachedBlob> {
        let cache = self.blob_cache.as_ref()?;
        let (real, sentinel) = self.cache_keys(file_number, file_size, offset);
        let found = cache.get(&real).or_else(|| cache.get(&sentinel));
        match found {
            Some(value) => {
                self.stats.record_cache_hit();
                Some(value)
            }
            None => {
                self.stats.record_cache_miss();
                None
            }
        }
    }

    fn fill_cache(&self, file_number: u64, file_size: u64, offset: u64, value: &CachedBlob) {
        let Some(cache) = &self.blob_cache else {
            return;
        };
        let (real, _) = self.cache_keys(file_number, file_size, offset);
        match cache.insert(real, Arc::clone(value)) {
            Ok(()) => self.stats.record_cache_add(value.len() as u64),
            Err(err) => {
                // An over-full cache is not the request's problem.
                self.stats.record_cache_add_failure();
                tracing::debug!(file_number, error = %err, "blob cache insert rejected");
            }
        }
    }

    /// Resolves one blob. Returns the uncompressed value and the number of
    /// on-disk bytes read (zero on a cache hit).
    #[allow(clippy::too_many_arguments)]
    pub fn get_blob(
        &self,
        read_options: &ReadOptions,
        user_key: &[u8],
        file_number: u64,
        offset: u64,
        file_size: u64,
        value_size: u64,
        compression: CompressionType,
    ) -> Result<(CachedBlob, u64)> {
        if let Some(value) = self.probe_cache(file_number, file_size, offset) {
            return Ok((value, 0));
        }

        if read_options.read_tier == ReadTier::BlockCacheOnly {
            return Err(Error::Incomplete(
                "blob cache miss and no IO is allowed".to_string(),
            ));
        }

        let reader = self.blob_file_cache.get_or_open(file_number)?;
        let (value, bytes_read) = reader.read_blob(
            user_key,
            offset,
            value_size,
            compression,
            read_options.verify_checksums,
        )?;
        let value: CachedBlob = Arc::from(value);

        if read_options.fill_cache {
            self.fill_cache(file_number, file_size, offset, &value);
        }

        Ok((value, bytes_read))
    }

    /// Resolves a batch of blobs spread over several files. Returns one
    /// result vector per request group, plus the total number of on-disk
    /// bytes read across the whole batch.
    pub fn multi_get_blob(
        &self,
        read_options: &ReadOptions,
        groups: &[BlobFileReadRequests],
    ) -> (Vec<Vec<Result<CachedBlob>>>, u64) {
        let mut total_bytes_read = 0;
        let mut all_results = Vec::with_capacity(groups.len());
        for group in groups {
            let (results, bytes_read) = self.multi_get_blob_from_one_file(
                read_options,
                group.file_number,
                group.file_size,
                group.compression,
                &group.requests,
            );
            total_bytes_read += bytes_read;
            all_results.push(results);
        }
        (all_results, total_bytes_read)
    }

    /// Resolves a batch of blobs within one file. Per-request statuses are
    /// independent: a failing request never aborts its siblings.
    pub fn multi_get_blob_from_one_file(
        &self,
        read_options: &ReadOptions,
        file_number: u64,
        file_size: u64,
        compression: CompressionType,
        requests: &[BlobReadRequest],
    ) -> (Vec<Result<CachedBlob>>, u64) {
        let mut results: Vec<Option<Result<CachedBlob>>> =
            (0..requests.len()).map(|_| None).collect();
        let mut misses = Vec::new();

        for (i, request) in requests.iter().enumerate() {
            match self.probe_cache(file_number, file_size, request.offset) {
                Some(value) => results[i] = Some(Ok(value)),
                None => misses.push(i),
            }
        }

        let mut bytes_read = 0;

        if !misses.is_empty() {
            if read_options.read_tier == ReadTier::BlockCacheOnly {
                for &i in &misses {
                    results[i] = Some(Err(Error::Incomplete(
                        "blob cache miss and no IO is allowed".to_string(),
                    )));
                }
            } else {
                match self.blob_file_cache.get_or_open(file_number) {
                    Ok(reader) => {
                        let miss_requests: Vec<BlobReadRequest> =
                            misses.iter().map(|&i| requests[i]).collect();
                        let read_results = reader.multi_read(
                            &miss_requests,
                            compression,
                            read_options.verify_checksums,
                            self.multi_read_coalesce_gap,
                        );
                        for (&i, result) in misses.iter().zip(read_results) {
                            results[i] = Some(result.map(|(value, record_size)| {
                                bytes_read += record_size;
                                let value: CachedBlob = Arc::from(value);
                                if read_options.fill_cache {
                                    self.fill_cache(
                                        file_number,
                                        file_size,
                                        requests[i].offset,
                                        &value,
                                    );
                                }
                                value
                            }));
                        }
                    }
                    Err(err) => {
                        for &i in &misses {
                            results[i] = Some(Err(err.clone()));
                        }
                    }
                }
            }
        }

        let results = results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(Error::IO("blob read dropped".to_string()))))
            .collect();
        (results, bytes_read)
    }

    /// Shared reader handle for a blob file; delegates to the file cache.
    pub fn get_blob_file_reader(&self, file_number: u64) -> Result<Arc<BlobFileReader>> {
        self.blob_file_cache.get_or_open(file_number)
    }

    /// Probe-only check across both cache key forms. Counts as one cache
    /// lookup in statistics.
    pub fn blob_in_cache(&self, file_number: u64, file_size: u64, offset: u64) -> bool {
        self.probe_cache(file_number, file_size, offset).is_some()
    }
}
