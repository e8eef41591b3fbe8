//! Append-only materialization of large values into blob files.
//!
//! One `BlobFileBuilder` serves one flush or compaction job, on one thread.
//! `add` routes each value either inline (too small) or into the currently
//! open blob file, rolling over to a new file when the target size is
//! reached. Paths of every created file are collected immediately for crash
//! cleanup; addition records are collected only for files whose footer was
//! written.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{
    CompressionType, FileType, ImmutableOptions, MutableBlobOptions, PrepopulateBlobCache,
};
use crate::error::{Error, Result};
use crate::fs::{IoPriority, WriteLifetimeHint};
use crate::invalid_argument;
use crate::stats::StopWatch;

use super::blob_file_path;
use super::cache_key::{OffsetableCacheKey, SENTINEL_FILE_SIZE};
use super::compression;
use super::format::{BlobLogHeader, ExpirationRange, RECORD_HEADER_SIZE};
use super::index::BlobIndex;
use super::meta::{
    BlobFileAddition, BlobFileCompletionInfo, BlobFileCreationInfo, BlobFileCreationReason,
    CompletionCallback,
};
use super::writer::BlobLogWriter;

/// Generates file numbers; must be synchronized with every other builder in
/// the database by the caller.
pub type FileNumberGenerator = Box<dyn FnMut() -> u64 + Send>;

/// Who this builder works for.
#[derive(Debug, Clone)]
pub struct JobIdentity {
    pub db_id: String,
    pub db_session_id: String,
    pub column_family_id: u32,
    pub column_family_name: String,
    pub job_id: u64,
}

pub struct BlobFileBuilder {
    file_number_generator: FileNumberGenerator,
    options: ImmutableOptions,
    min_blob_size: u64,
    blob_file_size: u64,
    compression: CompressionType,
    prepopulate_blob_cache: PrepopulateBlobCache,
    identity: JobIdentity,
    io_priority: IoPriority,
    write_hint: WriteLifetimeHint,
    creation_reason: BlobFileCreationReason,
    completion_callback: Option<Arc<dyn CompletionCallback>>,
    /// Every file this builder created, sealed or not. Crash cleanup uses
    /// this list.
    blob_file_paths: Vec<PathBuf>,
    /// One record per sealed file.
    blob_file_additions: Vec<BlobFileAddition>,
    writer: Option<BlobLogWriter>,
    blob_count: u64,
    blob_bytes: u64,
}

impl BlobFileBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_number_generator: FileNumberGenerator,
        options: ImmutableOptions,
        blob_options: &MutableBlobOptions,
        identity: JobIdentity,
        io_priority: IoPriority,
        write_hint: WriteLifetimeHint,
        creation_reason: BlobFileCreationReason,
        completion_callback: Option<Arc<dyn CompletionCallback>>,
    ) -> Self {
        Self {
            file_number_generator,
            options,
            min_blob_size: blob_options.min_blob_size,
            blob_file_size: blob_options.blob_file_size,
            compression: blob_options.blob_compression_type,
            prepopulate_blob_cache: blob_options.prepopulate_blob_cache,
            identity,
            io_priority,
            write_hint,
            creation_reason,
            completion_callback,
            blob_file_paths: Vec::new(),
            blob_file_additions: Vec::new(),
            writer: None,
            blob_count: 0,
            blob_bytes: 0,
        }
    }

    /// Routes one key/value pair. Returns the encoded blob index, or an
    /// empty vector when the value stays inline in the main store.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<Vec<u8>> {
        if (value.len() as u64) < self.min_blob_size {
            return Ok(Vec::new());
        }

        self.open_blob_file_if_needed()?;

        let stored = self.compress_if_needed(value)?;

        let (blob_file_number, blob_offset) = self.write_blob_to_file(key, &stored)?;

        self.close_blob_file_if_needed()?;

        // Warm-up failures never fail the add.
        if let Err(err) = self.put_blob_into_cache_if_needed(&stored, blob_file_number, blob_offset)
        {
            tracing::warn!(
                file_number = blob_file_number,
                error = %err,
                "failed to pre-populate blob cache"
            );
        }

        let index = BlobIndex::new(
            blob_file_number,
            blob_offset,
            stored.len() as u64,
            self.compression,
        );
        Ok(index.encode())
    }

    /// Seals the open file, if any.
    pub fn finish(&mut self) -> Result<()> {
        if !self.is_blob_file_open() {
            return Ok(());
        }
        self.close_blob_file()
    }

    /// Discards the in-flight file without writing a footer. The completion
    /// callback (if any) observes the failing status; the path stays in the
    /// paths list so the engine can delete the garbage file.
    pub fn abandon(&mut self, err: Error) {
        let Some(writer) = self.writer.take() else {
            return;
        };

        let status = Err(err);
        let info = BlobFileCompletionInfo {
            path: self.blob_file_paths.last().expect("open file has a path"),
            column_family_name: &self.identity.column_family_name,
            job_id: self.identity.job_id,
            file_number: writer.file_number(),
            reason: self.creation_reason,
            status: &status,
            checksum_method: "",
            checksum_value: &[],
            blob_count: self.blob_count,
            blob_bytes: self.blob_bytes,
        };
        if let Some(callback) = &self.completion_callback {
            // The builder is already failing; a callback error adds nothing.
            let _ = callback.on_blob_file_completed(&info);
        }
        for listener in &self.options.listeners {
            listener.on_blob_file_completed(&info);
        }

        self.options.stats.record_file_abandoned();
        tracing::warn!(
            cf = %self.identity.column_family_name,
            job_id = self.identity.job_id,
            file_number = writer.file_number(),
            "abandoned blob file"
        );

        self.blob_count = 0;
        self.blob_bytes = 0;
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.blob_file_paths
    }

    pub fn additions(&self) -> &[BlobFileAddition] {
        &self.blob_file_additions
    }

    /// Hands the collected outputs to the enclosing job.
    pub fn into_outputs(self) -> (Vec<PathBuf>, Vec<BlobFileAddition>) {
        (self.blob_file_paths, self.blob_file_additions)
    }

    fn is_blob_file_open(&self) -> bool {
        self.writer.is_some()
    }

    fn open_blob_file_if_needed(&mut self) -> Result<()> {
        if self.is_blob_file_open() {
            return Ok(());
        }

        let blob_file_number = (self.file_number_generator)();
        let cf_path = self
            .options
            .cf_paths
            .first()
            .ok_or_else(|| invalid_argument!("no column family paths configured"))?;
        let path = blob_file_path(cf_path, blob_file_number);

        for listener in &self.options.listeners {
            listener.on_blob_file_creation_started(&BlobFileCreationInfo {
                path: &path,
                column_family_name: &self.identity.column_family_name,
                job_id: self.identity.job_id,
                reason: self.creation_reason,
            });
        }

        let mut file = self.options.fs.new_writable_file(&path)?;

        // The path is collected right after the create so a failure
        // anywhere below still leaves the file discoverable for cleanup.
        // Additions, by contrast, only ever name sealed files.
        self.blob_file_paths.push(path);

        file.set_io_priority(self.io_priority);
        file.set_write_lifetime_hint(self.write_hint);

        let handoff = self
            .options
            .checksum_handoff_file_types
            .contains(FileType::BlobFile);
        let mut writer = BlobLogWriter::new(
            file,
            blob_file_number,
            self.options.use_fsync,
            handoff,
            Arc::clone(&self.options.stats),
        );

        let header = BlobLogHeader::new(
            self.identity.column_family_id,
            self.compression,
            false,
            ExpirationRange::default(),
        );
        writer.write_header(&header)?;

        self.writer = Some(writer);
        Ok(())
    }

    fn compress_if_needed(&self, value: &[u8]) -> Result<Vec<u8>> {
        if self.compression == CompressionType::None {
            return Ok(value.to_vec());
        }

        let stats = Arc::clone(&self.options.stats);
        let sink = move |micros| stats.record_compression_micros(micros);
        let _watch = StopWatch::new(self.options.clock.as_ref(), &sink);
        compression::compress(self.compression, value)
    }

    fn write_blob_to_file(&mut self, key: &[u8], blob: &[u8]) -> Result<(u64, u64)> {
        let writer = self.writer.as_mut().expect("blob file must be open");
        let (_, blob_offset) = writer.add_record(key, blob, None)?;

        self.blob_count += 1;
        self.blob_bytes += RECORD_HEADER_SIZE + key.len() as u64 + blob.len() as u64;

        Ok((writer.file_number(), blob_offset))
    }

    fn close_blob_file(&mut self) -> Result<()> {
        let mut writer = self.writer.take().expect("blob file must be open");

        let (checksum_method, checksum_value) =
            writer.append_footer(self.blob_count, ExpirationRange::default())?;

        let blob_file_number = writer.file_number();
        let status = Ok(());
        let info = BlobFileCompletionInfo {
            path: self.blob_file_paths.last().expect("open file has a path"),
            column_family_name: &self.identity.column_family_name,
            job_id: self.identity.job_id,
            file_number: blob_file_number,
            reason: self.creation_reason,
            status: &status,
            checksum_method: checksum_method.name(),
            checksum_value: &checksum_value,
            blob_count: self.blob_count,
            blob_bytes: self.blob_bytes,
        };

        let callback_result = match &self.completion_callback {
            Some(callback) => callback.on_blob_file_completed(&info),
            None => Ok(()),
        };
        for listener in &self.options.listeners {
            listener.on_blob_file_completed(&info);
        }

        // The footer is on disk and the file is valid, so the addition is
        // recorded even when the callback failed; the engine decides what
        // to do with the file.
        self.blob_file_additions.push(BlobFileAddition::new(
            blob_file_number,
            self.blob_count,
            self.blob_bytes,
            checksum_method.name().to_string(),
            checksum_value,
        ));

        self.options.stats.record_file_created();
        tracing::info!(
            cf = %self.identity.column_family_name,
            job_id = self.identity.job_id,
            file_number = blob_file_number,
            blob_count = self.blob_count,
            blob_bytes = self.blob_bytes,
            "generated blob file"
        );

        self.blob_count = 0;
        self.blob_bytes = 0;

        callback_result
    }

    fn close_blob_file_if_needed(&mut self) -> Result<()> {
        let writer = self.writer.as_ref().expect("blob file must be open");
        if writer.file_size() < self.blob_file_size {
            return Ok(());
        }
        self.close_blob_file()
    }

    fn put_blob_into_cache_if_needed(
        &self,
        blob: &[u8],
        blob_file_number: u64,
        blob_offset: u64,
    ) -> Result<()> {
        let Some(cache) = &self.options.blob_cache else {
            return Ok(());
        };

        let warm = match self.prepopulate_blob_cache {
            PrepopulateBlobCache::FlushOnly => {
                self.creation_reason == BlobFileCreationReason::Flush
            }
            PrepopulateBlobCache::Disabled => false,
        };
        // Compressed blobs are not warmed; the cache stores uncompressed
        // payloads.
        if !warm || self.compression != CompressionType::None {
            return Ok(());
        }

        // The final file size is unknown mid-write, so warm-up keys use the
        // sentinel size. Readers probe the sentinel key as well.
        let base = OffsetableCacheKey::new(
            &self.identity.db_id,
            &self.identity.db_session_id,
            blob_file_number,
            SENTINEL_FILE_SIZE,
        );
        let cache_key = base.with_offset(blob_offset);

        let owned: super::blob_cache::CachedBlob = Arc::from(blob.to_vec());
        let charge = owned.len() as u64;
        match cache.insert(cache_key, owned) {
            Ok(()) => {
                self.options.stats.record_cache_add(charge);
                Ok(())
            }
            Err(err) => {
                self.options.stats.record_cache_add_failure();
                Err(err)
            }
        }
    }
}
