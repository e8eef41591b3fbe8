//! Append-only writer for one blob log file.
//!
//! `BlobLogWriter` owns the file handle, tracks the write offset, and feeds
//! every header and record byte into a running CRC32C digest so the footer
//! can seal the file with a whole-file checksum. Records are buffered by
//! the underlying writable file; durability happens once, when the footer
//! is appended.

use std::sync::Arc;

use crc::Digest;

use crate::error::Result;
use crate::fs::WritableFile;
use crate::stats::Statistics;

use super::format::{
    checksum, mask_crc, BlobLogFooter, BlobLogHeader, BlobLogRecord, ChecksumMethod,
    ExpirationRange, CRC32C,
};

pub struct BlobLogWriter {
    file: Box<dyn WritableFile>,
    file_number: u64,
    /// Next write position, which doubles as the current file size.
    offset: u64,
    digest: Digest<'static, u32>,
    record_header_size: u64,
    use_fsync: bool,
    /// Hand a per-buffer checksum to the filesystem with each append.
    handoff_checksums: bool,
    stats: Arc<Statistics>,
}

impl BlobLogWriter {
    pub fn new(
        file: Box<dyn WritableFile>,
        file_number: u64,
        use_fsync: bool,
        handoff_checksums: bool,
        stats: Arc<Statistics>,
    ) -> Self {
        Self {
            file,
            file_number,
            offset: 0,
            digest: CRC32C.digest(),
            record_header_size: super::format::RECORD_HEADER_SIZE,
            use_fsync,
            handoff_checksums,
            stats,
        }
    }

    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Size of the file as written so far.
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.digest.update(data);
        if self.handoff_checksums {
            self.file.append_with_checksum(data, checksum(data))?;
        } else {
            self.file.append(data)?;
        }
        self.offset += data.len() as u64;
        self.stats.record_bytes_written(data.len() as u64);
        Ok(())
    }

    /// Writes the file header. Must be the first write.
    pub fn write_header(&mut self, header: &BlobLogHeader) -> Result<()> {
        self.record_header_size = header.record_header_size();
        self.write(&header.encode())
    }

    /// Appends one record and returns `(key_offset, value_offset)` — the
    /// positions of the key bytes and the value bytes within the file.
    pub fn add_record(
        &mut self,
        key: &[u8],
        value: &[u8],
        expiration: Option<u64>,
    ) -> Result<(u64, u64)> {
        let record = BlobLogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            expiration,
        };
        let key_offset = self.offset + self.record_header_size;
        let value_offset = key_offset + key.len() as u64;
        self.write(&record.encode())?;
        Ok((key_offset, value_offset))
    }

    /// Seals the file: appends the footer (finalizing the whole-file
    /// checksum), flushes, and syncs. Returns the checksum method and value
    /// for the file's addition record.
    pub fn append_footer(
        &mut self,
        blob_count: u64,
        expiration_range: ExpirationRange,
    ) -> Result<(ChecksumMethod, Vec<u8>)> {
        let mut footer = BlobLogFooter {
            blob_count,
            expiration_range,
            checksum_method: ChecksumMethod::Crc32c,
            file_checksum: 0,
        };

        // The whole-file checksum covers everything written so far plus the
        // footer prefix (through the checksum-method field).
        self.digest.update(&footer.encode_prefix());
        let digest = std::mem::replace(&mut self.digest, CRC32C.digest());
        footer.file_checksum = mask_crc(digest.finalize());

        let bytes = footer.encode();
        // Appended without the digest; the checksum fields cannot cover
        // themselves.
        if self.handoff_checksums {
            self.file.append_with_checksum(&bytes, checksum(&bytes))?;
        } else {
            self.file.append(&bytes)?;
        }
        self.offset += bytes.len() as u64;
        self.stats.record_bytes_written(bytes.len() as u64);

        self.file.flush()?;
        self.file.sync(self.use_fsync)?;

        Ok((
            footer.checksum_method,
            footer.file_checksum.to_le_bytes().to_vec(),
        ))
    }
}
