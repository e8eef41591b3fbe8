//! Random-access reader for one sealed blob file.
//!
//! Opening a reader validates the header and footer; reads then resolve
//! `(offset, size)` pairs produced by blob indexes. Every read fetches the
//! full record (header + key + value) so the caller's key can be verified
//! against the bytes on disk, and optionally the record CRC with them.

use std::path::Path;
use std::sync::Arc;

use itertools::Itertools as _;

use crate::clock::Clock;
use crate::corruption;
use crate::config::CompressionType;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, RandomAccessFile};
use crate::stats::{Statistics, StopWatch};

use super::compression;
use super::format::{
    checksum, BlobLogFooter, BlobLogHeader, RecordHeader, FOOTER_SIZE, HEADER_SIZE,
};

/// One lookup inside a `multi_read` batch. `offset` and `size` address the
/// value bytes, exactly as stored in a blob index.
#[derive(Debug, Clone, Copy)]
pub struct BlobReadRequest<'a> {
    pub user_key: &'a [u8],
    pub offset: u64,
    pub size: u64,
}

pub struct BlobFileReader {
    file: Arc<dyn RandomAccessFile>,
    file_number: u64,
    file_size: u64,
    header: BlobLogHeader,
    footer: BlobLogFooter,
    clock: Arc<dyn Clock>,
    stats: Arc<Statistics>,
}

impl std::fmt::Debug for BlobFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobFileReader")
            .field("file_number", &self.file_number)
            .field("file_size", &self.file_size)
            .field("header", &self.header)
            .field("footer", &self.footer)
            .finish()
    }
}

impl BlobFileReader {
    /// Opens and validates a sealed blob file.
    pub fn open(
        fs: &Arc<dyn FileSystem>,
        path: &Path,
        file_number: u64,
        clock: Arc<dyn Clock>,
        stats: Arc<Statistics>,
    ) -> Result<Self> {
        let file = fs.new_random_access_file(path)?;
        let file_size = file.len()?;
        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(corruption!(
                "blob file {file_number} too small to be sealed: {file_size} bytes"
            ));
        }

        let mut header_buf = vec![0u8; HEADER_SIZE as usize];
        file.read_at(0, &mut header_buf)?;
        let header = BlobLogHeader::decode(&header_buf)?;

        let mut footer_buf = vec![0u8; FOOTER_SIZE as usize];
        file.read_at(file_size - FOOTER_SIZE, &mut footer_buf)?;
        let footer = BlobLogFooter::decode(&footer_buf)?;

        Ok(Self {
            file,
            file_number,
            file_size,
            header,
            footer,
            clock,
            stats,
        })
    }

    pub fn compression_type(&self) -> CompressionType {
        self.header.compression
    }

    pub fn blob_count(&self) -> u64 {
        self.footer.blob_count
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// On-disk size of the record holding `value_size` value bytes under
    /// `key_len` key bytes.
    pub fn record_size(&self, key_len: u64, value_size: u64) -> u64 {
        self.header.record_header_size() + key_len + value_size
    }

    /// Start of the record whose value bytes live at `offset`, or
    /// corruption if no such record can exist in this file.
    fn record_offset(&self, key_len: u64, offset: u64, value_size: u64) -> Result<u64> {
        let record_offset = offset
            .checked_sub(self.header.record_header_size() + key_len)
            .ok_or_else(|| corruption!("invalid blob offset {offset}"))?;
        let record_end = offset
            .checked_add(value_size)
            .ok_or_else(|| corruption!("invalid blob offset {offset}"))?;
        if record_offset < HEADER_SIZE || record_end > self.file_size - FOOTER_SIZE {
            return Err(corruption!(
                "blob record [{record_offset}, {record_end}) out of bounds in file {}",
                self.file_number
            ));
        }
        Ok(record_offset)
    }

    /// Reads the blob whose value bytes live at `offset` and returns the
    /// uncompressed value plus the number of bytes read from the file.
    ///
    /// The record CRC is verified iff `verify_checksum`; the caller's key is
    /// always verified against the stored key.
    pub fn read_blob(
        &self,
        user_key: &[u8],
        offset: u64,
        value_size: u64,
        compression: CompressionType,
        verify_checksum: bool,
    ) -> Result<(Vec<u8>, u64)> {
        let record_offset = self.record_offset(user_key.len() as u64, offset, value_size)?;
        let record_size = self.record_size(user_key.len() as u64, value_size);

        let mut record = vec![0u8; record_size as usize];
        self.file.read_at(record_offset, &mut record)?;
        self.stats.record_bytes_read(record_size);

        let value = self.parse_record(&record, user_key, value_size, compression, verify_checksum)?;
        Ok((value, record_size))
    }

    /// Validates and extracts one record already in memory.
    fn parse_record(
        &self,
        record: &[u8],
        user_key: &[u8],
        value_size: u64,
        compression: CompressionType,
        verify_checksum: bool,
    ) -> Result<Vec<u8>> {
        if compression != self.header.compression {
            return Err(corruption!(
                "compression type mismatch when reading blob from file {}",
                self.file_number
            ));
        }

        let record_header = RecordHeader::decode(record, self.header.has_ttl)?;
        if record_header.key_len != user_key.len() as u64
            || record_header.value_len != value_size
        {
            return Err(corruption!(
                "blob record lengths do not match the blob index in file {}",
                self.file_number
            ));
        }

        if verify_checksum {
            super::format::verify_record_crc(record)?;
        }

        let header_size = self.header.record_header_size() as usize;
        let key_end = header_size + user_key.len();
        if &record[header_size..key_end] != user_key {
            return Err(corruption!(
                "blob record key mismatch in file {}",
                self.file_number
            ));
        }

        let value_bytes = &record[key_end..key_end + value_size as usize];
        if compression == CompressionType::None {
            return Ok(value_bytes.to_vec());
        }

        let sink = |micros| self.stats.record_decompression_micros(micros);
        let _watch = StopWatch::new(self.clock.as_ref(), &sink);
        compression::decompress(compression, value_bytes)
    }

    /// Reads a batch of blobs from this file. Requests are sorted by file
    /// position and near-adjacent records (gap ≤ `coalesce_gap`) are fetched
    /// with a single read. Each request's result is independent; the vector
    /// is in request order and each entry carries the uncompressed value and
    /// the record's on-disk size.
    pub fn multi_read(
        &self,
        requests: &[BlobReadRequest],
        compression: CompressionType,
        verify_checksum: bool,
        coalesce_gap: u64,
    ) -> Vec<Result<(Vec<u8>, u64)>> {
        let mut results: Vec<Option<Result<(Vec<u8>, u64)>>> =
            (0..requests.len()).map(|_| None).collect();

        // (record_offset, record_end, request index), sorted by position.
        let mut spans = Vec::with_capacity(requests.len());
        for (i, req) in requests.iter().enumerate() {
            match self.record_offset(req.user_key.len() as u64, req.offset, req.size) {
                Ok(record_offset) => {
                    let record_size = self.record_size(req.user_key.len() as u64, req.size);
                    spans.push((record_offset, record_offset + record_size, i));
                }
                Err(err) => results[i] = Some(Err(err)),
            }
        }
        spans.sort_by_key(|&(start, _, _)| start);

        let ranges = spans
            .into_iter()
            .map(|(start, end, i)| (start, end, vec![i]))
            .coalesce(|mut a, b| {
                if b.0 <= a.1 + coalesce_gap {
                    a.1 = a.1.max(b.1);
                    a.2.extend(b.2);
                    Ok(a)
                } else {
                    Err((a, b))
                }
            });

        for (start, end, members) in ranges {
            let mut buf = vec![0u8; (end - start) as usize];
            if let Err(err) = self.file.read_at(start, &mut buf) {
                for i in members {
                    results[i] = Some(Err(err.clone()));
                }
                continue;
            }

            for i in members {
                let req = &requests[i];
                let record_size = self.record_size(req.user_key.len() as u64, req.size);
                // record_offset() succeeded for every member above.
                let record_offset = req.offset - self.header.record_header_size()
                    - req.user_key.len() as u64;
                let base = (record_offset - start) as usize;
                let record = &buf[base..base + record_size as usize];

                self.stats.record_bytes_read(record_size);
                results[i] = Some(
                    self.parse_record(record, req.user_key, req.size, compression, verify_checksum)
                        .map(|value| (value, record_size)),
                );
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(Error::IO("blob read dropped".to_string()))))
            .collect()
    }

    /// Recomputes the whole-file checksum sealed into the footer. Reads the
    /// entire file.
    pub fn verify_checksum(&self) -> Result<()> {
        let covered = (self.file_size - 8) as usize;
        let mut buf = vec![0u8; covered];
        self.file.read_at(0, &mut buf)?;
        if checksum(&buf) != self.footer.file_checksum {
            return Err(corruption!(
                "whole-file checksum mismatch in blob file {}",
                self.file_number
            ));
        }
        Ok(())
    }
}
