//! On-disk format of blob log files.
//!
//! ## Blob File Layout
//!
//! A blob file is a fixed-size header, a sequence of records in insertion
//! order, and a fixed-size footer. Files are immutable once the footer is
//! written.
//!
//! ```text
//! +--------------------------+
//! | Header (34 bytes)        |
//! +--------------------------+
//! | Record 1                 |
//! +--------------------------+
//! | ...                      |
//! +--------------------------+
//! | Record N                 |
//! +--------------------------+
//! | Footer (40 bytes)        |
//! +--------------------------+
//! ```
//!
//! All integers are little-endian. Every stored CRC is a masked CRC32C so a
//! CRC computed over bytes that themselves contain CRCs stays well behaved.
//! The footer's `file_checksum` covers the whole file up to (and including)
//! the footer's checksum-method field.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};

use crate::config::CompressionType;
use crate::corruption;
#[cfg(test)]
use crate::error::Error;
use crate::error::Result;

/// Identifies blob log files; written in both header and footer.
pub const BLOB_LOG_MAGIC: u32 = 0x6542_4c31; // "eBL1"

/// Current format version.
pub const BLOB_LOG_VERSION: u32 = 1;

/// magic(4) + version(4) + cf_id(4) + compression(1) + has_ttl(1)
/// + expiration(16) + crc(4)
pub const HEADER_SIZE: u64 = 34;

/// crc(4) + key_len(8) + value_len(8); expiration(8) is added when the
/// file has TTL.
pub const RECORD_HEADER_SIZE: u64 = 20;
pub const RECORD_HEADER_SIZE_TTL: u64 = 28;

/// magic(4) + blob_count(8) + expiration(16) + method(4)
/// + file_checksum(4) + crc(4)
pub const FOOTER_SIZE: u64 = 40;

pub(crate) static CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const CRC_MASK_DELTA: u32 = 0xa282_ead8;

/// Masks a raw CRC32C value for storage.
pub fn mask_crc(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(CRC_MASK_DELTA)
}

/// Inverse of [`mask_crc`].
pub fn unmask_crc(masked: u32) -> u32 {
    masked.wrapping_sub(CRC_MASK_DELTA).rotate_left(15)
}

/// Masked CRC32C of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    mask_crc(CRC32C.checksum(data))
}

/// Appends `v` as a LEB128 varint.
pub fn put_varint64(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Decodes a LEB128 varint from the front of `buf`, returning the value and
/// the number of bytes consumed.
pub fn get_varint64(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte < 0x80 {
            if i == 9 && byte > 1 {
                return Err(corruption!("varint overflows u64"));
            }
            return Ok((value, i + 1));
        }
    }
    Err(corruption!("truncated varint"))
}

/// TTL bounds carried in headers and footers. The blob core treats these as
/// opaque; only the format sizing depends on `has_ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpirationRange {
    pub min: u64,
    pub max: u64,
}

/// Whole-file checksum algorithm recorded in the footer and in file
/// additions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumMethod {
    #[default]
    Crc32c,
}

impl ChecksumMethod {
    pub fn to_u32(self) -> u32 {
        match self {
            ChecksumMethod::Crc32c => 1,
        }
    }

    pub fn from_u32(id: u32) -> Result<Self> {
        match id {
            1 => Ok(ChecksumMethod::Crc32c),
            n => Err(corruption!("unknown checksum method id: {n}")),
        }
    }

    /// Text tag carried in additions and completion callbacks.
    pub fn name(self) -> &'static str {
        match self {
            ChecksumMethod::Crc32c => "crc32c",
        }
    }
}

/// Fixed-size file header. The compression type applies to every record in
/// the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLogHeader {
    pub version: u32,
    pub column_family_id: u32,
    pub compression: CompressionType,
    pub has_ttl: bool,
    pub expiration_range: ExpirationRange,
}

impl BlobLogHeader {
    pub fn new(
        column_family_id: u32,
        compression: CompressionType,
        has_ttl: bool,
        expiration_range: ExpirationRange,
    ) -> Self {
        Self {
            version: BLOB_LOG_VERSION,
            column_family_id,
            compression,
            has_ttl,
            expiration_range,
        }
    }

    /// Size of a record header in this file.
    pub fn record_header_size(&self) -> u64 {
        if self.has_ttl {
            RECORD_HEADER_SIZE_TTL
        } else {
            RECORD_HEADER_SIZE
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE as usize);
        buf.write_u32::<LittleEndian>(BLOB_LOG_MAGIC).unwrap();
        buf.write_u32::<LittleEndian>(self.version).unwrap();
        buf.write_u32::<LittleEndian>(self.column_family_id).unwrap();
        buf.write_u8(self.compression.to_u8()).unwrap();
        buf.write_u8(self.has_ttl as u8).unwrap();
        buf.write_u64::<LittleEndian>(self.expiration_range.min).unwrap();
        buf.write_u64::<LittleEndian>(self.expiration_range.max).unwrap();
        let crc = checksum(&buf);
        buf.write_u32::<LittleEndian>(crc).unwrap();
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(corruption!(
                "blob file header too short: {} bytes",
                buf.len()
            ));
        }

        let stored_crc =
            Cursor::new(&buf[30..34]).read_u32::<LittleEndian>()?;
        if stored_crc != checksum(&buf[..30]) {
            return Err(corruption!("blob file header checksum mismatch"));
        }

        let mut cursor = Cursor::new(buf);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != BLOB_LOG_MAGIC {
            return Err(corruption!("bad blob file magic: {magic:#010x}"));
        }
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != BLOB_LOG_VERSION {
            return Err(corruption!("unsupported blob file version: {version}"));
        }
        let column_family_id = cursor.read_u32::<LittleEndian>()?;
        let compression = CompressionType::from_u8(cursor.read_u8()?)?;
        let has_ttl = match cursor.read_u8()? {
            0 => false,
            1 => true,
            n => return Err(corruption!("bad has_ttl flag: {n}")),
        };
        let expiration_range = ExpirationRange {
            min: cursor.read_u64::<LittleEndian>()?,
            max: cursor.read_u64::<LittleEndian>()?,
        };

        Ok(Self {
            version,
            column_family_id,
            compression,
            has_ttl,
            expiration_range,
        })
    }
}

/// One record: a key and its (possibly compressed) value. `value` holds
/// exactly the bytes stored on disk; the record does not remember the
/// uncompressed length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub expiration: Option<u64>,
}

impl BlobLogRecord {
    /// On-disk size of this record.
    pub fn encoded_len(&self) -> u64 {
        let header = if self.expiration.is_some() {
            RECORD_HEADER_SIZE_TTL
        } else {
            RECORD_HEADER_SIZE
        };
        header + self.key.len() as u64 + self.value.len() as u64
    }

    /// The record CRC covers every byte after the CRC field itself, through
    /// the last value byte.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.encoded_len() as usize - 4);
        body.write_u64::<LittleEndian>(self.key.len() as u64).unwrap();
        body.write_u64::<LittleEndian>(self.value.len() as u64).unwrap();
        if let Some(expiration) = self.expiration {
            body.write_u64::<LittleEndian>(expiration).unwrap();
        }
        body.extend_from_slice(&self.key);
        body.extend_from_slice(&self.value);

        let mut buf = Vec::with_capacity(body.len() + 4);
        buf.write_u32::<LittleEndian>(checksum(&body)).unwrap();
        buf.extend_from_slice(&body);
        buf
    }

    /// Decodes a full record. `verify_crc` recomputes the record CRC; a
    /// mismatch is corruption.
    pub fn decode(buf: &[u8], has_ttl: bool, verify_crc: bool) -> Result<Self> {
        let header = RecordHeader::decode(buf, has_ttl)?;
        let header_size = if has_ttl {
            RECORD_HEADER_SIZE_TTL
        } else {
            RECORD_HEADER_SIZE
        } as usize;

        let total = header_size
            .checked_add(header.key_len as usize)
            .and_then(|n| n.checked_add(header.value_len as usize))
            .ok_or_else(|| corruption!("blob record lengths overflow"))?;
        if buf.len() < total {
            return Err(corruption!(
                "blob record truncated: have {} bytes, need {}",
                buf.len(),
                total
            ));
        }

        if verify_crc {
            verify_record_crc(&buf[..total])?;
        }

        let key_end = header_size + header.key_len as usize;
        Ok(Self {
            key: buf[header_size..key_end].to_vec(),
            value: buf[key_end..total].to_vec(),
            expiration: header.expiration,
        })
    }
}

/// The fixed-size prefix of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub crc: u32,
    pub key_len: u64,
    pub value_len: u64,
    pub expiration: Option<u64>,
}

impl RecordHeader {
    pub fn decode(buf: &[u8], has_ttl: bool) -> Result<Self> {
        let header_size = if has_ttl {
            RECORD_HEADER_SIZE_TTL
        } else {
            RECORD_HEADER_SIZE
        } as usize;
        if buf.len() < header_size {
            return Err(corruption!(
                "blob record header too short: {} bytes",
                buf.len()
            ));
        }

        let mut cursor = Cursor::new(buf);
        let crc = cursor.read_u32::<LittleEndian>()?;
        let key_len = cursor.read_u64::<LittleEndian>()?;
        let value_len = cursor.read_u64::<LittleEndian>()?;
        let expiration = if has_ttl {
            Some(cursor.read_u64::<LittleEndian>()?)
        } else {
            None
        };

        Ok(Self {
            crc,
            key_len,
            value_len,
            expiration,
        })
    }
}

/// Recomputes the CRC of a complete record buffer and compares it with the
/// stored value.
pub fn verify_record_crc(record: &[u8]) -> Result<()> {
    if record.len() < 4 {
        return Err(corruption!("blob record shorter than its checksum"));
    }
    let stored = Cursor::new(&record[..4]).read_u32::<LittleEndian>()?;
    if stored != checksum(&record[4..]) {
        return Err(corruption!("blob record checksum mismatch"));
    }
    Ok(())
}

/// Fixed-size file footer. Writing the footer seals the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLogFooter {
    pub blob_count: u64,
    pub expiration_range: ExpirationRange,
    pub checksum_method: ChecksumMethod,
    /// Masked CRC32C of every file byte up to (and including) the footer's
    /// checksum-method field.
    pub file_checksum: u32,
}

impl BlobLogFooter {
    /// The footer bytes that participate in the whole-file checksum:
    /// magic, blob count, expiration range, and the checksum-method id.
    pub fn encode_prefix(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        buf.write_u32::<LittleEndian>(BLOB_LOG_MAGIC).unwrap();
        buf.write_u64::<LittleEndian>(self.blob_count).unwrap();
        buf.write_u64::<LittleEndian>(self.expiration_range.min).unwrap();
        buf.write_u64::<LittleEndian>(self.expiration_range.max).unwrap();
        buf.write_u32::<LittleEndian>(self.checksum_method.to_u32()).unwrap();
        buf
    }

    /// Full footer encoding. `file_checksum` must already be set.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.encode_prefix();
        buf.write_u32::<LittleEndian>(self.file_checksum).unwrap();
        let crc = checksum(&buf);
        buf.write_u32::<LittleEndian>(crc).unwrap();
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FOOTER_SIZE as usize {
            return Err(corruption!(
                "blob file footer too short: {} bytes",
                buf.len()
            ));
        }

        let stored_crc =
            Cursor::new(&buf[36..40]).read_u32::<LittleEndian>()?;
        if stored_crc != checksum(&buf[..36]) {
            return Err(corruption!("blob file footer checksum mismatch"));
        }

        let mut cursor = Cursor::new(buf);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != BLOB_LOG_MAGIC {
            return Err(corruption!("bad blob footer magic: {magic:#010x}"));
        }
        let blob_count = cursor.read_u64::<LittleEndian>()?;
        let expiration_range = ExpirationRange {
            min: cursor.read_u64::<LittleEndian>()?,
            max: cursor.read_u64::<LittleEndian>()?,
        };
        let checksum_method = ChecksumMethod::from_u32(cursor.read_u32::<LittleEndian>()?)?;
        let file_checksum = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            blob_count,
            expiration_range,
            checksum_method,
            file_checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_masking_roundtrip() {
        for crc in [0u32, 1, 0xdead_beef, u32::MAX] {
            assert_eq!(unmask_crc(mask_crc(crc)), crc);
        }
    }

    #[test]
    fn varint_roundtrip() {
        for v in [0u64, 1, 127, 128, 300, 1 << 20, u64::MAX] {
            let mut buf = Vec::new();
            put_varint64(&mut buf, v);
            let (decoded, consumed) = get_varint64(&buf).expect("decode failed");
            assert_eq!(decoded, v);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn varint_truncated() {
        let buf = [0x80u8, 0x80];
        assert!(matches!(
            get_varint64(&buf),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn varint_overflow() {
        // Nine continuation bytes followed by a tenth byte above 1 encode
        // more than 64 bits.
        let mut buf = vec![0x80u8; 9];
        buf.push(0x02);
        assert!(matches!(get_varint64(&buf), Err(Error::Corruption(_))));

        // All-continuation input never terminates.
        let buf = [0xffu8; 10];
        assert!(matches!(get_varint64(&buf), Err(Error::Corruption(_))));
    }

    #[test]
    fn header_roundtrip() {
        let header = BlobLogHeader::new(
            7,
            CompressionType::Snappy,
            true,
            ExpirationRange { min: 10, max: 200 },
        );
        let encoded = header.encode();
        assert_eq!(encoded.len(), HEADER_SIZE as usize);

        let decoded = BlobLogHeader::decode(&encoded).expect("decode failed");
        assert_eq!(decoded, header);
        assert_eq!(decoded.record_header_size(), RECORD_HEADER_SIZE_TTL);
    }

    #[test]
    fn header_detects_flipped_byte() {
        let header =
            BlobLogHeader::new(1, CompressionType::None, false, ExpirationRange::default());
        let mut encoded = header.encode();
        for i in 0..encoded.len() {
            encoded[i] ^= 0x01;
            assert!(
                matches!(BlobLogHeader::decode(&encoded), Err(Error::Corruption(_))),
                "flip at byte {i} went undetected"
            );
            encoded[i] ^= 0x01;
        }
    }

    #[test]
    fn header_rejects_wrong_magic() {
        let header =
            BlobLogHeader::new(1, CompressionType::None, false, ExpirationRange::default());
        let mut encoded = header.encode();
        // Rewrite the magic and fix up the CRC so only the magic check fires.
        encoded[0] = 0xab;
        let crc = checksum(&encoded[..30]);
        encoded[30..34].copy_from_slice(&crc.to_le_bytes());
        let err = BlobLogHeader::decode(&encoded).unwrap_err();
        assert_eq!(err, corruption!("bad blob file magic: 0x65424cab"));
    }

    #[test]
    fn record_roundtrip() {
        let record = BlobLogRecord {
            key: b"key7".to_vec(),
            value: b"a blob payload".to_vec(),
            expiration: None,
        };
        let encoded = record.encode();
        assert_eq!(encoded.len() as u64, record.encoded_len());

        let decoded = BlobLogRecord::decode(&encoded, false, true).expect("decode failed");
        assert_eq!(decoded, record);
    }

    #[test]
    fn record_roundtrip_with_ttl() {
        let record = BlobLogRecord {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
            expiration: Some(12345),
        };
        let encoded = record.encode();
        assert_eq!(encoded.len() as u64, record.encoded_len());

        let decoded = BlobLogRecord::decode(&encoded, true, true).expect("decode failed");
        assert_eq!(decoded, record);
    }

    #[test]
    fn record_crc_detects_value_corruption() {
        let record = BlobLogRecord {
            key: b"key".to_vec(),
            value: b"value".to_vec(),
            expiration: None,
        };
        let mut encoded = record.encode();
        let value_start = encoded.len() - 5;
        encoded[value_start] ^= 0xff;

        assert!(matches!(
            BlobLogRecord::decode(&encoded, false, true),
            Err(Error::Corruption(_))
        ));
        // Without verification the flipped byte goes through.
        let decoded = BlobLogRecord::decode(&encoded, false, false).expect("decode failed");
        assert_ne!(decoded.value, record.value);
    }

    #[test]
    fn footer_roundtrip() {
        let footer = BlobLogFooter {
            blob_count: 16,
            expiration_range: ExpirationRange::default(),
            checksum_method: ChecksumMethod::Crc32c,
            file_checksum: 0x0102_0304,
        };
        let encoded = footer.encode();
        assert_eq!(encoded.len(), FOOTER_SIZE as usize);

        let decoded = BlobLogFooter::decode(&encoded).expect("decode failed");
        assert_eq!(decoded, footer);
    }

    #[test]
    fn footer_detects_flipped_byte() {
        let footer = BlobLogFooter {
            blob_count: 3,
            expiration_range: ExpirationRange { min: 1, max: 2 },
            checksum_method: ChecksumMethod::Crc32c,
            file_checksum: 42,
        };
        let mut encoded = footer.encode();
        for i in 0..encoded.len() {
            encoded[i] ^= 0x01;
            assert!(
                matches!(BlobLogFooter::decode(&encoded), Err(Error::Corruption(_))),
                "flip at byte {i} went undetected"
            );
            encoded[i] ^= 0x01;
        }
    }

    #[test]
    fn checksum_method_tags() {
        assert_eq!(ChecksumMethod::Crc32c.name(), "crc32c");
        assert_eq!(
            ChecksumMethod::from_u32(ChecksumMethod::Crc32c.to_u32()).unwrap(),
            ChecksumMethod::Crc32c
        );
        assert!(matches!(
            ChecksumMethod::from_u32(9),
            Err(Error::Corruption(_))
        ));
    }
}
