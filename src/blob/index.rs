//! Compact blob references stored in the main sorted table.
//!
//! A blob index encodes where a value lives out-of-line:
//!
//! ```text
//! compression(1) | varint(file_number) | varint(offset) | varint(value_len)
//! ```
//!
//! `offset` points at the value bytes inside the file, and `size` is the
//! on-disk (possibly compressed) value length. The user key is not embedded;
//! readers re-verify it against the record on disk.
//!
//! Values stored inline never reach this codec: the builder signals that
//! case with an empty byte string in place of an encoded index, and the
//! caller checks for it before decoding. `decode` therefore rejects empty
//! input as an invalid argument.

use crate::config::CompressionType;
#[cfg(test)]
use crate::error::Error;
use crate::error::Result;
use crate::{corruption, invalid_argument};

use super::format::{get_varint64, put_varint64};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobIndex {
    pub file_number: u64,
    /// Offset of the value bytes within the blob file.
    pub offset: u64,
    /// On-disk length of the value bytes.
    pub size: u64,
    pub compression: CompressionType,
}

impl BlobIndex {
    pub fn new(
        file_number: u64,
        offset: u64,
        size: u64,
        compression: CompressionType,
    ) -> Self {
        Self {
            file_number,
            offset,
            size,
            compression,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 3 * 10);
        buf.push(self.compression.to_u8());
        put_varint64(&mut buf, self.file_number);
        put_varint64(&mut buf, self.offset);
        put_varint64(&mut buf, self.size);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(invalid_argument!(
                "cannot decode an inline (empty) blob index"
            ));
        }

        let compression = CompressionType::from_u8(buf[0])?;
        let mut pos = 1;

        let (file_number, n) = get_varint64(&buf[pos..])
            .map_err(|_| corruption!("blob index: bad file number varint"))?;
        pos += n;
        let (offset, n) = get_varint64(&buf[pos..])
            .map_err(|_| corruption!("blob index: bad offset varint"))?;
        pos += n;
        let (size, n) = get_varint64(&buf[pos..])
            .map_err(|_| corruption!("blob index: bad size varint"))?;
        pos += n;

        if pos != buf.len() {
            return Err(corruption!(
                "blob index has {} trailing bytes",
                buf.len() - pos
            ));
        }

        Ok(Self {
            file_number,
            offset,
            size,
            compression,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let index = BlobIndex::new(42, 1 << 30, 777, CompressionType::Zstd);
        let encoded = index.encode();
        let decoded = BlobIndex::decode(&encoded).expect("decode failed");
        assert_eq!(decoded, index);
    }

    #[test]
    fn roundtrip_extremes() {
        for index in [
            BlobIndex::new(0, 0, 0, CompressionType::None),
            BlobIndex::new(u64::MAX, u64::MAX, u64::MAX, CompressionType::Snappy),
        ] {
            let decoded = BlobIndex::decode(&index.encode()).expect("decode failed");
            assert_eq!(decoded, index);
        }
    }

    #[test]
    fn empty_input_is_invalid_argument() {
        assert!(matches!(
            BlobIndex::decode(&[]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn trailing_bytes_are_corruption() {
        let mut encoded = BlobIndex::new(1, 2, 3, CompressionType::None).encode();
        encoded.push(0);
        assert!(matches!(
            BlobIndex::decode(&encoded),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn unknown_compression_is_corruption() {
        let mut encoded = BlobIndex::new(1, 2, 3, CompressionType::None).encode();
        encoded[0] = 99;
        assert!(matches!(
            BlobIndex::decode(&encoded),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn truncated_varint_is_corruption() {
        let encoded = BlobIndex::new(u64::MAX, 2, 3, CompressionType::None).encode();
        assert!(matches!(
            BlobIndex::decode(&encoded[..4]),
            Err(Error::Corruption(_))
        ));
    }
}
