//! Blob file metadata records and lifecycle notifications.

use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::corruption;
use crate::error::{Error, Result};

/// The engine-level event that triggered blob file creation. Affects the
/// cache warm-up policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobFileCreationReason {
    Flush,
    Compaction,
}

/// Published for every successfully sealed blob file. The engine appends
/// these to its version metadata to make the file discoverable after
/// restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobFileAddition {
    pub file_number: u64,
    pub blob_count: u64,
    /// Sum of on-disk record sizes (record header + key + value).
    pub blob_bytes: u64,
    pub checksum_method: String,
    pub checksum_value: Vec<u8>,
}

impl BlobFileAddition {
    pub fn new(
        file_number: u64,
        blob_count: u64,
        blob_bytes: u64,
        checksum_method: String,
        checksum_value: Vec<u8>,
    ) -> Self {
        Self {
            file_number,
            blob_count,
            blob_bytes,
            checksum_method,
            checksum_value,
        }
    }
}

// Wire encoding for the engine's version log.
impl TryInto<Vec<u8>> for &BlobFileAddition {
    type Error = Error;

    fn try_into(self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u64::<LittleEndian>(self.file_number)?;
        buf.write_u64::<LittleEndian>(self.blob_count)?;
        buf.write_u64::<LittleEndian>(self.blob_bytes)?;

        buf.write_u32::<LittleEndian>(self.checksum_method.len() as u32)?;
        buf.extend_from_slice(self.checksum_method.as_bytes());

        buf.write_u32::<LittleEndian>(self.checksum_value.len() as u32)?;
        buf.extend_from_slice(&self.checksum_value);

        Ok(buf)
    }
}

impl TryFrom<&[u8]> for BlobFileAddition {
    type Error = Error;

    fn try_from(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);

        let file_number = cursor.read_u64::<LittleEndian>()?;
        let blob_count = cursor.read_u64::<LittleEndian>()?;
        let blob_bytes = cursor.read_u64::<LittleEndian>()?;

        let method_len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut method = vec![0; method_len];
        cursor.read_exact(&mut method)?;
        let checksum_method = String::from_utf8(method)
            .map_err(|_| corruption!("blob file addition: checksum method is not utf-8"))?;

        let value_len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut checksum_value = vec![0; value_len];
        cursor.read_exact(&mut checksum_value)?;

        Ok(Self {
            file_number,
            blob_count,
            blob_bytes,
            checksum_method,
            checksum_value,
        })
    }
}

/// Details handed to listeners when a blob file is created.
#[derive(Debug)]
pub struct BlobFileCreationInfo<'a> {
    pub path: &'a Path,
    pub column_family_name: &'a str,
    pub job_id: u64,
    pub reason: BlobFileCreationReason,
}

/// Details handed to listeners and the completion callback when a blob file
/// is sealed or abandoned.
#[derive(Debug)]
pub struct BlobFileCompletionInfo<'a> {
    pub path: &'a Path,
    pub column_family_name: &'a str,
    pub job_id: u64,
    pub file_number: u64,
    pub reason: BlobFileCreationReason,
    /// Outcome of the file: `Ok` for a sealed footer, the triggering error
    /// for an abandoned file.
    pub status: &'a Result<()>,
    pub checksum_method: &'a str,
    pub checksum_value: &'a [u8],
    pub blob_count: u64,
    pub blob_bytes: u64,
}

/// Passive observers of blob file lifecycle events. Listener failures are
/// impossible by construction; the methods return nothing.
pub trait EventListener: Send + Sync {
    fn on_blob_file_creation_started(&self, _info: &BlobFileCreationInfo) {}
    fn on_blob_file_completed(&self, _info: &BlobFileCompletionInfo) {}
}

/// Post-seal hook whose failure surfaces as the close result. The addition
/// is recorded regardless; see `BlobFileBuilder`.
pub trait CompletionCallback: Send + Sync {
    fn on_blob_file_completed(&self, info: &BlobFileCompletionInfo) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BlobFileAddition {
        BlobFileAddition::new(
            9,
            16,
            8192,
            "crc32c".to_string(),
            vec![0xde, 0xad, 0xbe, 0xef],
        )
    }

    #[test]
    fn addition_roundtrip() {
        let original = sample();
        let encoded: Vec<u8> = (&original).try_into().expect("Failed to encode addition");
        let decoded =
            BlobFileAddition::try_from(encoded.as_slice()).expect("Failed to decode addition");
        assert_eq!(decoded, original);
    }

    #[test]
    fn addition_truncated_data() {
        let encoded: Vec<u8> = (&sample()).try_into().expect("Failed to encode addition");
        let result = BlobFileAddition::try_from(&encoded[..encoded.len() - 1]);
        assert!(result.is_err());
    }

    #[test]
    fn addition_invalid_method_utf8() {
        let addition = BlobFileAddition::new(1, 1, 1, "crc32c".to_string(), vec![]);
        let mut encoded: Vec<u8> = (&addition).try_into().unwrap();
        // The method string starts after the three u64 fields and its length.
        encoded[28] = 0xff;
        assert!(matches!(
            BlobFileAddition::try_from(encoded.as_slice()),
            Err(Error::Corruption(_))
        ));
    }
}
