//! Blob storage: large values kept out-of-line from the main sorted tables.
//!
//! The write side (`BlobFileBuilder`) materializes key/value pairs into
//! append-only blob files; the read side (`BlobSource`) resolves blob
//! indexes back into values through a tiered cache.

pub mod blob_cache;
pub mod builder;
pub mod cache_key;
pub mod compression;
pub mod file_cache;
pub mod format;
pub mod index;
pub mod meta;
pub mod reader;
pub mod source;
pub mod writer;

use std::path::{Path, PathBuf};

/// File name of a blob file, `<file_number>.blob`, zero-padded to keep
/// directory listings sorted.
pub fn blob_file_name(file_number: u64) -> String {
    format!("{file_number:06}.blob")
}

/// Full path of a blob file inside a column-family directory.
pub fn blob_file_path(cf_path: &Path, file_number: u64) -> PathBuf {
    cf_path.join(blob_file_name(file_number))
}

/// Extracts the file number from a blob file name. Returns `None` for
/// anything that is not `<digits>.blob`.
pub fn parse_blob_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".blob")?;
    if stem.is_empty() {
        return None;
    }
    stem.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(blob_file_name(1), "000001.blob");
        assert_eq!(blob_file_name(123456789), "123456789.blob");
    }

    #[test]
    fn path_joins_the_cf_directory() {
        let path = blob_file_path(Path::new("/data/cf0"), 42);
        assert_eq!(path, PathBuf::from("/data/cf0/000042.blob"));
    }

    #[test]
    fn parse_roundtrip() {
        for number in [0u64, 1, 999_999, 1_000_000, u64::MAX] {
            assert_eq!(parse_blob_file_name(&blob_file_name(number)), Some(number));
        }
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert_eq!(parse_blob_file_name("000001.sst"), None);
        assert_eq!(parse_blob_file_name(".blob"), None);
        assert_eq!(parse_blob_file_name("abc.blob"), None);
        assert_eq!(parse_blob_file_name("000001"), None);
    }
}
