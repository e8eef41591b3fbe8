//! Filesystem abstraction for blob files.
//!
//! The blob subsystem never touches `std::fs` directly; it goes through the
//! traits below so tests and alternative storage backends can substitute
//! their own implementations. `StdFileSystem` is the production backend.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};

/// IO priority hint passed to writable files. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoPriority {
    #[default]
    Low,
    High,
}

/// Write lifetime hint passed to writable files. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteLifetimeHint {
    #[default]
    NotSet,
    Short,
    Medium,
    Long,
    Extreme,
}

/// An append-only file handle.
pub trait WritableFile: Send {
    /// Appends `data` at the current end of the file.
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Appends `data` together with a precomputed CRC32C of it, for backends
    /// that support checksum handoff. The default implementation ignores the
    /// checksum.
    fn append_with_checksum(&mut self, data: &[u8], _crc32c: u32) -> Result<()> {
        self.append(data)
    }

    /// Flushes buffered writes to the file.
    fn flush(&mut self) -> Result<()>;

    /// Makes written data durable. `use_fsync` selects a full fsync over a
    /// data-only sync.
    fn sync(&mut self, use_fsync: bool) -> Result<()>;

    fn set_io_priority(&mut self, _priority: IoPriority) {}

    fn set_write_lifetime_hint(&mut self, _hint: WriteLifetimeHint) {}
}

/// A read-only file handle supporting positional reads from any thread.
pub trait RandomAccessFile: Send + Sync {
    /// Fills `buf` starting at `offset`. A short read is an IO error.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Current size of the file in bytes.
    fn len(&self) -> Result<u64>;
}

impl std::fmt::Debug for dyn RandomAccessFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RandomAccessFile")
    }
}

/// Factory for file handles.
pub trait FileSystem: Send + Sync {
    /// Creates (truncating) a writable file at `path`.
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;

    /// Opens an existing file for random-access reads.
    fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>>;

    fn file_exists(&self, path: &Path) -> bool;
}

/// The `std::fs` backend.
#[derive(Debug, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = File::options()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::IO(format!("create {}: {e}", path.display())))?;
        let writer = BufWriter::new(file.try_clone()?);
        Ok(Box::new(StdWritableFile { file, writer }))
    }

    fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>> {
        let file = File::open(path)
            .map_err(|e| Error::IO(format!("open {}: {e}", path.display())))?;
        Ok(Arc::new(StdRandomAccessFile {
            file,
            path: path.to_path_buf(),
        }))
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

struct StdWritableFile {
    file: File,
    writer: BufWriter<File>,
}

impl WritableFile for StdWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self, use_fsync: bool) -> Result<()> {
        self.writer.flush()?;
        if use_fsync {
            self.file.sync_all()?;
        } else {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

struct StdRandomAccessFile {
    file: File,
    path: PathBuf,
}

impl RandomAccessFile for StdRandomAccessFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        // Positional reads clone the handle so concurrent readers never
        // race on a shared cursor.
        let mut reader = self.file.try_clone()?;
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(buf).map_err(|e| {
            Error::IO(format!(
                "short read of {} bytes at offset {} from {}: {e}",
                buf.len(),
                offset,
                self.path.display()
            ))
        })
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_read_back() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("000001.blob");
        let fs = StdFileSystem;

        let mut file = fs.new_writable_file(&path).expect("create failed");
        file.append(b"hello ").expect("append failed");
        file.append_with_checksum(b"world", 0xdead_beef)
            .expect("append failed");
        file.sync(false).expect("sync failed");
        drop(file);

        let reader = fs.new_random_access_file(&path).expect("open failed");
        assert_eq!(reader.len().unwrap(), 11);

        let mut buf = [0u8; 5];
        reader.read_at(6, &mut buf).expect("read failed");
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn short_read_is_io_error() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("000002.blob");
        let fs = StdFileSystem;

        let mut file = fs.new_writable_file(&path).expect("create failed");
        file.append(b"tiny").expect("append failed");
        file.sync(true).expect("sync failed");
        drop(file);

        let reader = fs.new_random_access_file(&path).expect("open failed");
        let mut buf = [0u8; 16];
        let err = reader.read_at(0, &mut buf).unwrap_err();
        assert!(matches!(err, Error::IO(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let fs = StdFileSystem;
        let path = dir.path().join("does-not-exist.blob");

        assert!(!fs.file_exists(&path));
        let err = fs.new_random_access_file(&path).unwrap_err();
        assert!(matches!(err, Error::IO(_)));
    }

    #[test]
    fn concurrent_positional_reads() {
        use std::thread;

        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("000003.blob");
        let fs = StdFileSystem;

        let mut file = fs.new_writable_file(&path).expect("create failed");
        for i in 0..256u32 {
            file.append(&i.to_le_bytes()).expect("append failed");
        }
        file.sync(false).expect("sync failed");
        drop(file);

        let reader = fs.new_random_access_file(&path).expect("open failed");
        let mut handles = vec![];
        for t in 0..4 {
            let reader = Arc::clone(&reader);
            handles.push(thread::spawn(move || {
                for i in (t..256u64).step_by(4) {
                    let mut buf = [0u8; 4];
                    reader.read_at(i * 4, &mut buf).expect("read failed");
                    assert_eq!(u32::from_le_bytes(buf), i as u32);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
