//! Cache of open blob file readers.
//!
//! Opening a blob file validates its header and footer, so it is worth
//! memoizing. Readers are shared handles keyed by file number. At most one
//! open per file number is in flight at a time; concurrent callers for the
//! same number share the winner's handle, and a caller that finds neither a
//! cached reader nor a blacklist entry performs its own open attempt.
//!
//! A file whose open fails with corruption is blacklisted for the lifetime
//! of this cache; every later request gets the recorded error back without
//! touching the filesystem.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cache::Cache;
use crate::config::ImmutableOptions;
use crate::error::{Error, Result};
use crate::invalid_argument;

use super::blob_file_path;
use super::reader::BlobFileReader;

pub struct BlobFileCache {
    options: ImmutableOptions,
    readers: Cache<u64, Arc<BlobFileReader>>,
    open_locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
    corrupt: Mutex<HashMap<u64, Error>>,
}

impl BlobFileCache {
    pub fn new(options: ImmutableOptions) -> Self {
        let capacity = options.blob_file_cache_capacity.max(1) as u64;
        Self {
            options,
            // One shard keeps the reader count bound exact; the lock is only
            // held for map operations, never for file IO.
            readers: Cache::new(capacity, 1, None),
            open_locks: Mutex::new(HashMap::new()),
            corrupt: Mutex::new(HashMap::new()),
        }
    }

    fn open_lock(&self, file_number: u64) -> Arc<Mutex<()>> {
        Arc::clone(
            self.open_locks
                .lock()
                .unwrap()
                .entry(file_number)
                .or_default(),
        )
    }

    /// Returns a shared reader for `file_number`, opening the file if it is
    /// not cached yet.
    pub fn get_or_open(&self, file_number: u64) -> Result<Arc<BlobFileReader>> {
        if let Some(reader) = self.readers.get(&file_number) {
            return Ok(reader);
        }
        if let Some(err) = self.corrupt.lock().unwrap().get(&file_number) {
            return Err(err.clone());
        }

        let lock = self.open_lock(file_number);
        let _guard = lock.lock().unwrap();

        // Someone may have finished opening while we waited for the lock.
        if let Some(reader) = self.readers.get(&file_number) {
            return Ok(reader);
        }
        if let Some(err) = self.corrupt.lock().unwrap().get(&file_number) {
            return Err(err.clone());
        }

        let cf_path = self
            .options
            .cf_paths
            .first()
            .ok_or_else(|| invalid_argument!("no column family paths configured"))?;
        let path = blob_file_path(cf_path, file_number);

        match BlobFileReader::open(
            &self.options.fs,
            &path,
            file_number,
            Arc::clone(&self.options.clock),
            Arc::clone(&self.options.stats),
        ) {
            Ok(reader) => {
                let reader = Arc::new(reader);
                tracing::debug!(file_number, "opened blob file");
                if let Err(err) =
                    self.readers.insert(file_number, Arc::clone(&reader), 1)
                {
                    tracing::debug!(file_number, error = %err, "blob file cache rejected reader");
                }
                Ok(reader)
            }
            Err(err @ Error::Corruption(_)) => {
                tracing::warn!(file_number, error = %err, "blob file blacklisted as corrupt");
                self.corrupt
                    .lock()
                    .unwrap()
                    .insert(file_number, err.clone());
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Number of cached readers.
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}
