//! emberdb blob storage: out-of-line storage for large values of an
//! LSM-tree key-value engine.
//!
//! Values above a configured threshold are written into append-only blob
//! files by [`blob::builder::BlobFileBuilder`], which hands the engine a
//! compact [`blob::index::BlobIndex`] to store in the main sorted table.
//! [`blob::source::BlobSource`] resolves those indexes back into values
//! through a tiered blob cache and a cache of open file readers.

pub mod blob;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fs;
pub mod stats;

pub use blob::blob_cache::{BlobCache, CompressedSecondaryCache, SecondaryCache};
pub use blob::builder::{BlobFileBuilder, JobIdentity};
pub use blob::file_cache::BlobFileCache;
pub use blob::index::BlobIndex;
pub use blob::meta::{BlobFileAddition, BlobFileCreationReason, CompletionCallback, EventListener};
pub use blob::reader::{BlobFileReader, BlobReadRequest};
pub use blob::source::{BlobFileReadRequests, BlobSource};
pub use config::{
    CompressionType, ImmutableOptions, MutableBlobOptions, PrepopulateBlobCache, ReadOptions,
    ReadTier,
};
pub use error::{Error, Result};
