//! The blob cache: a primary in-memory tier with an optional compressed
//! secondary tier.
//!
//! The primary tier stores owned, uncompressed blob payloads charged by
//! their byte size. When the primary evicts an entry, the eviction hook
//! demotes it into the secondary tier; when a lookup misses the primary but
//! hits the secondary, the entry is promoted back. Promotion is best-effort:
//! if the primary has no room the lookup still succeeds and the value is
//! handed to the caller directly.
//!
//! Readers never address the secondary tier; tiering is entirely this
//! module's concern.

use std::sync::Arc;

use crate::cache::{Cache, EvictionHook};
use crate::config::{CacheTier, CompressionType};
use crate::error::Result;

use super::cache_key::CacheKey;
use super::compression;

/// Cached blob payloads are owned, heap-resident buffers shared by clone.
pub type CachedBlob = Arc<[u8]>;

/// A lower cache tier the primary may spill into.
pub trait SecondaryCache: Send + Sync {
    fn insert(&self, key: CacheKey, value: &[u8]);
    fn lookup(&self, key: &CacheKey) -> Option<CachedBlob>;
    fn contains(&self, key: &CacheKey) -> bool;
}

/// A secondary tier that keeps demoted blobs snappy-compressed in memory.
pub struct CompressedSecondaryCache {
    inner: Cache<CacheKey, CachedBlob>,
}

impl CompressedSecondaryCache {
    pub fn with_capacity(capacity: u64, num_shards: usize) -> Self {
        Self {
            inner: Cache::new(capacity, num_shards, None),
        }
    }

    pub fn usage(&self) -> u64 {
        self.inner.usage()
    }
}

impl SecondaryCache for CompressedSecondaryCache {
    fn insert(&self, key: CacheKey, value: &[u8]) {
        let compressed = match compression::compress(CompressionType::Snappy, value) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(error = %err, "failed to compress demoted blob");
                return;
            }
        };
        let charge = compressed.len() as u64;
        if let Err(err) = self.inner.insert(key, Arc::from(compressed), charge) {
            tracing::debug!(error = %err, "secondary cache rejected demoted blob");
        }
    }

    fn lookup(&self, key: &CacheKey) -> Option<CachedBlob> {
        let compressed = self.inner.get(key)?;
        match compression::decompress(CompressionType::Snappy, &compressed) {
            Ok(bytes) => Some(Arc::from(bytes)),
            Err(err) => {
                tracing::warn!(error = %err, "failed to decompress secondary cache entry");
                None
            }
        }
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.inner.contains(key)
    }
}

/// The process-wide blob cache handle held in `ImmutableOptions`.
pub struct BlobCache {
    primary: Cache<CacheKey, CachedBlob>,
    secondary: Option<Arc<dyn SecondaryCache>>,
}

impl std::fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobCache")
            .field("usage", &self.primary.usage())
            .field("secondary", &self.secondary.is_some())
            .finish()
    }
}

impl BlobCache {
    /// A primary-only cache with roughly `capacity` bytes.
    pub fn with_capacity(capacity: u64, num_shards: usize) -> Self {
        Self {
            primary: Cache::new(capacity, num_shards, None),
            secondary: None,
        }
    }

    /// A tiered cache. The secondary tier is engaged only when
    /// `lowest_used_cache_tier` permits non-volatile tiers; under
    /// `CacheTier::Volatile` it is dropped entirely.
    pub fn with_secondary(
        capacity: u64,
        num_shards: usize,
        secondary: Arc<dyn SecondaryCache>,
        lowest_used_cache_tier: CacheTier,
    ) -> Self {
        if lowest_used_cache_tier != CacheTier::NonVolatileBlock {
            return Self::with_capacity(capacity, num_shards);
        }
        let hook: EvictionHook<CacheKey, CachedBlob> = {
            let secondary = Arc::clone(&secondary);
            Box::new(move |key, value| secondary.insert(*key, value))
        };
        Self {
            primary: Cache::new(capacity, num_shards, Some(hook)),
            secondary: Some(secondary),
        }
    }

    /// Looks the blob up across both tiers, promoting a secondary hit back
    /// into the primary. Promotion failure does not fail the lookup.
    pub fn get(&self, key: &CacheKey) -> Option<CachedBlob> {
        if let Some(value) = self.primary.get(key) {
            return Some(value);
        }
        let secondary = self.secondary.as_ref()?;
        let value = secondary.lookup(key)?;
        if self
            .primary
            .insert(*key, Arc::clone(&value), value.len() as u64)
            .is_err()
        {
            tracing::debug!("promotion from secondary blob cache tier failed");
        }
        Some(value)
    }

    /// Inserts an owned payload charged by its byte size.
    pub fn insert(&self, key: CacheKey, value: CachedBlob) -> Result<()> {
        let charge = value.len() as u64;
        self.primary.insert(key, value, charge)
    }

    /// True if either tier holds the blob. Does not promote.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.primary.contains(key)
            || self
                .secondary
                .as_ref()
                .is_some_and(|sec| sec.contains(key))
    }

    pub fn usage(&self) -> u64 {
        self.primary.usage()
    }

    /// Drops every primary-tier entry without demoting. Secondary contents
    /// are untouched.
    pub fn clear(&self) {
        self.primary.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(offset: u64) -> CacheKey {
        super::super::cache_key::OffsetableCacheKey::new("db", "session", 1, 1000)
            .with_offset(offset)
    }

    fn blob(len: usize, fill: u8) -> CachedBlob {
        Arc::from(vec![fill; len])
    }

    #[test]
    fn insert_and_get() {
        let cache = BlobCache::with_capacity(1024, 1);
        cache.insert(key(0), blob(64, 0xaa)).unwrap();

        let value = cache.get(&key(0)).expect("blob not cached");
        assert_eq!(value.len(), 64);
        assert!(value.iter().all(|&b| b == 0xaa));
        assert!(cache.contains(&key(0)));
        assert!(!cache.contains(&key(1)));
    }

    #[test]
    fn charge_is_the_byte_size() {
        let cache = BlobCache::with_capacity(1024, 1);
        cache.insert(key(0), blob(100, 1)).unwrap();
        cache.insert(key(1), blob(200, 2)).unwrap();
        assert_eq!(cache.usage(), 300);
    }

    #[test]
    fn eviction_demotes_into_secondary() {
        let secondary = Arc::new(CompressedSecondaryCache::with_capacity(1 << 20, 1));
        let cache = BlobCache::with_secondary(
            256,
            1,
            Arc::clone(&secondary) as Arc<dyn SecondaryCache>,
            CacheTier::NonVolatileBlock,
        );

        // Fill past primary capacity so something is demoted.
        for i in 0..8u64 {
            cache.insert(key(i), blob(64, i as u8)).unwrap();
        }
        assert!(
            secondary.usage() > 0,
            "no entries were demoted to the secondary tier"
        );

        // Every blob is still reachable through the tiered lookup.
        for i in 0..8u64 {
            let value = cache
                .get(&key(i))
                .unwrap_or_else(|| panic!("blob {i} lost from both tiers"));
            assert!(value.iter().all(|&b| b == i as u8));
        }
    }

    #[test]
    fn secondary_hit_survives_failed_promotion() {
        let secondary = Arc::new(CompressedSecondaryCache::with_capacity(1 << 20, 1));
        secondary.insert(key(0), &vec![7u8; 512]);

        // Primary too small to ever admit the 512-byte value.
        let cache = BlobCache::with_secondary(
            128,
            1,
            Arc::clone(&secondary) as Arc<dyn SecondaryCache>,
            CacheTier::NonVolatileBlock,
        );

        let value = cache.get(&key(0)).expect("secondary hit lost");
        assert_eq!(value.len(), 512);
        assert!(value.iter().all(|&b| b == 7));
    }

    #[test]
    fn volatile_tier_disables_the_secondary() {
        let secondary = Arc::new(CompressedSecondaryCache::with_capacity(1 << 20, 1));
        secondary.insert(key(0), b"spilled");

        let cache = BlobCache::with_secondary(
            1024,
            1,
            Arc::clone(&secondary) as Arc<dyn SecondaryCache>,
            CacheTier::Volatile,
        );
        assert!(cache.get(&key(0)).is_none());
        assert!(!cache.contains(&key(0)));
    }

    #[test]
    fn clear_only_touches_the_primary() {
        let secondary = Arc::new(CompressedSecondaryCache::with_capacity(1 << 20, 1));
        let cache = BlobCache::with_secondary(
            1024,
            1,
            Arc::clone(&secondary) as Arc<dyn SecondaryCache>,
            CacheTier::NonVolatileBlock,
        );
        secondary.insert(key(0), b"kept");
        cache.insert(key(1), blob(10, 1)).unwrap();

        cache.clear();
        assert_eq!(cache.usage(), 0);
        assert!(cache.get(&key(0)).is_some());
    }
}
