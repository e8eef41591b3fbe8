//! Deterministic cache keys for blob payloads.
//!
//! A key is derived from the database identity (`db_id`, `db_session_id`),
//! the blob file number, and the file size; the record offset is mixed in
//! last. The derivation is stable across processes so a persistent secondary
//! tier stays addressable after restart.

use crc::{Crc, CRC_64_ECMA_182};

/// File-size stand-in used by builder-time cache warm-up, when the final
/// file size is not known yet. Readers probe this alongside the real-size
/// key (see `BlobSource`).
pub const SENTINEL_FILE_SIZE: u64 = u64::MAX;

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// A 128-bit cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    hi: u64,
    lo: u64,
}

impl CacheKey {
    pub fn as_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.hi.to_le_bytes());
        bytes[8..].copy_from_slice(&self.lo.to_le_bytes());
        bytes
    }
}

/// The per-file base from which record-level cache keys are derived.
///
/// The base hashes `(db_id, db_session_id)` into the high half and chains
/// `(file_number, file_size)` into the low half. `with_offset` XOR-mixes the
/// offset into the low half; XOR is reversible, so two distinct offsets can
/// never produce the same key within one base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetableCacheKey {
    base_hi: u64,
    base_lo: u64,
}

impl OffsetableCacheKey {
    pub fn new(db_id: &str, db_session_id: &str, file_number: u64, file_size: u64) -> Self {
        let mut digest = CRC64.digest();
        digest.update(db_id.as_bytes());
        // Separator keeps ("ab", "c") distinct from ("a", "bc").
        digest.update(&[0]);
        digest.update(db_session_id.as_bytes());
        let base_hi = digest.finalize();

        let mut digest = CRC64.digest();
        digest.update(&base_hi.to_le_bytes());
        digest.update(&file_number.to_le_bytes());
        digest.update(&file_size.to_le_bytes());
        let base_lo = digest.finalize();

        Self { base_hi, base_lo }
    }

    pub fn with_offset(&self, offset: u64) -> CacheKey {
        CacheKey {
            hi: self.base_hi,
            lo: self.base_lo ^ offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = OffsetableCacheKey::new("db", "session", 7, 4096);
        let b = OffsetableCacheKey::new("db", "session", 7, 4096);
        assert_eq!(a, b);
        assert_eq!(a.with_offset(34), b.with_offset(34));
        assert_eq!(a.with_offset(34).as_bytes(), b.with_offset(34).as_bytes());
    }

    #[test]
    fn distinct_offsets_never_collide_within_a_base() {
        let base = OffsetableCacheKey::new("db", "session", 7, 4096);
        let mut seen = std::collections::HashSet::new();
        for offset in 0..10_000u64 {
            assert!(seen.insert(base.with_offset(offset)));
        }
    }

    #[test]
    fn identity_fields_change_the_key() {
        let base = OffsetableCacheKey::new("db", "session", 7, 4096);
        let variants = [
            OffsetableCacheKey::new("db2", "session", 7, 4096),
            OffsetableCacheKey::new("db", "session2", 7, 4096),
            OffsetableCacheKey::new("db", "session", 8, 4096),
            OffsetableCacheKey::new("db", "session", 7, 4097),
            OffsetableCacheKey::new("db", "session", 7, SENTINEL_FILE_SIZE),
        ];
        for other in variants {
            assert_ne!(base.with_offset(0), other.with_offset(0));
        }
    }

    #[test]
    fn session_concatenation_is_unambiguous() {
        let a = OffsetableCacheKey::new("ab", "c", 1, 1);
        let b = OffsetableCacheKey::new("a", "bc", 1, 1);
        assert_ne!(a.with_offset(0), b.with_offset(0));
    }
}
