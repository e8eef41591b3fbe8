//! Compression codec dispatch for blob payloads.
//!
//! Every supported format self-describes its uncompressed length (snappy in
//! the raw block header, lz4 via the prepended size, zstd in the frame
//! header), so records never store it separately.

use crate::config::CompressionType;
use crate::corruption;
use crate::error::Result;

/// Compresses `data` with the given codec. `None` passes the bytes through.
pub fn compress(compression: CompressionType, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Snappy => {
            let mut encoder = snap::raw::Encoder::new();
            encoder
                .compress_vec(data)
                .map_err(|e| corruption!("error compressing blob: {e}"))
        }
        CompressionType::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionType::Zstd => zstd::stream::encode_all(data, 0)
            .map_err(|e| corruption!("error compressing blob: {e}")),
    }
}

/// Decompresses `data` with the given codec. `None` passes the bytes through.
pub fn decompress(compression: CompressionType, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Snappy => {
            let mut decoder = snap::raw::Decoder::new();
            decoder
                .decompress_vec(data)
                .map_err(|e| corruption!("error decompressing blob: {e}"))
        }
        CompressionType::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| corruption!("error decompressing blob: {e}")),
        CompressionType::Zstd => zstd::stream::decode_all(data)
            .map_err(|e| corruption!("error decompressing blob: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn sample() -> Vec<u8> {
        // Repetitive enough that every codec actually shrinks it.
        b"0123456789".repeat(100)
    }

    #[test]
    fn none_is_a_passthrough() {
        let data = sample();
        assert_eq!(compress(CompressionType::None, &data).unwrap(), data);
        assert_eq!(decompress(CompressionType::None, &data).unwrap(), data);
    }

    #[test]
    fn roundtrip_all_codecs() {
        let data = sample();
        for ty in [
            CompressionType::Snappy,
            CompressionType::Lz4,
            CompressionType::Zstd,
        ] {
            let compressed = compress(ty, &data).expect("compress failed");
            assert!(
                compressed.len() < data.len(),
                "{ty:?} did not shrink the sample"
            );
            let decompressed = decompress(ty, &compressed).expect("decompress failed");
            assert_eq!(decompressed, data);
        }
    }

    #[test]
    fn garbage_input_is_corruption() {
        // Starts with a small plausible length prefix so the codecs fail on
        // the stream contents rather than on an absurd allocation.
        let mut garbage = vec![0x04u8, 0x00, 0x00, 0x00];
        garbage.extend_from_slice(&[0xffu8; 60]);
        for ty in [
            CompressionType::Snappy,
            CompressionType::Lz4,
            CompressionType::Zstd,
        ] {
            assert!(
                matches!(decompress(ty, &garbage), Err(Error::Corruption(_))),
                "{ty:?} accepted garbage"
            );
        }
    }

    #[test]
    fn empty_payload_roundtrips() {
        for ty in [
            CompressionType::Snappy,
            CompressionType::Lz4,
            CompressionType::Zstd,
        ] {
            let compressed = compress(ty, b"").expect("compress failed");
            assert_eq!(decompress(ty, &compressed).unwrap(), b"");
        }
    }
}
