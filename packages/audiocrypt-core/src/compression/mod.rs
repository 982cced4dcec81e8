//! DEFLATE compression applied to slices before encryption (§4.3).
//!
//! Reference design: `flate2`'s zlib DEFLATE implementation at a
//! caller-selected level 0..=9. Already-compressed source formats
//! (mp3/flac/ogg/aac) skip compression entirely rather than spend cycles
//! re-compressing incompressible audio.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{CoreError, CoreResult};
use crate::format::ContainerTag;

/// Contract for (de)compressing slice payloads (§4.3).
pub trait CompressionProcessor: Send + Sync {
    /// Compresses `data` at `level` (0 = store, 9 = max compression).
    fn compress(&self, data: &[u8], level: u8) -> CoreResult<Vec<u8>>;

    /// Decompresses a DEFLATE stream produced by [`Self::compress`].
    fn decompress(&self, data: &[u8]) -> CoreResult<Vec<u8>>;
}

/// `flate2`-backed DEFLATE implementation of [`CompressionProcessor`].
#[derive(Default)]
pub struct DeflateProcessor;

impl CompressionProcessor for DeflateProcessor {
    fn compress(&self, data: &[u8], level: u8) -> CoreResult<Vec<u8>> {
        let level = level.min(9);
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(u32::from(level)));
        encoder
            .write_all(data)
            .map_err(|e| CoreError::decode(format!("compression write failed: {e}")))?;
        encoder
            .finish()
            .map_err(|e| CoreError::decode(format!("compression finish failed: {e}")))
    }

    fn decompress(&self, data: &[u8]) -> CoreResult<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CoreError::decode(format!("decompression failed: {e}")))?;
        Ok(out)
    }
}

/// Chooses the compression level to apply to a slice given its source
/// container format. Already entropy-coded containers are forced to
/// level 0 (store, no DEFLATE pass) since re-compressing them wastes CPU
/// for negligible size gain; everything else uses the caller-requested
/// level.
#[must_use]
pub fn effective_level(tag: ContainerTag, requested_level: u8) -> u8 {
    match tag {
        ContainerTag::Mp3 | ContainerTag::Flac | ContainerTag::Ogg => 0,
        ContainerTag::Wav | ContainerTag::Unknown => requested_level.min(9),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_restores_original_bytes() {
        let processor = DeflateProcessor;
        let data = b"the quick brown fox jumps over the lazy dog".repeat(10);

        let compressed = processor.compress(&data, 6).unwrap();
        let decompressed = processor.decompress(&compressed).unwrap();

        assert_eq!(decompressed, data);
    }

    #[test]
    fn level_zero_still_round_trips() {
        let processor = DeflateProcessor;
        let data = b"store only, no real compression";

        let compressed = processor.compress(data, 0).unwrap();
        let decompressed = processor.decompress(&compressed).unwrap();

        assert_eq!(decompressed, data);
    }

    #[test]
    fn highly_repetitive_data_shrinks() {
        let processor = DeflateProcessor;
        let data = vec![0u8; 4096];

        let compressed = processor.compress(&data, 9).unwrap();

        assert!(compressed.len() < data.len());
    }

    #[test]
    fn lossy_formats_force_level_zero() {
        assert_eq!(effective_level(ContainerTag::Mp3, 9), 0);
        assert_eq!(effective_level(ContainerTag::Flac, 5), 0);
        assert_eq!(effective_level(ContainerTag::Ogg, 3), 0);
    }

    #[test]
    fn wav_and_unknown_keep_requested_level() {
        assert_eq!(effective_level(ContainerTag::Wav, 6), 6);
        assert_eq!(effective_level(ContainerTag::Unknown, 4), 4);
    }

    #[test]
    fn level_is_clamped_to_nine() {
        assert_eq!(effective_level(ContainerTag::Wav, 20), 9);
    }

    #[test]
    fn decompressing_garbage_is_a_decode_error() {
        let processor = DeflateProcessor;
        let err = processor.decompress(b"not a deflate stream at all").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
    }
}
