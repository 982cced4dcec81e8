//! Slice partitioning math and on-demand slice preparation (§4.5).

use std::ops::Range;

use crate::compression::{effective_level, CompressionProcessor};
use crate::crypto::{CryptoProcessor, SessionKey};
use crate::error::{CoreError, CoreResult};
use crate::format::{ContainerTag, FormatInfo};

/// `[start_sample, end_sample)` for one slice, in PCM frames from the
/// start of the track (not bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceBoundary {
    pub start_sample: u64,
    pub end_sample: u64,
}

/// `samplesPerSlice = floor(sampleRate * sliceDurationMs / 1000)` (§4.5).
#[must_use]
pub fn samples_per_slice(sample_rate: u32, slice_duration_ms: u32) -> u64 {
    (u64::from(sample_rate) * u64::from(slice_duration_ms)) / 1000
}

/// `totalSlices = ceil(totalSamples / samplesPerSlice)` (§4.5).
#[must_use]
pub fn total_slices(total_samples: u64, per_slice: u64) -> u32 {
    if per_slice == 0 {
        return 0;
    }
    (total_samples.div_ceil(per_slice)) as u32
}

/// Splitmix64, used only to derive a deterministic pseudo-random sequence
/// of per-slice length jitter from a session id. Not a cryptographic
/// source — randomized slice length is a playback-variety feature, not a
/// security boundary.
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn seeded(session_id: &str) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(session_id.as_bytes());
        let seed = u64::from_be_bytes(digest[0..8].try_into().expect("8 bytes"));
        Self { state: seed }
    }

    /// Returns the next value in `[0.0, 1.0)`.
    fn next_f64(&mut self) -> f64 {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^= z >> 31;
        (z >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Partitions `total_samples` into slice boundaries.
///
/// When `randomize` is set, each slice's length is drawn from a
/// deterministic sequence seeded by `session_id`, bounded to
/// `base_len * (1 ± variance)`, so the same session id always yields the
/// same partition. The final slice is merged into its predecessor if it
/// would otherwise fall under 25% of the base slice length.
#[must_use]
pub fn partition_slices(
    total_samples: u64,
    sample_rate: u32,
    slice_duration_ms: u32,
    randomize: bool,
    variance: f64,
    session_id: &str,
) -> Vec<SliceBoundary> {
    let base_len = samples_per_slice(sample_rate, slice_duration_ms);
    if base_len == 0 || total_samples == 0 {
        return Vec::new();
    }

    let mut boundaries = Vec::new();
    let mut rng = DeterministicRng::seeded(session_id);
    let mut cursor = 0u64;

    while cursor < total_samples {
        let len = if randomize {
            let jitter = (rng.next_f64() * 2.0 - 1.0) * variance;
            let scaled = (base_len as f64 * (1.0 + jitter)).round();
            scaled.max(1.0) as u64
        } else {
            base_len
        };
        let end = (cursor + len).min(total_samples);
        boundaries.push(SliceBoundary {
            start_sample: cursor,
            end_sample: end,
        });
        cursor = end;
    }

    merge_short_final_slice(&mut boundaries, base_len);
    boundaries
}

fn merge_short_final_slice(boundaries: &mut Vec<SliceBoundary>, base_len: u64) {
    if boundaries.len() < 2 {
        return;
    }
    let min_len = base_len / 4;
    let last = *boundaries.last().expect("len >= 2");
    if last.end_sample - last.start_sample < min_len {
        boundaries.pop();
        let merged_start = boundaries.last().expect("len >= 1").start_sample;
        boundaries.pop();
        boundaries.push(SliceBoundary {
            start_sample: merged_start,
            end_sample: last.end_sample,
        });
    }
}

/// Resolves a slice boundary (in samples) to a byte range within the
/// asset, approximating by byte ratio for already-compressed containers
/// (§4.5 step 4; acknowledged lossy at slice boundaries).
#[must_use]
pub fn extract_byte_range(
    format: &FormatInfo,
    boundary: SliceBoundary,
    total_samples: u64,
) -> Range<usize> {
    let window = format.data_window();
    match format.container {
        ContainerTag::Wav => {
            let frame_size = (u32::from(format.channels) * u32::from(format.bit_depth) / 8).max(1) as u64;
            let start = window.start as u64 + boundary.start_sample * frame_size;
            let end = window.start as u64 + boundary.end_sample * frame_size;
            (start as usize).min(window.end)..(end as usize).min(window.end)
        }
        ContainerTag::Mp3 | ContainerTag::Flac | ContainerTag::Ogg | ContainerTag::Unknown => {
            if total_samples == 0 {
                return window.start..window.start;
            }
            let window_len = window.len() as u64;
            let start_byte =
                window.start as u64 + (window_len * boundary.start_sample) / total_samples;
            let end_byte = window.start as u64 + (window_len * boundary.end_sample) / total_samples;
            (start_byte as usize).min(window.end)..(end_byte as usize).min(window.end)
        }
    }
}

/// An encrypted, compressed slice ready to hand to the transport.
#[derive(Debug, Clone)]
pub struct PreparedSlice {
    pub encrypted_data: Vec<u8>,
    pub iv: Vec<u8>,
}

/// Runs steps 4-6 of the on-demand preparation pipeline: extract raw
/// bytes, compress with the adaptive level, encrypt. Step 7 (cache
/// insertion/eviction) is the caller's responsibility since it requires
/// the cache instance.
pub fn prepare_slice(
    asset: &[u8],
    format: &FormatInfo,
    boundary: SliceBoundary,
    total_samples: u64,
    compression_level: u8,
    compressor: &dyn CompressionProcessor,
    crypto: &dyn CryptoProcessor,
    key: &SessionKey,
) -> CoreResult<PreparedSlice> {
    let byte_range = extract_byte_range(format, boundary, total_samples);
    if byte_range.end > asset.len() || byte_range.start > byte_range.end {
        return Err(CoreError::decode("slice byte range out of bounds"));
    }
    let raw = &asset[byte_range];

    let level = effective_level(format.container, compression_level);
    let compressed = compressor.compress(raw, level)?;

    let encrypted = crypto.encrypt(&compressed, key)?;
    Ok(PreparedSlice {
        encrypted_data: encrypted.encrypted,
        iv: encrypted.metadata.iv,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::DeflateProcessor;
    use crate::crypto::AesGcmProcessor;
    use crate::format::ContainerTag;

    #[test]
    fn samples_per_slice_matches_formula() {
        assert_eq!(samples_per_slice(44_100, 5000), 220_500);
    }

    #[test]
    fn total_slices_rounds_up() {
        assert_eq!(total_slices(1_000, 300), 4);
        assert_eq!(total_slices(900, 300), 3);
    }

    #[test]
    fn fixed_partition_covers_all_samples_without_gaps() {
        let boundaries = partition_slices(1_000_000, 44_100, 5000, false, 0.0, "session-x");
        assert_eq!(boundaries.first().unwrap().start_sample, 0);
        assert_eq!(boundaries.last().unwrap().end_sample, 1_000_000);
        for window in boundaries.windows(2) {
            assert_eq!(window[0].end_sample, window[1].start_sample);
        }
    }

    #[test]
    fn randomized_partition_is_deterministic_for_same_session() {
        let a = partition_slices(1_000_000, 44_100, 5000, true, 0.4, "session-x");
        let b = partition_slices(1_000_000, 44_100, 5000, true, 0.4, "session-x");
        assert_eq!(a, b);
    }

    #[test]
    fn randomized_partition_differs_across_sessions() {
        let a = partition_slices(1_000_000, 44_100, 5000, true, 0.4, "session-a");
        let b = partition_slices(1_000_000, 44_100, 5000, true, 0.4, "session-b");
        assert_ne!(a, b);
    }

    #[test]
    fn final_slice_merges_if_too_short() {
        // total_samples chosen so the naive final slice would be tiny.
        let base = samples_per_slice(44_100, 1000);
        let total = base * 3 + base / 10; // trailing ~10% remainder
        let boundaries = partition_slices(total, 44_100, 1000, false, 0.0, "s");
        let last = boundaries.last().unwrap();
        assert!(last.end_sample - last.start_sample >= base / 4);
    }

    #[test]
    fn wav_byte_range_uses_frame_size() {
        let format = FormatInfo {
            container: ContainerTag::Wav,
            sample_rate: 44_100,
            channels: 2,
            bit_depth: 16,
            data_offset: 44,
            data_length: 1_000_000,
            estimated_total_samples: None,
        };
        let boundary = SliceBoundary {
            start_sample: 100,
            end_sample: 200,
        };
        let range = extract_byte_range(&format, boundary, 0);
        // frame_size = 2 channels * 2 bytes = 4
        assert_eq!(range, (44 + 400)..(44 + 800));
    }

    #[test]
    fn compressed_byte_range_uses_ratio_approximation() {
        let format = FormatInfo {
            container: ContainerTag::Mp3,
            sample_rate: 44_100,
            channels: 2,
            bit_depth: 16,
            data_offset: 0,
            data_length: 1000,
            estimated_total_samples: Some(10_000),
        };
        let boundary = SliceBoundary {
            start_sample: 0,
            end_sample: 5_000,
        };
        let range = extract_byte_range(&format, boundary, 10_000);
        assert_eq!(range, 0..500);
    }

    #[test]
    fn prepare_slice_round_trips_through_decrypt_decompress() {
        let asset = b"a".repeat(2000);
        let format = FormatInfo {
            container: ContainerTag::Wav,
            sample_rate: 44_100,
            channels: 1,
            bit_depth: 8,
            data_offset: 0,
            data_length: asset.len(),
            estimated_total_samples: None,
        };
        let boundary = SliceBoundary {
            start_sample: 0,
            end_sample: 100,
        };
        let key = SessionKey::from_shared_secret([1u8; 32]);
        let compressor = DeflateProcessor;
        let crypto = AesGcmProcessor;

        let prepared = prepare_slice(
            &asset, &format, boundary, 0, 6, &compressor, &crypto, &key,
        )
        .unwrap();

        let decrypted = crypto
            .decrypt(
                &prepared.encrypted_data,
                &key,
                &crate::crypto::EncryptMetadata { iv: prepared.iv },
            )
            .unwrap();
        let decompressed = compressor.decompress(&decrypted).unwrap();
        assert_eq!(decompressed, asset[0..100]);
    }
}
