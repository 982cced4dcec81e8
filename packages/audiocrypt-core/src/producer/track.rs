//! Per-track state machine and on-demand slice serving (§3, §4.5).

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::cache::SliceCache;
use crate::compression::CompressionProcessor;
use crate::crypto::{CryptoProcessor, SessionKey};
use crate::error::{CoreError, CoreResult};
use crate::format::{ContainerTag, FormatParser};
use crate::keyexchange::{KeyExchangeRequest, KeyExchangeResponse, ServerKeyExchangeProcessor};
use crate::slice_id::SliceIdGenerator;

use super::pipeline::{partition_slices, prepare_slice, PreparedSlice, SliceBoundary};
use super::PipelineConfig;

/// Track lifecycle (§3 invariant iii). A track is either `Raw` (just
/// ingested), `ReadyForProcessing` (key exchange complete, pipeline not
/// yet run), `Processed` (TrackInfo published, slices servable on
/// demand), or `Removed`. Transitions are one-way — this replaces the
/// source's reliance on optional-field clearing (§9).
pub enum TrackState {
    Raw,
    ReadyForProcessing,
    Processed(ProcessedInfo),
    Removed,
}

/// Immutable once published (§5: "once `TrackInfo` is published,
/// `totalSlices` and `sliceIds` do not change for the lifetime of that
/// track").
#[derive(Debug, Clone)]
pub struct ProcessedInfo {
    pub total_slices: u32,
    pub slice_duration_ms: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub is_float32: bool,
    pub slice_ids: Vec<String>,
    pub format: ContainerTag,
    pub total_samples: u64,
    boundaries: Vec<SliceBoundary>,
}

impl ProcessedInfo {
    fn boundary_for(&self, slice_id: &str) -> Option<(u32, SliceBoundary)> {
        let sequence = self.slice_ids.iter().position(|id| id == slice_id)?;
        Some((sequence as u32, self.boundaries[sequence]))
    }
}

/// A single track within a session: its own key material, cache, and
/// slice plan (§3, §4.5). Exclusively owned by its [`super::Session`].
pub struct Track {
    pub track_id: String,
    pub track_index: u32,
    config: PipelineConfig,
    session_key: RwLock<Option<SessionKey>>,
    key_exchange: Mutex<Box<dyn ServerKeyExchangeProcessor>>,
    state: RwLock<TrackState>,
    /// Retained internally even once `Processed`, so slices can still be
    /// extracted on demand; only the FSM-visible `TrackState` "discards"
    /// it by no longer exposing it as raw bytes (§9 redesign note).
    audio_data: Option<Vec<u8>>,
    cache: SliceCache<PreparedSlice>,
    in_flight: DashMap<String, broadcast::Sender<Result<PreparedSlice, String>>>,
    crypto: Arc<dyn CryptoProcessor>,
    compression: Arc<dyn CompressionProcessor>,
    slice_id_gen: Arc<dyn SliceIdGenerator>,
    format_parser: Arc<dyn FormatParser>,
}

impl Track {
    #[must_use]
    pub fn new(
        track_id: String,
        track_index: u32,
        audio_data: Vec<u8>,
        key_exchange: Box<dyn ServerKeyExchangeProcessor>,
        crypto: Arc<dyn CryptoProcessor>,
        compression: Arc<dyn CompressionProcessor>,
        slice_id_gen: Arc<dyn SliceIdGenerator>,
        format_parser: Arc<dyn FormatParser>,
        config: PipelineConfig,
    ) -> Self {
        let cache = SliceCache::new(
            config.server_cache_size,
            Duration::from_millis(config.server_cache_ttl_ms),
        );
        Self {
            track_id,
            track_index,
            config,
            session_key: RwLock::new(None),
            key_exchange: Mutex::new(key_exchange),
            state: RwLock::new(TrackState::Raw),
            audio_data: Some(audio_data),
            cache,
            in_flight: DashMap::new(),
            crypto,
            compression,
            slice_id_gen,
            format_parser,
        }
    }

    #[must_use]
    pub fn key_exchange_complete(&self) -> bool {
        self.session_key.read().is_some()
    }

    /// Processes an incoming key-exchange request for this track,
    /// lazily initializing its `KeyExchangeProcessor` on first call
    /// (§4.1 rationale). Moves the track from `Raw` to
    /// `ReadyForProcessing` on success.
    pub fn perform_key_exchange(
        &self,
        request: &KeyExchangeRequest,
        session_id: &str,
    ) -> CoreResult<KeyExchangeResponse> {
        let (response, key) = self
            .key_exchange
            .lock()
            .process_request(request, session_id)?;
        self.complete_key_exchange(key);
        Ok(response)
    }

    /// Records the session key derived from key exchange and moves the
    /// track from `Raw` to `ReadyForProcessing`.
    fn complete_key_exchange(&self, key: SessionKey) {
        *self.session_key.write() = Some(key);
        let mut state = self.state.write();
        if matches!(*state, TrackState::Raw) {
            *state = TrackState::ReadyForProcessing;
        }
    }

    #[must_use]
    pub fn is_processed(&self) -> bool {
        matches!(*self.state.read(), TrackState::Processed(_))
    }

    #[must_use]
    pub fn processed_info(&self) -> Option<ProcessedInfo> {
        match &*self.state.read() {
            TrackState::Processed(info) => Some(info.clone()),
            _ => None,
        }
    }

    /// Runs the partitioning stage of the pipeline (§4.5), publishing
    /// `TrackInfo` so the consumer can plan prefetch without probing.
    /// Idempotent once already processed.
    pub fn process(&self, session_id: &str) -> CoreResult<()> {
        if self.is_processed() {
            return Ok(());
        }
        if !matches!(*self.state.read(), TrackState::ReadyForProcessing) {
            return Err(CoreError::precondition(
                "track must complete key exchange before processing",
            ));
        }
        let audio_data = self
            .audio_data
            .as_ref()
            .ok_or_else(|| CoreError::precondition("track has no audio data"))?;

        let format = self.format_parser.parse(audio_data)?;
        let frame_size = if format.container == ContainerTag::Wav {
            (u32::from(format.channels) * u32::from(format.bit_depth) / 8).max(1) as u64
        } else {
            1
        };
        let total_samples = match format.container {
            ContainerTag::Wav => format.data_length as u64 / frame_size,
            _ => format
                .estimated_total_samples
                .unwrap_or(format.data_length as u64),
        };

        let boundaries = partition_slices(
            total_samples,
            format.sample_rate,
            self.config.slice_duration_ms,
            self.config.randomize_slice_length,
            self.config.slice_length_variance,
            session_id,
        );
        let total_slices = boundaries.len() as u32;
        let slice_ids: Vec<String> = boundaries
            .iter()
            .enumerate()
            .map(|(i, _)| self.slice_id_gen.generate(session_id, i as u32, total_slices))
            .collect();

        let info = ProcessedInfo {
            total_slices,
            slice_duration_ms: self.config.slice_duration_ms,
            sample_rate: format.sample_rate,
            channels: format.channels,
            bit_depth: format.bit_depth,
            is_float32: false,
            slice_ids,
            format: format.container,
            total_samples,
            boundaries,
        };

        *self.state.write() = TrackState::Processed(info);
        Ok(())
    }

    /// Serves a slice by id, preparing it on demand if not already cached
    /// (§4.5 steps 1-7), coalescing concurrent requests for the same id.
    pub async fn get_slice(&self, slice_id: &str) -> CoreResult<(u32, PreparedSlice)> {
        let info = self
            .processed_info()
            .ok_or_else(|| CoreError::precondition("track has not been processed"))?;
        let key = self
            .session_key
            .read()
            .clone()
            .ok_or_else(|| CoreError::precondition("session key not set"))?;

        let (sequence, boundary) = info
            .boundary_for(slice_id)
            .ok_or_else(|| CoreError::not_found(format!("unknown slice id {slice_id}")))?;

        if let Some(cached) = self.cache.get(slice_id) {
            return Ok((sequence, cached));
        }

        // Atomically check-and-insert: `entry` holds the shard lock for the
        // whole match, so two concurrent callers can never both observe
        // `Vacant` for the same id (§5 coalescing law).
        let (sender, is_owner) = match self.in_flight.entry(slice_id.to_string()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => {
                let (sender, _receiver) = broadcast::channel(1);
                e.insert(sender.clone());
                (sender, true)
            }
        };

        if !is_owner {
            let mut receiver = sender.subscribe();
            return match receiver.recv().await {
                Ok(Ok(slice)) => Ok((sequence, slice)),
                Ok(Err(message)) => Err(CoreError::dependent(message)),
                Err(_) => Err(CoreError::dependent("in-flight slice preparation vanished")),
            };
        }

        let audio_data = self
            .audio_data
            .as_ref()
            .ok_or_else(|| CoreError::precondition("track has no audio data"))?;
        let format = self.format_parser.parse(audio_data)?;

        let result = prepare_slice(
            audio_data,
            &format,
            boundary,
            info.total_samples,
            self.config.compression_level,
            self.compression.as_ref(),
            self.crypto.as_ref(),
            &key,
        );

        // Only remove the entry this call owns; a stale remove-by-key here
        // would evict a different caller's in-flight entry for the same id.
        self.in_flight
            .remove_if(slice_id, |_, v| v.same_channel(&sender));
        match result {
            Ok(prepared) => {
                self.cache.insert(slice_id.to_string(), sequence, prepared.clone());
                let _ = sender.send(Ok(prepared.clone()));
                Ok((sequence, prepared))
            }
            Err(err) => {
                let _ = sender.send(Err(err.to_string()));
                Err(err)
            }
        }
    }

    /// Tears down the track: releases key material and marks it `Removed`.
    pub fn destroy(&self) {
        self.key_exchange.lock().destroy();
        *self.state.write() = TrackState::Removed;
    }

    #[must_use]
    pub fn is_removed(&self) -> bool {
        matches!(*self.state.read(), TrackState::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::DeflateProcessor;
    use crate::crypto::AesGcmProcessor;
    use crate::format::HeaderFormatParser;
    use crate::keyexchange::EcdhP256ServerProcessor;
    use crate::slice_id::HashGenerator;

    fn wav_bytes(data_len: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data_len as u32).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes()); // channels
        buf.extend_from_slice(&44_100u32.to_le_bytes());
        buf.extend_from_slice(&(44_100u32 * 4).to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&(data_len as u32).to_le_bytes());
        buf.extend(std::iter::repeat(0u8).take(data_len));
        buf
    }

    fn make_track(audio_data: Vec<u8>) -> Track {
        Track::new(
            "track-1".to_string(),
            0,
            audio_data,
            Box::new(EcdhP256ServerProcessor::default()),
            Arc::new(AesGcmProcessor),
            Arc::new(DeflateProcessor),
            Arc::new(HashGenerator),
            Arc::new(HeaderFormatParser),
            PipelineConfig {
                slice_duration_ms: 100,
                ..PipelineConfig::default()
            },
        )
    }

    #[test]
    fn process_requires_key_exchange_first() {
        let track = make_track(wav_bytes(44_100 * 4));
        let err = track.process("session-1").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Precondition);
    }

    #[test]
    fn process_publishes_track_info_with_matching_ids_and_slices() {
        let track = make_track(wav_bytes(44_100 * 4));
        track.complete_key_exchange(SessionKey::from_shared_secret([1u8; 32]));
        track.process("session-1").unwrap();

        let info = track.processed_info().unwrap();
        assert_eq!(info.slice_ids.len(), info.total_slices as usize);
        let unique: std::collections::HashSet<_> = info.slice_ids.iter().collect();
        assert_eq!(unique.len(), info.slice_ids.len());
    }

    #[tokio::test]
    async fn get_slice_returns_not_found_for_unknown_id() {
        let track = make_track(wav_bytes(44_100 * 4));
        track.complete_key_exchange(SessionKey::from_shared_secret([1u8; 32]));
        track.process("session-1").unwrap();

        let err = track.get_slice("does-not-exist").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn get_slice_succeeds_and_caches() {
        let track = make_track(wav_bytes(44_100 * 4));
        track.complete_key_exchange(SessionKey::from_shared_secret([1u8; 32]));
        track.process("session-1").unwrap();
        let info = track.processed_info().unwrap();
        let slice_id = info.slice_ids[0].clone();

        let (sequence, prepared) = track.get_slice(&slice_id).await.unwrap();
        assert_eq!(sequence, 0);
        assert!(!prepared.encrypted_data.is_empty());

        // second call should hit cache and return identical bytes.
        let (_, cached) = track.get_slice(&slice_id).await.unwrap();
        assert_eq!(cached.encrypted_data, prepared.encrypted_data);
    }

    #[tokio::test]
    async fn get_slice_without_session_key_set_yet_is_precondition() {
        let track = make_track(wav_bytes(44_100 * 4));
        let err = track.get_slice("anything").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Precondition);
    }

    /// AES-GCM mints a fresh random IV per `prepare_slice` invocation, so
    /// if coalescing failed and the pipeline ran more than once, concurrent
    /// callers would observe divergent `encrypted_data`/IVs. Asserting
    /// bitwise-identical results across genuinely concurrent callers is
    /// therefore a direct test of "exactly one pipeline execution".
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn get_slice_coalesces_genuinely_concurrent_callers() {
        let track = Arc::new(make_track(wav_bytes(44_100 * 4)));
        track.complete_key_exchange(SessionKey::from_shared_secret([1u8; 32]));
        track.process("session-1").unwrap();
        let info = track.processed_info().unwrap();
        let slice_id = info.slice_ids[0].clone();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let track = Arc::clone(&track);
            let slice_id = slice_id.clone();
            handles.push(tokio::spawn(async move { track.get_slice(&slice_id).await }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        let (first_sequence, first_prepared) = &results[0];
        for (sequence, prepared) in &results {
            assert_eq!(sequence, first_sequence);
            assert_eq!(prepared.encrypted_data, first_prepared.encrypted_data);
            assert_eq!(prepared.iv, first_prepared.iv);
        }
    }
}
