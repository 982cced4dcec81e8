//! Consumer-side slice fetch, decrypt, decompress, decode pipeline (§4.7).

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::compression::CompressionProcessor;
use crate::crypto::{CryptoProcessor, EncryptMetadata, SessionKey};
use crate::error::{CoreError, CoreResult};
use crate::format::ContainerTag;
use crate::retry::{with_retry, RetryConfig};
use crate::transport::ConsumerTransport;

/// Decoded PCM for one slice: interleaved float32, normalized to [-1, 1].
#[derive(Debug, Clone)]
pub struct PcmSlice {
    pub sequence: u32,
    pub samples: Vec<f32>,
}

/// Per-track metadata needed to decode slices, published once as part of
/// `TrackInfo`/`SessionInfo`.
#[derive(Debug, Clone)]
pub struct TrackMeta {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub is_float32: bool,
    pub format: ContainerTag,
}

/// Decodes compressed-container slice bytes (mp3/flac/ogg) to interleaved
/// float32 PCM at the track's sample rate. Treated as an external
/// collaborator (§4.7 step 9) — the core only requires this shape back;
/// it never ships its own mp3/flac/ogg decoder.
pub trait ExternalPcmDecoder: Send + Sync {
    fn decode(&self, container: ContainerTag, bytes: &[u8], meta: &TrackMeta) -> CoreResult<Vec<f32>>;
}

/// Errors on anything other than WAV; for hosts that only ever exchange
/// already-PCM tracks, or as a placeholder before a platform decoder is
/// wired in.
#[derive(Default)]
pub struct UnsupportedPcmDecoder;

impl ExternalPcmDecoder for UnsupportedPcmDecoder {
    fn decode(&self, container: ContainerTag, _bytes: &[u8], _meta: &TrackMeta) -> CoreResult<Vec<f32>> {
        Err(CoreError::decode(format!(
            "no PCM decoder configured for container {container:?}"
        )))
    }
}

fn decode_wav_pcm(bytes: &[u8], bit_depth: u16, is_float32: bool) -> CoreResult<Vec<f32>> {
    let width = (bit_depth / 8) as usize;
    if width == 0 || bytes.len() % width != 0 {
        return Err(CoreError::decode("pcm buffer not aligned to sample width"));
    }

    let mut samples = Vec::with_capacity(bytes.len() / width);
    for chunk in bytes.chunks_exact(width) {
        let sample = if is_float32 && bit_depth == 32 {
            f32::from_le_bytes(chunk.try_into().expect("width checked"))
        } else {
            match bit_depth {
                8 => (f32::from(chunk[0]) - 128.0) / 128.0,
                16 => {
                    i16::from_le_bytes(chunk.try_into().expect("width checked")) as f32 / 32_768.0
                }
                24 => {
                    let sign = if chunk[2] & 0x80 != 0 { 0xFF } else { 0x00 };
                    let widened = [chunk[0], chunk[1], chunk[2], sign];
                    i32::from_le_bytes(widened) as f32 / 8_388_608.0
                }
                32 => {
                    i32::from_le_bytes(chunk.try_into().expect("width checked")) as f32
                        / 2_147_483_648.0
                }
                other => return Err(CoreError::decode(format!("unsupported bit depth {other}"))),
            }
        };
        samples.push(sample);
    }
    Ok(samples)
}

struct InFlightLoad {
    cancel: CancellationToken,
    sender: tokio::sync::broadcast::Sender<Result<Arc<PcmSlice>, String>>,
}

/// Fetches, decrypts, decompresses, and decodes slices on demand,
/// coalescing concurrent requests for the same slice id (§4.7, §5).
pub struct SliceLoader {
    transport: Arc<dyn ConsumerTransport>,
    crypto: Arc<dyn CryptoProcessor>,
    compression: Arc<dyn CompressionProcessor>,
    pcm_decoder: Arc<dyn ExternalPcmDecoder>,
    retry_config: RetryConfig,
    pub session_id: String,
    track_id: RwLock<Option<String>>,
    session_key: RwLock<Option<SessionKey>>,
    slice_ids: RwLock<Vec<String>>,
    meta: RwLock<Option<TrackMeta>>,
    cache: DashMap<u32, Arc<PcmSlice>>,
    played_slices: DashMap<u32, ()>,
    in_flight: DashMap<String, InFlightLoad>,
}

impl SliceLoader {
    #[must_use]
    pub fn new(
        transport: Arc<dyn ConsumerTransport>,
        crypto: Arc<dyn CryptoProcessor>,
        compression: Arc<dyn CompressionProcessor>,
        pcm_decoder: Arc<dyn ExternalPcmDecoder>,
        session_id: String,
    ) -> Self {
        Self {
            transport,
            crypto,
            compression,
            pcm_decoder,
            retry_config: RetryConfig::default(),
            session_id,
            track_id: RwLock::new(None),
            session_key: RwLock::new(None),
            slice_ids: RwLock::new(Vec::new()),
            meta: RwLock::new(None),
            cache: DashMap::new(),
            played_slices: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn set_session_key(&self, key: SessionKey) {
        *self.session_key.write() = Some(key);
    }

    /// Publishes the track plan this loader will serve against. Called
    /// once key exchange and `SessionInfo` have resolved.
    pub fn set_track_info(&self, track_id: Option<String>, slice_ids: Vec<String>, meta: TrackMeta) {
        *self.track_id.write() = track_id;
        *self.slice_ids.write() = slice_ids;
        *self.meta.write() = Some(meta);
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.session_key.read().is_some() && !self.slice_ids.read().is_empty()
    }

    #[must_use]
    pub fn cache_get(&self, sequence: u32) -> Option<Arc<PcmSlice>> {
        self.cache.get(&sequence).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn mark_played(&self, sequence: u32) {
        self.played_slices.insert(sequence, ());
    }

    #[must_use]
    pub fn is_played(&self, sequence: u32) -> bool {
        self.played_slices.contains_key(&sequence)
    }

    fn sequence_of(&self, slice_id: &str) -> CoreResult<u32> {
        self.slice_ids
            .read()
            .iter()
            .position(|id| id == slice_id)
            .map(|i| i as u32)
            .ok_or_else(|| CoreError::not_found(format!("unknown slice id {slice_id}")))
    }

    /// Loads, decrypts, decompresses, and decodes one slice, coalescing
    /// concurrent callers. A fresh `cancel` token preempts any in-flight
    /// load for the same slice id (§4.7 step 4, §9 cancel-vs-wait rule).
    pub async fn load_slice(
        &self,
        slice_id: &str,
        cancel: Option<CancellationToken>,
    ) -> CoreResult<Arc<PcmSlice>> {
        if !self.is_initialized() {
            return Err(CoreError::precondition("session not initialized"));
        }
        let sequence = self.sequence_of(slice_id)?;

        if let Some(cached) = self.cache_get(sequence) {
            return Ok(cached);
        }

        // Atomically check-and-insert via `entry`, which holds the shard
        // lock for the whole match: two concurrent callers can never both
        // observe `Vacant` for the same id (§5 coalescing law). A `cancel`
        // token preempts whatever is in flight; its absence joins it.
        let (sender, token, is_owner) = match self.in_flight.entry(slice_id.to_string()) {
            Entry::Occupied(mut e) if cancel.is_some() => {
                e.get().cancel.cancel();
                let token = cancel.unwrap();
                let (sender, _receiver) = tokio::sync::broadcast::channel(1);
                e.insert(InFlightLoad {
                    cancel: token.clone(),
                    sender: sender.clone(),
                });
                (sender, token, true)
            }
            Entry::Occupied(e) => (e.get().sender.clone(), e.get().cancel.clone(), false),
            Entry::Vacant(e) => {
                let token = cancel.unwrap_or_default();
                let (sender, _receiver) = tokio::sync::broadcast::channel(1);
                e.insert(InFlightLoad {
                    cancel: token.clone(),
                    sender: sender.clone(),
                });
                (sender, token, true)
            }
        };

        if !is_owner {
            let mut receiver = sender.subscribe();
            return match receiver.recv().await {
                Ok(Ok(slice)) => Ok(slice),
                Ok(Err(message)) => Err(CoreError::dependent(message)),
                Err(_) => Err(CoreError::dependent("in-flight load vanished")),
            };
        }

        let result = self.run_load(slice_id, sequence, &token).await;
        // Only remove the entry this call owns; a stale remove-by-key here
        // would evict a different caller's (or a preemptor's) in-flight entry.
        self.in_flight
            .remove_if(slice_id, |_, v| v.sender.same_channel(&sender));

        match result {
            Ok(slice) => {
                let slice = Arc::new(slice);
                self.cache.insert(sequence, slice.clone());
                let _ = sender.send(Ok(slice.clone()));
                Ok(slice)
            }
            Err(err) if err.kind() == crate::error::ErrorKind::Cancelled => Err(err),
            Err(err) => {
                let _ = sender.send(Err(err.to_string()));
                Err(err)
            }
        }
    }

    async fn run_load(
        &self,
        slice_id: &str,
        sequence: u32,
        token: &CancellationToken,
    ) -> CoreResult<PcmSlice> {
        let check_cancel = || -> CoreResult<()> {
            if token.is_cancelled() {
                Err(CoreError::cancelled())
            } else {
                Ok(())
            }
        };

        check_cancel()?;
        let track_id = self.track_id.read().clone();
        let session_id = self.session_id.clone();
        let slice_id_owned = slice_id.to_string();
        let transport = self.transport.clone();
        let encrypted = with_retry("fetch_slice", self.retry_config, || {
            let transport = transport.clone();
            let session_id = session_id.clone();
            let slice_id_owned = slice_id_owned.clone();
            let track_id = track_id.clone();
            async move { transport.fetch_slice(&session_id, &slice_id_owned, track_id).await }
        })
        .await?;

        check_cancel()?;
        let key = self
            .session_key
            .read()
            .clone()
            .ok_or_else(|| CoreError::precondition("session key not set"))?;
        let decrypted = self.crypto.decrypt(
            &encrypted.encrypted_data,
            &key,
            &EncryptMetadata { iv: encrypted.iv },
        )?;

        check_cancel()?;
        let decompressed = self.compression.decompress(&decrypted)?;

        check_cancel()?;
        let meta = self
            .meta
            .read()
            .clone()
            .ok_or_else(|| CoreError::precondition("track metadata not set"))?;
        let samples = if meta.format == ContainerTag::Wav || meta.format == ContainerTag::Unknown {
            decode_wav_pcm(&decompressed, meta.bit_depth, meta.is_float32)?
        } else {
            self.pcm_decoder.decode(meta.format, &decompressed, &meta)?
        };

        check_cancel()?;
        Ok(PcmSlice { sequence, samples })
    }

    /// Runs up to `concurrency` prefetch loads in parallel for `indices`
    /// not already cached. Failures are logged, never surfaced (§4.7).
    pub async fn prefetch_slices(&self, indices: &[u32], concurrency: usize) {
        use futures::stream::{self, StreamExt};

        let slice_ids = self.slice_ids.read().clone();
        let targets: Vec<(u32, String)> = indices
            .iter()
            .filter(|&&i| self.cache_get(i).is_none())
            .filter_map(|&i| slice_ids.get(i as usize).map(|id| (i, id.clone())))
            .collect();

        stream::iter(targets)
            .for_each_concurrent(concurrency.max(1), |(sequence, slice_id)| async move {
                if let Err(err) = self.load_slice(&slice_id, None).await {
                    if err.kind() != crate::error::ErrorKind::Cancelled {
                        tracing::warn!(slice_id, sequence, %err, "prefetch failed");
                    }
                }
            })
            .await;
    }

    /// Signals every currently in-flight load to abort at its next
    /// suspension point.
    pub fn cancel_pending_loads(&self) {
        for entry in self.in_flight.iter() {
            entry.value().cancel.cancel();
        }
    }
}
