//! Session lifecycle, multi-track state machine, and idle eviction (§4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::compression::CompressionProcessor;
use crate::crypto::CryptoProcessor;
use crate::error::{CoreError, CoreResult};
use crate::events::{EventEmitter, SessionEvent};
use crate::format::FormatParser;
use crate::keyexchange::{KeyExchangeRequest, KeyExchangeResponse, ServerKeyExchangeProcessor};
use crate::runtime::TaskSpawner;
use crate::slice_id::SliceIdGenerator;
use crate::transport::{EncryptedSlice, SessionInfo, TrackInfo as WireTrackInfo};

use super::track::Track;
use super::{PipelineConfig, IDLE_SESSION_TTL_MS, IDLE_SWEEP_INTERVAL_MS};

/// Produces the per-track collaborators a freshly-created track needs.
/// Each track gets its own `KeyExchangeProcessor` instance (§4.1
/// rationale: per-track key isolation).
pub trait TrackProcessorFactory: Send + Sync {
    fn key_exchange(&self) -> Box<dyn ServerKeyExchangeProcessor>;
    fn crypto(&self) -> Arc<dyn CryptoProcessor>;
    fn compression(&self) -> Arc<dyn CompressionProcessor>;
    fn slice_id_generator(&self) -> Arc<dyn SliceIdGenerator>;
    fn format_parser(&self) -> Arc<dyn FormatParser>;
}

/// A producer-side session binding one or more tracks to fresh key
/// material (§3). Exclusively owns its tracks.
pub struct Session {
    pub session_id: String,
    created_at: Instant,
    last_accessed: RwLock<Instant>,
    is_multi_track: AtomicBool,
    tracks: RwLock<Vec<Arc<Track>>>,
    active_track_id: RwLock<Option<String>>,
}

impl Session {
    fn touch(&self) {
        *self.last_accessed.write() = Instant::now();
    }

    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_accessed.read().elapsed()
    }

    #[must_use]
    pub fn is_multi_track(&self) -> bool {
        self.is_multi_track.load(Ordering::Acquire)
    }

    fn active_track(&self) -> CoreResult<Arc<Track>> {
        let tracks = self.tracks.read();
        let active_id = self.active_track_id.read().clone();
        let track = match active_id {
            Some(id) => tracks.iter().find(|t| t.track_id == id),
            None => tracks.first(),
        };
        track
            .cloned()
            .ok_or_else(|| CoreError::not_found("session has no active track"))
    }

    fn find_track(&self, track_id: Option<&str>) -> CoreResult<Arc<Track>> {
        match track_id {
            Some(id) => self
                .tracks
                .read()
                .iter()
                .find(|t| t.track_id == id)
                .cloned()
                .ok_or_else(|| CoreError::not_found(format!("unknown track id {id}"))),
            None => self.active_track(),
        }
    }

    /// Snapshots this session into the wire [`SessionInfo`] shape.
    /// Top-level fields mirror the active track, per §6's
    /// backward-compatibility rule (an explicit Open Question resolution,
    /// see DESIGN.md).
    fn snapshot(&self) -> CoreResult<SessionInfo> {
        let tracks = self.tracks.read();
        let active = self.active_track()?;
        let active_info = active
            .processed_info()
            .map(|info| (info.total_slices, info.slice_duration_ms, info.sample_rate, info.channels, info.bit_depth, info.slice_ids.clone(), format!("{:?}", info.format).to_lowercase()))
            .unwrap_or((0, 0, 0, 0, 0, Vec::new(), String::new()));

        let wire_tracks = if self.is_multi_track() {
            Some(
                tracks
                    .iter()
                    .map(|t| {
                        let info = t.processed_info();
                        WireTrackInfo {
                            track_id: t.track_id.clone(),
                            track_index: t.track_index,
                            total_slices: info.as_ref().map_or(0, |i| i.total_slices),
                            slice_duration_ms: info.as_ref().map_or(0, |i| i.slice_duration_ms),
                            sample_rate: info.as_ref().map_or(0, |i| i.sample_rate),
                            channels: info.as_ref().map_or(0, |i| i.channels),
                            bit_depth: info.as_ref().map(|i| i.bit_depth),
                            is_float32: info.as_ref().map(|i| i.is_float32),
                            slice_ids: info.as_ref().map_or(Vec::new(), |i| i.slice_ids.clone()),
                            format: info.as_ref().map(|i| format!("{:?}", i.format).to_lowercase()),
                        }
                    })
                    .collect(),
            )
        } else {
            None
        };

        Ok(SessionInfo {
            session_id: self.session_id.clone(),
            total_slices: active_info.0,
            slice_duration_ms: active_info.1,
            sample_rate: active_info.2,
            channels: active_info.3,
            bit_depth: Some(active_info.4),
            is_float32: Some(false),
            slice_ids: active_info.5,
            format: if active_info.6.is_empty() {
                None
            } else {
                Some(active_info.6)
            },
            tracks: wire_tracks,
            active_track_id: if self.is_multi_track() {
                Some(active.track_id.clone())
            } else {
                None
            },
        })
    }
}

/// Creates sessions, tracks, performs key exchange, routes slice
/// requests, evicts expired sessions (§4.6). The single owner of every
/// [`Session`] it creates.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    config: PipelineConfig,
    factory: Arc<dyn TrackProcessorFactory>,
    emitter: Arc<dyn EventEmitter>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        factory: Arc<dyn TrackProcessorFactory>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            factory,
            emitter,
        }
    }

    fn build_track(&self, track_id: String, track_index: u32, audio_data: Vec<u8>) -> Track {
        Track::new(
            track_id,
            track_index,
            audio_data,
            self.factory.key_exchange(),
            self.factory.crypto(),
            self.factory.compression(),
            self.factory.slice_id_generator(),
            self.factory.format_parser(),
            self.config.clone(),
        )
    }

    /// `createSession(audioData) -> sessionId` (§4.6).
    pub fn create_session(&self, audio_data: Vec<u8>) -> String {
        let session_id = uuid::Uuid::new_v4().to_string();
        let track = self.build_track(format!("{session_id}-track-0"), 0, audio_data);

        let session = Session {
            session_id: session_id.clone(),
            created_at: Instant::now(),
            last_accessed: RwLock::new(Instant::now()),
            is_multi_track: AtomicBool::new(false),
            tracks: RwLock::new(vec![Arc::new(track)]),
            active_track_id: RwLock::new(None),
        };
        self.sessions.insert(session_id.clone(), Arc::new(session));

        self.emitter.emit_session(SessionEvent::Created {
            session_id: session_id.clone(),
            timestamp: 0,
        });
        session_id
    }

    /// `createMultiTrackSession(tracks[]) -> sessionId` (§4.6).
    pub fn create_multi_track_session(&self, tracks: Vec<Vec<u8>>) -> CoreResult<String> {
        if tracks.is_empty() {
            return Err(CoreError::invalid_argument(
                "multi-track session requires at least one track",
            ));
        }
        let session_id = uuid::Uuid::new_v4().to_string();
        let built: Vec<Arc<Track>> = tracks
            .into_iter()
            .enumerate()
            .map(|(i, data)| {
                Arc::new(self.build_track(format!("{session_id}-track-{i}"), i as u32, data))
            })
            .collect();
        let active_track_id = built[0].track_id.clone();

        let session = Session {
            session_id: session_id.clone(),
            created_at: Instant::now(),
            last_accessed: RwLock::new(Instant::now()),
            is_multi_track: AtomicBool::new(true),
            tracks: RwLock::new(built),
            active_track_id: RwLock::new(Some(active_track_id)),
        };
        self.sessions.insert(session_id.clone(), Arc::new(session));
        Ok(session_id)
    }

    fn lookup(&self, session_id: &str) -> CoreResult<Arc<Session>> {
        let session = self
            .sessions
            .get(session_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| CoreError::not_found(format!("unknown session {session_id}")))?;
        session.touch();
        Ok(session)
    }

    /// `handleKeyExchange(sessionId, request, trackId?) -> response` (§4.6).
    ///
    /// Single-track sessions always run the pipeline immediately after a
    /// successful exchange; multi-track sessions only do so for the first
    /// track when `prewarmFirstTrack` is set — other tracks process
    /// lazily on first slice request.
    pub fn handle_key_exchange(
        &self,
        session_id: &str,
        request: KeyExchangeRequest,
        track_id: Option<String>,
    ) -> CoreResult<(KeyExchangeResponse, SessionInfo)> {
        let session = self.lookup(session_id)?;
        let track = session.find_track(track_id.as_deref())?;

        let response = track.perform_key_exchange(&request, session_id)?;

        let should_process = !session.is_multi_track()
            || (self.config.prewarm_first_track && track.track_index == 0);
        if should_process {
            track.process(session_id)?;
        }

        self.emitter.emit_session(SessionEvent::KeyExchangeCompleted {
            session_id: session_id.to_string(),
            track_id: track.track_id.clone(),
            timestamp: 0,
        });

        let snapshot = session.snapshot()?;
        Ok((response, snapshot))
    }

    /// `getSessionInfo(sessionId) -> SessionInfo` (§6).
    pub fn get_session_info(&self, session_id: &str) -> CoreResult<SessionInfo> {
        self.lookup(session_id)?.snapshot()
    }

    /// `getSlice(sessionId, sliceId, trackId?) -> slice?` (§4.6). Runs the
    /// pipeline lazily if the target track hasn't been processed yet.
    pub async fn get_slice(
        &self,
        session_id: &str,
        slice_id: &str,
        track_id: Option<String>,
    ) -> CoreResult<EncryptedSlice> {
        let session = self.lookup(session_id)?;
        let track = session.find_track(track_id.as_deref())?;

        if !track.is_processed() {
            track.process(session_id)?;
        }

        let (sequence, prepared) = track.get_slice(slice_id).await?;
        Ok(EncryptedSlice {
            id: slice_id.to_string(),
            sequence,
            session_id: session_id.to_string(),
            track_id: Some(track.track_id.clone()),
            encrypted_data: prepared.encrypted_data,
            iv: prepared.iv,
        })
    }

    /// `addTrack(sessionId, audioData, metadata?) -> TrackInfo stub` (§4.6).
    /// Migrates a single-track session into multi-track on first call.
    pub fn add_track(
        &self,
        session_id: &str,
        audio_data: Vec<u8>,
        _metadata: Value,
    ) -> CoreResult<WireTrackInfo> {
        let session = self.lookup(session_id)?;
        session.is_multi_track.store(true, Ordering::Release);

        let mut tracks = session.tracks.write();
        let index = tracks.len() as u32;
        let track = Arc::new(self.build_track(
            format!("{session_id}-track-{index}"),
            index,
            audio_data,
        ));
        let track_id = track.track_id.clone();
        tracks.push(track);

        if session.active_track_id.read().is_none() {
            *session.active_track_id.write() = Some(tracks[0].track_id.clone());
        }

        Ok(WireTrackInfo {
            track_id,
            track_index: index,
            total_slices: 0,
            slice_duration_ms: self.config.slice_duration_ms,
            sample_rate: 0,
            channels: 0,
            bit_depth: None,
            is_float32: None,
            slice_ids: Vec::new(),
            format: None,
        })
    }

    /// `removeTrack(sessionId, trackIdOrIndex) -> SessionInfo` (§4.6).
    /// Forbidden on single-track sessions or when only one track remains.
    pub fn remove_track(&self, session_id: &str, track_id: &str) -> CoreResult<SessionInfo> {
        let session = self.lookup(session_id)?;
        if !session.is_multi_track() {
            return Err(CoreError::invalid_argument(
                "cannot remove a track from a single-track session",
            ));
        }

        let mut tracks = session.tracks.write();
        if tracks.len() <= 1 {
            return Err(CoreError::invalid_argument(
                "cannot remove the last remaining track",
            ));
        }
        let position = tracks
            .iter()
            .position(|t| t.track_id == track_id)
            .ok_or_else(|| CoreError::not_found(format!("unknown track id {track_id}")))?;

        let removed = tracks.remove(position);
        removed.destroy();

        let mut active = session.active_track_id.write();
        if active.as_deref() == Some(track_id) {
            *active = tracks.first().map(|t| t.track_id.clone());
        }
        drop(active);
        drop(tracks);

        session.snapshot()
    }

    /// `destroySession(sessionId)`: releases every track's key material
    /// before dropping the session.
    pub fn destroy_session(&self, session_id: &str) {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            for track in session.tracks.read().iter() {
                track.destroy();
            }
            self.emitter.emit_session(SessionEvent::Destroyed {
                session_id: session_id.to_string(),
                timestamp: 0,
            });
        }
    }

    /// Destroys every session whose `lastAccessed` is older than
    /// `IDLE_SESSION_TTL_MS`. Intended to be driven by a periodic
    /// background sweep (§4.6).
    pub fn sweep_idle_sessions(&self) {
        let ttl = Duration::from_millis(IDLE_SESSION_TTL_MS);
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|r| r.value().idle_for() > ttl)
            .map(|r| r.key().clone())
            .collect();

        for session_id in expired {
            self.destroy_session(&session_id);
            self.emitter.emit_session(SessionEvent::IdleSwept {
                session_id,
                timestamp: 0,
            });
        }
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn created_at(&self, session_id: &str) -> Option<Instant> {
        self.sessions.get(session_id).map(|r| r.value().created_at)
    }
}

/// Spawns the background idle-session sweeper on `spawner`, running every
/// `IDLE_SWEEP_INTERVAL_MS` for the lifetime of `registry`.
pub fn spawn_idle_sweeper(registry: Arc<SessionRegistry>, spawner: &dyn TaskSpawner) {
    spawner.spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(IDLE_SWEEP_INTERVAL_MS));
        loop {
            interval.tick().await;
            registry.sweep_idle_sessions();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::DeflateProcessor;
    use crate::crypto::AesGcmProcessor;
    use crate::events::NoopEventEmitter;
    use crate::format::HeaderFormatParser;
    use crate::keyexchange::{ClientKeyExchangeProcessor, EcdhP256ClientProcessor, EcdhP256ServerProcessor};
    use crate::slice_id::HashGenerator;

    struct TestFactory;

    impl TrackProcessorFactory for TestFactory {
        fn key_exchange(&self) -> Box<dyn ServerKeyExchangeProcessor> {
            Box::new(EcdhP256ServerProcessor::default())
        }
        fn crypto(&self) -> Arc<dyn CryptoProcessor> {
            Arc::new(AesGcmProcessor)
        }
        fn compression(&self) -> Arc<dyn CompressionProcessor> {
            Arc::new(DeflateProcessor)
        }
        fn slice_id_generator(&self) -> Arc<dyn SliceIdGenerator> {
            Arc::new(HashGenerator)
        }
        fn format_parser(&self) -> Arc<dyn FormatParser> {
            Arc::new(HeaderFormatParser)
        }
    }

    fn wav_bytes(data_len: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data_len as u32).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&44_100u32.to_le_bytes());
        buf.extend_from_slice(&(44_100u32 * 4).to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&(data_len as u32).to_le_bytes());
        buf.extend(std::iter::repeat(0u8).take(data_len));
        buf
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(
            PipelineConfig {
                slice_duration_ms: 100,
                ..PipelineConfig::default()
            },
            Arc::new(TestFactory),
            Arc::new(NoopEventEmitter),
        )
    }

    #[test]
    fn create_session_returns_unique_ids() {
        let registry = registry();
        let a = registry.create_session(wav_bytes(1000));
        let b = registry.create_session(wav_bytes(1000));
        assert_ne!(a, b);
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn create_multi_track_session_rejects_empty_list() {
        let registry = registry();
        let err = registry.create_multi_track_session(Vec::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    fn do_handshake(registry: &SessionRegistry, session_id: &str) {
        let mut client = EcdhP256ClientProcessor::default();
        client.initialize().unwrap();
        let request = client.create_request().unwrap();
        registry
            .handle_key_exchange(session_id, request, None)
            .unwrap();
    }

    #[test]
    fn key_exchange_processes_single_track_immediately() {
        let registry = registry();
        let session_id = registry.create_session(wav_bytes(44_100 * 4));
        do_handshake(&registry, &session_id);

        let info = registry.get_session_info(&session_id).unwrap();
        assert!(info.total_slices > 0);
        assert_eq!(info.slice_ids.len(), info.total_slices as usize);
    }

    #[tokio::test]
    async fn get_slice_returns_decryptable_payload() {
        let registry = registry();
        let session_id = registry.create_session(wav_bytes(44_100 * 4));
        do_handshake(&registry, &session_id);
        let info = registry.get_session_info(&session_id).unwrap();
        let slice_id = info.slice_ids[0].clone();

        let slice = registry.get_slice(&session_id, &slice_id, None).await.unwrap();
        assert_eq!(slice.sequence, 0);
        assert!(!slice.encrypted_data.is_empty());
        assert!(!slice.iv.is_empty());
    }

    #[test]
    fn add_track_migrates_session_to_multi_track() {
        let registry = registry();
        let session_id = registry.create_session(wav_bytes(44_100 * 4));
        let stub = registry
            .add_track(&session_id, wav_bytes(44_100 * 4), Value::Null)
            .unwrap();
        assert_eq!(stub.total_slices, 0);

        let info = registry.get_session_info(&session_id).unwrap();
        assert!(info.tracks.is_some());
        assert_eq!(info.tracks.unwrap().len(), 2);
    }

    #[test]
    fn remove_track_forbidden_on_single_track_session() {
        let registry = registry();
        let session_id = registry.create_session(wav_bytes(1000));
        let err = registry.remove_track(&session_id, "whatever").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn remove_track_forbidden_when_one_remains() {
        let registry = registry();
        let session_id = registry
            .create_multi_track_session(vec![wav_bytes(1000)])
            .unwrap();
        // force multi-track flag even though only one track exists, to
        // exercise the "last remaining track" guard independent of the
        // single-track guard above.
        let session = registry.sessions.get(&session_id).unwrap().value().clone();
        session.is_multi_track.store(true, Ordering::Release);
        let track_id = session.tracks.read()[0].track_id.clone();

        let err = registry.remove_track(&session_id, &track_id).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn remove_track_switches_active_when_active_removed() {
        let registry = registry();
        let session_id = registry
            .create_multi_track_session(vec![wav_bytes(1000), wav_bytes(1000)])
            .unwrap();
        let session = registry.sessions.get(&session_id).unwrap().value().clone();
        let first_id = session.tracks.read()[0].track_id.clone();
        let second_id = session.tracks.read()[1].track_id.clone();

        let info = registry.remove_track(&session_id, &first_id).unwrap();
        assert_eq!(info.active_track_id, Some(second_id));
    }

    #[test]
    fn destroy_session_removes_it() {
        let registry = registry();
        let session_id = registry.create_session(wav_bytes(1000));
        registry.destroy_session(&session_id);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn lookup_of_unknown_session_is_not_found() {
        let registry = registry();
        let err = registry.get_session_info("nonexistent").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
