//! Server-side slice preparation pipeline and session registry (§4.5-4.6).

pub mod pipeline;
pub mod session;
pub mod track;

pub use pipeline::{extract_byte_range, partition_slices, prepare_slice, SliceBoundary};
pub use session::{spawn_idle_sweeper, Session, SessionRegistry, TrackProcessorFactory};
pub use track::{Track, TrackState};

/// Producer-side configuration (§6). Mirrors the wire-level defaults
/// exactly so a host only needs to override what it cares about.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub slice_duration_ms: u32,
    pub compression_level: u8,
    pub randomize_slice_length: bool,
    pub slice_length_variance: f64,
    pub prewarm_slices: u32,
    pub prewarm_concurrency: usize,
    pub adaptive_compression: bool,
    pub server_cache_size: usize,
    pub server_cache_ttl_ms: u64,
    pub track_processing_concurrency: usize,
    pub prewarm_first_track: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slice_duration_ms: 5000,
            compression_level: 6,
            randomize_slice_length: false,
            slice_length_variance: 0.4,
            prewarm_slices: 0,
            prewarm_concurrency: 3,
            adaptive_compression: true,
            server_cache_size: 10,
            server_cache_ttl_ms: 300_000,
            track_processing_concurrency: 3,
            prewarm_first_track: true,
        }
    }
}

/// Idle-session sweep interval and TTL (§4.6, fixed per spec).
pub const IDLE_SWEEP_INTERVAL_MS: u64 = 5 * 60 * 1000;
pub const IDLE_SESSION_TTL_MS: u64 = 30 * 60 * 1000;
