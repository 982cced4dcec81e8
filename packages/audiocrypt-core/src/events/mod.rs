//! Observable event stream for pipeline and buffer notifications.
//!
//! Replaces the source pattern of per-event-name callbacks (loaded / hit /
//! miss / expired / cleaned) with a single tagged-variant event type.
//! Subscribers attach by capability ([`EventEmitter`]), not by string name.

mod emitter;

pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// All events the core can emit, categorized by subsystem.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum CoreEvent {
    Session(SessionEvent),
    Pipeline(PipelineEvent),
    Buffer(BufferEvent),
    Prefetch(PrefetchEvent),
}

/// Session lifecycle events (producer side).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    Created { session_id: String, timestamp: u64 },
    KeyExchangeCompleted { session_id: String, track_id: String, timestamp: u64 },
    Destroyed { session_id: String, timestamp: u64 },
    IdleSwept { session_id: String, timestamp: u64 },
}

/// Slice pipeline events (producer side).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    SlicePrepared { session_id: String, track_id: String, slice_id: String, sequence: u32 },
    SliceCacheHit { session_id: String, slice_id: String },
    SliceCacheEvicted { session_id: String, slice_id: String },
    PrewarmCompleted { session_id: String, track_id: String, slices_prepared: usize },
    PrewarmFailed { session_id: String, track_id: String, sequence: u32, error: String },
}

/// Consumer-side buffer lifecycle events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BufferEvent {
    Loaded { sequence: u32 },
    Hit { sequence: u32 },
    Miss { sequence: u32 },
    Expired { sequence: u32 },
    Cleaned { sequence: u32 },
}

/// Consumer-side prefetch events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PrefetchEvent {
    Completed { sequence: u32 },
    Failed { sequence: u32, error: String },
    BufferUnderrun { at_index: u32 },
}

impl From<SessionEvent> for CoreEvent {
    fn from(event: SessionEvent) -> Self {
        Self::Session(event)
    }
}
impl From<PipelineEvent> for CoreEvent {
    fn from(event: PipelineEvent) -> Self {
        Self::Pipeline(event)
    }
}
impl From<BufferEvent> for CoreEvent {
    fn from(event: BufferEvent) -> Self {
        Self::Buffer(event)
    }
}
impl From<PrefetchEvent> for CoreEvent {
    fn from(event: PrefetchEvent) -> Self {
        Self::Prefetch(event)
    }
}
