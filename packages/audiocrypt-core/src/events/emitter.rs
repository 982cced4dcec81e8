//! Event emitter abstraction decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than a concrete
//! channel, so the pipeline and buffer/prefetch strategies can be tested
//! without a transport and hosts can deliver events however they like
//! (WebSocket, SSE, an in-process channel for a UI).

use super::{BufferEvent, PipelineEvent, PrefetchEvent, SessionEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    fn emit_session(&self, event: SessionEvent);
    fn emit_pipeline(&self, event: PipelineEvent);
    fn emit_buffer(&self, event: BufferEvent);
    fn emit_prefetch(&self, event: PrefetchEvent);
}

/// No-op emitter for tests or headless use.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_session(&self, _event: SessionEvent) {}
    fn emit_pipeline(&self, _event: PipelineEvent) {}
    fn emit_buffer(&self, _event: BufferEvent) {}
    fn emit_prefetch(&self, _event: PrefetchEvent) {}
}

/// Logs every event at debug level. Useful during development.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }
    fn emit_pipeline(&self, event: PipelineEvent) {
        tracing::debug!(?event, "pipeline_event");
    }
    fn emit_buffer(&self, event: BufferEvent) {
        tracing::debug!(?event, "buffer_event");
    }
    fn emit_prefetch(&self, event: PrefetchEvent) {
        tracing::debug!(?event, "prefetch_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEventEmitter {
        pipeline_count: AtomicUsize,
        buffer_count: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                pipeline_count: AtomicUsize::new(0),
                buffer_count: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_session(&self, _event: SessionEvent) {}
        fn emit_pipeline(&self, _event: PipelineEvent) {
            self.pipeline_count.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_buffer(&self, _event: BufferEvent) {
            self.buffer_count.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_prefetch(&self, _event: PrefetchEvent) {}
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = CountingEventEmitter::new();

        emitter.emit_pipeline(PipelineEvent::SliceCacheHit {
            session_id: "s1".into(),
            slice_id: "sl1".into(),
        });
        emitter.emit_buffer(BufferEvent::Loaded { sequence: 0 });
        emitter.emit_buffer(BufferEvent::Expired { sequence: 1 });

        assert_eq!(emitter.pipeline_count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.buffer_count.load(Ordering::SeqCst), 2);
    }
}
