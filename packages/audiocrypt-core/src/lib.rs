//! Audiocrypt Core - shared library for secure audio slice streaming.
//!
//! This crate provides the core functionality for partitioning an audio
//! asset into independently encrypted time-domain slices, establishing a
//! per-session shared secret via elliptic-curve key agreement, and serving
//! those slices to a client that decrypts, decompresses, and reassembles
//! them. It is designed to be used by both a standalone producer server
//! and a consumer client/player.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`events`]: Event system for pipeline/buffer/prefetch notifications
//! - [`error`]: Centralized error types
//! - [`retry`]: Exponential-backoff retry wrapper for transport calls
//! - [`crypto`]: Symmetric AEAD encryption (AES-256-GCM)
//! - [`keyexchange`]: Elliptic-curve key agreement (ECDH-P256)
//! - [`compression`]: Slice payload compression (DEFLATE)
//! - [`slice_id`]: Opaque slice identifier generation strategies
//! - [`format`]: Container/PCM header parsing (WAV, FLAC, OGG, MP3)
//! - [`cache`]: TTL + LRU slice cache shared by producer and consumer
//! - [`transport`]: Wire-level request/response contracts
//! - [`producer`]: Server-side session registry and slicing pipeline
//! - [`consumer`]: Client-side slice loading, buffering, and playback
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from
//! platform-specific implementations:
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): emitting domain events
//! - [`ProducerTransport`](transport::ProducerTransport) /
//!   [`ConsumerTransport`](transport::ConsumerTransport): wire transport
//!
//! Each trait has a reference implementation suitable for a standalone
//! server/client pair; hosts may supply their own.

pub mod cache;
pub mod compression;
pub mod consumer;
pub mod crypto;
pub mod error;
pub mod events;
pub mod format;
pub mod keyexchange;
pub mod producer;
pub mod retry;
pub mod runtime;
pub mod slice_id;
pub mod transport;

pub use cache::SliceCache;
pub use compression::{effective_level, CompressionProcessor, DeflateProcessor};
pub use crypto::{AesGcmProcessor, CryptoProcessor, SessionKey};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use events::{BufferEvent, CoreEvent, EventEmitter, PipelineEvent, PrefetchEvent, SessionEvent};
pub use format::{ContainerTag, FormatInfo, FormatParser, HeaderFormatParser};
pub use keyexchange::{
    ClientKeyExchangeProcessor, EcdhP256ClientProcessor, EcdhP256ServerProcessor,
    KeyExchangeRequest, KeyExchangeResponse, ServerKeyExchangeProcessor,
};
pub use retry::{with_retry, RetryConfig};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use slice_id::{
    HashGenerator, NanoidGenerator, SequentialGenerator, SliceIdGenerator, TimestampGenerator,
    UuidV4Generator,
};
pub use transport::{
    ConsumerTransport, EncryptedSlice, KeyExchangeResponseWithSession, KeyExchangeWireResponse,
    ProducerTransport, SessionInfo, TrackInfo,
};

pub use producer::{
    spawn_idle_sweeper, PipelineConfig, Session, SessionRegistry, Track, TrackProcessorFactory,
    TrackState,
};
pub use consumer::{
    AdaptivePrefetchStrategy, AggressiveBufferStrategy, BalancedBufferStrategy, BufferStrategy,
    ConservativeBufferStrategy, ExternalPcmDecoder, LinearPrefetchStrategy, NoPrefetchStrategy,
    PcmSlice, PlaybackController, PrefetchStrategy, SliceLoader, TrackMeta, UnsupportedPcmDecoder,
};
