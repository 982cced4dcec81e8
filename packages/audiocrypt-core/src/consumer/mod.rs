//! Client-side slice loading, buffering, and playback orchestration (§4.7-§4.10).

pub mod buffer_strategy;
pub mod loader;
pub mod playback;
pub mod prefetch_strategy;

pub use buffer_strategy::{
    AggressiveBufferStrategy, BalancedBufferStrategy, BufferEntry, BufferStrategy,
    ConservativeBufferStrategy,
};
pub use loader::{ExternalPcmDecoder, PcmSlice, SliceLoader, TrackMeta, UnsupportedPcmDecoder};
pub use playback::PlaybackController;
pub use prefetch_strategy::{
    AdaptivePrefetchStrategy, LinearPrefetchStrategy, NoPrefetchStrategy, PrefetchStrategy,
};
