//! Playback position tracking and buffer/prefetch orchestration (§4.10).
//!
//! A boundary component: it does not drive device timing or own an audio
//! context. It publishes `(sampleRate, channels, float32 interleaved)` via
//! [`super::loader::SliceLoader`] and leaves actual output to an external
//! sink (§9 remapping).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

use super::buffer_strategy::BufferStrategy;
use super::loader::SliceLoader;
use super::prefetch_strategy::PrefetchStrategy;

/// Tracks `current_index`/play state and consults the buffer and
/// prefetch strategies on transitions; does not itself fetch or decode
/// — that is [`SliceLoader`]'s job.
pub struct PlaybackController {
    loader: Arc<SliceLoader>,
    buffer_strategy: Arc<dyn BufferStrategy>,
    prefetch_strategy: Arc<dyn PrefetchStrategy>,
    current_index: AtomicU32,
    is_playing: AtomicBool,
    total_slices: u32,
}

impl PlaybackController {
    #[must_use]
    pub fn new(
        loader: Arc<SliceLoader>,
        buffer_strategy: Arc<dyn BufferStrategy>,
        prefetch_strategy: Arc<dyn PrefetchStrategy>,
        total_slices: u32,
    ) -> Self {
        Self {
            loader,
            buffer_strategy,
            prefetch_strategy,
            current_index: AtomicU32::new(0),
            is_playing: AtomicBool::new(false),
            total_slices,
        }
    }

    #[must_use]
    pub fn current_index(&self) -> u32 {
        self.current_index.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::SeqCst)
    }

    /// Begins playback at the current index. Requires the slice there to
    /// already be cached; otherwise this is a stall, not an error to
    /// retry blindly — the caller should await a load first.
    pub fn play(&self) -> CoreResult<()> {
        let index = self.current_index();
        if self.loader.cache_get(index).is_none() {
            return Err(CoreError::precondition(format!(
                "buffer stall: slice {index} not cached"
            )));
        }
        self.is_playing.store(true, Ordering::SeqCst);
        self.buffer_strategy.on_slice_playing(index);
        Ok(())
    }

    pub fn pause(&self) {
        self.is_playing.store(false, Ordering::SeqCst);
    }

    /// Called on slice playback completion: marks the finished slice
    /// played and advances the position.
    pub fn advance(&self) -> u32 {
        let finished = self.current_index();
        self.buffer_strategy.on_slice_finished(finished);
        self.loader.mark_played(finished);
        let next = (finished + 1).min(self.total_slices.saturating_sub(1));
        self.current_index.store(next, Ordering::SeqCst);
        next
    }

    /// Seeks to `target`, returning the buffered indices the buffer
    /// strategy says should be dropped and the indices the prefetch
    /// strategy recommends fetching next.
    pub fn seek(&self, target: u32, buffered: &[u32]) -> (Vec<u32>, Vec<u32>) {
        let current = self.current_index();
        let to_drop = self.buffer_strategy.on_seek(target, current, buffered);
        self.current_index.store(target, Ordering::SeqCst);
        let still_buffered: Vec<u32> = buffered.iter().copied().filter(|i| !to_drop.contains(i)).collect();
        let to_prefetch = self.prefetch_strategy.slices_to_prefetch(
            target,
            self.total_slices,
            &still_buffered,
            self.is_playing(),
        );
        (to_drop, to_prefetch)
    }

    /// Called when playback stalls on an empty buffer; notifies the
    /// prefetch strategy so it can react (e.g. widen its read-ahead
    /// window) and returns a fresh prefetch recommendation.
    pub fn on_buffer_underrun(&self, buffered: &[u32]) -> Vec<u32> {
        self.prefetch_strategy.on_buffer_underrun();
        self.prefetch_strategy.slices_to_prefetch(
            self.current_index(),
            self.total_slices,
            buffered,
            self.is_playing(),
        )
    }
}
