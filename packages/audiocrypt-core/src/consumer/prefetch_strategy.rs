//! Read-ahead policies consulted by [`super::playback::PlaybackController`] (§4.8).

use parking_lot::Mutex;

/// Capability interface for deciding what to prefetch next.
pub trait PrefetchStrategy: Send + Sync {
    /// Indices worth fetching now, given the current position and what's
    /// already buffered.
    fn slices_to_prefetch(
        &self,
        current: u32,
        total: u32,
        buffered: &[u32],
        is_playing: bool,
    ) -> Vec<u32>;

    /// Reports the outcome of a previously requested prefetch.
    fn on_prefetch_complete(&self, index: u32, success: bool, error: Option<&str>);

    /// Relative fetch priority for `index`; higher runs first.
    fn priority(&self, index: u32, current: u32) -> i64 {
        -(i64::from(index) - i64::from(current)).abs()
    }

    /// Called by the controller when playback stalls on an empty buffer.
    fn on_buffer_underrun(&self) {}
}

fn forward_range(current: u32, ahead: u32, total: u32, buffered: &[u32]) -> Vec<u32> {
    ((current + 1)..=(current + ahead))
        .take_while(|&i| i < total)
        .filter(|i| !buffered.contains(i))
        .collect()
}

fn backward_range(current: u32, behind: u32, buffered: &[u32]) -> Vec<u32> {
    let start = current.saturating_sub(behind);
    (start..current)
        .rev()
        .filter(|i| !buffered.contains(i))
        .collect()
}

#[derive(Default)]
struct LinearState {
    ahead: u32,
    download_times_ms: Vec<u64>,
    attempts: u32,
    failures: u32,
}

/// Prefetch `[current+1, current+ahead]` and optionally
/// `[current-behind, current-1]`. Doubles `ahead` (bounded by `max_ahead`)
/// when observed mean download time exceeds `expected_download_time_ms`
/// by 2x, and adds 2 more when the failure rate exceeds 20%.
pub struct LinearPrefetchStrategy {
    pub behind: u32,
    pub max_ahead: u32,
    pub expected_download_time_ms: u64,
    state: Mutex<LinearState>,
}

impl LinearPrefetchStrategy {
    #[must_use]
    pub fn new(initial_ahead: u32, behind: u32, max_ahead: u32, expected_download_time_ms: u64) -> Self {
        Self {
            behind,
            max_ahead,
            expected_download_time_ms,
            state: Mutex::new(LinearState {
                ahead: initial_ahead,
                ..LinearState::default()
            }),
        }
    }

    /// Records an observed per-slice download duration, feeding the
    /// adaptive `ahead` adjustment in [`Self::on_prefetch_complete`].
    pub fn record_download_time_ms(&self, ms: u64) {
        let mut state = self.state.lock();
        state.download_times_ms.push(ms);
        if state.download_times_ms.len() > 20 {
            state.download_times_ms.remove(0);
        }
    }

    #[must_use]
    pub fn current_ahead(&self) -> u32 {
        self.state.lock().ahead
    }
}

impl Default for LinearPrefetchStrategy {
    fn default() -> Self {
        Self::new(3, 0, 12, 2000)
    }
}

impl PrefetchStrategy for LinearPrefetchStrategy {
    fn slices_to_prefetch(
        &self,
        current: u32,
        total: u32,
        buffered: &[u32],
        _is_playing: bool,
    ) -> Vec<u32> {
        let ahead = self.state.lock().ahead;
        let mut indices = forward_range(current, ahead, total, buffered);
        if self.behind > 0 {
            indices.extend(backward_range(current, self.behind, buffered));
        }
        indices
    }

    fn on_prefetch_complete(&self, _index: u32, success: bool, _error: Option<&str>) {
        let mut state = self.state.lock();
        state.attempts += 1;
        if !success {
            state.failures += 1;
        }

        let mean_ms = if state.download_times_ms.is_empty() {
            0
        } else {
            state.download_times_ms.iter().sum::<u64>() / state.download_times_ms.len() as u64
        };
        if mean_ms > self.expected_download_time_ms * 2 {
            state.ahead = (state.ahead * 2).min(self.max_ahead);
        }

        let failure_rate = if state.attempts == 0 {
            0.0
        } else {
            f64::from(state.failures) / f64::from(state.attempts)
        };
        if failure_rate > 0.2 {
            state.ahead = (state.ahead + 2).min(self.max_ahead);
        }
    }
}

#[derive(Default)]
struct AdaptiveState {
    download_time_ratio: f64,
    starvation_events: u32,
    seek_history: Vec<i64>,
}

/// Baseline count scaled by 1.3x while playing (0.7x paused), further
/// adjusted by observed download-time ratio and a starvation counter;
/// predicts the next seek target as `current + mean(seek_history)`.
pub struct AdaptivePrefetchStrategy {
    pub baseline_count: u32,
    pub max_count: u32,
    state: Mutex<AdaptiveState>,
}

impl AdaptivePrefetchStrategy {
    #[must_use]
    pub fn new(baseline_count: u32, max_count: u32) -> Self {
        Self {
            baseline_count,
            max_count,
            state: Mutex::new(AdaptiveState::default()),
        }
    }

    pub fn record_download_time_ratio(&self, ratio: f64) {
        self.state.lock().download_time_ratio = ratio;
    }

    pub fn record_seek(&self, distance: i64) {
        let mut state = self.state.lock();
        state.seek_history.push(distance);
        if state.seek_history.len() > 10 {
            state.seek_history.remove(0);
        }
    }

    #[must_use]
    pub fn predict_seek_target(&self, current: u32) -> u32 {
        let state = self.state.lock();
        if state.seek_history.is_empty() {
            return current;
        }
        let mean = state.seek_history.iter().sum::<i64>() / state.seek_history.len() as i64;
        (i64::from(current) + mean).max(0) as u32
    }

    fn effective_count(&self, is_playing: bool) -> u32 {
        let state = self.state.lock();
        let base = self.baseline_count as f64 * if is_playing { 1.3 } else { 0.7 };
        let ratio_adjusted = base * (1.0 + state.download_time_ratio.max(0.0));
        let starvation_adjusted = ratio_adjusted + f64::from(state.starvation_events);
        (starvation_adjusted.round() as u32).min(self.max_count).max(1)
    }
}

impl Default for AdaptivePrefetchStrategy {
    fn default() -> Self {
        Self::new(4, 16)
    }
}

impl PrefetchStrategy for AdaptivePrefetchStrategy {
    fn slices_to_prefetch(
        &self,
        current: u32,
        total: u32,
        buffered: &[u32],
        is_playing: bool,
    ) -> Vec<u32> {
        let ahead = self.effective_count(is_playing);
        forward_range(current, ahead, total, buffered)
    }

    fn on_prefetch_complete(&self, _index: u32, _success: bool, _error: Option<&str>) {}

    fn on_buffer_underrun(&self) {
        self.state.lock().starvation_events += 1;
    }
}

/// Prefetches nothing. Used when the host wants strictly on-demand loads.
#[derive(Default)]
pub struct NoPrefetchStrategy;

impl PrefetchStrategy for NoPrefetchStrategy {
    fn slices_to_prefetch(&self, _current: u32, _total: u32, _buffered: &[u32], _is_playing: bool) -> Vec<u32> {
        Vec::new()
    }
    fn on_prefetch_complete(&self, _index: u32, _success: bool, _error: Option<&str>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_prefetches_forward_window() {
        let strategy = LinearPrefetchStrategy::new(3, 0, 12, 2000);
        let indices = strategy.slices_to_prefetch(5, 100, &[], true);
        assert_eq!(indices, vec![6, 7, 8]);
    }

    #[test]
    fn linear_skips_already_buffered() {
        let strategy = LinearPrefetchStrategy::new(3, 0, 12, 2000);
        let indices = strategy.slices_to_prefetch(5, 100, &[6, 8], true);
        assert_eq!(indices, vec![7]);
    }

    #[test]
    fn linear_stops_at_total() {
        let strategy = LinearPrefetchStrategy::new(5, 0, 12, 2000);
        let indices = strategy.slices_to_prefetch(8, 10, &[], true);
        assert_eq!(indices, vec![9]);
    }

    #[test]
    fn linear_doubles_ahead_on_slow_downloads() {
        let strategy = LinearPrefetchStrategy::new(3, 0, 12, 100);
        strategy.record_download_time_ms(500);
        strategy.record_download_time_ms(500);
        strategy.on_prefetch_complete(0, true, None);
        assert_eq!(strategy.current_ahead(), 6);
    }

    #[test]
    fn linear_bumps_ahead_on_high_failure_rate() {
        let strategy = LinearPrefetchStrategy::new(3, 0, 12, 100_000);
        for _ in 0..5 {
            strategy.on_prefetch_complete(0, false, Some("boom"));
        }
        assert_eq!(strategy.current_ahead(), 5);
    }

    #[test]
    fn adaptive_scales_down_when_paused() {
        let strategy = AdaptivePrefetchStrategy::new(10, 100);
        let playing = strategy.slices_to_prefetch(0, 1000, &[], true).len();
        let paused = strategy.slices_to_prefetch(0, 1000, &[], false).len();
        assert!(paused < playing);
    }

    #[test]
    fn adaptive_predicts_seek_target_from_history() {
        let strategy = AdaptivePrefetchStrategy::default();
        strategy.record_seek(10);
        strategy.record_seek(20);
        assert_eq!(strategy.predict_seek_target(0), 15);
    }

    #[test]
    fn no_prefetch_returns_empty() {
        let strategy = NoPrefetchStrategy;
        assert!(strategy.slices_to_prefetch(5, 100, &[], true).is_empty());
    }

    #[test]
    fn default_priority_favors_nearby_indices() {
        let strategy = NoPrefetchStrategy;
        assert!(strategy.priority(5, 5) > strategy.priority(10, 5));
    }
}
