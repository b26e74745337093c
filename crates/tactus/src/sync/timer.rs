// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The adjustable logical clock and its offset estimator.

use super::filter::MedianWindow;
use crate::config::{MEDIAN_WINDOW, OFFSET_DAMP_CEIL, OFFSET_DAMP_FLOOR, SLEW_GAIN};
use crate::timing::TimeStamp;

/// A sample-counting logical clock slaved to a remote peer.
///
/// The clock advances by caller-supplied sample counts (`progress`) and
/// reads as `offset + count / sampling_rate`. The offset is steered by
/// two-way probe exchanges through [`apply_respond`](Self::apply_respond):
/// each raw offset estimate is damped, pushed through a median filter and
/// clamped to a slew bound before being applied, so a single outlier
/// round-trip cannot jerk the clock.
///
/// `monotonic_count` tracks samples since the last non-monotone
/// adjustment: whenever a `progress` step would not move the clock
/// forward (because the offset was just pulled back), it resets to zero.
/// Consumers needing strict monotonicity can poll
/// [`monotonic_time`](Self::monotonic_time) and hold off until it clears
/// a threshold again.
#[derive(Debug, Clone)]
pub struct PrecisionTimer {
    sampling_rate: f64,
    count: u64,
    monotonic_count: u64,
    offset: TimeStamp,
    last: TimeStamp,
    filter: MedianWindow<MEDIAN_WINDOW>,
}

impl PrecisionTimer {
    pub fn new(sampling_rate: f64) -> Self {
        Self {
            sampling_rate,
            count: 0,
            monotonic_count: 0,
            offset: TimeStamp::zero(),
            last: TimeStamp::zero(),
            filter: MedianWindow::new(),
        }
    }

    /// Restart the clock at `count`, clearing offset, watchdog and filter.
    pub fn reset(&mut self, count: u64) {
        self.count = count;
        self.monotonic_count = 0;
        self.offset = TimeStamp::zero();
        self.last = TimeStamp::zero();
        self.filter.reset();
    }

    /// Advance the clock by `count` samples.
    pub fn progress(&mut self, count: u64) {
        self.count += count;

        if self.as_time() <= self.last {
            self.monotonic_count = 0;
        } else {
            self.monotonic_count += count;
        }

        self.last = self.as_time();
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Seconds of uninterrupted forward progress.
    pub fn monotonic_time(&self) -> f64 {
        self.monotonic_count as f64 / self.sampling_rate
    }

    /// The clock's current logical time.
    pub fn as_time(&self) -> TimeStamp {
        self.offset + TimeStamp::from_count(self.count, self.sampling_rate)
    }

    /// The clock's current position in samples.
    pub fn as_samples(&self) -> i64 {
        self.offset.as_samples(self.sampling_rate) + self.count as i64
    }

    pub fn offset(&self) -> TimeStamp {
        self.offset
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    pub fn set_sampling_rate(&mut self, sampling_rate: f64) {
        self.sampling_rate = sampling_rate;
    }

    /// Fold one `Respond(t1, t2)` exchange into the offset, reading the
    /// arrival time from the clock itself. Returns the correction that
    /// was actually applied.
    ///
    /// The raw two-way estimate is `((t2 - t1) + (t2 - t3)) / 2` with
    /// `t3` the arrival time. It is damped by `clamp(|raw|, 0.1, 1.0)`
    /// and the applied step is clamped to eight times the filtered
    /// median, bounding the slew from any single sample.
    pub fn apply_respond(&mut self, t1: TimeStamp, t2: TimeStamp) -> TimeStamp {
        let t3 = self.as_time();

        let raw = ((t2 - t1) + (t2 - t3)).half();
        let damp = raw
            .as_secs_f64()
            .abs()
            .clamp(OFFSET_DAMP_FLOOR, OFFSET_DAMP_CEIL);
        let damped = raw.as_secs_f64() * damp;

        let bound = self
            .filter
            .push(TimeStamp::new(damped))
            .as_secs_f64()
            .abs()
            * SLEW_GAIN;
        let applied = TimeStamp::new(damped.clamp(-bound, bound));

        self.offset = self.offset + applied;
        applied
    }
}

impl Default for PrecisionTimer {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SAMPLING_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f64 = 1000.0; // 1 sample == 1 ms keeps the numbers readable

    #[test]
    fn test_clock_reads_count_over_rate() {
        let mut timer = PrecisionTimer::new(RATE);
        timer.progress(500);
        assert!((timer.as_time().as_secs_f64() - 0.5).abs() < 1e-12);
        assert_eq!(timer.as_samples(), 500);
        assert_eq!(timer.count(), 500);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut timer = PrecisionTimer::new(RATE);
        timer.progress(100);
        timer.apply_respond(TimeStamp::zero(), TimeStamp::new(5.0));
        timer.reset(42);

        assert_eq!(timer.count(), 42);
        assert_eq!(timer.offset().as_secs_f64(), 0.0);
        assert_eq!(timer.monotonic_time(), 0.0);
    }

    #[test]
    fn test_monotonic_watchdog_resets_on_backward_step() {
        let mut timer = PrecisionTimer::new(RATE);
        timer.progress(100);
        assert!(timer.monotonic_time() > 0.0);

        // Pull the clock backwards further than the next step advances
        timer.offset_backwards_for_test(-0.5);
        timer.progress(10);
        assert_eq!(timer.monotonic_time(), 0.0); // TEST: watchdog tripped

        // It grows again with forward progress
        timer.progress(10);
        assert!((timer.monotonic_time() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_estimator_converges_with_symmetric_delay() {
        // True offset zero, 5 ms round trip: the estimator should keep
        // the offset within a millisecond after a burst of exchanges.
        let mut timer = PrecisionTimer::new(RATE);
        for _ in 0..30 {
            timer.progress(100); // client clock runs on
            let t1 = timer.as_time();
            let t2 = t1 + TimeStamp::new(0.0025); // server sees it 2.5 ms later
            timer.progress(5); // 5 ms until the answer lands
            timer.apply_respond(t1, t2);
        }
        assert!(timer.offset().as_secs_f64().abs() < 0.001);
    }

    #[test]
    fn test_estimator_tracks_true_offset() {
        // Server clock 50 ms ahead of the client's un-offset time base,
        // symmetric 4 ms round trip. The estimator should walk the offset
        // onto the true difference.
        let true_offset = 0.050;
        let mut timer = PrecisionTimer::new(RATE);
        for _ in 0..60 {
            timer.progress(100);
            let t1 = timer.as_time();
            let base = timer.count() as f64 / RATE;
            let t2 = TimeStamp::new(base + 0.002 + true_offset);
            timer.progress(4);
            timer.apply_respond(t1, t2);
        }
        let err = (timer.offset().as_secs_f64() - true_offset).abs();
        assert!(err < 0.005, "offset error {} too large", err);
    }

    #[test]
    fn test_step_bounded_by_raw_and_median() {
        let mut timer = PrecisionTimer::new(RATE);

        // Feed identical small offsets to settle the median
        for _ in 0..5 {
            timer.progress(100);
            let t1 = timer.as_time();
            let t2 = t1 + TimeStamp::new(0.001);
            timer.apply_respond(t1, t2);
        }
        let median = 0.001 * 0.1; // damped value of a settled 1 ms offset

        // Inject a spike on the response path: the answer arrives 500 ms
        // late, skewing the raw estimate by roughly -250 ms.
        timer.progress(100);
        let t1 = timer.as_time();
        let t2 = t1 + TimeStamp::new(0.0025);
        timer.progress(503);
        let applied = timer.apply_respond(t1, t2);

        let bound = SLEW_GAIN * median;
        assert!(
            applied.as_secs_f64().abs() <= bound + 1e-9,
            "applied {} exceeds slew bound {}",
            applied.as_secs_f64(),
            bound
        );
    }

    #[test]
    fn test_applied_never_exceeds_raw() {
        let mut timer = PrecisionTimer::new(RATE);
        for raw_ms in [0.5, -2.0, 10.0, -0.1, 3.0] {
            timer.progress(100);
            let t1 = timer.as_time();
            let t2 = t1 + TimeStamp::new(raw_ms / 1000.0);
            let applied = timer.apply_respond(t1, t2);
            assert!(applied.as_secs_f64().abs() <= (raw_ms / 1000.0).abs() + 1e-12);
        }
    }

    impl PrecisionTimer {
        /// Test hook: shove the offset directly.
        fn offset_backwards_for_test(&mut self, secs: f64) {
            self.offset = self.offset + TimeStamp::new(secs);
        }
    }
}
