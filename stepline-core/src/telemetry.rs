//! Beat processing timings.
//!
//! Fixed-size ring of how long each beat took to advance and dispatch,
//! measured against that beat's own interval.

use std::time::Duration;

const BEAT_BUFFER_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetrySummary {
    pub avg_us: u32,
    pub max_us: u32,
    pub p95_us: u32,
    /// Beats whose processing ran past their interval (cumulative).
    pub overruns: u64,
    pub beats: u64,
}

pub struct BeatTelemetry {
    durations_us: [u32; BEAT_BUFFER_SIZE],
    idx: usize,
    sample_count: usize,
    max_us: u32,
    overruns: u64,
    beats: u64,
}

impl Default for BeatTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl BeatTelemetry {
    pub fn new() -> Self {
        Self {
            durations_us: [0; BEAT_BUFFER_SIZE],
            idx: 0,
            sample_count: 0,
            max_us: 0,
            overruns: 0,
            beats: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, took: Duration, interval: Duration) {
        let us = took.as_micros().min(u32::MAX as u128) as u32;
        self.durations_us[self.idx] = us;
        self.idx = (self.idx + 1) % BEAT_BUFFER_SIZE;
        if self.sample_count < BEAT_BUFFER_SIZE {
            self.sample_count += 1;
        }
        self.max_us = self.max_us.max(us);
        if took > interval {
            self.overruns += 1;
        }
        self.beats += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Summarise the window and reset the max for the next one.
    pub fn take_summary(&mut self) -> TelemetrySummary {
        if self.sample_count == 0 {
            return TelemetrySummary::default();
        }

        let samples = &self.durations_us[..self.sample_count];
        let sum: u64 = samples.iter().map(|&x| u64::from(x)).sum();
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let p95_idx = (self.sample_count * 95 / 100).max(1) - 1;

        let summary = TelemetrySummary {
            avg_us: (sum / self.sample_count as u64) as u32,
            max_us: self.max_us,
            p95_us: sorted[p95_idx.min(self.sample_count - 1)],
            overruns: self.overruns,
            beats: self.beats,
        };
        self.max_us = 0;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEAT: Duration = Duration::from_millis(250);

    #[test]
    fn summary_averages_window() {
        let mut t = BeatTelemetry::new();
        for us in [100, 200, 300] {
            t.record(Duration::from_micros(us), BEAT);
        }
        let s = t.take_summary();
        assert_eq!(s.avg_us, 200);
        assert_eq!(s.max_us, 300);
        assert_eq!(s.beats, 3);
        assert_eq!(s.overruns, 0);
        assert_eq!(t.take_summary().max_us, 0);
    }

    #[test]
    fn overruns_compare_against_each_beat_interval() {
        let mut t = BeatTelemetry::new();
        t.record(Duration::from_millis(5), Duration::from_millis(10));
        t.record(Duration::from_millis(15), Duration::from_millis(10));
        t.record(Duration::from_millis(15), Duration::from_millis(20));
        assert_eq!(t.take_summary().overruns, 1);
    }

    #[test]
    fn ring_keeps_only_recent_samples() {
        let mut t = BeatTelemetry::new();
        for _ in 0..BEAT_BUFFER_SIZE {
            t.record(Duration::from_micros(1000), BEAT);
        }
        for _ in 0..BEAT_BUFFER_SIZE {
            t.record(Duration::from_micros(10), BEAT);
        }
        let s = t.take_summary();
        assert_eq!(s.avg_us, 10);
        assert_eq!(s.p95_us, 10);
        assert_eq!(s.beats, 2 * BEAT_BUFFER_SIZE as u64);
    }
}
