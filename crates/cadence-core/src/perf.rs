use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Samples kept for [`PerformanceAccumulator::recent_average`].
pub const RECENT_WINDOW: usize = 100;

/// Cycles that must be recorded before a low success rate counts as an issue.
const MIN_CYCLES_FOR_RATE: u64 = 10;

/// Running cycle statistics. Reset on every engine start.
#[derive(Debug, Clone)]
pub struct PerformanceAccumulator {
    count: u64,
    successes: u64,
    failures: u64,
    total_latency: Duration,
    min_latency: Option<Duration>,
    max_latency: Duration,
    recent: VecDeque<Duration>,
    started_at: Instant,
}

impl Default for PerformanceAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceAccumulator {
    pub fn new() -> Self {
        Self {
            count: 0,
            successes: 0,
            failures: 0,
            total_latency: Duration::ZERO,
            min_latency: None,
            max_latency: Duration::ZERO,
            recent: VecDeque::with_capacity(RECENT_WINDOW),
            started_at: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn record(&mut self, latency: Duration, success: bool) {
        self.count += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_latency += latency;
        self.min_latency = Some(self.min_latency.map_or(latency, |m| m.min(latency)));
        self.max_latency = self.max_latency.max(latency);
        if self.recent.len() == RECENT_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(latency);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Mean latency over every recorded cycle.
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        self.total_latency / u32::try_from(self.count).unwrap_or(u32::MAX)
    }

    pub fn min(&self) -> Duration {
        self.min_latency.unwrap_or(Duration::ZERO)
    }

    pub fn max(&self) -> Duration {
        self.max_latency
    }

    /// Mean latency over the last [`RECENT_WINDOW`] cycles.
    pub fn recent_average(&self) -> Duration {
        if self.recent.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.recent.iter().sum();
        sum / self.recent.len() as u32
    }

    /// Percentage of cycles that succeeded, 0 when nothing was recorded.
    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.successes as f64 * 100.0 / self.count as f64
    }

    pub fn executions_per_second(&self) -> f64 {
        self.executions_per_second_at(Instant::now())
    }

    pub fn executions_per_second_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.count as f64 / elapsed
    }

    /// `true` when the mean latency exceeds `max_avg`, or when more than ten
    /// cycles have run and the success rate is below `min_success_rate`.
    pub fn has_issue(&self, max_avg: Duration, min_success_rate: f64) -> bool {
        if self.average() > max_avg {
            return true;
        }
        self.count > MIN_CYCLES_FOR_RATE && self.success_rate() < min_success_rate
    }

    pub fn report(&self) -> PerfReport {
        PerfReport {
            cycles: self.count,
            successes: self.successes,
            failures: self.failures,
            success_rate: self.success_rate(),
            avg_ms: self.average().as_secs_f64() * 1_000.0,
            recent_avg_ms: self.recent_average().as_secs_f64() * 1_000.0,
            min_ms: self.min().as_secs_f64() * 1_000.0,
            max_ms: self.max().as_secs_f64() * 1_000.0,
            eps: self.executions_per_second(),
        }
    }
}

/// Point-in-time summary suitable for logging or JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct PerfReport {
    pub cycles: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_ms: f64,
    pub recent_avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub eps: f64,
}

impl fmt::Display for PerfReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycles={} ok={} failed={} rate={:.1}% avg={:.1}ms recent={:.1}ms min={:.1}ms max={:.1}ms eps={:.2}",
            self.cycles,
            self.successes,
            self.failures,
            self.success_rate,
            self.avg_ms,
            self.recent_avg_ms,
            self.min_ms,
            self.max_ms,
            self.eps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn empty_accumulator_reports_zeroes() {
        let perf = PerformanceAccumulator::new();
        assert_eq!(perf.average(), Duration::ZERO);
        assert_eq!(perf.min(), Duration::ZERO);
        assert_eq!(perf.success_rate(), 0.0);
        assert!(!perf.has_issue(ms(100), 90.0));
    }

    #[test]
    fn tracks_totals_and_extremes() {
        let mut perf = PerformanceAccumulator::new();
        perf.record(ms(10), true);
        perf.record(ms(30), false);
        perf.record(ms(20), true);
        assert_eq!(perf.count(), 3);
        assert_eq!(perf.successes(), 2);
        assert_eq!(perf.failures(), 1);
        assert_eq!(perf.average(), ms(20));
        assert_eq!(perf.min(), ms(10));
        assert_eq!(perf.max(), ms(30));
        assert!((perf.success_rate() - 66.666).abs() < 0.01);
    }

    #[test]
    fn recent_window_is_capped() {
        let mut perf = PerformanceAccumulator::new();
        for _ in 0..RECENT_WINDOW {
            perf.record(ms(100), true);
        }
        for _ in 0..RECENT_WINDOW {
            perf.record(ms(10), true);
        }
        assert_eq!(perf.recent_average(), ms(10));
        assert_eq!(perf.average(), ms(55));
    }

    #[test]
    fn low_success_rate_needs_enough_cycles() {
        let mut perf = PerformanceAccumulator::new();
        for _ in 0..10 {
            perf.record(ms(1), false);
        }
        assert!(!perf.has_issue(ms(100), 50.0));
        perf.record(ms(1), false);
        assert!(perf.has_issue(ms(100), 50.0));
    }

    #[test]
    fn slow_average_is_an_issue() {
        let mut perf = PerformanceAccumulator::new();
        perf.record(ms(500), true);
        assert!(perf.has_issue(ms(100), 0.0));
    }

    #[test]
    fn reset_clears_everything() {
        let mut perf = PerformanceAccumulator::new();
        perf.record(ms(5), true);
        perf.reset();
        assert_eq!(perf.count(), 0);
        assert_eq!(perf.report().cycles, 0);
    }

    #[test]
    fn report_renders_as_one_line() {
        let mut perf = PerformanceAccumulator::new();
        perf.record(ms(12), true);
        let line = perf.report().to_string();
        assert!(line.starts_with("cycles=1 ok=1 failed=0 rate=100.0%"));
        assert!(!line.contains('\n'));
    }
}
