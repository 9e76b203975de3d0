use std::collections::VecDeque;
use std::time::Duration;

use courier_protocol::Phase;
use tokio::time::Instant;

/// Per-phase progress bookkeeping for one request.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub phase: Phase,
    pub last_reported_percent: Option<f64>,
    pub last_reported_at: Option<Instant>,
    pub last_bytes_at_report: u64,
    /// Current adaptive update interval.
    pub current_interval: Duration,
}

impl ProgressState {
    pub fn new(phase: Phase, interval: Duration) -> Self {
        Self {
            phase,
            last_reported_percent: None,
            last_reported_at: None,
            last_bytes_at_report: 0,
            current_interval: interval,
        }
    }

    /// Returns `true` if the interval has not yet elapsed since the last report.
    pub fn too_soon(&self, now: Instant) -> bool {
        self.last_reported_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.current_interval)
    }

    pub fn record(&mut self, now: Instant, percent: Option<f64>, bytes: Option<u64>) {
        self.last_reported_at = Some(now);
        if percent.is_some() {
            self.last_reported_percent = percent;
        }
        if let Some(b) = bytes {
            self.last_bytes_at_report = b;
        }
    }
}

/// Calculates transfer speed over a sliding window of cumulative byte samples.
#[derive(Debug)]
pub struct SpeedCalculator {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    max_samples: usize,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 100)
    }
}

impl SpeedCalculator {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
            max_samples: max_samples.max(2),
        }
    }

    /// Records the cumulative number of bytes transferred so far.
    pub fn record(&mut self, total_bytes: u64) {
        let now = Instant::now();
        self.samples.push_back((now, total_bytes));

        while let Some(&(at, _)) = self.samples.front() {
            if self.samples.len() > 2 && now.saturating_duration_since(at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Average speed in bytes/second within the window, 0.0 with fewer than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(&(t0, b0)), Some(&(t1, b1))) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = t1.saturating_duration_since(t0);
        if elapsed.is_zero() || b1 < b0 {
            return 0.0;
        }
        (b1 - b0) as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining` bytes, `None` when speed is unknown.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn speed_needs_two_samples() {
        let mut calc = SpeedCalculator::default();
        assert_eq!(calc.bytes_per_second(), 0.0);
        calc.record(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(10).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn speed_over_window() {
        let mut calc = SpeedCalculator::new(Duration::from_secs(10), 100);
        calc.record(0);
        tokio::time::advance(Duration::from_secs(2)).await;
        calc.record(2000);
        assert_eq!(calc.bytes_per_second(), 1000.0);
        assert_eq!(calc.eta(5000), Some(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn old_samples_fall_out_of_window() {
        let mut calc = SpeedCalculator::new(Duration::from_secs(5), 100);
        calc.record(0);
        tokio::time::advance(Duration::from_secs(10)).await;
        calc.record(10_000);
        tokio::time::advance(Duration::from_secs(1)).await;
        calc.record(10_500);
        // Only the last two samples remain: 500 bytes in 1 s.
        assert_eq!(calc.bytes_per_second(), 500.0);
    }

    #[tokio::test(start_paused = true)]
    async fn max_samples_is_enforced() {
        let mut calc = SpeedCalculator::new(Duration::from_secs(60), 5);
        for i in 0..20 {
            calc.record(i * 10);
        }
        assert!(calc.samples.len() <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_state_interval_gate() {
        let mut state = ProgressState::new(Phase::Download, Duration::from_secs(4));
        let start = Instant::now();
        assert!(!state.too_soon(start));
        state.record(start, Some(10.0), Some(1024));
        assert!(state.too_soon(start + Duration::from_secs(3)));
        assert!(!state.too_soon(start + Duration::from_secs(4)));
        assert_eq!(state.last_reported_percent, Some(10.0));
        assert_eq!(state.last_bytes_at_report, 1024);
    }
}
