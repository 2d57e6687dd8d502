//! Sliding-window memory-growth detection and the soft restart limit.
//!
//! Per-worker state: a ring buffer of resident-set samples (one per
//! completed request). Every `check_interval` samples the least-squares
//! slope over the window is recomputed; a sustained slope above the
//! threshold logs `LEAK_TREND_DETECTED` once per window. Crossing the soft
//! limit requests a graceful restart exactly once per worker lifetime —
//! in-flight requests keep serving either way.

use serde::Serialize;

use fin_domain::config::GuardsConfig;

/// What a single sample produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordOutcome {
    /// Present only on check-interval boundaries with a full-enough window.
    pub slope_mb_per_req: Option<f64>,
    /// True the one time per window the trend warning fires.
    pub leak_trend_detected: bool,
    /// True the one time per lifetime the soft limit fires.
    pub soft_limit_signal: bool,
}

/// Snapshot of detector state for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DetectorState {
    pub samples: usize,
    pub total_recorded: u64,
    pub last_slope_mb_per_req: Option<f64>,
    pub soft_limit_fired: bool,
    pub window_size: usize,
    pub check_interval: usize,
    pub slope_threshold_mb: f64,
    pub soft_limit_mb: u64,
}

pub struct LeakDetector {
    window: Vec<f64>,
    /// Next write position in the ring.
    head: usize,
    filled: usize,
    total_recorded: u64,
    last_slope: Option<f64>,
    /// Total-recorded count at the last trend warning; the warning re-arms
    /// after a full window of new samples.
    warned_at: Option<u64>,
    soft_limit_fired: bool,

    window_size: usize,
    check_interval: usize,
    slope_threshold: f64,
    soft_limit_mb: f64,
}

impl LeakDetector {
    pub fn new(config: &GuardsConfig) -> Self {
        Self {
            window: vec![0.0; config.leak_window_size.max(1)],
            head: 0,
            filled: 0,
            total_recorded: 0,
            last_slope: None,
            warned_at: None,
            soft_limit_fired: false,
            window_size: config.leak_window_size.max(1),
            check_interval: config.leak_check_interval.max(1),
            slope_threshold: config.leak_slope_threshold_mb,
            soft_limit_mb: config.soft_limit_mb as f64,
        }
    }

    /// Record one resident-set sample (MB). Called once per completed
    /// request.
    pub fn record(&mut self, rss_mb: f64) -> RecordOutcome {
        self.window[self.head] = rss_mb;
        self.head = (self.head + 1) % self.window_size;
        self.filled = (self.filled + 1).min(self.window_size);
        self.total_recorded += 1;

        let mut outcome = RecordOutcome::default();

        // Slope check on interval boundaries, once enough samples exist.
        if self.total_recorded % self.check_interval as u64 == 0
            && self.filled >= self.check_interval
        {
            let slope = self.least_squares_slope();
            self.last_slope = Some(slope);
            outcome.slope_mb_per_req = Some(slope);

            let armed = self
                .warned_at
                .map_or(true, |at| self.total_recorded - at >= self.window_size as u64);
            if slope > self.slope_threshold && armed {
                self.warned_at = Some(self.total_recorded);
                outcome.leak_trend_detected = true;
                tracing::warn!(
                    slope_mb_per_req = slope,
                    threshold = self.slope_threshold,
                    window = self.filled,
                    "LEAK_TREND_DETECTED: resident set is growing per request"
                );
            }
        }

        // Soft limit fires at most once per worker lifetime.
        if rss_mb > self.soft_limit_mb && !self.soft_limit_fired {
            self.soft_limit_fired = true;
            outcome.soft_limit_signal = true;
            tracing::warn!(
                rss_mb,
                soft_limit_mb = self.soft_limit_mb,
                "soft memory limit exceeded; requesting graceful restart"
            );
        }

        outcome
    }

    /// Least-squares slope (MB per request) over the samples currently in
    /// the window, in arrival order.
    fn least_squares_slope(&self) -> f64 {
        let n = self.filled;
        if n < 2 {
            return 0.0;
        }
        // Oldest-first iteration over the ring.
        let start = if self.filled == self.window_size {
            self.head
        } else {
            0
        };
        let ys = (0..n).map(|i| self.window[(start + i) % self.window_size]);

        let n_f = n as f64;
        let mean_x = (n_f - 1.0) / 2.0;
        let mean_y = ys.clone().sum::<f64>() / n_f;
        let mut cov = 0.0;
        let mut var = 0.0;
        for (i, y) in ys.enumerate() {
            let dx = i as f64 - mean_x;
            cov += dx * (y - mean_y);
            var += dx * dx;
        }
        if var == 0.0 {
            0.0
        } else {
            cov / var
        }
    }

    pub fn state(&self) -> DetectorState {
        DetectorState {
            samples: self.filled,
            total_recorded: self.total_recorded,
            last_slope_mb_per_req: self.last_slope,
            soft_limit_fired: self.soft_limit_fired,
            window_size: self.window_size,
            check_interval: self.check_interval,
            slope_threshold_mb: self.slope_threshold,
            soft_limit_mb: self.soft_limit_mb as u64,
        }
    }

    pub fn soft_limit_fired(&self) -> bool {
        self.soft_limit_fired
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resident-set sampling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reads this process's resident set via sysinfo.
pub struct RssSampler {
    system: sysinfo::System,
    pid: sysinfo::Pid,
}

impl RssSampler {
    pub fn new() -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        Some(Self {
            system: sysinfo::System::new(),
            pid,
        })
    }

    /// Current resident set in MB, or `None` if the process table read fails.
    pub fn rss_mb(&mut self) -> Option<f64> {
        self.system.refresh_processes(
            sysinfo::ProcessesToUpdate::Some(&[self.pid]),
            true,
        );
        let process = self.system.process(self.pid)?;
        Some(process.memory() as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(window: usize, interval: usize, threshold: f64, limit: u64) -> LeakDetector {
        LeakDetector::new(&GuardsConfig {
            leak_window_size: window,
            leak_check_interval: interval,
            leak_slope_threshold_mb: threshold,
            soft_limit_mb: limit,
            ..GuardsConfig::default()
        })
    }

    #[test]
    fn no_slope_before_check_interval() {
        let mut det = detector(200, 50, 0.1, 450);
        for i in 0..49 {
            let outcome = det.record(100.0 + i as f64);
            assert_eq!(outcome.slope_mb_per_req, None);
        }
    }

    #[test]
    fn steady_growth_fires_trend_once_per_window() {
        let mut det = detector(200, 50, 0.1, 100_000);
        let mut warnings = 0;
        let mut last_slope = 0.0;
        for i in 0..200 {
            let outcome = det.record(100.0 + 0.5 * i as f64);
            if outcome.leak_trend_detected {
                warnings += 1;
                last_slope = outcome.slope_mb_per_req.unwrap();
            }
        }
        assert_eq!(warnings, 1);
        assert!((last_slope - 0.5).abs() < 1e-9, "slope was {last_slope}");
    }

    #[test]
    fn flat_memory_never_warns() {
        let mut det = detector(200, 50, 0.1, 100_000);
        for _ in 0..400 {
            let outcome = det.record(250.0);
            assert!(!outcome.leak_trend_detected);
            if let Some(slope) = outcome.slope_mb_per_req {
                assert!(slope.abs() < 1e-9);
            }
        }
    }

    #[test]
    fn warning_rearms_after_full_window() {
        let mut det = detector(100, 50, 0.1, 1_000_000);
        let mut warnings = 0;
        // 300 samples of sustained growth: expect a warning roughly every
        // full window, never more than one per window.
        for i in 0..300 {
            if det.record(100.0 + 0.5 * i as f64).leak_trend_detected {
                warnings += 1;
            }
        }
        assert!((2..=3).contains(&warnings), "warnings = {warnings}");
    }

    #[test]
    fn soft_limit_fires_exactly_once() {
        let mut det = detector(200, 50, 0.1, 450);
        let signals: Vec<bool> = [500.0, 510.0, 520.0]
            .iter()
            .map(|&mb| det.record(mb).soft_limit_signal)
            .collect();
        assert_eq!(signals, vec![true, false, false]);
        assert!(det.state().soft_limit_fired);
    }

    #[test]
    fn slope_uses_only_windowed_samples() {
        // Window of 4: early high plateau scrolls out, leaving a flat tail.
        let mut det = detector(4, 2, 0.1, 100_000);
        for &mb in &[100.0, 200.0, 300.0, 300.0, 300.0, 300.0] {
            det.record(mb);
        }
        let slope = det.state().last_slope_mb_per_req.unwrap();
        assert!(slope.abs() < 1e-9, "slope was {slope}");
    }
}
