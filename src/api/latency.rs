//! Provider call latency, recorded by the dispatcher around every `get_full`
//! and read by `GET /api/stats/latency`. Values are microseconds.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

use crate::error::{AppError, Result};

/// Tracks 1us to 100s at 3 significant figures.
pub struct LatencyStats {
    inner: Mutex<Histogram<u64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
    pub max_us: Option<u64>,
}

impl LatencyStats {
    pub fn new() -> Result<Self> {
        let histogram = Histogram::new_with_bounds(1, 100_000_000, 3)
            .map_err(|e| AppError::Config(format!("latency histogram: {e}")))?;
        Ok(Self {
            inner: Mutex::new(histogram),
        })
    }

    /// Durations beyond the tracked range are clamped to it.
    pub fn record(&self, d: Duration) {
        let us = (d.as_micros().min(100_000_000) as u64).max(1);
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let Ok(h) = self.inner.lock() else {
            return LatencySummary::empty();
        };
        if h.len() == 0 {
            return LatencySummary::empty();
        }
        LatencySummary {
            samples: h.len(),
            p50_us: Some(h.value_at_quantile(0.5)),
            p95_us: Some(h.value_at_quantile(0.95)),
            p99_us: Some(h.value_at_quantile(0.99)),
            max_us: Some(h.max()),
        }
    }
}

impl LatencySummary {
    fn empty() -> Self {
        Self {
            samples: 0,
            p50_us: None,
            p95_us: None,
            p99_us: None,
            max_us: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_reports_no_percentiles() {
        let stats = LatencyStats::new().unwrap();
        let s = stats.summary();
        assert_eq!(s.samples, 0);
        assert!(s.p50_us.is_none());
    }

    #[test]
    fn percentiles_follow_recorded_calls() {
        let stats = LatencyStats::new().unwrap();
        for ms in 1..=100 {
            stats.record(Duration::from_millis(ms));
        }
        stats.record(Duration::ZERO);
        let s = stats.summary();
        assert_eq!(s.samples, 101);
        let p50 = s.p50_us.unwrap();
        assert!((49_000..=51_000).contains(&p50), "p50 {p50}");
        assert!(s.p99_us.unwrap() >= s.p95_us.unwrap());
        assert!(s.max_us.unwrap() >= 99_900);
    }
}
