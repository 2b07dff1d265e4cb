use anyhow::Result;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Percentiles reported for every batch
pub const DEFAULT_PERCENTILES: [f64; 3] = [50.0, 95.0, 99.0];

/// Distribution of per-call latencies in one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub median_ns: f64,
    pub std_dev_ns: f64,
    pub percentiles: Vec<PercentileValue>,
    pub total_samples: usize,
}

/// Percentile value pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value_ns: u64,
}

/// Latency collector using HDR histogram for accurate measurement
///
/// Only successful calls are recorded: a failed call reports zero elapsed
/// time, which would drag every percentile towards zero.
pub struct LatencyCollector {
    histogram: Histogram<u64>,
    sample_count: usize,
}

impl LatencyCollector {
    pub fn new() -> Result<Self> {
        // 3 significant figures, auto-resizing up to the longest call
        let histogram = Histogram::<u64>::new(3)?;
        Ok(Self {
            histogram,
            sample_count: 0,
        })
    }

    /// Record a latency measurement
    pub fn record(&mut self, latency: Duration) -> Result<()> {
        let latency_ns = latency.as_nanos().min(u64::MAX as u128) as u64;
        self.histogram.record(latency_ns.max(1))?;
        self.sample_count += 1;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Summary of what was recorded, `None` if nothing was
    pub fn get_metrics(&self, percentiles: &[f64]) -> Option<LatencyMetrics> {
        if self.is_empty() {
            return None;
        }

        let percentiles = percentiles
            .iter()
            .map(|&p| PercentileValue {
                percentile: p,
                value_ns: self.histogram.value_at_percentile(p),
            })
            .collect();

        Some(LatencyMetrics {
            min_ns: self.histogram.min(),
            max_ns: self.histogram.max(),
            mean_ns: self.histogram.mean(),
            median_ns: self.histogram.value_at_percentile(50.0) as f64,
            std_dev_ns: self.histogram.stdev(),
            percentiles,
            total_samples: self.sample_count,
        })
    }
}

impl LatencyMetrics {
    /// One-line rendering, e.g. `p50 1.20s, p95 2.31s, p99 2.40s`
    pub fn percentile_summary(&self) -> String {
        self.percentiles
            .iter()
            .map(|p| {
                format!(
                    "p{} {}",
                    p.percentile,
                    crate::utils::format_duration(Duration::from_nanos(p.value_ns))
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_collector() {
        let mut collector = LatencyCollector::new().unwrap();

        collector.record(Duration::from_millis(1)).unwrap();
        collector.record(Duration::from_millis(2)).unwrap();
        collector.record(Duration::from_millis(3)).unwrap();

        let metrics = collector.get_metrics(&DEFAULT_PERCENTILES).unwrap();
        assert_eq!(metrics.total_samples, 3);
        assert_eq!(metrics.percentiles.len(), 3);
        assert!(metrics.mean_ns > 1_900_000.0 && metrics.mean_ns < 2_100_000.0);
        assert!(metrics.min_ns <= metrics.max_ns);
    }

    #[test]
    fn test_empty_collector_has_no_metrics() {
        let collector = LatencyCollector::new().unwrap();
        assert!(collector.get_metrics(&DEFAULT_PERCENTILES).is_none());
    }

    #[test]
    fn test_percentile_summary() {
        let mut collector = LatencyCollector::new().unwrap();
        collector.record(Duration::from_millis(5)).unwrap();
        let summary = collector.get_metrics(&[50.0]).unwrap().percentile_summary();
        assert!(summary.starts_with("p50 "));
        assert!(summary.ends_with("ms"));
    }
}
