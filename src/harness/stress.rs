use crate::cli::Operation;
use crate::client::{FileClient, TransferOutcome};
use crate::metrics::{LatencyCollector, LatencyMetrics, DEFAULT_PERCENTILES};
use crate::utils::{format_bytes, format_duration, format_rate, validate_concurrency};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// One batch of concurrent calls
#[derive(Debug, Clone)]
pub struct StressJob {
    pub operation: Operation,
    /// Local file to upload, or the file whose base name is downloaded;
    /// unused for LIST
    pub target: Option<PathBuf>,
    /// Number of concurrent calls (N)
    pub client_workers: usize,
    /// Pool size the server runs with (P); recorded, not enforced
    pub server_workers: usize,
}

/// Aggregate of one batch
#[derive(Debug, Clone, Serialize)]
pub struct StressResult {
    pub operation: Operation,
    /// Size of the local target file, 0 if unknown
    pub file_size: u64,
    pub client_workers: usize,
    pub server_workers: usize,
    /// Wall clock from the first launch to the last completion
    pub duration: Duration,
    /// Bytes moved by successful calls
    pub bytes_transferred: u64,
    pub throughput_bps: f64,
    /// Sum of per-call elapsed divided by N, failed calls counting as zero
    pub average_latency: Duration,
    pub successes: usize,
    pub failures: usize,
    /// Distribution over successful calls only
    pub latency: Option<LatencyMetrics>,
}

/// Run `job.client_workers` concurrent calls and aggregate them
///
/// Fails only on invalid input. Failed calls, including calls whose task
/// panicked, are counted, never propagated, so
/// `successes + failures == client_workers` always holds.
pub async fn run_stress(client: &FileClient, job: &StressJob) -> Result<StressResult> {
    validate_concurrency(job.client_workers).context("Invalid client worker count")?;
    if job.operation.needs_file() && job.target.is_none() {
        anyhow::bail!("A target file is required for {} operations", job.operation);
    }

    // A download target is usually the local copy of the served fixture;
    // if it is absent the size is learned from what arrived.
    let local_size = match &job.target {
        Some(path) => tokio::fs::metadata(path).await.map(|m| m.len()).ok(),
        None => None,
    };

    info!(
        operation = %job.operation,
        workers = job.client_workers,
        target = ?job.target,
        "Starting batch"
    );

    let shared = Arc::new(client.clone());
    let target = job.target.clone().map(Arc::new);
    let started = Instant::now();

    let mut calls = JoinSet::new();
    for _ in 0..job.client_workers {
        let client = Arc::clone(&shared);
        let target = target.clone();
        let operation = job.operation;
        calls.spawn(async move { client.execute(operation, target.as_deref().map(|p| p.as_path())).await });
    }

    let mut outcomes = Vec::with_capacity(job.client_workers);
    while let Some(joined) = calls.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                warn!(error = %e, "Client call ended abnormally");
                outcomes.push(TransferOutcome::failed());
            }
        }
    }
    let duration = started.elapsed();

    let mut result = aggregate(job, &outcomes, duration)?;
    result.file_size = local_size.unwrap_or_else(|| {
        outcomes
            .iter()
            .filter(|o| o.success)
            .map(|o| o.bytes)
            .max()
            .unwrap_or(0)
    });
    Ok(result)
}

fn aggregate(job: &StressJob, outcomes: &[TransferOutcome], duration: Duration) -> Result<StressResult> {
    let successes = outcomes.iter().filter(|o| o.success).count();
    let failures = job.client_workers - successes;
    let bytes_transferred: u64 = outcomes.iter().filter(|o| o.success).map(|o| o.bytes).sum();

    let seconds = duration.as_secs_f64();
    let throughput_bps = if seconds > 0.0 {
        bytes_transferred as f64 / seconds
    } else {
        0.0
    };

    let total_elapsed: Duration = outcomes.iter().map(|o| o.elapsed).sum();
    let average_latency = total_elapsed / job.client_workers as u32;

    let mut collector = LatencyCollector::new()?;
    for outcome in outcomes.iter().filter(|o| o.success && !o.elapsed.is_zero()) {
        collector.record(outcome.elapsed)?;
    }

    Ok(StressResult {
        operation: job.operation,
        file_size: 0,
        client_workers: job.client_workers,
        server_workers: job.server_workers,
        duration,
        bytes_transferred,
        throughput_bps,
        average_latency,
        successes,
        failures,
        latency: collector.get_metrics(&DEFAULT_PERCENTILES),
    })
}

impl fmt::Display for StressResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stress Test Results:")?;
        writeln!(f, "Operation    : {}", self.operation)?;
        if self.operation.needs_file() {
            writeln!(f, "File Size    : {}", format_bytes(self.file_size))?;
            writeln!(f, "Throughput   : {}", format_rate(self.throughput_bps))?;
            writeln!(f, "Avg Latency  : {}", format_duration(self.average_latency))?;
            if let Some(latency) = &self.latency {
                writeln!(f, "Percentiles  : {}", latency.percentile_summary())?;
            }
        }
        writeln!(f, "Workers      : {}", self.client_workers)?;
        writeln!(f, "Total Time   : {:.2} seconds", self.duration.as_secs_f64())?;
        writeln!(f, "Successes    : {}", self.successes)?;
        write!(f, "Failures     : {}", self.failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(n: usize) -> StressJob {
        StressJob {
            operation: Operation::Download,
            target: Some(PathBuf::from("random_10mb.bin")),
            client_workers: n,
            server_workers: 1,
        }
    }

    #[test]
    fn test_aggregate_counts_and_rates() {
        let outcomes = [
            TransferOutcome {
                success: true,
                elapsed: Duration::from_secs(1),
                bytes: 100,
            },
            TransferOutcome {
                success: true,
                elapsed: Duration::from_secs(3),
                bytes: 100,
            },
            TransferOutcome::failed(),
            TransferOutcome::failed(),
        ];
        let result = aggregate(&job(4), &outcomes, Duration::from_secs(4)).unwrap();

        assert_eq!(result.successes, 2);
        assert_eq!(result.failures, 2);
        assert_eq!(result.bytes_transferred, 200);
        assert_eq!(result.throughput_bps, 50.0);
        assert_eq!(result.average_latency, Duration::from_secs(1));
        assert_eq!(result.latency.unwrap().total_samples, 2);
    }

    #[test]
    fn test_aggregate_all_failed() {
        let outcomes = [TransferOutcome::failed(); 3];
        let result = aggregate(&job(3), &outcomes, Duration::from_millis(10)).unwrap();
        assert_eq!(result.successes, 0);
        assert_eq!(result.failures, 3);
        assert_eq!(result.bytes_transferred, 0);
        assert_eq!(result.throughput_bps, 0.0);
        assert_eq!(result.average_latency, Duration::ZERO);
        assert!(result.latency.is_none());
    }

    #[tokio::test]
    async fn test_rejects_zero_workers_and_missing_target() {
        let client = FileClient::new("127.0.0.1", 9);
        assert!(run_stress(&client, &job(0)).await.is_err());

        let mut no_target = job(1);
        no_target.target = None;
        assert!(run_stress(&client, &no_target).await.is_err());
    }
}
