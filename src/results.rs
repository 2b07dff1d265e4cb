use crate::harness::StressResult;
use crate::utils::{format_volume, round2, to_megabytes};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One line of the CSV report
///
/// Field order is the column order of the report file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub timestamp: String,
    pub operation: String,
    /// Whole megabytes, e.g. `"50 MB"`
    pub volume: String,
    pub client_workers: usize,
    pub server_workers: usize,
    /// Seconds, two decimals
    pub duration: f64,
    /// MB/s, two decimals
    pub throughput: f64,
    pub client_success: usize,
    pub client_fail: usize,
    /// Mirrors the client counts; the harness has no view of the server
    pub server_success: usize,
    pub server_fail: usize,
}

impl From<&StressResult> for ReportRow {
    fn from(result: &StressResult) -> Self {
        Self {
            timestamp: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            operation: result.operation.to_string(),
            volume: format_volume(result.file_size),
            client_workers: result.client_workers,
            server_workers: result.server_workers,
            duration: round2(result.duration.as_secs_f64()),
            throughput: round2(to_megabytes(result.throughput_bps)),
            client_success: result.successes,
            client_fail: result.failures,
            server_success: result.successes,
            server_fail: result.failures,
        }
    }
}

/// Collects report rows across a run and writes them out
pub struct ResultsManager {
    output_file: PathBuf,
    rows: Vec<ReportRow>,
}

impl ResultsManager {
    pub fn new(output_file: &Path) -> Self {
        Self {
            output_file: output_file.to_path_buf(),
            rows: Vec::new(),
        }
    }

    /// Record a finished batch, returning the row as it will be exported
    pub fn add_result(&mut self, result: &StressResult) -> &ReportRow {
        self.rows.push(ReportRow::from(result));
        &self.rows[self.rows.len() - 1]
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    /// Write every row to the output file, replacing it
    ///
    /// Returns `Ok(false)` without touching the file when there is nothing
    /// to export.
    pub fn export(&self) -> Result<bool> {
        if self.rows.is_empty() {
            warn!("No data available for export");
            return Ok(false);
        }

        if let Some(parent) = self.output_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let mut writer = csv::Writer::from_path(&self.output_file)
            .with_context(|| format!("Failed to create report {:?}", self.output_file))?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;

        info!("Results written to {:?}", self.output_file);
        Ok(true)
    }
}
