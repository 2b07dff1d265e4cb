use super::stress::{run_stress, StressJob, StressResult};
use crate::cli::{FileSize, Operation};
use crate::client::FileClient;
use crate::results::{ReportRow, ResultsManager};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

/// Axes of a stress sweep
#[derive(Debug, Clone)]
pub struct TestMatrix {
    pub operations: Vec<Operation>,
    pub sizes: Vec<FileSize>,
    pub client_counts: Vec<usize>,
    /// Labels only: the server must already run with each pool size
    pub server_pools: Vec<usize>,
    /// Pause after every cell so the server settles
    pub settle_delay: Duration,
}

impl Default for TestMatrix {
    fn default() -> Self {
        Self {
            operations: vec![Operation::Download, Operation::Upload],
            sizes: FileSize::ALL.to_vec(),
            client_counts: vec![1, 5, 50],
            server_pools: vec![1],
            settle_delay: crate::defaults::SETTLE_DELAY,
        }
    }
}

impl TestMatrix {
    pub fn total_cells(&self) -> usize {
        self.operations.len() * self.sizes.len() * self.client_counts.len() * self.server_pools.len()
    }
}

/// Runs stress cells against one server and collects their report rows
pub struct StressRunner {
    client: FileClient,
    files_dir: PathBuf,
    results: ResultsManager,
}

impl StressRunner {
    pub fn new(client: FileClient, files_dir: impl Into<PathBuf>, output: &Path) -> Self {
        Self {
            client,
            files_dir: files_dir.into(),
            results: ResultsManager::new(output),
        }
    }

    /// Local path of the fixture for a size class
    pub fn fixture_path(&self, size: FileSize) -> PathBuf {
        self.files_dir.join(size.default_file_name())
    }

    /// Every fixture the matrix needs, or the first one that is missing
    pub fn validate_files(&self, sizes: &[FileSize]) -> Result<(), PathBuf> {
        for &size in sizes {
            let path = self.fixture_path(size);
            if !path.is_file() {
                return Err(path);
            }
        }
        Ok(())
    }

    /// Run one cell, record it and print its summary
    pub async fn execute_test(
        &mut self,
        operation: Operation,
        size: FileSize,
        client_count: usize,
        server_pool: usize,
    ) -> Result<StressResult> {
        let job = StressJob {
            operation,
            target: Some(self.fixture_path(size)),
            client_workers: client_count,
            server_workers: server_pool,
        };

        println!(
            "\n[{}] File: {:?}, Clients: {}, Server Pool: {}",
            operation.as_str().to_uppercase(),
            job.target.as_deref().unwrap_or(Path::new("")),
            client_count,
            server_pool
        );

        let result = run_stress(&self.client, &job).await?;
        let row = self.results.add_result(&result);
        display_result(row);
        Ok(result)
    }

    /// Sweep the whole matrix
    ///
    /// Returns `Ok(false)` without running anything when a fixture is
    /// missing.
    pub async fn perform_all_tests(&mut self, matrix: &TestMatrix) -> Result<bool> {
        if let Err(missing) = self.validate_files(&matrix.sizes) {
            error!("Missing required test file: {:?}", missing);
            return Ok(false);
        }

        let total = matrix.total_cells();
        let mut counter = 1;
        for &operation in &matrix.operations {
            for &size in &matrix.sizes {
                for &client_count in &matrix.client_counts {
                    for &server_pool in &matrix.server_pools {
                        println!("\nInitiating test {} of {}", counter, total);
                        self.execute_test(operation, size, client_count, server_pool)
                            .await?;
                        if counter < total {
                            tokio::time::sleep(matrix.settle_delay).await;
                        }
                        counter += 1;
                    }
                }
            }
        }
        info!(cells = total, "Test matrix complete");
        Ok(true)
    }

    pub fn rows(&self) -> &[ReportRow] {
        self.results.rows()
    }

    /// Write the collected rows as CSV; `Ok(false)` if there were none
    pub fn export_results(&self) -> Result<bool> {
        let written = self.results.export()?;
        if written {
            println!("\nResults successfully written to {:?}", self.results.output_file());
        } else {
            println!("No data available for export.");
        }
        Ok(written)
    }
}

/// Print the per-cell summary block
pub fn display_result(row: &ReportRow) {
    println!("\nTest Summary");
    println!("Operation      : {}", row.operation.to_uppercase());
    println!("File Volume    : {}", row.volume);
    println!("Client Workers : {}", row.client_workers);
    println!("Server Workers : {}", row.server_workers);
    println!("Total Time     : {:.2} s", row.duration);
    println!("Throughput     : {:.2} MB/s", row.throughput);
    println!("Client Success : {} / {}", row.client_success, row.client_workers);
    println!("Client Fail    : {}", row.client_fail);
    println!("Server Success : {} / {}", row.server_success, row.client_workers);
    println!("Server Fail    : {}", row.server_fail);
}
