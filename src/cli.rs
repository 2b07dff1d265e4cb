use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// File Transfer Benchmark - a TCP file server and the load tools to measure it
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the file server
    Server(ServerArgs),

    /// Run N concurrent client calls once and print a summary
    Client(ClientArgs),

    /// Run the stress matrix (or one cell of it) and export a CSV report
    Stress(StressArgs),

    /// Generate random test files
    Generate(GenerateArgs),

    /// Serve connections handed over by a process-pool parent
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServerArgs {
    /// Address to bind to
    #[arg(long, default_value = crate::defaults::SERVER_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = crate::defaults::PORT)]
    pub port: u16,

    /// Number of workers for the pool models
    #[arg(short = 'n', long, default_value_t = crate::defaults::POOL_SIZE)]
    pub pool_size: usize,

    /// Concurrency model
    #[arg(short = 'm', long, value_enum, default_value_t = ConcurrencyModel::ThreadPool)]
    pub model: ConcurrencyModel,

    /// Directory files are listed from, served from and uploaded into
    #[arg(long, default_value = crate::defaults::STORAGE_DIR)]
    pub storage_dir: PathBuf,

    /// Bound the pool submission queue; overflow connections get a busy error
    #[arg(long, help_heading = "Limits")]
    pub queue_capacity: Option<usize>,

    /// Bound live connection tasks in the `thread` model
    #[arg(long, help_heading = "Limits")]
    pub max_connections: Option<usize>,

    /// How long shutdown waits for in-flight connections (e.g. "30s")
    #[arg(long, value_parser = parse_duration, default_value = "30s", help_heading = "Limits")]
    pub shutdown_grace: Duration,

    /// Size of each socket read in bytes
    #[arg(long, default_value_t = crate::defaults::READ_BUFFER_SIZE, help_heading = "Limits")]
    pub read_buffer_size: usize,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ClientArgs {
    #[arg(long, default_value = crate::defaults::CLIENT_HOST)]
    pub server_ip: String,

    #[arg(long, default_value_t = crate::defaults::PORT)]
    pub server_port: u16,

    #[arg(long, value_enum)]
    pub operation: Operation,

    /// Required for upload and download
    #[arg(long)]
    pub filename: Option<PathBuf>,

    /// Number of concurrent calls
    #[arg(short = 'w', long, default_value_t = crate::defaults::CLIENT_WORKERS)]
    pub workers: usize,

    /// Per-call socket timeout (e.g. "300s", "5m")
    #[arg(long, value_parser = parse_duration, default_value = "300s")]
    pub timeout: Duration,

    /// Where downloaded files are written
    #[arg(long, default_value = ".")]
    pub download_dir: PathBuf,
}

impl ClientArgs {
    /// Check the arguments before any network activity
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.operation.needs_file() && self.filename.is_none() {
            anyhow::bail!("--filename is required for {} operations", self.operation);
        }
        crate::utils::validate_concurrency(self.workers)
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StressArgs {
    #[arg(long, default_value = crate::defaults::CLIENT_HOST)]
    pub server_ip: String,

    #[arg(long, default_value_t = crate::defaults::PORT)]
    pub server_port: u16,

    /// Run one cell instead of the full matrix
    #[arg(long, default_value_t = false)]
    pub single_test: bool,

    #[arg(long, value_enum, help_heading = "Single Test")]
    pub operation: Option<Operation>,

    #[arg(long, value_enum, help_heading = "Single Test")]
    pub file_size: Option<FileSize>,

    #[arg(long, help_heading = "Single Test")]
    pub client_workers: Option<usize>,

    /// Pool size the server was started with; recorded in the report only
    #[arg(long, default_value_t = 1, help_heading = "Single Test")]
    pub server_workers: usize,

    /// CSV report file
    #[arg(short = 'o', long, default_value = crate::defaults::OUTPUT_FILE)]
    pub output: PathBuf,

    /// Directory holding the fixtures to upload
    #[arg(long, default_value = crate::defaults::FIXTURE_DIR)]
    pub files_dir: PathBuf,

    /// Directory downloads are written into
    #[arg(long, default_value = crate::defaults::DOWNLOAD_DIR)]
    pub download_dir: PathBuf,

    /// Client concurrency levels swept by the matrix
    #[arg(long, value_delimiter = ',', default_values_t = vec![1, 5, 50], help_heading = "Matrix")]
    pub client_counts: Vec<usize>,

    /// Server pool-size labels swept by the matrix
    #[arg(long, value_delimiter = ',', default_values_t = vec![1], help_heading = "Matrix")]
    pub server_pools: Vec<usize>,

    /// Pause between matrix cells
    #[arg(long, value_parser = parse_duration, default_value = "5s", help_heading = "Matrix")]
    pub settle_delay: Duration,

    /// Per-call socket timeout
    #[arg(long, value_parser = parse_duration, default_value = "300s")]
    pub timeout: Duration,
}

impl StressArgs {
    /// The single-test cell, or an error naming what is missing
    pub fn single_test_cell(&self) -> anyhow::Result<(Operation, FileSize, usize)> {
        match (self.operation, self.file_size, self.client_workers) {
            (Some(operation), Some(file_size), Some(client_workers)) => {
                if !operation.needs_file() {
                    anyhow::bail!("--operation must be download or upload for a stress test");
                }
                crate::utils::validate_concurrency(client_workers)?;
                Ok((operation, file_size, client_workers))
            }
            _ => anyhow::bail!(
                "Missing required arguments for single test mode (--operation, --file-size, --client-workers)"
            ),
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct GenerateArgs {
    /// File sizes in MiB
    #[arg(long, num_args = 1.., default_values_t = crate::defaults::FIXTURE_SIZES_MB.to_vec())]
    pub sizes: Vec<u64>,

    #[arg(long, default_value = crate::defaults::FIXTURE_PREFIX)]
    pub prefix: String,

    #[arg(long, default_value = crate::defaults::FIXTURE_DIR)]
    pub dir: PathBuf,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct WorkerArgs {
    #[arg(long)]
    pub control_socket: PathBuf,

    #[arg(long)]
    pub storage_dir: PathBuf,

    #[arg(long, default_value_t = crate::defaults::READ_BUFFER_SIZE)]
    pub read_buffer_size: usize,
}

/// Server-side concurrency strategies
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ConcurrencyModel {
    /// One task per connection
    #[value(name = "thread")]
    PerConnection,

    /// P reusable workers sharing a queue
    #[value(name = "thread-pool")]
    ThreadPool,

    /// P isolated worker processes
    #[value(name = "process-pool")]
    ProcessPool,
}

impl std::fmt::Display for ConcurrencyModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcurrencyModel::PerConnection => write!(f, "Per-Connection"),
            ConcurrencyModel::ThreadPool => write!(f, "Thread Pool"),
            ConcurrencyModel::ProcessPool => write!(f, "Process Pool"),
        }
    }
}

/// Client operations
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Download,
    Upload,
    List,
}

impl Operation {
    /// Whether the operation transfers a file and so needs a filename
    pub fn needs_file(&self) -> bool {
        matches!(self, Operation::Download | Operation::Upload)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Download => "download",
            Operation::Upload => "upload",
            Operation::List => "list",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixture size classes used by the stress matrix
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSize {
    Small,
    Medium,
    Large,
}

impl FileSize {
    pub const ALL: [FileSize; 3] = [FileSize::Small, FileSize::Medium, FileSize::Large];

    pub fn megabytes(&self) -> u64 {
        let [small, medium, large] = crate::defaults::FIXTURE_SIZES_MB;
        match self {
            FileSize::Small => small,
            FileSize::Medium => medium,
            FileSize::Large => large,
        }
    }

    /// Fixture name as written by the generator, e.g. `random_10mb.bin`
    pub fn default_file_name(&self) -> String {
        crate::fixtures::fixture_name(crate::defaults::FIXTURE_PREFIX, self.megabytes())
    }
}

/// Parse duration from string (e.g., "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    let duration = match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_secs_f64(num),
        "m" => Duration::from_secs_f64(num * 60.0),
        "h" => Duration::from_secs_f64(num * 3600.0),
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("0.5s").unwrap(), Duration::from_millis(500));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
    }

    #[test]
    fn test_model_names_on_command_line() {
        let args = Args::try_parse_from(["file-transfer-bench", "server", "--model", "process-pool"]).unwrap();
        match args.command {
            Commands::Server(server) => {
                assert_eq!(server.model, ConcurrencyModel::ProcessPool);
                assert_eq!(server.pool_size, crate::defaults::POOL_SIZE);
                assert_eq!(server.shutdown_grace, crate::defaults::SHUTDOWN_GRACE);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_client_requires_filename_for_transfers() {
        let args = Args::try_parse_from(["file-transfer-bench", "client", "--operation", "upload"]).unwrap();
        let Commands::Client(client) = args.command else {
            panic!("expected client command");
        };
        assert!(client.validate().is_err());

        let args = Args::try_parse_from(["file-transfer-bench", "client", "--operation", "list"]).unwrap();
        let Commands::Client(client) = args.command else {
            panic!("expected client command");
        };
        assert!(client.validate().is_ok());
    }

    #[test]
    fn test_single_test_needs_every_argument() {
        let args = Args::try_parse_from([
            "file-transfer-bench",
            "stress",
            "--single-test",
            "--operation",
            "download",
        ])
        .unwrap();
        let Commands::Stress(stress) = args.command else {
            panic!("expected stress command");
        };
        assert!(stress.single_test_cell().is_err());

        let args = Args::try_parse_from([
            "file-transfer-bench",
            "stress",
            "--single-test",
            "--operation",
            "upload",
            "--file-size",
            "medium",
            "--client-workers",
            "5",
        ])
        .unwrap();
        let Commands::Stress(stress) = args.command else {
            panic!("expected stress command");
        };
        assert_eq!(
            stress.single_test_cell().unwrap(),
            (Operation::Upload, FileSize::Medium, 5)
        );
    }

    #[test]
    fn test_matrix_lists_parse_comma_separated() {
        let args = Args::try_parse_from([
            "file-transfer-bench",
            "stress",
            "--client-counts",
            "2,4,8",
            "--server-pools",
            "1,5",
        ])
        .unwrap();
        let Commands::Stress(stress) = args.command else {
            panic!("expected stress command");
        };
        assert_eq!(stress.client_counts, vec![2, 4, 8]);
        assert_eq!(stress.server_pools, vec![1, 5]);
    }

    #[test]
    fn test_file_size_fixture_names() {
        assert_eq!(FileSize::Small.default_file_name(), "random_10mb.bin");
        assert_eq!(FileSize::Large.megabytes(), 100);
    }
}
