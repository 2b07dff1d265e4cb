//! # File Transfer Benchmark Library
//!
//! A TCP file server with interchangeable concurrency models, a client for its
//! line-oriented protocol, and a load harness that drives many concurrent
//! clients against it to compare the models.
//!
//! ## Supported Concurrency Models
//!
//! - **Per-connection** (`thread`): every accepted connection gets its own task
//! - **Worker pool** (`thread-pool`): a fixed set of reusable workers drains a
//!   shared submission queue
//! - **Process pool** (`process-pool`): a fixed set of isolated worker
//!   processes receives accepted sockets over a Unix control channel
//!
//! ## Architecture Overview
//!
//! - `framing`: splits a byte stream into `\r\n\r\n`-terminated frames
//! - `protocol`: command/response types and the `FileProtocol` codec contract
//! - `server`: accept loop, connection worker and the three dispatchers
//! - `client`: one-connection-per-call RPC client (LIST, GET, UPLOAD)
//! - `harness`: concurrent batches, test-matrix sweeps and aggregation
//! - `metrics`: latency distribution using HDR histograms
//! - `results`: CSV report rows and export
//! - `utils`: formatting and validation helpers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use file_transfer_bench::{FileClient, Operation, StressJob};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = FileClient::new("127.0.0.1", 7778);
//!     let job = StressJob {
//!         operation: Operation::Download,
//!         target: Some("random_10mb.bin".into()),
//!         client_workers: 50,
//!         server_workers: 1,
//!     };
//!
//!     let result = file_transfer_bench::harness::run_stress(&client, &job).await?;
//!     println!("{} ok / {} failed", result.successes, result.failures);
//!     Ok(())
//! }
//! ```

/// Command-line interface and configuration
///
/// Argument parsing using clap, with one subcommand per role (server,
/// client, stress harness, fixture generator, and the hidden process-pool
/// worker).
pub mod cli;

/// Client side of the request/response cycle
pub mod client;

/// Random test-file generation
pub mod fixtures;

/// Frame accumulation over a byte stream
pub mod framing;

/// Load generation and aggregation
///
/// Runs N concurrent client calls as one batch and sweeps a matrix of
/// batches, collecting throughput, latency and success counts.
pub mod harness;

pub mod logging;

/// Latency distribution using HDR histograms
pub mod metrics;

/// Commands, responses and the codec contract
pub mod protocol;

/// Report rows and CSV export
pub mod results;

/// TCP server and concurrency dispatchers
///
/// Contains the accept loop, the per-connection worker state machine and the
/// three dispatch strategies. Features:
/// - Unified `Dispatcher` trait so the accept loop never knows the model
/// - Graceful drain on shutdown or on SIGINT/SIGTERM
/// - Counters for accepted, queued and in-flight connections
pub mod server;

pub mod utils;

pub use cli::{Args, ConcurrencyModel, FileSize, Operation};
pub use client::{FileClient, TransferOutcome};
pub use framing::{FrameBuffer, TERMINATOR};
pub use harness::{StressJob, StressResult, StressRunner};
pub use protocol::{Command, DirectoryProtocol, FileProtocol, Response, Status};
pub use results::ResultsManager;
pub use server::{Server, ServerConfig, ServerStats};

/// The current version of the file transfer benchmark
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// These mirror the lab setup the benchmark was designed around: a pool of
/// five workers, a five-minute client timeout and three fixture sizes.
pub mod defaults {
    use std::time::Duration;

    /// Address the server binds to
    pub const SERVER_HOST: &str = "0.0.0.0";

    /// Address clients connect to
    pub const CLIENT_HOST: &str = "127.0.0.1";

    /// TCP port shared by server and clients
    pub const PORT: u16 = 7778;

    /// Number of execution units in the bounded pools
    pub const POOL_SIZE: usize = 5;

    /// Number of concurrent client calls in an ad-hoc run
    pub const CLIENT_WORKERS: usize = 5;

    /// Client-side socket timeout
    ///
    /// Large on purpose: a 100 MB upload is base64-inflated and sent in a
    /// single frame, and with 50 concurrent clients against a pool of one
    /// the last client waits for every other transfer first.
    pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(300);

    /// Size of each socket read
    pub const READ_BUFFER_SIZE: usize = 1024 * 1024;

    /// Listen backlog for the accept socket
    pub const LISTEN_BACKLOG: i32 = 100;

    /// How long shutdown waits for in-flight connections
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

    /// Pause between two cells of the test matrix
    pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

    /// Directory the server's codec stores files in
    pub const STORAGE_DIR: &str = "server_files";

    /// Directory fixtures are generated into and uploaded from
    pub const FIXTURE_DIR: &str = "files";

    /// Directory the harness writes downloaded files into
    pub const DOWNLOAD_DIR: &str = "downloads";

    /// Filename prefix for generated fixtures
    pub const FIXTURE_PREFIX: &str = "random";

    /// Fixture sizes in MiB (small, medium, large)
    pub const FIXTURE_SIZES_MB: [u64; 3] = [10, 50, 100];

    /// CSV report written by the stress harness
    pub const OUTPUT_FILE: &str = "stress_results.csv";
}
