//! # File Transfer Benchmark - Main Entry Point
//!
//! One binary, one subcommand per role:
//!
//! - `server`: run the file server under the chosen concurrency model
//! - `client`: fire N concurrent calls once and print a summary
//! - `stress`: sweep the test matrix (or run one cell) and export a CSV
//! - `generate`: create the random fixtures the stress matrix expects
//! - `worker` (hidden): a process-pool worker, spawned by `server`
//!
//! ## Error Handling
//!
//! Argument problems (missing filename, incomplete single-test arguments,
//! invalid counts) are reported before any socket is opened and exit
//! non-zero. Once a batch is running, failed calls are counted, not raised.

use anyhow::{Context, Result};
use clap::Parser;
use file_transfer_bench::{
    cli::{Args, ClientArgs, Commands, GenerateArgs, ServerArgs, StressArgs, WorkerArgs},
    harness::{self, matrix::StressRunner, StressJob, TestMatrix},
    logging,
    server::{Server, ServerConfig},
    FileClient,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Server-side roles log with the standard fmt layer; the interactive
    // commands use the colorized formatter between their summaries.
    let colorized = matches!(args.command, Commands::Client(_) | Commands::Stress(_));
    logging::init(args.verbose, colorized);

    match args.command {
        Commands::Server(server) => run_server(server).await,
        Commands::Client(client) => run_client(client).await,
        Commands::Stress(stress) => run_stress_command(stress).await,
        Commands::Generate(generate) => run_generate(generate),
        Commands::Worker(worker) => run_worker(worker).await,
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let config = ServerConfig::from_args(&args)?;
    info!("Starting file server: {:?}", config);

    let server = Server::bind(config).await?;
    println!(
        "Server listening on {} ({} model, {} workers)",
        server.local_addr()?,
        args.model,
        args.pool_size
    );
    server.run().await
}

async fn run_client(args: ClientArgs) -> Result<()> {
    args.validate()?;

    let client = FileClient::new(&args.server_ip, args.server_port)
        .with_timeout(args.timeout)
        .with_download_dir(&args.download_dir);
    let job = StressJob {
        operation: args.operation,
        target: args.filename.clone(),
        client_workers: args.workers,
        server_workers: 0,
    };

    let result = harness::run_stress(&client, &job).await?;
    println!("\n{}", result);
    Ok(())
}

async fn run_stress_command(args: StressArgs) -> Result<()> {
    let client = FileClient::new(&args.server_ip, args.server_port)
        .with_timeout(args.timeout)
        .with_download_dir(&args.download_dir);
    let mut runner = StressRunner::new(client, &args.files_dir, &args.output);

    if args.single_test {
        let (operation, size, client_workers) = args.single_test_cell()?;
        if let Err(missing) = runner.validate_files(&[size]) {
            anyhow::bail!("Missing required test file: {:?}", missing);
        }
        runner
            .execute_test(operation, size, client_workers, args.server_workers)
            .await?;
    } else {
        for &count in &args.client_counts {
            file_transfer_bench::utils::validate_concurrency(count).context("Invalid --client-counts")?;
        }
        let matrix = TestMatrix {
            client_counts: args.client_counts.clone(),
            server_pools: args.server_pools.clone(),
            settle_delay: args.settle_delay,
            ..TestMatrix::default()
        };
        println!("Executing comprehensive test matrix...");
        if !runner.perform_all_tests(&matrix).await? {
            anyhow::bail!("Test matrix aborted: fixtures missing in {:?}", args.files_dir);
        }
    }

    runner.export_results()?;
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    let paths = file_transfer_bench::fixtures::generate_fixtures(&args.dir, &args.prefix, &args.sizes)?;
    for path in paths {
        println!("Generated {}", path.display());
    }
    Ok(())
}

#[cfg(unix)]
async fn run_worker(args: WorkerArgs) -> Result<()> {
    file_transfer_bench::server::worker::run_worker(
        &args.control_socket,
        &args.storage_dir,
        args.read_buffer_size,
    )
    .await
}

#[cfg(not(unix))]
async fn run_worker(_args: WorkerArgs) -> Result<()> {
    anyhow::bail!("process-pool workers require a Unix platform")
}
