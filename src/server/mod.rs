//! # TCP File Server
//!
//! The accept loop and the strategies that decide who serves each accepted
//! connection.
//!
//! ## Structure
//!
//! - `Server` owns the listening socket and runs the accept loop
//! - `Dispatcher` is the seam between the accept loop and a concurrency
//!   model; the loop hands every connection to it and never knows which
//!   model is behind it
//! - `connection` is the per-connection state machine every model runs
//!
//! ## Concurrency Models
//!
//! | Model            | Execution unit      | Bound              | Codec instances |
//! |------------------|---------------------|--------------------|-----------------|
//! | `thread`         | task per connection | none (or `--max-connections`) | one, shared |
//! | `thread-pool`    | long-lived task     | `pool_size`        | one per worker  |
//! | `process-pool`   | worker process      | `pool_size`        | one per process |
//!
//! The two pool models share a FIFO submission queue. A connection waits
//! there until some slot is free; the waiting order is the order in which
//! slots become free, not strictly arrival order.

pub mod connection;
pub mod per_connection;
pub mod queue;
pub mod stats;
pub mod worker_pool;

#[cfg(unix)]
pub mod fd_passing;
#[cfg(unix)]
pub mod process_pool;
#[cfg(unix)]
pub mod worker;

pub use connection::{handle_connection, serve_connection, ConnectionError, ConnectionSummary};
pub use stats::{ServerStats, StatsSnapshot};

use crate::cli::{ConcurrencyModel, ServerArgs};
use crate::protocol::{DirectoryProtocol, FileProtocol};
use anyhow::{Context, Result};
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Builds a codec instance for one execution unit
pub type ProtocolFactory = Arc<dyn Fn() -> Arc<dyn FileProtocol> + Send + Sync>;

/// Back-off after a failed `accept()`, e.g. when out of descriptors
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A concurrency model as seen from the accept loop
///
/// `dispatch` must return quickly: it may enqueue, spawn or wait for a free
/// connection permit, but never serves the connection itself.
#[async_trait]
pub trait Dispatcher: Send {
    /// Take ownership of an accepted connection
    async fn dispatch(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<()>;

    /// Stop taking work and drain, aborting whatever is left after `grace`
    async fn shutdown(self: Box<Self>, grace: Duration) -> Result<()>;

    /// Human-readable model name for logs
    fn name(&self) -> &'static str;
}

/// Factory for creating the dispatcher of a concurrency model
pub struct DispatcherFactory;

impl DispatcherFactory {
    pub async fn create(
        config: &ServerConfig,
        protocol_factory: ProtocolFactory,
        stats: Arc<ServerStats>,
    ) -> Result<Box<dyn Dispatcher>> {
        match config.model {
            ConcurrencyModel::PerConnection => Ok(Box::new(per_connection::PerConnectionDispatcher::new(
                protocol_factory(),
                stats,
                config.max_connections,
                config.read_buffer_size,
            ))),
            ConcurrencyModel::ThreadPool => Ok(Box::new(worker_pool::WorkerPoolDispatcher::new(
                config.pool_size,
                config.queue_capacity,
                protocol_factory,
                stats,
                config.read_buffer_size,
            ))),
            #[cfg(unix)]
            ConcurrencyModel::ProcessPool => {
                // Worker processes build their own codec over `storage_dir`.
                let _ = protocol_factory;
                Ok(Box::new(
                    process_pool::ProcessPoolDispatcher::start(config, stats).await?,
                ))
            }
            #[cfg(not(unix))]
            ConcurrencyModel::ProcessPool => Err(anyhow::anyhow!(
                "the process-pool model requires Unix descriptor passing"
            )),
        }
    }
}

/// Everything the server needs to start
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model: ConcurrencyModel,
    /// Number of slots for the two pool models (P)
    pub pool_size: usize,
    pub storage_dir: PathBuf,
    /// Bound on queued connections for the pool models; `None` is unbounded
    pub queue_capacity: Option<usize>,
    /// Bound on live connection tasks for the per-connection model
    pub max_connections: Option<usize>,
    pub shutdown_grace: Duration,
    pub read_buffer_size: usize,
    pub backlog: i32,
    /// Binary providing the `worker` subcommand; resolved automatically if unset
    pub worker_exe: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::defaults::SERVER_HOST.to_string(),
            port: crate::defaults::PORT,
            model: ConcurrencyModel::ThreadPool,
            pool_size: crate::defaults::POOL_SIZE,
            storage_dir: PathBuf::from(crate::defaults::STORAGE_DIR),
            queue_capacity: None,
            max_connections: None,
            shutdown_grace: crate::defaults::SHUTDOWN_GRACE,
            read_buffer_size: crate::defaults::READ_BUFFER_SIZE,
            backlog: crate::defaults::LISTEN_BACKLOG,
            worker_exe: None,
        }
    }
}

impl ServerConfig {
    pub fn from_args(args: &ServerArgs) -> Result<Self> {
        crate::utils::validate_port(args.port)?;
        crate::utils::validate_concurrency(args.pool_size).context("Invalid --pool-size")?;

        Ok(Self {
            host: args.host.clone(),
            port: args.port,
            model: args.model,
            pool_size: args.pool_size,
            storage_dir: args.storage_dir.clone(),
            queue_capacity: args.queue_capacity,
            max_connections: args.max_connections,
            shutdown_grace: args.shutdown_grace,
            read_buffer_size: args.read_buffer_size,
            backlog: crate::defaults::LISTEN_BACKLOG,
            worker_exe: None,
        })
    }
}

/// A bound, not yet running, file server
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    stats: Arc<ServerStats>,
    protocol_factory: ProtocolFactory,
}

impl Server {
    /// Bind with the directory-backed codec over `config.storage_dir`
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let storage_dir = config.storage_dir.clone();
        let protocol = Arc::new(
            DirectoryProtocol::new(&storage_dir)
                .with_context(|| format!("Failed to open storage directory {:?}", storage_dir))?,
        );
        // The codec is stateless; every unit gets a handle to one instance.
        let factory: ProtocolFactory = Arc::new(move || protocol.clone() as Arc<dyn FileProtocol>);
        Self::bind_with_protocol(config, factory).await
    }

    /// Bind with a caller-provided codec
    ///
    /// The process-pool model ignores the factory: its workers live in other
    /// processes and always use the directory codec.
    pub async fn bind_with_protocol(config: ServerConfig, protocol_factory: ProtocolFactory) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port)
            .to_socket_addrs()
            .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?
            .next()
            .with_context(|| format!("No address for {}:{}", config.host, config.port))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket
            .bind(&addr.into())
            .with_context(|| format!("Failed to bind {}", addr))?;
        socket.listen(config.backlog)?;
        let listener = TcpListener::from_std(socket.into())?;

        debug!("Server bound to {}", listener.local_addr()?);
        Ok(Self {
            config,
            listener,
            stats: Arc::new(ServerStats::new()),
            protocol_factory,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Serve until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` completes, then drain
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            config,
            listener,
            stats,
            protocol_factory,
        } = self;

        let mut dispatcher = DispatcherFactory::create(&config, protocol_factory, Arc::clone(&stats)).await?;
        info!(
            "Server running on {} ({} model, pool size {})",
            listener.local_addr()?,
            dispatcher.name(),
            config.pool_size
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        stats.record_accepted();
                        debug!(peer = %peer, "Accepted connection");
                        // Dispatch may wait for capacity; shutdown must still get through.
                        tokio::select! {
                            biased;
                            dispatched = dispatcher.dispatch(stream, peer) => {
                                if let Err(e) = dispatched {
                                    error!(peer = %peer, error = %e, "Failed to dispatch connection");
                                }
                            }
                            _ = &mut shutdown => {
                                stats.record_rejected();
                                info!(peer = %peer, "Shutdown requested while waiting for capacity, dropping connection");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
        }

        drop(listener);
        dispatcher.shutdown(config.shutdown_grace).await?;

        let snapshot = stats.snapshot();
        info!(
            accepted = snapshot.accepted,
            completed = snapshot.completed,
            failed = snapshot.failed,
            rejected = snapshot.rejected,
            peak_in_flight = snapshot.peak_in_flight,
            "Server stopped"
        );
        Ok(())
    }
}

/// Resolves on Ctrl-C, or on SIGTERM where available
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
