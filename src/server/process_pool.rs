//! # Isolated Process Pool
//!
//! P worker processes, each running this binary's hidden `worker`
//! subcommand. The parent keeps the accept loop and the submission queue;
//! each slot task owns one worker process and, for every queued connection,
//! passes the socket descriptor to its worker over a Unix control channel
//! and waits for the one-byte completion acknowledgement before taking the
//! next connection.
//!
//! Each worker builds its own codec once on startup. A worker that crashes
//! only loses the connection it was serving: the slot logs it, counts the
//! connection as failed and launches a replacement process. A worker found
//! dead while idle is replaced before it is given the next connection.

use super::fd_passing::send_fd;
use super::queue::{next_job, reject_busy, work_queue, Job, QueueSender, SharedReceiver};
use super::{Dispatcher, ServerConfig, ServerStats};
use crate::utils::generate_test_id;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, Interest};
use tokio::net::{TcpStream, UnixListener, UnixStream};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long a freshly spawned worker has to connect back
const WORKER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a worker has to exit after its control channel closes
const WORKER_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Acknowledgement bytes written by a worker after each connection
pub const ACK_SUCCESS: u8 = 1;
pub const ACK_FAILURE: u8 = 0;

/// Name of the binary that provides the `worker` subcommand
const EXE_NAME: &str = "file-transfer-bench";

/// Spawns worker processes and accepts their control connections
struct WorkerLauncher {
    listener: Mutex<UnixListener>,
    socket_path: PathBuf,
    executable: PathBuf,
    storage_dir: PathBuf,
    read_buffer_size: usize,
}

/// A running worker process and the parent's end of its control channel
struct WorkerProcess {
    child: Child,
    control: UnixStream,
}

impl WorkerLauncher {
    async fn launch(&self, slot: usize) -> Result<WorkerProcess> {
        // Held across spawn and accept so concurrent relaunches cannot
        // accept each other's control connections.
        let listener = self.listener.lock().await;

        let mut cmd = Command::new(&self.executable);
        cmd.arg("worker")
            .arg("--control-socket")
            .arg(&self.socket_path)
            .arg("--storage-dir")
            .arg(&self.storage_dir)
            .arg("--read-buffer-size")
            .arg(self.read_buffer_size.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn worker process {:?}", self.executable))?;

        let (control, _) = tokio::time::timeout(WORKER_STARTUP_TIMEOUT, listener.accept())
            .await
            .map_err(|_| anyhow!("worker process for slot {} did not connect in time", slot))?
            .context("Failed to accept worker control connection")?;

        debug!(slot, pid = ?child.id(), "Worker process ready");
        Ok(WorkerProcess { child, control })
    }
}

impl WorkerProcess {
    /// Whether the process is still running
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Pass the connection's descriptor to the worker
    ///
    /// On error the worker never received the connection.
    async fn deliver(&mut self, socket: &std::net::TcpStream) -> Result<()> {
        let control_fd = self.control.as_raw_fd();
        let socket_fd = socket.as_raw_fd();
        self.control
            .async_io(Interest::WRITABLE, || send_fd(control_fd, socket_fd))
            .await
            .context("Failed to pass connection to worker")
    }

    /// Wait until the worker has finished the connection it was given
    ///
    /// Returns whether the worker reported the connection as successful.
    /// An error means the worker is gone.
    async fn await_ack(&mut self) -> Result<bool> {
        let ack = self
            .control
            .read_u8()
            .await
            .context("Worker closed its control channel")?;
        Ok(ack == ACK_SUCCESS)
    }

    async fn kill(mut self) {
        let _ = self.child.kill().await;
    }

    /// Close the control channel and reap the process
    async fn stop(self, slot: usize) {
        let WorkerProcess { mut child, control } = self;
        drop(control);
        match tokio::time::timeout(WORKER_EXIT_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => debug!(slot, %status, "Worker process exited"),
            Ok(Err(e)) => warn!(slot, error = %e, "Failed to reap worker process"),
            Err(_) => {
                warn!(slot, "Worker process did not exit, killing it");
                let _ = child.kill().await;
            }
        }
    }
}

/// Bounded pool of isolated worker processes
pub struct ProcessPoolDispatcher {
    queue: Option<QueueSender>,
    slots: Vec<JoinHandle<()>>,
    stats: Arc<ServerStats>,
    socket_path: PathBuf,
}

impl ProcessPoolDispatcher {
    /// Launch `config.pool_size` worker processes and their slot tasks
    pub async fn start(config: &ServerConfig, stats: Arc<ServerStats>) -> Result<Self> {
        let executable = resolve_worker_executable(config.worker_exe.as_deref())?;
        let socket_path =
            std::env::temp_dir().join(format!("file-transfer-bench-{}.sock", generate_test_id()));
        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind worker control socket {:?}", socket_path))?;

        let launcher = Arc::new(WorkerLauncher {
            listener: Mutex::new(listener),
            socket_path: socket_path.clone(),
            executable,
            storage_dir: config.storage_dir.clone(),
            read_buffer_size: config.read_buffer_size,
        });

        let pool_size = config.pool_size.max(1);
        let mut workers = Vec::with_capacity(pool_size);
        for slot in 0..pool_size {
            match launcher.launch(slot).await {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    for (slot, worker) in workers.into_iter().enumerate() {
                        worker.stop(slot).await;
                    }
                    let _ = std::fs::remove_file(&socket_path);
                    return Err(e);
                }
            }
        }

        let (queue, receiver) = work_queue(config.queue_capacity);
        let slots = workers
            .into_iter()
            .enumerate()
            .map(|(slot, worker)| {
                tokio::spawn(run_slot(
                    slot,
                    worker,
                    Arc::clone(&launcher),
                    Arc::clone(&receiver),
                    Arc::clone(&stats),
                ))
            })
            .collect();

        info!(pool_size, socket = ?socket_path, "Process pool started");
        Ok(Self {
            queue: Some(queue),
            slots,
            stats,
            socket_path,
        })
    }
}

async fn run_slot(
    slot: usize,
    worker: WorkerProcess,
    launcher: Arc<WorkerLauncher>,
    receiver: SharedReceiver,
    stats: Arc<ServerStats>,
) {
    let mut worker = Some(worker);

    while let Some(job) = next_job(&receiver).await {
        stats.record_dequeued();
        let peer = job.peer;

        stats.connection_opened();
        let success = match serve_job(slot, &mut worker, &launcher, job).await {
            Ok(success) => success,
            Err(e) => {
                error!(slot, peer = %peer, error = %e, "Connection lost with its worker process");
                if let Some(dead) = worker.take() {
                    dead.kill().await;
                }
                false
            }
        };
        stats.connection_closed(success);
    }

    if let Some(process) = worker {
        process.stop(slot).await;
    }
    debug!(slot, "Slot exiting");
}

/// Hand one connection to the slot's worker, replacing the worker first if
/// it is gone
///
/// A worker that died while idle is relaunched before the hand-off. If the
/// descriptor still cannot be delivered, the worker is replaced once more
/// and the same socket is sent again; it was never received, so nothing
/// runs twice.
async fn serve_job(
    slot: usize,
    worker: &mut Option<WorkerProcess>,
    launcher: &WorkerLauncher,
    job: Job,
) -> Result<bool> {
    let socket = job.stream.into_std().context("Failed to detach accepted socket")?;

    let mut redelivered = false;
    loop {
        let alive = worker.as_mut().map_or(false, WorkerProcess::is_alive);
        if !alive {
            if let Some(dead) = worker.take() {
                warn!(slot, "Worker process exited while idle, relaunching");
                dead.kill().await;
            }
            *worker = Some(launcher.launch(slot).await?);
        }
        let process = worker
            .as_mut()
            .ok_or_else(|| anyhow!("slot {} has no worker process", slot))?;

        match process.deliver(&socket).await {
            Ok(()) => break,
            Err(e) if !redelivered => {
                warn!(slot, error = %e, "Worker process unreachable, relaunching before hand-off");
                redelivered = true;
                if let Some(dead) = worker.take() {
                    dead.kill().await;
                }
            }
            Err(e) => return Err(e),
        }
    }
    // The worker now holds its own descriptor for the connection.
    drop(socket);

    let process = worker
        .as_mut()
        .ok_or_else(|| anyhow!("slot {} has no worker process", slot))?;
    process.await_ack().await
}

#[async_trait]
impl Dispatcher for ProcessPoolDispatcher {
    async fn dispatch(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let Some(queue) = &self.queue else {
            anyhow::bail!("process pool is shut down");
        };

        match queue.submit(Job::new(stream, peer)) {
            Ok(()) => self.stats.record_enqueued(),
            Err(job) => {
                self.stats.record_rejected();
                tokio::spawn(reject_busy(job));
            }
        }
        Ok(())
    }

    async fn shutdown(mut self: Box<Self>, grace: Duration) -> Result<()> {
        self.queue.take();
        info!(workers = self.slots.len(), "Draining process pool");

        let slots = &mut self.slots;
        let drained = tokio::time::timeout(grace, async {
            for slot in slots.iter_mut() {
                if let Err(e) = slot.await {
                    warn!(error = %e, "Slot ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            // Aborted slots drop their Child, and kill_on_drop ends the process.
            warn!("Shutdown grace period expired, terminating worker processes");
            for slot in &self.slots {
                slot.abort();
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!(error = %e, "Failed to remove control socket {:?}", self.socket_path);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "process-pool"
    }
}

/// Find the binary that implements the `worker` subcommand
///
/// Integration tests run inside the test harness binary, so `current_exe()`
/// is not always this program. Resolution order: an explicit path, the
/// current executable if it has the right name, `CARGO_BIN_EXE_*`, then
/// `target/debug` under the manifest directory.
pub fn resolve_worker_executable(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let current_exe = std::env::current_exe().context("Failed to get current executable path")?;
    if current_exe.file_stem().and_then(|n| n.to_str()) == Some(EXE_NAME) {
        return Ok(current_exe);
    }

    if let Ok(path) = std::env::var("CARGO_BIN_EXE_file-transfer-bench") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    let fallback = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("target")
        .join("debug")
        .join(EXE_NAME);
    if fallback.exists() {
        return Ok(fallback);
    }

    Err(anyhow!(
        "Could not resolve '{}' binary for worker processes. Build it with \
         `cargo build --bin {}` or pass an explicit worker executable.",
        EXE_NAME,
        EXE_NAME
    ))
}
