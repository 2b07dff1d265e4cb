#![cfg(unix)]

use anyhow::Result;
use file_transfer_bench::{
    harness::{run_stress, StressJob},
    server::{Server, ServerConfig},
    ConcurrencyModel, FileClient, Operation,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;

fn worker_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_file-transfer-bench"))
}

/// Verify the isolated process pool end to end with real worker processes.
#[tokio::test]
async fn process_pool_serves_transfers() -> Result<()> {
    let storage = tempfile::tempdir()?;
    let local = tempfile::tempdir()?;
    let downloads = tempfile::tempdir()?;

    let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i * 7 % 256) as u8).collect();
    let source = local.path().join("fixture.bin");
    std::fs::write(&source, &payload)?;

    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        model: ConcurrencyModel::ProcessPool,
        pool_size: 2,
        storage_dir: storage.path().to_path_buf(),
        shutdown_grace: Duration::from_secs(5),
        worker_exe: Some(worker_binary()),
        ..ServerConfig::default()
    };
    let server = Server::bind(config).await?;
    let port = server.local_addr()?.port();
    let stats = server.stats();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));

    let client = FileClient::new("127.0.0.1", port)
        .with_timeout(Duration::from_secs(30))
        .with_download_dir(downloads.path());

    let uploaded = client.remote_upload(&source).await;
    assert!(uploaded.success);
    assert_eq!(client.remote_list().await.expect("LIST failed"), vec!["fixture.bin"]);

    let job = StressJob {
        operation: Operation::Download,
        target: Some(source.clone()),
        client_workers: 8,
        server_workers: 2,
    };
    let result = run_stress(&client, &job).await?;
    assert_eq!(result.successes, 8);
    assert_eq!(result.bytes_transferred, 8 * payload.len() as u64);
    assert_eq!(std::fs::read(downloads.path().join("fixture.bin"))?, payload);
    assert!(stats.peak_in_flight() <= 2);

    let _ = stop.send(());
    handle.await??;
    assert_eq!(stats.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn process_pool_reports_missing_files() -> Result<()> {
    let storage = tempfile::tempdir()?;
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        model: ConcurrencyModel::ProcessPool,
        pool_size: 1,
        storage_dir: storage.path().to_path_buf(),
        worker_exe: Some(worker_binary()),
        ..ServerConfig::default()
    };
    let server = Server::bind(config).await?;
    let port = server.local_addr()?.port();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));

    let client = FileClient::new("127.0.0.1", port).with_timeout(Duration::from_secs(30));
    let response = client.send_command("GET absent.bin").await;
    assert!(!response.is_ok());
    assert!(client.remote_list().await.expect("LIST failed").is_empty());

    let _ = stop.send(());
    handle.await??;
    Ok(())
}

/// Pids of live worker processes serving `storage`
#[cfg(target_os = "linux")]
fn worker_pids(storage: &std::path::Path) -> Vec<i32> {
    let marker = storage.to_string_lossy().into_owned();
    let mut pids = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return pids;
    };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        // Exited processes awaiting reaping report an empty command line.
        let Ok(cmdline) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let args: Vec<String> = cmdline
            .split(|&b| b == 0)
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect();
        if args.iter().any(|arg| arg == "worker") && args.iter().any(|arg| *arg == marker) {
            pids.push(pid);
        }
    }
    pids
}

#[cfg(target_os = "linux")]
async fn kill_workers(storage: &std::path::Path) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pids = worker_pids(storage);
    anyhow::ensure!(!pids.is_empty(), "no worker process found");
    for pid in &pids {
        kill(Pid::from_raw(*pid), Signal::SIGKILL)?;
    }
    for _ in 0..100 {
        if worker_pids(storage).iter().all(|pid| !pids.contains(pid)) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("worker processes {:?} did not exit", pids)
}

#[cfg(target_os = "linux")]
async fn start_single_worker(
    storage: &std::path::Path,
) -> Result<(
    u16,
    std::sync::Arc<file_transfer_bench::ServerStats>,
    oneshot::Sender<()>,
    tokio::task::JoinHandle<Result<()>>,
)> {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        model: ConcurrencyModel::ProcessPool,
        pool_size: 1,
        storage_dir: storage.to_path_buf(),
        shutdown_grace: Duration::from_secs(5),
        worker_exe: Some(worker_binary()),
        ..ServerConfig::default()
    };
    let server = Server::bind(config).await?;
    let port = server.local_addr()?.port();
    let stats = server.stats();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));
    Ok((port, stats, stop, handle))
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn idle_worker_crash_is_invisible_to_the_next_client() -> Result<()> {
    let storage = tempfile::tempdir()?;
    let (port, stats, stop, handle) = start_single_worker(storage.path()).await?;
    let client = FileClient::new("127.0.0.1", port).with_timeout(Duration::from_secs(30));

    assert!(client.remote_list().await.expect("LIST failed").is_empty());
    kill_workers(storage.path()).await?;

    // The very first call after the crash is served by a replacement.
    assert!(client.remote_list().await.expect("LIST after crash failed").is_empty());
    assert_eq!(worker_pids(storage.path()).len(), 1);
    assert_eq!(stats.snapshot().failed, 0);

    let _ = stop.send(());
    handle.await??;
    Ok(())
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn busy_worker_crash_fails_only_its_connection() -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let storage = tempfile::tempdir()?;
    let (port, stats, stop, handle) = start_single_worker(storage.path()).await?;

    // An unterminated request keeps the worker busy with this connection.
    let mut victim = tokio::net::TcpStream::connect(("127.0.0.1", port)).await?;
    victim.write_all(b"LIST").await?;
    for _ in 0..100 {
        if stats.in_flight() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(stats.in_flight(), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;

    kill_workers(storage.path()).await?;

    let mut rest = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(5), victim.read_to_end(&mut rest)).await?;
    assert!(closed.is_err() || rest.is_empty());

    let mut snapshot = stats.snapshot();
    for _ in 0..100 {
        if snapshot.failed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        snapshot = stats.snapshot();
    }
    assert_eq!(snapshot.failed, 1);

    let client = FileClient::new("127.0.0.1", port).with_timeout(Duration::from_secs(30));
    assert!(client.remote_list().await.expect("LIST after crash failed").is_empty());
    assert_eq!(worker_pids(storage.path()).len(), 1);

    let _ = stop.send(());
    handle.await??;
    Ok(())
}
