use anyhow::Result;
use file_transfer_bench::{
    server::{Server, ServerConfig, ServerStats},
    ConcurrencyModel, FileClient,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct RunningServer {
    addr: SocketAddr,
    stats: Arc<ServerStats>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl RunningServer {
    fn client(&self) -> FileClient {
        FileClient::new("127.0.0.1", self.addr.port())
    }

    async fn shutdown(self) -> Result<()> {
        let _ = self.stop.send(());
        self.handle.await?
    }
}

async fn start(model: ConcurrencyModel, storage: &Path) -> Result<RunningServer> {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        model,
        pool_size: 2,
        storage_dir: storage.to_path_buf(),
        ..ServerConfig::default()
    };
    let server = Server::bind(config).await?;
    let addr = server.local_addr()?;
    let stats = server.stats();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));
    Ok(RunningServer {
        addr,
        stats,
        stop,
        handle,
    })
}

/// Upload, list, download and compare bytes under one concurrency model
async fn round_trip(model: ConcurrencyModel) -> Result<()> {
    let storage = tempfile::tempdir()?;
    let local = tempfile::tempdir()?;
    let downloads = tempfile::tempdir()?;

    let source = local.path().join("payload.bin");
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&source, &payload)?;

    let server = start(model, storage.path()).await?;
    let client = server.client().with_download_dir(downloads.path());

    let uploaded = client.remote_upload(&source).await;
    assert!(uploaded.success, "upload failed under {}", model);
    assert_eq!(uploaded.bytes, payload.len() as u64);
    assert_eq!(std::fs::read(storage.path().join("payload.bin"))?, payload);

    let names = client.remote_list().await.expect("LIST failed");
    assert_eq!(names, vec!["payload.bin".to_string()]);

    let fetched = client.remote_get("payload.bin").await;
    assert!(fetched.success);
    assert_eq!(fetched.bytes, payload.len() as u64);
    assert_eq!(std::fs::read(downloads.path().join("payload.bin"))?, payload);

    let snapshot = server.stats.snapshot();
    assert_eq!(snapshot.accepted, 3);
    server.shutdown().await
}

#[tokio::test]
async fn per_connection_round_trip() -> Result<()> {
    round_trip(ConcurrencyModel::PerConnection).await
}

#[tokio::test]
async fn thread_pool_round_trip() -> Result<()> {
    round_trip(ConcurrencyModel::ThreadPool).await
}

#[tokio::test]
async fn list_is_idempotent() -> Result<()> {
    let storage = tempfile::tempdir()?;
    for name in ["b.bin", "a.bin", "c.bin"] {
        std::fs::write(storage.path().join(name), name)?;
    }
    let server = start(ConcurrencyModel::ThreadPool, storage.path()).await?;
    let client = server.client();

    let first = client.remote_list().await.expect("LIST failed");
    let second = client.remote_list().await.expect("LIST failed");
    assert_eq!(first, vec!["a.bin", "b.bin", "c.bin"]);
    assert_eq!(first, second);
    server.shutdown().await
}

#[tokio::test]
async fn missing_file_and_bad_commands_are_errors() -> Result<()> {
    let storage = tempfile::tempdir()?;
    let downloads = tempfile::tempdir()?;
    let server = start(ConcurrencyModel::ThreadPool, storage.path()).await?;
    let client = server.client().with_download_dir(downloads.path());

    let missing = client.remote_get("nope.bin").await;
    assert!(!missing.success);
    assert_eq!(missing.bytes, 0);
    assert!(std::fs::read_dir(downloads.path())?.next().is_none());

    let unknown = client.send_command("DELETE everything").await;
    assert!(!unknown.is_ok());

    let escape = client.send_command("GET ../secret").await;
    assert!(!escape.is_ok());

    server.shutdown().await
}

#[tokio::test]
async fn upload_overwrites_existing_file() -> Result<()> {
    let storage = tempfile::tempdir()?;
    let local = tempfile::tempdir()?;
    let server = start(ConcurrencyModel::PerConnection, storage.path()).await?;
    let client = server.client();

    let source = local.path().join("notes.txt");
    std::fs::write(&source, "first version, longer")?;
    assert!(client.remote_upload(&source).await.success);
    std::fs::write(&source, "second")?;
    assert!(client.remote_upload(&source).await.success);

    assert_eq!(std::fs::read_to_string(storage.path().join("notes.txt"))?, "second");
    server.shutdown().await
}
