//! # Client RPC Cycle
//!
//! One TCP connection per call: connect, send the command and the frame
//! terminator, read until exactly one response frame has arrived, parse it,
//! close. Every socket-level failure is turned into an ERROR `Response`
//! carrying the error text, so callers only ever see responses.
//!
//! The transfer helpers (`remote_get`, `remote_upload`) time the whole call
//! including local file I/O and report `(success, elapsed, bytes)` the way
//! the load harness consumes it. A failed call reports zero elapsed time and
//! zero bytes.

use crate::cli::Operation;
use crate::framing::{encode_frame, FrameBuffer, TERMINATOR};
use crate::protocol::{Command, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

/// Why a call produced no server response
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed before a complete response arrived")]
    Truncated,

    #[error("malformed response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
}

/// Result of one transfer call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub success: bool,
    pub elapsed: Duration,
    pub bytes: u64,
}

impl TransferOutcome {
    pub fn failed() -> Self {
        Self {
            success: false,
            elapsed: Duration::ZERO,
            bytes: 0,
        }
    }

    fn succeeded(started: Instant, bytes: u64) -> Self {
        Self {
            success: true,
            elapsed: started.elapsed(),
            bytes,
        }
    }
}

/// Client for the file server
///
/// Cheap to clone; holds no connection between calls, so one instance can
/// be shared by any number of concurrent tasks.
#[derive(Debug, Clone)]
pub struct FileClient {
    address: String,
    timeout: Duration,
    download_dir: PathBuf,
    read_buffer_size: usize,
}

impl FileClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            address: format!("{}:{}", host, port),
            timeout: crate::defaults::CLIENT_TIMEOUT,
            download_dir: PathBuf::from("."),
            read_buffer_size: crate::defaults::READ_BUFFER_SIZE,
        }
    }

    /// Bound on each call's connect, send and receive, together
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory downloaded files are written into
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Send one command and wait for its response; never fails
    pub async fn send_command(&self, command: &str) -> Response {
        match tokio::time::timeout(self.timeout, self.round_trip(command)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!(address = %self.address, error = %e, "Call failed");
                Response::error(e.to_string())
            }
            Err(_) => {
                let e = ClientError::Timeout(self.timeout);
                debug!(address = %self.address, error = %e, "Call failed");
                Response::error(e.to_string())
            }
        }
    }

    async fn round_trip(&self, command: &str) -> Result<Response, ClientError> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|source| ClientError::Connect {
                address: self.address.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;

        stream.write_all(&encode_frame(command.as_bytes())).await?;

        let read_size = self.read_buffer_size.max(TERMINATOR.len());
        let mut frames = FrameBuffer::with_capacity(read_size);
        loop {
            let n = stream.read_buf(frames.read_target(read_size)).await?;
            if n == 0 {
                return Err(ClientError::Truncated);
            }
            // Only the first frame matters; anything after it is ignored.
            if let Some(frame) = frames.next_frame() {
                return Ok(serde_json::from_slice(&frame)?);
            }
        }
    }

    /// List the server's files, or the server's error text
    pub async fn remote_list(&self) -> Result<Vec<String>, String> {
        let response = self.send_command(&Command::List.to_line()).await;
        if response.is_ok() {
            Ok(response.file_names().unwrap_or_default())
        } else {
            Err(response.message().unwrap_or("Unknown error").to_string())
        }
    }

    /// Download `filename` into the download directory
    ///
    /// The local file is named after the server-reported filename, limited
    /// to its final path component.
    pub async fn remote_get(&self, filename: &str) -> TransferOutcome {
        let started = Instant::now();
        let command = Command::Get {
            filename: filename.to_string(),
        };
        let response = self.send_command(&command.to_line()).await;
        if !response.is_ok() {
            debug!(filename, reason = ?response.message(), "Download refused");
            return TransferOutcome::failed();
        }

        match self.store_download(&response).await {
            Ok(bytes) => TransferOutcome::succeeded(started, bytes),
            Err(e) => {
                error!("Download failed for {}: {}", filename, e);
                TransferOutcome::failed()
            }
        }
    }

    async fn store_download(&self, response: &Response) -> anyhow::Result<u64> {
        let reported = response
            .filename
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("response carries no filename"))?;
        let content = response
            .file_data
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("response carries no file content"))?;

        let name = Path::new(reported)
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("unusable filename {:?}", reported))?;
        let bytes = BASE64.decode(content)?;

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let path = self.download_dir.join(name);
        tokio::fs::write(&path, &bytes).await?;
        // Bytes written, not a later stat: concurrent downloads of one name
        // share the destination and may truncate it under us.
        Ok(bytes.len() as u64)
    }

    /// Upload a local file under its base name
    ///
    /// A missing file fails immediately, before any network activity.
    pub async fn remote_upload(&self, path: &Path) -> TransferOutcome {
        let started = Instant::now();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!("Upload failed for {:?}: no usable file name", path);
            return TransferOutcome::failed();
        };

        let contents = match tokio::fs::read(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Upload failed for {:?}: file not found", path);
                return TransferOutcome::failed();
            }
            Err(e) => {
                error!("Upload failed for {:?}: {}", path, e);
                return TransferOutcome::failed();
            }
        };

        let size = contents.len() as u64;
        let command = Command::Upload {
            filename: name.to_string(),
            content: BASE64.encode(&contents),
        };
        drop(contents);

        let response = self.send_command(&command.to_line()).await;
        if response.is_ok() {
            TransferOutcome::succeeded(started, size)
        } else {
            debug!(file = name, reason = ?response.message(), "Upload refused");
            TransferOutcome::failed()
        }
    }

    /// Run one call of `operation` against `target`
    ///
    /// LIST reports success with zero elapsed time and zero bytes.
    pub async fn execute(&self, operation: Operation, target: Option<&Path>) -> TransferOutcome {
        match (operation, target) {
            (Operation::List, _) => TransferOutcome {
                success: self.remote_list().await.is_ok(),
                elapsed: Duration::ZERO,
                bytes: 0,
            },
            // Remote names are flat, so a local fixture path asks for its base name.
            (Operation::Download, Some(target)) => match target.file_name().and_then(|n| n.to_str()) {
                Some(name) => self.remote_get(name).await,
                None => TransferOutcome::failed(),
            },
            (Operation::Upload, Some(target)) => self.remote_upload(target).await,
            (_, None) => TransferOutcome::failed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve one connection with a canned reply
    async fn canned_server(reply: &'static [u8]) -> (String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(reply).await.unwrap();
        });
        ("127.0.0.1".to_string(), port)
    }

    #[tokio::test]
    async fn test_refused_connection_becomes_error_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let response = FileClient::new("127.0.0.1", port).send_command("LIST").await;
        assert!(!response.is_ok());
        assert!(response.message().unwrap().contains("failed to connect"));
    }

    #[tokio::test]
    async fn test_truncated_response_is_an_error() {
        let (host, port) = canned_server(b"{\"status\":\"OK\"").await;
        let response = FileClient::new(&host, port).send_command("LIST").await;
        assert!(!response.is_ok());
        assert_eq!(response.message(), Some("connection closed before a complete response arrived"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_an_error() {
        let (host, port) = canned_server(b"not json\r\n\r\n").await;
        let response = FileClient::new(&host, port).send_command("LIST").await;
        assert!(!response.is_ok());
        assert!(response.message().unwrap().starts_with("malformed response"));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _keep = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = FileClient::new("127.0.0.1", port).with_timeout(Duration::from_millis(100));
        let response = client.send_command("LIST").await;
        assert!(!response.is_ok());
        assert!(response.message().unwrap().starts_with("timed out"));
    }

    #[tokio::test]
    async fn test_download_uses_final_path_component() {
        let (host, port) =
            canned_server(b"{\"status\":\"OK\",\"data_namafile\":\"../../evil.bin\",\"data_file\":\"aGk=\"}\r\n\r\n")
                .await;
        let dir = tempfile::tempdir().unwrap();
        let client = FileClient::new(&host, port).with_download_dir(dir.path());

        let outcome = client.remote_get("evil.bin").await;
        assert!(outcome.success);
        assert_eq!(outcome.bytes, 2);
        assert_eq!(std::fs::read(dir.path().join("evil.bin")).unwrap(), b"hi");
    }

    #[tokio::test]
    async fn test_upload_of_missing_file_fails_without_network() {
        // Port 9 (discard) is never contacted: the file check comes first.
        let client = FileClient::new("127.0.0.1", 9);
        let outcome = client.remote_upload(Path::new("/definitely/not/here.bin")).await;
        assert_eq!(outcome, TransferOutcome::failed());
    }
}
