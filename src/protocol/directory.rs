//! Directory-backed codec: one flat storage directory shared by every
//! connection and every execution unit.
//!
//! Reads and writes are not synchronised. Two uploads of the same name, or a
//! GET racing an UPLOAD, may observe a partially written file or a stale
//! listing. That race is part of the behaviour being benchmarked; writing to
//! a temporary file and renaming it over the target (plus per-filename
//! locking where strict consistency matters) would close it.

use super::{Command, FileProtocol, ProtocolError, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Serves LIST/GET/UPLOAD out of a single directory
#[derive(Debug, Clone)]
pub struct DirectoryProtocol {
    root: PathBuf,
}

impl DirectoryProtocol {
    /// Create a codec rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!("Directory protocol serving {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Execute a parsed command against the directory
    pub fn execute(&self, command: Command) -> Result<Response, ProtocolError> {
        match command {
            Command::List => self.list(),
            Command::Get { filename } => self.get(&filename),
            Command::Upload { filename, content } => self.upload(&filename, &content),
        }
    }

    fn list(&self) -> Result<Response, ProtocolError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(Response::ok_list(names))
    }

    fn get(&self, filename: &str) -> Result<Response, ProtocolError> {
        let path = self.resolve(filename)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ProtocolError::NotFound(filename.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Response::ok_file(filename.to_string(), BASE64.encode(bytes)))
    }

    fn upload(&self, filename: &str, content: &str) -> Result<Response, ProtocolError> {
        let path = self.resolve(filename)?;
        let bytes = BASE64.decode(content)?;
        // Written in place: concurrent writers of one name race.
        fs::write(&path, &bytes)?;
        Ok(Response::ok_message(format!(
            "{} uploaded ({} bytes)",
            filename,
            bytes.len()
        )))
    }

    /// Map a client-supplied name to a path inside the storage directory
    fn resolve(&self, filename: &str) -> Result<PathBuf, ProtocolError> {
        let candidate = Path::new(filename);
        let is_plain_name = candidate.file_name().map(|name| name == candidate.as_os_str()) == Some(true);
        if !is_plain_name || filename == "." || filename == ".." {
            return Err(ProtocolError::InvalidFilename(filename.to_string()));
        }
        Ok(self.root.join(candidate))
    }
}

impl FileProtocol for DirectoryProtocol {
    fn process(&self, command: &str) -> String {
        let response = match Command::parse(command).and_then(|command| self.execute(command)) {
            Ok(response) => response,
            Err(e) => {
                if matches!(e, ProtocolError::Io(_)) {
                    warn!("Storage failure in {:?}: {}", self.root, e);
                }
                Response::error(e.to_string())
            }
        };
        response.to_json()
    }
}
