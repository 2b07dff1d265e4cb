//! # Protocol Types and Codec Contract
//!
//! A request is one line of text, `VERB [arg...]`, and a response is one JSON
//! object. Framing (the `\r\n\r\n` terminator) is handled separately by
//! `crate::framing`.
//!
//! The server never interprets commands itself. It hands each frame to a
//! `FileProtocol` implementation and relays whatever JSON comes back.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod directory;

pub use directory::DirectoryProtocol;

/// The command interpreter contract
///
/// Implementations map a command line to a JSON response line. They hold no
/// per-connection state, so one instance may serve any number of
/// connections sequentially. `process` must not fail: every problem is
/// reported as an `ERROR` response.
pub trait FileProtocol: Send + Sync {
    /// Interpret one command line and return the JSON response
    fn process(&self, command: &str) -> String;
}

/// Protocol verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    List,
    Get,
    Upload,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::List => "LIST",
            Verb::Get => "GET",
            Verb::Upload => "UPLOAD",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the files in storage
    List,
    /// Fetch one file
    Get { filename: String },
    /// Store one file; the content is base64 text, inline on the same line
    Upload { filename: String, content: String },
}

impl Command {
    pub fn verb(&self) -> Verb {
        match self {
            Command::List => Verb::List,
            Command::Get { .. } => Verb::Get,
            Command::Upload { .. } => Verb::Upload,
        }
    }

    /// Parse one command line
    ///
    /// The verb is case-insensitive and arguments are separated by
    /// whitespace, so filenames cannot contain spaces.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or(ProtocolError::EmptyRequest)?;

        let command = match verb.to_ascii_uppercase().as_str() {
            "LIST" => Command::List,
            "GET" => Command::Get {
                filename: required(parts.next(), Verb::Get, "filename")?,
            },
            "UPLOAD" => Command::Upload {
                filename: required(parts.next(), Verb::Upload, "filename")?,
                content: required(parts.next(), Verb::Upload, "content")?,
            },
            _ => return Err(ProtocolError::UnknownVerb(verb.to_string())),
        };

        if parts.next().is_some() {
            return Err(ProtocolError::UnexpectedArgument(command.verb()));
        }
        Ok(command)
    }

    /// Render the command as a single line, without terminator
    pub fn to_line(&self) -> String {
        match self {
            Command::List => "LIST".to_string(),
            Command::Get { filename } => format!("GET {}", filename),
            Command::Upload { filename, content } => format!("UPLOAD {} {}", filename, content),
        }
    }
}

fn required(part: Option<&str>, verb: Verb, argument: &'static str) -> Result<String, ProtocolError> {
    part.map(str::to_string)
        .ok_or(ProtocolError::MissingArgument { verb, argument })
}

/// Everything the codec can reject
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty request")]
    EmptyRequest,

    #[error("unknown request: {0}")]
    UnknownVerb(String),

    #[error("{verb} requires a {argument} argument")]
    MissingArgument { verb: Verb, argument: &'static str },

    #[error("too many arguments for {0}")]
    UnexpectedArgument(Verb),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("file content is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Error,
}

/// A response as it appears on the wire
///
/// Field names are fixed by the protocol: `data` holds a list of names or a
/// message, `data_namafile`/`data_file` hold the name and base64 content of
/// a downloaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(rename = "data_namafile", default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(rename = "data_file", default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<String>,
}

impl Response {
    pub fn ok_list(names: Vec<String>) -> Self {
        Self {
            status: Status::Ok,
            data: Some(serde_json::Value::from(names)),
            filename: None,
            file_data: None,
        }
    }

    pub fn ok_file(filename: String, content: String) -> Self {
        Self {
            status: Status::Ok,
            data: None,
            filename: Some(filename),
            file_data: Some(content),
        }
    }

    pub fn ok_message(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            data: Some(serde_json::Value::String(message.into())),
            filename: None,
            file_data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: Some(serde_json::Value::String(message.into())),
            filename: None,
            file_data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// The `data` field as a message, if it is a string
    pub fn message(&self) -> Option<&str> {
        self.data.as_ref().and_then(|data| data.as_str())
    }

    /// The `data` field as a list of filenames, if it is an array of strings
    pub fn file_names(&self) -> Option<Vec<String>> {
        self.data.as_ref()?.as_array().map(|names| {
            names
                .iter()
                .filter_map(|name| name.as_str().map(str::to_string))
                .collect()
        })
    }

    /// Serialize to a single-line JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"status\":\"ERROR\",\"data\":{}}}",
                serde_json::Value::String(format!("failed to encode response: {}", e))
            )
        })
    }
}
