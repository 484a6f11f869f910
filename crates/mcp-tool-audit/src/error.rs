//! Error taxonomy.
//!
//! Only [`ConfigError`] is fatal to a run. [`ConnectError`] is folded into a
//! server's `ConnectionResult` and [`AnalysisError`] into an info finding.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::mcp::ConnectionStatus;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read server config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in server config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} has no `mcpServers` or `servers` object")]
    MissingServers { path: PathBuf },
    #[error("server '{name}': {reason}")]
    InvalidServer { name: String, reason: String },
    #[error("server '{0}' not found in config")]
    UnknownServer(String),
    #[error("invalid injection pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("unsupported transport: {0}")]
    Unsupported(String),
}

impl ConnectError {
    pub fn status(&self) -> ConnectionStatus {
        match self {
            ConnectError::Timeout(_) => ConnectionStatus::Timeout,
            _ => ConnectionStatus::Error,
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("tool record is missing `{0}`")]
    MissingField(&'static str),
    #[error("input schema is malformed: {0}")]
    MalformedSchema(String),
}
