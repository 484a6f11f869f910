//! Shared types for configured servers, connection outcomes and discovered tools.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConnectError;

/// How to reach a server. Stdio launches a local process; remote endpoints are
/// recorded from config but not dialed by the stdio lister.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransport {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Remote {
        url: String,
    },
}

/// One configured server, keyed by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub transport: McpTransport,
}

impl ServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: McpTransport::Stdio {
                command: command.into(),
                args,
                env: HashMap::new(),
            },
        }
    }
}

/// A tool advertised by a server, in the order the server listed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub server_name: String,
    pub tool_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    /// Behaviour hints the server attached to the tool, as sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<serde_json::Value>,
}

impl ToolRecord {
    pub fn new(
        server_name: impl Into<String>,
        tool_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            tool_name: tool_name.into(),
            description: description.into(),
            input_schema: None,
            annotations: None,
        }
    }
}

/// Terminal state of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Success,
    Timeout,
    Error,
    Skipped,
}

/// Outcome of one connector invocation. The constructors keep `tools` empty
/// unless `status` is success and set `error_detail` only for timeout/error.
/// Results read back from a report are not checked; consumers take tools from
/// success results only (see [`crate::mcp::aggregator::merge_catalog`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionResult {
    pub server_name: String,
    pub status: ConnectionStatus,
    pub tools: Vec<ToolRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ConnectionResult {
    pub fn success(server_name: &str, tools: Vec<ToolRecord>, elapsed: Duration) -> Self {
        Self {
            server_name: server_name.to_string(),
            status: ConnectionStatus::Success,
            tools,
            error_detail: None,
            elapsed_ms: millis(elapsed),
        }
    }

    pub fn skipped(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            status: ConnectionStatus::Skipped,
            tools: Vec::new(),
            error_detail: None,
            elapsed_ms: 0,
        }
    }

    pub fn failed(server_name: &str, err: &ConnectError, elapsed: Duration) -> Self {
        Self {
            server_name: server_name.to_string(),
            status: err.status(),
            tools: Vec::new(),
            error_detail: Some(err.to_string()),
            elapsed_ms: millis(elapsed),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ConnectionStatus::Success
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
