//! Load MCP server definitions from a host config file.
//!
//! Accepts the Claude/Cursor `mcpServers` object and the VS Code `servers`
//! object (preferring `servers` when both are present). Entries keep the order
//! they have in the file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde_json::Value as JsonValue;

use super::{McpTransport, ServerConfig};
use crate::config::HostEnv;
use crate::error::ConfigError;

/// Read and parse `path` into an ordered server list.
pub fn load_servers(path: &Path, env: &HostEnv) -> Result<Vec<ServerConfig>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_servers(&content, path, env)
}

pub fn parse_servers(
    content: &str,
    path: &Path,
    env: &HostEnv,
) -> Result<Vec<ServerConfig>, ConfigError> {
    let v: JsonValue = serde_json::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let map = v
        .get("servers")
        .and_then(|m| m.as_object())
        .or_else(|| v.get("mcpServers").and_then(|m| m.as_object()))
        .ok_or_else(|| ConfigError::MissingServers {
            path: path.to_path_buf(),
        })?;

    let mut out = Vec::with_capacity(map.len());
    for (key, def) in map.iter() {
        out.push(parse_server(key, def, env)?);
    }
    tracing::debug!("loaded {} server(s) from {}", out.len(), path.display());
    Ok(out)
}

/// Only the `--server` entry, or [`ConfigError::UnknownServer`].
pub fn select_server<'a>(
    servers: &'a [ServerConfig],
    name: &str,
) -> Result<&'a ServerConfig, ConfigError> {
    servers
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| ConfigError::UnknownServer(name.to_string()))
}

/// Parse `{ command, args?, env? }` or `{ url }`.
fn parse_server(key: &str, def: &JsonValue, env: &HostEnv) -> Result<ServerConfig, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidServer {
        name: key.to_string(),
        reason,
    };
    if !def.is_object() {
        return Err(invalid("entry must be an object".to_string()));
    }

    if let Some(command) = def.get("command") {
        let command = command
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| invalid("`command` must be a non-empty string".to_string()))?
            .to_string();
        let args = match def.get("args") {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Array(arr)) => arr
                .iter()
                .map(|x| {
                    x.as_str()
                        .map(|s| s.to_string())
                        .ok_or_else(|| invalid(format!("non-string argument {x}")))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => return Err(invalid(format!("`args` must be an array, got {other}"))),
        };
        let mut resolved_env = HashMap::new();
        match def.get("env") {
            None | Some(JsonValue::Null) => {}
            Some(JsonValue::Object(m)) => {
                for (k, v) in m {
                    let raw = v
                        .as_str()
                        .ok_or_else(|| invalid(format!("env `{k}` must be a string")))?;
                    let value = expand_vars(raw, env)
                        .map_err(|var| invalid(format!("env `{k}` references unset `{var}`")))?;
                    resolved_env.insert(k.clone(), value);
                }
            }
            Some(other) => return Err(invalid(format!("`env` must be an object, got {other}"))),
        }
        return Ok(ServerConfig {
            name: key.to_string(),
            transport: McpTransport::Stdio {
                command,
                args,
                env: resolved_env,
            },
        });
    }

    if let Some(url) = def.get("url").and_then(|u| u.as_str()) {
        return Ok(ServerConfig {
            name: key.to_string(),
            transport: McpTransport::Remote {
                url: url.to_string(),
            },
        });
    }

    Err(invalid("expected `command` or `url`".to_string()))
}

/// Expand `${NAME}` references from the host snapshot. Returns the first
/// unresolved variable name on failure.
fn expand_vars(raw: &str, env: &HostEnv) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // unterminated: keep literally
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        let value = env.get(name).ok_or_else(|| name.to_string())?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
