//! Fan out one connector per selected server and merge the results.
//!
//! Each server runs in its own task; the join waits for all of them before the
//! catalog is built. Merge order is configuration order, then the order each
//! server listed its tools.

use std::time::Duration;

use tokio::task::JoinSet;

use super::connector::ServerConnector;
use super::{ConnectionResult, ConnectionStatus, ServerConfig, ToolRecord};
use crate::config::DEFAULT_TIMEOUT;
use crate::error::ConnectError;

/// Run parameters for one discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub timeout: Duration,
    pub dry_run: bool,
    /// Only process the server with this name; others are omitted entirely.
    pub filter: Option<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            dry_run: false,
            filter: None,
        }
    }
}

/// Merged catalog plus the terminal state of every selected server.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub catalog: Vec<ToolRecord>,
    pub results: Vec<ConnectionResult>,
}

impl Discovery {
    pub fn count(&self, status: ConnectionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// True when at least one server was attempted and none succeeded.
    pub fn all_failed(&self) -> bool {
        let attempted = self
            .results
            .iter()
            .filter(|r| r.status != ConnectionStatus::Skipped)
            .count();
        attempted > 0 && self.count(ConnectionStatus::Success) == 0
    }
}

pub async fn discover(
    connector: &ServerConnector,
    configs: &[ServerConfig],
    opts: &DiscoveryOptions,
) -> Discovery {
    let selected: Vec<&ServerConfig> = configs
        .iter()
        .filter(|c| opts.filter.as_deref().is_none_or(|f| f == c.name))
        .collect();
    tracing::info!(
        "starting discovery: servers={}, timeout_ms={}, dry_run={}",
        selected.len(),
        opts.timeout.as_millis(),
        opts.dry_run
    );

    let mut set = JoinSet::new();
    for (idx, cfg) in selected.iter().enumerate() {
        let connector = connector.clone();
        let cfg = (*cfg).clone();
        let timeout = opts.timeout;
        let dry_run = opts.dry_run;
        set.spawn(async move { (idx, connector.connect_and_list(&cfg, timeout, dry_run).await) });
    }

    let mut slots: Vec<Option<ConnectionResult>> = (0..selected.len()).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, result)) => slots[idx] = Some(result),
            Err(e) => tracing::warn!("connector task join error: {}", e),
        }
    }

    // A slot left empty means its task panicked or was aborted.
    let results: Vec<ConnectionResult> = slots
        .into_iter()
        .zip(&selected)
        .map(|(slot, cfg)| {
            slot.unwrap_or_else(|| {
                let err = ConnectError::Transport("connector task aborted".to_string());
                ConnectionResult::failed(&cfg.name, &err, Duration::ZERO)
            })
        })
        .collect();

    let d = Discovery {
        catalog: merge_catalog(&results),
        results,
    };
    tracing::info!(
        "discovery finished: {} succeeded, {} timed out, {} failed, {} skipped; {} tool(s)",
        d.count(ConnectionStatus::Success),
        d.count(ConnectionStatus::Timeout),
        d.count(ConnectionStatus::Error),
        d.count(ConnectionStatus::Skipped),
        d.catalog.len()
    );
    d
}

/// Concatenate tools of successful results, preserving result order.
pub fn merge_catalog(results: &[ConnectionResult]) -> Vec<ToolRecord> {
    results
        .iter()
        .filter(|r| r.is_success())
        .flat_map(|r| r.tools.iter().cloned())
        .collect()
}
