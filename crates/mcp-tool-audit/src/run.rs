//! One audit run: load servers (or an offline catalog), discover, analyze,
//! write the report and pick the exit status.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;

use crate::analyzer::{Analyzer, Severity};
use crate::cli::Cli;
use crate::config::{self, HostEnv, UserConfig};
use crate::mcp::aggregator::merge_catalog;
use crate::mcp::servers::{load_servers, select_server};
use crate::mcp::{ConnectionStatus, DiscoveryOptions, ServerConnector, discover};
use crate::report::{self, RunReport};

pub const EXIT_OK: u8 = 0;
pub const EXIT_FATAL: u8 = 1;
pub const EXIT_ALL_FAILED: u8 = 2;
pub const EXIT_FINDINGS: u8 = 3;

fn resolve_path(path: &std::path::Path, env: &HostEnv) -> PathBuf {
    config::expand_home(&path.to_string_lossy(), env)
}

pub async fn run(
    cli: &Cli,
    env: &HostEnv,
    user_cfg: Option<&UserConfig>,
    connector: &ServerConnector,
) -> anyhow::Result<u8> {
    let started = Instant::now();
    let audit = user_cfg.and_then(|c| c.audit.as_ref());

    // Bad custom patterns must fail before anything is launched.
    let analyzer = Analyzer::new(&config::analyzer_settings(audit))?;
    tracing::debug!("detectors: {}", analyzer.detector_names().join(", "));

    let (results, catalog, source) = if let Some(path) = cli.catalog.as_deref() {
        let path = resolve_path(path, env);
        let loaded = report::load_catalog(&path)?;
        tracing::info!("loaded {} tool(s) from {}", loaded.len(), path.display());
        let results = report::results_from_catalog(&loaded);
        let catalog = merge_catalog(&results);
        (results, catalog, Some(path.display().to_string()))
    } else {
        let config_path = resolve_path(&cli.config, env);
        let servers = load_servers(&config_path, env)?;
        if let Some(name) = cli.server.as_deref() {
            select_server(&servers, name)?;
        }
        let opts = DiscoveryOptions {
            timeout: config::resolve_timeout(cli.timeout, audit),
            dry_run: cli.dry_run,
            filter: cli.server.clone(),
        };
        let d = discover(connector, &servers, &opts).await;
        (d.results, d.catalog, None)
    };

    let findings = analyzer.analyze(&catalog);
    let report = RunReport::new(results, findings, started.elapsed(), cli.dry_run, source);
    let f = &report.metadata.findings;
    tracing::info!(
        "analysis finished: {} critical, {} warning, {} info across {} tool(s)",
        f.critical,
        f.warning,
        f.info,
        catalog.len()
    );

    let output = resolve_path(&cli.output, env);
    report::write_report(&output, &report, cli.format)
        .with_context(|| format!("failed to write report to {}", output.display()))?;
    Ok(exit_code(&report, cli.fail_on))
}

/// Every attempted server failing outranks the findings threshold.
pub fn exit_code(report: &RunReport, fail_on: Option<Severity>) -> u8 {
    let attempted = report
        .servers
        .iter()
        .filter(|r| r.status != ConnectionStatus::Skipped)
        .count();
    if attempted > 0 && report.metadata.servers_successful == 0 {
        tracing::warn!("none of {} attempted server(s) succeeded", attempted);
        return EXIT_ALL_FAILED;
    }
    if let Some(threshold) = fail_on
        && report.highest_severity().is_some_and(|s| s >= threshold)
    {
        tracing::warn!("findings at or above {} present", threshold);
        return EXIT_FINDINGS;
    }
    EXIT_OK
}
