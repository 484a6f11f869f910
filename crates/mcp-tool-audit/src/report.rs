//! Report rendering and offline catalog loading.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analyzer::{AnalysisFinding, Severity};
use crate::mcp::{ConnectionResult, ConnectionStatus, ToolRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Metadata, per-server results and findings
    Json,
    /// `server_name,tool_name,description` rows
    Csv,
    /// `{"tools":[{"name","description"}]}` for manual review
    Tools,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingCounts {
    pub info: usize,
    pub warning: usize,
    pub critical: usize,
}

impl FindingCounts {
    pub fn tally(findings: &[AnalysisFinding]) -> Self {
        let mut c = Self::default();
        for f in findings {
            match f.severity {
                Severity::Info => c.info += 1,
                Severity::Warning => c.warning += 1,
                Severity::Critical => c.critical += 1,
            }
        }
        c
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub servers_processed: usize,
    pub servers_successful: usize,
    pub servers_failed: usize,
    pub tools_discovered: usize,
    pub findings: FindingCounts,
    pub processing_time_seconds: f64,
    pub dry_run: bool,
    /// Set when the catalog was loaded from a file instead of discovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: ReportMetadata,
    pub servers: Vec<ConnectionResult>,
    pub findings: Vec<AnalysisFinding>,
}

impl RunReport {
    pub fn new(
        results: Vec<ConnectionResult>,
        findings: Vec<AnalysisFinding>,
        elapsed: Duration,
        dry_run: bool,
        catalog_source: Option<String>,
    ) -> Self {
        let count = |s: ConnectionStatus| results.iter().filter(|r| r.status == s).count();
        let metadata = ReportMetadata {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            servers_processed: results.len(),
            servers_successful: count(ConnectionStatus::Success),
            servers_failed: count(ConnectionStatus::Error) + count(ConnectionStatus::Timeout),
            tools_discovered: results.iter().map(|r| r.tools.len()).sum(),
            findings: FindingCounts::tally(&findings),
            processing_time_seconds: elapsed.as_secs_f64(),
            dry_run,
            catalog_source,
        };
        Self {
            metadata,
            servers: results,
            findings,
        }
    }

    /// Tools of successful servers, in report order.
    pub fn catalog(&self) -> Vec<ToolRecord> {
        crate::mcp::aggregator::merge_catalog(&self.servers)
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

/// One tool in the `{"tools": [...]}` review format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReviewTool {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReviewFile {
    tools: Vec<ReviewTool>,
}

pub fn render(report: &RunReport, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        OutputFormat::Csv => Ok(render_csv(&report.catalog())),
        OutputFormat::Tools => {
            let tools = report
                .catalog()
                .into_iter()
                .map(|t| ReviewTool {
                    description: if t.description.trim().is_empty() {
                        format!("Server: {}", t.server_name)
                    } else {
                        t.description
                    },
                    name: t.tool_name,
                    server_name: None,
                })
                .collect();
            Ok(serde_json::to_string_pretty(&ReviewFile { tools })?)
        }
    }
}

pub fn write_report(path: &Path, report: &RunReport, format: OutputFormat) -> anyhow::Result<()> {
    let body = render(report, format)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, body).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!("wrote {:?} report to {}", format, path.display());
    Ok(())
}

fn render_csv(catalog: &[ToolRecord]) -> String {
    let mut out = String::from("server_name,tool_name,description\n");
    for t in catalog {
        out.push_str(&csv_field(&t.server_name));
        out.push(',');
        out.push_str(&csv_field(&t.tool_name));
        out.push(',');
        out.push_str(&csv_field(&t.description));
        out.push('\n');
    }
    out
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Report { servers: Vec<ConnectionResult> },
    Review(ReviewFile),
    Flat(Vec<ToolRecord>),
}

/// Read a catalog written by an earlier run: a JSON report, a flat list of
/// tool records, or the `{"tools": [...]}` review format.
pub fn load_catalog(path: &Path) -> anyhow::Result<Vec<ToolRecord>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_catalog(&content).with_context(|| format!("parsing catalog {}", path.display()))
}

pub fn parse_catalog(content: &str) -> anyhow::Result<Vec<ToolRecord>> {
    let file: CatalogFile = serde_json::from_str(content)
        .context("expected a report, a tool list, or a {\"tools\": [...]} object")?;
    Ok(match file {
        CatalogFile::Report { servers } => crate::mcp::aggregator::merge_catalog(&servers),
        CatalogFile::Review(r) => r
            .tools
            .into_iter()
            .map(|t| {
                let server = t.server_name.unwrap_or_else(|| "unknown".to_string());
                // the review format fills empty descriptions with a placeholder
                let description = if t.description == format!("Server: {server}") {
                    String::new()
                } else {
                    t.description
                };
                ToolRecord::new(server, t.name, description)
            })
            .collect(),
        CatalogFile::Flat(tools) => tools,
    })
}

/// Group an offline catalog into one success result per server, first
/// appearance order, so it reports like a discovery pass. Analyze
/// `merge_catalog` of the result so findings follow the same order.
pub fn results_from_catalog(catalog: &[ToolRecord]) -> Vec<ConnectionResult> {
    let mut grouped: Vec<(&str, Vec<ToolRecord>)> = Vec::new();
    for tool in catalog {
        match grouped.iter_mut().find(|(s, _)| *s == tool.server_name) {
            Some((_, tools)) => tools.push(tool.clone()),
            None => grouped.push((tool.server_name.as_str(), vec![tool.clone()])),
        }
    }
    grouped
        .into_iter()
        .map(|(server, tools)| ConnectionResult::success(server, tools, Duration::ZERO))
        .collect()
}
