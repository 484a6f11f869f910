use std::path::PathBuf;

use clap::Parser;

use crate::analyzer::Severity;
use crate::report::OutputFormat;

#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-tool-audit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "List the tools of configured MCP servers and flag risky descriptions")]
pub struct Cli {
    /// MCP config file with an `mcpServers` or `servers` object
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Where to write the report
    #[arg(short, long, default_value = "mcp-audit.json")]
    pub output: PathBuf,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Per-server timeout in seconds (default 30, or `[audit].timeout_secs`)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Load the config and report every server as skipped without connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Only process the server with this name
    #[arg(short, long)]
    pub server: Option<String>,

    /// Re-analyze a previously written catalog instead of connecting
    #[arg(long, conflicts_with_all = ["dry_run", "server"])]
    pub catalog: Option<PathBuf>,

    /// Exit with status 3 when any finding is at or above this severity
    #[arg(long, value_enum)]
    pub fail_on: Option<Severity>,
}
