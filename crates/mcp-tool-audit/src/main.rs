use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use env_flags::env_flags;
use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt::MakeWriter, prelude::*};

use mcp_tool_audit::cli::Cli;
use mcp_tool_audit::config::{self, HostEnv, UserConfig};
use mcp_tool_audit::mcp::ServerConnector;
use mcp_tool_audit::run::{self, EXIT_FATAL};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Clone, Copy)]
enum LogStyle {
    Json,
    Compact,
    Pretty,
    Full,
}

fn fmt_layer<W>(writer: W, style: LogStyle, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(writer);
    match style {
        LogStyle::Json => base.json().boxed(),
        LogStyle::Compact => base.compact().boxed(),
        LogStyle::Pretty => base.pretty().boxed(),
        LogStyle::Full => base.boxed(),
    }
}

fn init_tracing(env: &HostEnv, home: &Path, user_cfg: Option<&UserConfig>) {
    env_flags! {
        /// Tracing filter, e.g. "info", "debug", or targets format.
        RUST_LOG: &str = "info";
        /// Preferred filter env (alias). If set, overrides RUST_LOG.
        TRACING_FILTER: &str = "";
        /// Pretty formatting for logs (ignored if TRACING_JSON=true).
        TRACING_PRETTY: bool = false;
        /// Compact single-line formatting for logs (ignored if TRACING_JSON=true)
        TRACING_COMPACT: bool = true;
        /// JSON formatting for logs
        TRACING_JSON: bool = false;
        /// If true, also log to a daily file under <MCP_AUDIT_HOME>/logs or LOG_DIR
        LOG_TO_FILE: bool = false;
        /// Optional explicit log directory. Defaults to <MCP_AUDIT_HOME>/logs
        LOG_DIR: &str = "";
    }

    let mut filter = if !(*TRACING_FILTER).is_empty() {
        (*TRACING_FILTER).to_string()
    } else {
        (*RUST_LOG).to_string()
    };
    let mut json = *TRACING_JSON;
    let mut compact = *TRACING_COMPACT;
    let mut pretty = *TRACING_PRETTY;
    let mut to_file = *LOG_TO_FILE;
    let mut log_dir: Option<PathBuf> = if !(*LOG_DIR).is_empty() {
        Some(config::expand_home(*LOG_DIR, env))
    } else {
        None
    };

    // user config only fills in what the environment left unset
    if let Some(cfg) = user_cfg.and_then(|c| c.logging.as_ref()) {
        if !(env.is_set("TRACING_FILTER") || env.is_set("RUST_LOG"))
            && let Some(level) = cfg.level.as_ref()
        {
            filter = level.clone();
        }
        if !env.is_set("TRACING_JSON")
            && let Some(v) = cfg.json
        {
            json = v;
        }
        if !env.is_set("TRACING_COMPACT")
            && let Some(v) = cfg.compact
        {
            compact = v;
        }
        if !env.is_set("TRACING_PRETTY")
            && let Some(v) = cfg.pretty
        {
            pretty = v;
        }
        if !env.is_set("LOG_TO_FILE")
            && let Some(v) = cfg.to_file
        {
            to_file = v;
        }
        if !env.is_set("LOG_DIR")
            && let Some(dir) = cfg.dir.as_ref()
        {
            log_dir = Some(config::expand_home(dir, env));
        }
    }

    let style = if json {
        LogStyle::Json
    } else if compact {
        LogStyle::Compact
    } else if pretty {
        LogStyle::Pretty
    } else {
        LogStyle::Full
    };
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

    static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
    // stderr only; stdout stays free for piping
    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(std::io::stderr, style, true)];
    let mut dir_error = None;
    if to_file {
        let dir = log_dir.unwrap_or_else(|| home.join("logs"));
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(&dir, "mcp-tool-audit.log");
                let (nb, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);
                layers.push(fmt_layer(nb, style, false));
            }
            Err(e) => dir_error = Some((dir, e)),
        }
    }

    if let Err(e) = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
    {
        tracing::debug!("tracing already set: {:?}", e);
    }
    if let Some((dir, e)) = dir_error {
        tracing::warn!("failed to create log dir {}: {}", dir.display(), e);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let env = HostEnv::capture();
    let home = config::audit_home(&env);
    let user_cfg = config::load_user_config(&home);

    init_tracing(&env, &home, user_cfg.as_ref().ok().and_then(|c| c.as_ref()));

    let user_cfg = match user_cfg {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(
                "invalid user config {}: {:#}",
                home.join("config.toml").display(),
                e
            );
            return ExitCode::from(EXIT_FATAL);
        }
    };
    tracing::info!(
        "starting mcp-tool-audit (home={}, config={})",
        home.display(),
        cli.config.display()
    );

    match run::run(&cli, &env, user_cfg.as_ref(), &ServerConnector::stdio()).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("audit failed: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}
