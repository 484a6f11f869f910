use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analyzer::AnalyzerSettings;

/// Default per-server connection budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Snapshot of the process environment, taken once at startup and passed down
/// explicitly. Core code never reads `std::env` on its own.
#[derive(Debug, Clone, Default)]
pub struct HostEnv {
    vars: HashMap<String, String>,
}

impl HostEnv {
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UserConfig {
    pub logging: Option<LoggingCfg>,
    pub audit: Option<AuditCfg>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingCfg {
    pub to_file: Option<bool>,
    pub dir: Option<String>,
    pub json: Option<bool>,
    pub compact: Option<bool>,
    pub pretty: Option<bool>,
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditCfg {
    pub timeout_secs: Option<u64>,
    pub min_description_chars: Option<usize>,
    pub outlier_z: Option<f64>,
    pub outlier_min_samples: Option<usize>,
    pub extra_injection_patterns: Option<Vec<String>>,
}

/// `$MCP_AUDIT_HOME`, else `$HOME/.mcp-audit`, else `./.mcp-audit`.
pub fn audit_home(env: &HostEnv) -> PathBuf {
    if let Some(home) = env.get("MCP_AUDIT_HOME").filter(|s| !s.is_empty()) {
        return PathBuf::from(home);
    }
    if let Some(home) = env.get("HOME") {
        return PathBuf::from(home).join(".mcp-audit");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".mcp-audit")
}

pub fn load_user_config(home: &Path) -> anyhow::Result<Option<UserConfig>> {
    let path = home.join("config.toml");
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(&path)?;
    let cfg: UserConfig = toml::from_str(&s)?;
    Ok(Some(cfg))
}

pub fn expand_home(path: &str, env: &HostEnv) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = env.get("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

/// CLI flag wins, then `[audit].timeout_secs`, then [`DEFAULT_TIMEOUT`].
pub fn resolve_timeout(cli_secs: Option<u64>, cfg: Option<&AuditCfg>) -> Duration {
    cli_secs
        .or_else(|| cfg.and_then(|c| c.timeout_secs))
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT)
}

/// Overlay `[audit]` knobs on the analyzer defaults.
pub fn analyzer_settings(cfg: Option<&AuditCfg>) -> AnalyzerSettings {
    let mut s = AnalyzerSettings::default();
    let Some(cfg) = cfg else {
        return s;
    };
    if let Some(n) = cfg.min_description_chars {
        // zero would disable the rule entirely
        s.min_description_chars = n.max(1);
    }
    if let Some(z) = cfg.outlier_z.filter(|z| z.is_finite() && *z > 0.0) {
        s.outlier_z = z;
    }
    if let Some(n) = cfg.outlier_min_samples {
        s.outlier_min_samples = n;
    }
    if let Some(p) = cfg.extra_injection_patterns.as_ref() {
        s.extra_injection_patterns = p.clone();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_config_sections() {
        let cfg: UserConfig = toml::from_str(
            r#"
[logging]
level = "debug"
json = true

[audit]
timeout_secs = 5
min_description_chars = 0
outlier_z = 3.5
extra_injection_patterns = ["send .* to https?://"]
"#,
        )
        .expect("parse ok");
        assert_eq!(
            cfg.logging.as_ref().and_then(|l| l.level.as_deref()),
            Some("debug")
        );
        let audit = cfg.audit.as_ref();
        assert_eq!(resolve_timeout(None, audit), Duration::from_secs(5));
        assert_eq!(resolve_timeout(Some(9), audit), Duration::from_secs(9));

        let s = analyzer_settings(audit);
        assert_eq!(s.min_description_chars, 1);
        assert_eq!(s.outlier_z, 3.5);
        assert_eq!(s.extra_injection_patterns.len(), 1);
    }

    #[test]
    fn defaults_without_user_config() {
        assert_eq!(resolve_timeout(None, None), DEFAULT_TIMEOUT);
        let s = analyzer_settings(None);
        assert_eq!(s.min_description_chars, AnalyzerSettings::default().min_description_chars);
    }

    #[test]
    fn audit_home_prefers_explicit_env() {
        let env = HostEnv::from_pairs([("MCP_AUDIT_HOME", "/srv/audit"), ("HOME", "/home/x")]);
        assert_eq!(audit_home(&env), PathBuf::from("/srv/audit"));
        let env = HostEnv::from_pairs([("HOME", "/home/x")]);
        assert_eq!(audit_home(&env), PathBuf::from("/home/x/.mcp-audit"));
        assert_eq!(
            expand_home("~/cfg.json", &env),
            PathBuf::from("/home/x/cfg.json")
        );
    }

    #[test]
    fn missing_user_config_is_none() {
        let dir = tempfile::tempdir().expect("tmp");
        assert!(load_user_config(dir.path()).expect("ok").is_none());
        std::fs::write(dir.path().join("config.toml"), "[audit]\ntimeout_secs = 2\n").unwrap();
        let cfg = load_user_config(dir.path()).expect("ok").expect("some");
        assert_eq!(cfg.audit.and_then(|a| a.timeout_secs), Some(2));
    }
}
