//! Rule-based analysis of tool descriptions.
//!
//! The [`Analyzer`] holds an ordered registry of [`Detector`]s. Tools are
//! visited in catalog order and every detector runs on each tool in registry
//! order, so the finding sequence is fully determined by the inputs. A detector
//! that fails on a tool yields an info finding instead of stopping the pass.

pub mod patterns;
pub mod rules;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, ConfigError};
use crate::mcp::ToolRecord;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    InjectionPattern,
    HiddenUnicode,
    NameCollision,
    DescriptionTooShort,
    DescriptionOutlierLength,
    PersuasiveLanguage,
    SchemaInjection,
    AnalysisError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFinding {
    pub server_name: String,
    pub tool_name: String,
    pub category: Category,
    pub severity: Severity,
    pub message: String,
}

impl AnalysisFinding {
    pub fn new(
        tool: &ToolRecord,
        category: Category,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            server_name: tool.server_name.clone(),
            tool_name: tool.tool_name.clone(),
            category,
            severity,
            message: message.into(),
        }
    }
}

/// One analysis rule. Must be pure: same tool and catalog, same findings.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// `index` is the tool's position in `ctx.catalog()`.
    fn check(
        &self,
        index: usize,
        tool: &ToolRecord,
        ctx: &CatalogContext<'_>,
    ) -> Result<Vec<AnalysisFinding>, AnalysisError>;
}

/// Trimmed description length in chars.
pub fn description_len(tool: &ToolRecord) -> usize {
    tool.description.trim().chars().count()
}

/// Mean and population standard deviation of description lengths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthStats {
    pub samples: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl LengthStats {
    pub fn from_lengths(lengths: &[usize]) -> Self {
        if lengths.is_empty() {
            return Self {
                samples: 0,
                mean: 0.0,
                std_dev: 0.0,
            };
        }
        let n = lengths.len() as f64;
        let mean = lengths.iter().map(|&l| l as f64).sum::<f64>() / n;
        let var = lengths
            .iter()
            .map(|&l| (l as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        Self {
            samples: lengths.len(),
            mean,
            std_dev: var.sqrt(),
        }
    }

    /// `None` when every length is identical.
    pub fn z_score(&self, len: usize) -> Option<f64> {
        (self.std_dev > f64::EPSILON).then(|| (len as f64 - self.mean) / self.std_dev)
    }
}

/// Catalog-wide facts precomputed once per pass.
pub struct CatalogContext<'a> {
    catalog: &'a [ToolRecord],
    servers_by_name: HashMap<&'a str, Vec<&'a str>>,
    first_index: HashMap<&'a str, usize>,
    lengths: LengthStats,
}

impl<'a> CatalogContext<'a> {
    pub fn new(catalog: &'a [ToolRecord]) -> Self {
        let mut servers_by_name: HashMap<&'a str, Vec<&'a str>> = HashMap::new();
        let mut first_index = HashMap::new();
        for (i, t) in catalog.iter().enumerate() {
            first_index.entry(t.tool_name.as_str()).or_insert(i);
            let servers = servers_by_name.entry(t.tool_name.as_str()).or_default();
            if !servers.contains(&t.server_name.as_str()) {
                servers.push(t.server_name.as_str());
            }
        }
        let lengths: Vec<usize> = catalog.iter().map(description_len).collect();
        Self {
            catalog,
            servers_by_name,
            first_index,
            lengths: LengthStats::from_lengths(&lengths),
        }
    }

    pub fn catalog(&self) -> &'a [ToolRecord] {
        self.catalog
    }

    /// Distinct servers advertising `tool_name`, in catalog order.
    pub fn servers_for(&self, tool_name: &str) -> &[&'a str] {
        self.servers_by_name
            .get(tool_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first_index(&self, tool_name: &str) -> Option<usize> {
        self.first_index.get(tool_name).copied()
    }

    pub fn lengths(&self) -> &LengthStats {
        &self.lengths
    }
}

/// Tunables for the built-in rules.
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    /// Descriptions shorter than this (trimmed chars) are flagged. Never zero.
    pub min_description_chars: usize,
    /// |z| above this marks a description length as an outlier.
    pub outlier_z: f64,
    /// Outlier rule stays silent on catalogs smaller than this.
    pub outlier_min_samples: usize,
    /// Extra case-insensitive regexes for the injection rule.
    pub extra_injection_patterns: Vec<String>,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            min_description_chars: 20,
            outlier_z: 2.5,
            outlier_min_samples: 5,
            extra_injection_patterns: Vec::new(),
        }
    }
}

/// Ordered, open detector registry.
pub struct Analyzer {
    detectors: Vec<Box<dyn Detector>>,
}

impl Analyzer {
    /// Registry with no detectors.
    pub fn empty() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// Built-in rules in their fixed order.
    pub fn new(settings: &AnalyzerSettings) -> Result<Self, ConfigError> {
        let custom = patterns::compile_custom(&settings.extra_injection_patterns)?;
        let mut injection: Vec<patterns::Pattern> = patterns::INJECTION.clone();
        injection.extend(custom);

        let mut a = Self::empty();
        a.register(Box::new(rules::ShortDescription {
            min_chars: settings.min_description_chars.max(1),
        }))
        .register(Box::new(rules::InjectionPhrases::new(injection.clone())))
        .register(Box::new(rules::HiddenCharacters))
        .register(Box::new(rules::NameCollision))
        .register(Box::new(rules::LengthOutlier {
            z_threshold: settings.outlier_z,
            min_samples: settings.outlier_min_samples,
        }))
        .register(Box::new(rules::PersuasiveLanguage))
        .register(Box::new(rules::SchemaInjection::new(injection)));
        Ok(a)
    }

    /// Append a detector; it runs after the ones already registered.
    pub fn register(&mut self, detector: Box<dyn Detector>) -> &mut Self {
        self.detectors.push(detector);
        self
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn analyze(&self, catalog: &[ToolRecord]) -> Vec<AnalysisFinding> {
        let ctx = CatalogContext::new(catalog);
        let mut findings = Vec::new();
        for (index, tool) in catalog.iter().enumerate() {
            for detector in &self.detectors {
                match detector.check(index, tool, &ctx) {
                    Ok(mut found) => findings.append(&mut found),
                    Err(e) => {
                        tracing::warn!(
                            "detector {} failed on {}/{}: {}",
                            detector.name(),
                            tool.server_name,
                            tool.tool_name,
                            e
                        );
                        findings.push(AnalysisFinding::new(
                            tool,
                            Category::AnalysisError,
                            Severity::Info,
                            format!("could not analyze with {}: {}", detector.name(), e),
                        ));
                    }
                }
            }
        }
        tracing::info!(
            "analyzed {} tool(s) with {} detector(s): {} finding(s)",
            catalog.len(),
            self.detectors.len(),
            findings.len()
        );
        findings
    }
}
