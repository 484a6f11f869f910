//! Built-in detectors.

use serde_json::Value as JsonValue;

use super::patterns::{self, Pattern};
use super::{
    AnalysisFinding, CatalogContext, Category, Detector, Severity, description_len,
};
use crate::error::AnalysisError;
use crate::mcp::ToolRecord;

/// Empty or too-short descriptions give the agent nothing to select on.
pub struct ShortDescription {
    pub min_chars: usize,
}

impl Detector for ShortDescription {
    fn name(&self) -> &'static str {
        "description-too-short"
    }

    fn check(
        &self,
        _index: usize,
        tool: &ToolRecord,
        _ctx: &CatalogContext<'_>,
    ) -> Result<Vec<AnalysisFinding>, AnalysisError> {
        let len = description_len(tool);
        if len >= self.min_chars {
            return Ok(Vec::new());
        }
        let message = if len == 0 {
            "description is empty".to_string()
        } else {
            format!(
                "description is {len} character(s); minimum is {}",
                self.min_chars
            )
        };
        Ok(vec![AnalysisFinding::new(
            tool,
            Category::DescriptionTooShort,
            Severity::Warning,
            message,
        )])
    }
}

/// One critical finding per distinct manipulative phrase in the description.
pub struct InjectionPhrases {
    patterns: Vec<Pattern>,
}

impl InjectionPhrases {
    pub fn new(patterns: Vec<Pattern>) -> Self {
        Self { patterns }
    }
}

impl Detector for InjectionPhrases {
    fn name(&self) -> &'static str {
        "injection-pattern"
    }

    fn check(
        &self,
        _index: usize,
        tool: &ToolRecord,
        _ctx: &CatalogContext<'_>,
    ) -> Result<Vec<AnalysisFinding>, AnalysisError> {
        Ok(patterns::distinct_matches(&self.patterns, &tool.description)
            .into_iter()
            .map(|(label, text)| {
                AnalysisFinding::new(
                    tool,
                    Category::InjectionPattern,
                    Severity::Critical,
                    format!("matches injection phrase \"{text}\" ({label})"),
                )
            })
            .collect())
    }
}

/// Code points that render as nothing or reorder surrounding text.
pub fn hidden_kind(c: char) -> Option<&'static str> {
    match c {
        '\n' | '\r' | '\t' => None,
        '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}' => Some("zero-width"),
        '\u{200E}' | '\u{200F}' | '\u{061C}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}' => {
            Some("bidi control")
        }
        '\u{E0000}'..='\u{E007F}' => Some("tag"),
        '\u{FE00}'..='\u{FE0F}' | '\u{E0100}'..='\u{E01EF}' => Some("variation selector"),
        '\u{00AD}' | '\u{034F}' | '\u{180E}' | '\u{2061}'..='\u{2064}' => {
            Some("invisible format")
        }
        '\u{2028}' | '\u{2029}' => Some("line separator"),
        '\u{FFF9}'..='\u{FFFB}' => Some("interlinear annotation"),
        '\u{115F}' | '\u{1160}' | '\u{3164}' | '\u{FFA0}' => Some("hangul filler"),
        '\u{E000}'..='\u{F8FF}' | '\u{F0000}'..='\u{FFFFD}' | '\u{100000}'..='\u{10FFFD}' => {
            Some("private use")
        }
        c if c.is_control() => Some("control"),
        _ => None,
    }
}

fn hidden_summary(text: &str) -> Option<String> {
    let mut seen: Vec<char> = Vec::new();
    for c in text.chars() {
        if hidden_kind(c).is_some() && !seen.contains(&c) {
            seen.push(c);
        }
    }
    if seen.is_empty() {
        return None;
    }
    let parts: Vec<String> = seen
        .iter()
        .map(|&c| format!("U+{:04X} ({})", c as u32, hidden_kind(c).unwrap_or("hidden")))
        .collect();
    Some(parts.join(", "))
}

/// Invisible or bidi-override characters in the description or name.
pub struct HiddenCharacters;

impl Detector for HiddenCharacters {
    fn name(&self) -> &'static str {
        "hidden-unicode"
    }

    fn check(
        &self,
        _index: usize,
        tool: &ToolRecord,
        _ctx: &CatalogContext<'_>,
    ) -> Result<Vec<AnalysisFinding>, AnalysisError> {
        let mut out = Vec::new();
        if let Some(summary) = hidden_summary(&tool.description) {
            out.push(AnalysisFinding::new(
                tool,
                Category::HiddenUnicode,
                Severity::Critical,
                format!("description contains hidden characters: {summary}"),
            ));
        }
        if let Some(summary) = hidden_summary(&tool.tool_name) {
            out.push(AnalysisFinding::new(
                tool,
                Category::HiddenUnicode,
                Severity::Critical,
                format!("tool name contains hidden characters: {summary}"),
            ));
        }
        Ok(out)
    }
}

/// Same tool name under more than one server. Reported once, on the first
/// occurrence in the catalog.
pub struct NameCollision;

impl Detector for NameCollision {
    fn name(&self) -> &'static str {
        "name-collision"
    }

    fn check(
        &self,
        index: usize,
        tool: &ToolRecord,
        ctx: &CatalogContext<'_>,
    ) -> Result<Vec<AnalysisFinding>, AnalysisError> {
        if tool.tool_name.trim().is_empty() {
            return Err(AnalysisError::MissingField("tool_name"));
        }
        let servers = ctx.servers_for(&tool.tool_name);
        if servers.len() < 2 || ctx.first_index(&tool.tool_name) != Some(index) {
            return Ok(Vec::new());
        }
        Ok(vec![AnalysisFinding::new(
            tool,
            Category::NameCollision,
            Severity::Warning,
            format!(
                "tool name '{}' is advertised by {} servers: {}",
                tool.tool_name,
                servers.len(),
                servers.join(", ")
            ),
        )])
    }
}

/// Description length far from the catalog mean.
pub struct LengthOutlier {
    pub z_threshold: f64,
    pub min_samples: usize,
}

impl Detector for LengthOutlier {
    fn name(&self) -> &'static str {
        "description-outlier-length"
    }

    fn check(
        &self,
        _index: usize,
        tool: &ToolRecord,
        ctx: &CatalogContext<'_>,
    ) -> Result<Vec<AnalysisFinding>, AnalysisError> {
        let stats = ctx.lengths();
        if stats.samples < self.min_samples {
            return Ok(Vec::new());
        }
        let len = description_len(tool);
        let Some(z) = stats.z_score(len) else {
            return Ok(Vec::new());
        };
        if z.abs() <= self.z_threshold {
            return Ok(Vec::new());
        }
        let side = if z > 0.0 { "above" } else { "below" };
        Ok(vec![AnalysisFinding::new(
            tool,
            Category::DescriptionOutlierLength,
            Severity::Info,
            format!(
                "description length {len} is {:.1} standard deviations {side} the catalog mean of {:.0}",
                z.abs(),
                stats.mean
            ),
        )])
    }
}

/// Wording that pushes the agent to prefer this tool.
pub struct PersuasiveLanguage;

impl Detector for PersuasiveLanguage {
    fn name(&self) -> &'static str {
        "persuasive-language"
    }

    fn check(
        &self,
        _index: usize,
        tool: &ToolRecord,
        _ctx: &CatalogContext<'_>,
    ) -> Result<Vec<AnalysisFinding>, AnalysisError> {
        Ok(patterns::distinct_matches(&patterns::PERSUASIVE, &tool.description)
            .into_iter()
            .map(|(label, text)| {
                AnalysisFinding::new(
                    tool,
                    Category::PersuasiveLanguage,
                    Severity::Info,
                    format!("selection-biasing phrase \"{text}\" ({label})"),
                )
            })
            .collect())
    }
}

/// Injection phrasing hidden in input-schema descriptions.
pub struct SchemaInjection {
    patterns: Vec<Pattern>,
}

impl SchemaInjection {
    pub fn new(patterns: Vec<Pattern>) -> Self {
        Self { patterns }
    }

    fn walk(
        &self,
        path: &str,
        node: &JsonValue,
        out: &mut Vec<(String, String)>,
    ) -> Result<(), AnalysisError> {
        let obj = node.as_object().ok_or_else(|| {
            AnalysisError::MalformedSchema(format!("`{path}` is not an object"))
        })?;
        if let Some(desc) = obj.get("description").and_then(|d| d.as_str()) {
            for (_, text) in patterns::distinct_matches(&self.patterns, desc) {
                out.push((path.to_string(), text));
            }
        }
        match obj.get("properties") {
            None | Some(JsonValue::Null) => {}
            Some(JsonValue::Object(props)) => {
                for (name, prop) in props {
                    self.walk(&format!("{path}.{name}"), prop, out)?;
                }
            }
            Some(_) => {
                return Err(AnalysisError::MalformedSchema(format!(
                    "`{path}.properties` is not an object"
                )));
            }
        }
        if let Some(items) = obj.get("items").filter(|i| i.is_object()) {
            self.walk(&format!("{path}[]"), items, out)?;
        }
        Ok(())
    }
}

impl Detector for SchemaInjection {
    fn name(&self) -> &'static str {
        "schema-injection"
    }

    fn check(
        &self,
        _index: usize,
        tool: &ToolRecord,
        _ctx: &CatalogContext<'_>,
    ) -> Result<Vec<AnalysisFinding>, AnalysisError> {
        let Some(schema) = tool.input_schema.as_ref() else {
            return Ok(Vec::new());
        };
        let mut hits = Vec::new();
        self.walk("$", schema, &mut hits)?;
        Ok(hits
            .into_iter()
            .map(|(path, text)| {
                AnalysisFinding::new(
                    tool,
                    Category::SchemaInjection,
                    Severity::Critical,
                    format!("input schema `{path}` contains injection phrase \"{text}\""),
                )
            })
            .collect())
    }
}
