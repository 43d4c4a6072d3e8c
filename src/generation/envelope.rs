//! Tolerant parsing of the generation service reply.
//!
//! The service is asked for a bare `{"SQL": .., "TEXT": .., "CHART_TITLE": ..}`
//! object but regularly wraps it in a Markdown fence or surrounds it with prose.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

static FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```(?:json|JSON)?\s*").expect("static regex"));

/// Unvalidated statement plus the service's explanation and chart title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateStatement {
    #[serde(rename = "SQL")]
    pub sql: String,
    #[serde(rename = "TEXT", default)]
    pub explanation: String,
    #[serde(rename = "CHART_TITLE", default)]
    pub chart_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationParseError {
    #[error("no JSON object found in the reply")]
    NoJsonObject,
    #[error("reply is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("reply has no SQL field")]
    MissingSql,
}

/// Loose shape: every field optional and nullable, so a missing `SQL` can be told apart from bad JSON.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "SQL", default)]
    sql: Option<String>,
    #[serde(rename = "TEXT", default)]
    text: Option<String>,
    #[serde(rename = "CHART_TITLE", default)]
    chart_title: Option<String>,
}

fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = match FENCE_OPEN.find(trimmed) {
        Some(m) => &trimmed[m.end()..],
        None => trimmed,
    };
    body.trim_end_matches('`').trim()
}

/// Outermost `{ ... }` run: first opening brace to last closing brace.
fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_envelope(reply: &str) -> Result<CandidateStatement, GenerationParseError> {
    let content = strip_fences(reply);
    let raw: RawEnvelope = match serde_json::from_str(content) {
        Ok(raw) => raw,
        Err(first) => {
            debug!(target: "querywarden::generation", "reply is not bare JSON ({}), retrying on embedded object", first);
            let object = outer_object(content).ok_or(GenerationParseError::NoJsonObject)?;
            serde_json::from_str(object).map_err(|e| GenerationParseError::InvalidJson(e.to_string()))?
        }
    };
    let sql = raw.sql.map(|s| s.trim().to_string()).unwrap_or_default();
    if sql.is_empty() {
        return Err(GenerationParseError::MissingSql);
    }
    Ok(CandidateStatement {
        sql,
        explanation: raw.text.unwrap_or_default().trim().to_string(),
        chart_title: raw.chart_title.unwrap_or_default().trim().to_string(),
    })
}
