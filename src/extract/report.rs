//! JSON report decoding for report-style tasks.
//!
//! Agents are asked to answer with a JSON report but routinely wrap it in
//! prose, fence it in markdown, double-encode it or escape it. Decoding runs
//! an ordered list of pure strategies and keeps the first value that looks
//! like a report.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

use super::ExtractError;

/// Which strategy produced the decoded report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMethod {
    Direct,
    FencedBlock,
    BraceSpan,
    Unescaped,
}

/// Top-level recommendation of a product-market-fit report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Ship,
    Pivot,
    Kill,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ship => "SHIP",
            Self::Pivot => "PIVOT",
            Self::Kill => "KILL",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PmfScores {
    pub product_maturity: f64,
    pub pmf_readiness: f64,
    pub technical_quality: f64,
    pub market_opportunity: f64,
    pub viability: f64,
}

/// Product-market-fit audit report.
///
/// Only `recommendation`, `scores` and `sections` are required for a value to
/// count as a report; everything else defaults. Sections are kept as raw JSON
/// since their shape varies between prompt revisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PmfReport {
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub date: String,
    pub recommendation: Recommendation,
    #[serde(default)]
    pub one_line_verdict: String,
    #[serde(default)]
    pub key_insight: String,
    pub scores: PmfScores,
    pub sections: Map<String, Value>,
}

/// A report and the strategy that decoded it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReport {
    pub method: DecodeMethod,
    pub report: PmfReport,
}

type Strategy = fn(&str) -> Option<Value>;

/// Strategies in the order they are attempted.
const STRATEGIES: [(DecodeMethod, Strategy); 4] = [
    (DecodeMethod::Direct, parse_direct),
    (DecodeMethod::FencedBlock, parse_fenced_block),
    (DecodeMethod::BraceSpan, parse_brace_span),
    (DecodeMethod::Unescaped, parse_unescaped_span),
];

/// Decode a report from free text.
pub fn decode_report(text: &str) -> Result<DecodedReport, ExtractError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ExtractError::NotFound);
    }

    for (method, strategy) in STRATEGIES {
        let Some(value) = strategy(text) else {
            continue;
        };
        if !has_report_shape(&value) {
            continue;
        }
        match serde_json::from_value::<PmfReport>(value) {
            Ok(report) => return Ok(DecodedReport { method, report }),
            Err(e) => {
                tracing::debug!(?method, error = %e, "report-shaped value failed to deserialize");
            }
        }
    }

    Err(ExtractError::NotFound)
}

/// Minimal shape check: a recommendation plus `scores` and `sections` objects.
pub fn has_report_shape(value: &Value) -> bool {
    value.get("recommendation").is_some_and(|v| !v.is_null())
        && value.get("scores").is_some_and(Value::is_object)
        && value.get("sections").is_some_and(Value::is_object)
}

fn parse_direct(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text).ok()? {
        // Double-encoded: the JSON document is a string holding JSON.
        Value::String(inner) => serde_json::from_str(&inner).ok(),
        value => Some(value),
    }
}

fn parse_fenced_block(text: &str) -> Option<Value> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"```(?:json|JSON)?\s*([\s\S]*?)\s*```").expect("static fence pattern")
    });
    let inner = fence.captures(text)?.get(1)?.as_str();
    serde_json::from_str(inner).ok()
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_brace_span(text: &str) -> Option<Value> {
    serde_json::from_str(brace_span(text)?).ok()
}

fn parse_unescaped_span(text: &str) -> Option<Value> {
    let span = brace_span(text)?;
    let unescaped = span
        .replace("\\\"", "\"")
        .replace("\\r\\n", "\n")
        .replace("\\n", "\n");
    serde_json::from_str(&unescaped).ok()
}
