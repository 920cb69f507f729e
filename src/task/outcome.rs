//! Structured outcome committed to a task at finalization.

use serde::{Deserialize, Serialize};

use crate::extract::report::{DecodeMethod, PmfReport};

/// How much structure the extractor managed to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The provider boxed the answer in a direct output field.
    Recognized,
    /// At least one labeled line matched.
    Structured,
    /// Usable text, but nothing matched.
    Unstructured,
}

/// Final verdict token reported by the audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Works,
    Broken,
    Unknown,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Works => "WORKS",
            Self::Broken => "BROKEN",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Classify a free-form verdict value.
    pub fn classify(value: &str) -> Self {
        let upper = value.to_ascii_uppercase();
        if upper.contains("WORKS") {
            Self::Works
        } else if upper.contains("BROKEN") {
            Self::Broken
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiRetrieval {
    pub success: bool,
    pub latency_seconds: f64,
}

/// Result extracted from a finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub kind: OutcomeKind,
    /// Raw text the outcome was derived from.
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_retrieval: Option<AiRetrieval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_verdict: Option<Verdict>,
    /// Decoded JSON report, for report-style tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<PmfReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_method: Option<DecodeMethod>,
}

impl TaskOutcome {
    pub fn recognized(output: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Recognized,
            output: output.into(),
            claim: None,
            pricing_visible: None,
            ai_retrieval: None,
            final_verdict: Some(Verdict::Works),
            report: None,
            report_method: None,
        }
    }

    pub fn unstructured(output: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Unstructured,
            output: output.into(),
            claim: None,
            pricing_visible: None,
            ai_retrieval: None,
            final_verdict: None,
            report: None,
            report_method: None,
        }
    }

    /// One-line summary used for the synthetic completion log entry.
    pub fn summary(&self) -> String {
        if let Some(report) = &self.report {
            return format!(
                "Report decoded: {} ({})",
                report.recommendation,
                if report.product.is_empty() {
                    "unnamed product"
                } else {
                    report.product.as_str()
                }
            );
        }
        match self.kind {
            OutcomeKind::Recognized => {
                format!("Result received ({} chars of output)", self.output.chars().count())
            }
            OutcomeKind::Structured => format!(
                "Result extracted: verdict {}",
                self.final_verdict.unwrap_or(Verdict::Unknown).as_str()
            ),
            OutcomeKind::Unstructured => format!(
                "Unstructured result ({} chars of output)",
                self.output.chars().count()
            ),
        }
    }
}
