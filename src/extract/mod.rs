//! Result extraction from raw provider output.
//!
//! Pure functions only. The extractor degrades from "fully structured" to
//! "valid payload, unparseable" to "nothing usable" and never fails on
//! malformed input; the only error is [`ExtractError::NotFound`].

pub mod labels;
pub mod report;

use thiserror::Error;

use crate::provider::ProviderTask;
use crate::task::{LogEntry, TaskOutcome};

pub use report::{decode_report, DecodeMethod, DecodedReport, PmfReport, PmfScores, Recommendation};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no result found in provider output")]
    NotFound,
}

/// Extract the structured outcome of a finished task.
///
/// Order: direct output field, then labeled lines over the best text source
/// (trailing log content, then the snapshot message), then the raw text.
/// A JSON report is decoded opportunistically from whichever text was used.
pub fn extract(
    primary: &ProviderTask,
    auxiliary_logs: &[LogEntry],
) -> Result<TaskOutcome, ExtractError> {
    let mut outcome = if let Some(output) = primary.output_text() {
        TaskOutcome::recognized(output)
    } else {
        let text = best_text(primary, auxiliary_logs).ok_or(ExtractError::NotFound)?;
        match labels::parse(&text) {
            Some(structured) => structured,
            None => TaskOutcome::unstructured(text),
        }
    };

    if let Ok(decoded) = decode_report(&outcome.output) {
        outcome.report_method = Some(decoded.method);
        outcome.report = Some(decoded.report);
    }

    Ok(outcome)
}

/// Trailing log content first, then the snapshot's generic message.
fn best_text(primary: &ProviderTask, logs: &[LogEntry]) -> Option<String> {
    logs.iter()
        .rev()
        .map(|entry| entry.message.trim())
        .find(|message| !message.is_empty())
        .map(str::to_string)
        .or_else(|| {
            primary
                .msg
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
        })
}
