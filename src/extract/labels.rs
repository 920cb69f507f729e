//! Labeled-line field extraction.
//!
//! Audit output is free text; the fields we care about are written as
//! `Label: value` lines. Each label is matched case-insensitively at the start
//! of a line and the first match wins.

use regex::Regex;
use std::sync::OnceLock;

use crate::task::{AiRetrieval, OutcomeKind, TaskOutcome, Verdict};

struct LabelPatterns {
    claim: Regex,
    pricing: Regex,
    retrieval: Regex,
    latency: Regex,
    verdict: Regex,
}

fn patterns() -> &'static LabelPatterns {
    static PATTERNS: OnceLock<LabelPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let line = |label: &str| {
            Regex::new(&format!(r"(?im)^[ \t]*{}[ \t]*:[ \t]*([^\r\n]*)", label))
                .expect("static label pattern")
        };
        LabelPatterns {
            claim: line("claim"),
            pricing: line(r"pricing[ \t]+visible"),
            retrieval: line(r"ai[ \t]+retrieval"),
            latency: Regex::new(r"(?im)^[ \t]*latency[ \t]*:[ \t]*~?[ \t]*([0-9]+(?:\.[0-9]+)?)")
                .expect("static latency pattern"),
            verdict: line(r"final[ \t]+verdict"),
        }
    })
}

fn first_value(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Parse the recognised labels out of `text`.
///
/// Returns `None` when no label matched at all; missing labels get their
/// defaults when at least one matched.
pub fn parse(text: &str) -> Option<TaskOutcome> {
    let p = patterns();

    let claim = first_value(&p.claim, text);
    let pricing = first_value(&p.pricing, text);
    let retrieval = first_value(&p.retrieval, text);
    let latency = first_value(&p.latency, text).and_then(|v| v.parse::<f64>().ok());
    let verdict = first_value(&p.verdict, text);

    if claim.is_none()
        && pricing.is_none()
        && retrieval.is_none()
        && latency.is_none()
        && verdict.is_none()
    {
        return None;
    }

    Some(TaskOutcome {
        kind: OutcomeKind::Structured,
        output: text.to_string(),
        claim: Some(claim.unwrap_or_else(|| "Unknown".to_string())),
        pricing_visible: Some(
            pricing
                .map(|v| v.to_ascii_lowercase().contains("yes"))
                .unwrap_or(false),
        ),
        ai_retrieval: Some(AiRetrieval {
            success: retrieval
                .map(|v| v.to_ascii_lowercase().contains("success"))
                .unwrap_or(false),
            latency_seconds: latency.unwrap_or(0.0),
        }),
        final_verdict: Some(verdict.map(|v| Verdict::classify(&v)).unwrap_or(Verdict::Unknown)),
        report: None,
        report_method: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_audit_block() {
        let text = concat!(
            "Claim: Does X\nPricing visible: No\nAI Retrieval: Success\n",
            "Latency: ~3.2 seconds\nFinal Verdict: WORKS"
        );
        let outcome = parse(text).unwrap();

        assert_eq!(outcome.kind, OutcomeKind::Structured);
        assert_eq!(outcome.claim.as_deref(), Some("Does X"));
        assert_eq!(outcome.pricing_visible, Some(false));
        assert_eq!(
            outcome.ai_retrieval,
            Some(AiRetrieval {
                success: true,
                latency_seconds: 3.2
            })
        );
        assert_eq!(outcome.final_verdict, Some(Verdict::Works));
        assert_eq!(outcome.output, text);
    }

    #[test]
    fn test_case_insensitive_and_first_match_wins() {
        let text = "intro line\n  FINAL VERDICT: broken\nfinal verdict: WORKS\nclaim:   trims it  ";
        let outcome = parse(text).unwrap();
        assert_eq!(outcome.final_verdict, Some(Verdict::Broken));
        assert_eq!(outcome.claim.as_deref(), Some("trims it"));
        assert_eq!(outcome.pricing_visible, Some(false));
        assert_eq!(outcome.ai_retrieval.unwrap().latency_seconds, 0.0);
    }

    #[test]
    fn test_label_must_start_the_line() {
        assert!(parse("The Claim: is mid-line").is_none());
        assert!(parse("no labels at all").is_none());
    }

    #[test]
    fn test_crlf_and_missing_labels_use_defaults() {
        let outcome =
            parse("Pricing visible: Yes, on /pricing\r\nLatency: 12 seconds\r\n").unwrap();
        assert_eq!(outcome.pricing_visible, Some(true));
        assert_eq!(outcome.claim.as_deref(), Some("Unknown"));
        assert_eq!(outcome.ai_retrieval.unwrap().latency_seconds, 12.0);
        assert_eq!(outcome.final_verdict, Some(Verdict::Unknown));
    }
}
