//! Recovering the structured report from a free-text model reply
//!
//! Candidates are tried in this order, the first one that parses wins:
//! 1. a ```` ```json ```` fenced block, closed by the first fence after it,
//!    then by the last fence in the reply
//! 2. the whole reply as bare JSON
//! 3. the first balanced `{...}` substring, skipping braces inside strings

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// The four sections of a generated report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedReport {
    pub summary: String,
    pub findings: String,
    pub impression: String,
    pub recommendations: String,
}

impl GeneratedReport {
    /// Build a report from a parsed JSON object
    ///
    /// Returns `None` when the value is not an object or carries none of the
    /// report sections. Non-string section values are flattened to text.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        let summary = section(object, &["summary"]);
        let findings = section(object, &["findings", "keyFindings", "key_findings"]);
        let impression = section(object, &["impression"]);
        let recommendations = section(object, &["recommendations"]);

        if summary.is_none() && findings.is_none() && impression.is_none() && recommendations.is_none()
        {
            return None;
        }

        Some(Self {
            summary: summary.unwrap_or_default(),
            findings: findings.unwrap_or_default(),
            impression: impression.unwrap_or_default(),
            recommendations: recommendations.unwrap_or_default(),
        })
    }
}

fn section(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| object.get(*key))
        .map(flatten_text)
}

fn flatten_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(flatten_text)
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Extract a [`GeneratedReport`] from the model's reply
pub fn extract_report(reply: &str) -> Result<GeneratedReport> {
    let mut last_error = String::from("no JSON object found in reply");

    let mut attempt = |candidate: &str, source: &str| -> Option<GeneratedReport> {
        match serde_json::from_str::<Value>(candidate.trim()) {
            Ok(value) => match GeneratedReport::from_value(&value) {
                Some(report) => {
                    debug!("Report extracted from {}", source);
                    Some(report)
                }
                None => {
                    last_error = format!("{}: JSON does not contain report sections", source);
                    None
                }
            },
            Err(e) => {
                last_error = format!("{}: {}", source, e);
                None
            }
        }
    };

    for candidate in fenced_candidates(reply) {
        if let Some(report) = attempt(candidate, "fenced block") {
            return Ok(report);
        }
    }

    if let Some(report) = attempt(reply, "bare reply") {
        return Ok(report);
    }

    let mut from = 0;
    while let Some((start, end)) = balanced_object(reply, from) {
        if let Some(report) = attempt(&reply[start..end], "embedded object") {
            return Ok(report);
        }
        from = start + 1;
    }

    Err(Error::ReportParse {
        detail: last_error,
        raw_len: reply.len(),
    })
}

/// Bodies of the ```` ```json ```` block: first closing fence, then last
fn fenced_candidates(reply: &str) -> Vec<&str> {
    let Some(open) = reply.find(JSON_FENCE) else {
        return Vec::new();
    };
    let body_start = open + JSON_FENCE.len();
    let body = &reply[body_start..];

    let mut candidates = Vec::with_capacity(2);
    if let Some(first) = body.find(FENCE) {
        candidates.push(&body[..first]);
        if let Some(last) = body.rfind(FENCE) {
            if last != first {
                candidates.push(&body[..last]);
            }
        }
    }
    candidates
}

/// Byte range of the first balanced `{...}` starting at or after `from`
fn balanced_object(text: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut start = from;

    loop {
        start += text.get(start..)?.find('{')?;

        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some((start, start + offset + 1));
                    }
                }
                _ => {}
            }
        }

        // Unterminated; try the next opening brace
        start += 1;
    }
}
