//! Prompt construction for radiology report generation
//!
//! The caller-supplied documents are loosely typed JSON coming straight from
//! the frontend. Values are rendered the way the frontend expects to see them
//! echoed back (strings verbatim, `True`/`False`/`None` for the JSON
//! literals), and optional patient fields are only included when they carry
//! a value (not null, false, zero or empty).

use crate::error::{Error, Result};
use serde_json::Value;

const OUTPUT_FORMAT: &str =
    "The output MUST be a JSON object with the following keys: \"summary\", \"findings\", \"impression\", \"recommendations\".";
const STRING_VALUES: &str = "Each value should be a string.";

/// Primary condition resolved from the metadata table
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionDetails {
    pub label: String,
    pub description: String,
    /// Upper-cased
    pub severity: String,
}

impl ConditionDetails {
    /// Look up `key` in the conditions metadata
    pub fn lookup(metadata: &Value, key: &str) -> Result<Self> {
        let entry = metadata
            .get(key)
            .ok_or_else(|| Error::KeyError(key.to_string()))?;

        let label = display_value(required(entry, "label")?);
        let description = display_value(required(entry, "description")?);
        let severity = required(entry, "severity")?
            .as_str()
            .ok_or_else(|| Error::Internal(format!("severity of '{}' is not a string", key)))?
            .to_uppercase();

        Ok(Self {
            label,
            description,
            severity,
        })
    }
}

/// Build the generation prompt from the three request documents
pub fn build_prompt(
    analysis_results: &Value,
    patient_info: &Value,
    conditions_metadata: &Value,
) -> Result<String> {
    let condition_key = display_value(required(analysis_results, "condition")?);
    let condition = ConditionDetails::lookup(conditions_metadata, &condition_key)?;

    let mut lines: Vec<String> = vec![
        "Generate a comprehensive medical report for an X-ray analysis.".into(),
        OUTPUT_FORMAT.into(),
        STRING_VALUES.into(),
        String::new(),
        "Patient Information:".into(),
        format!("- ID: {}", display_value(required(patient_info, "id")?)),
    ];

    for (field, title) in [
        ("age", "Age"),
        ("gender", "Gender"),
        ("clinicalHistory", "Clinical History"),
    ] {
        if let Some(value) = present(patient_info, field) {
            lines.push(format!("- {}: {}", title, display_value(value)));
        }
    }

    let confidence = required(analysis_results, "confidence")?
        .as_f64()
        .ok_or_else(|| Error::Internal("confidence is not a number".to_string()))?;

    lines.extend([
        String::new(),
        "Primary AI Analysis Result (MAIN FOCUS of this Report):".into(),
        format!("- Detected Condition: {}", condition.label),
        format!("- Description: {}", condition.description),
        format!("- Confidence Level: {:.1}%", confidence * 100.0),
        format!("- Severity Level: {}", condition.severity),
    ]);

    if let Some(context) = present(analysis_results, "additionalContext") {
        let context = context
            .as_str()
            .ok_or_else(|| Error::Internal("additionalContext is not a string".to_string()))?;
        lines.push("\nSecondary AI-Detected Conditions (for comprehensive overview, but NOT the primary focus of 'Key Findings' or 'Impression'):".into());
        lines.push(context.to_string());
    }

    if present(analysis_results, "noSignificantFinding").is_some() {
        lines.extend([
            "\nIMPORTANT: The AI model detected no significant findings with high confidence. The report should reflect this uncertainty and recommend further human review.".into(),
            "For 'Key Findings', state that no clear abnormalities were identified by AI, but suggest manual review.".into(),
            "For 'Impression', suggest 'No acute cardiopulmonary abnormality detected by AI, but clinical correlation and radiologist review are recommended.'".into(),
            "For 'Recommendations', strongly advise a radiologist's comprehensive review and correlation with clinical history.".into(),
        ]);
    }

    lines.extend([
        String::new(),
        "Generate a comprehensive medical report for an X-ray analysis. The report MUST EXCLUSIVELY focus on the 'Detected Condition' provided as the MAIN FOCUS for the 'Key Findings' and 'Impression' sections.".into(),
        OUTPUT_FORMAT.into(),
        STRING_VALUES.into(),
        format!(
            "For \"Key Findings\", STRICTLY describe only the specific characteristics and anatomical location related to {}. Do NOT include findings for other conditions here.",
            condition.label
        ),
        "For \"Impression\", provide a concise summary, focusing SOLELY on the primary detected condition. Include differential diagnoses if relevant to the primary condition.".into(),
        "For \"Recommendations\", include appropriate follow-up timing and any additional imaging or clinical correlation needed, related to the primary condition.".into(),
    ]);

    Ok(lines.join("\n"))
}

fn required<'a>(doc: &'a Value, key: &str) -> Result<&'a Value> {
    doc.get(key).ok_or_else(|| Error::KeyError(key.to_string()))
}

/// The field's value, if it is set to something other than an empty value
fn present<'a>(doc: &'a Value, key: &str) -> Option<&'a Value> {
    doc.get(key).filter(|v| is_truthy(v))
}

/// Null, false, zero and empty strings/arrays/objects count as unset
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Render a JSON value for inclusion in the prompt
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}
