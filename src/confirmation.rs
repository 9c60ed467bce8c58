//! Confirmation-code extraction from free-form agent output.
//!
//! Agent output is untrusted text, so extraction never fails: it either finds
//! a code or returns `None`. Rules are tried in order and the first hit wins;
//! labeled patterns come before the bare digit fallback so an unrelated number
//! on the page is only picked up when nothing better exists.
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

/// Which rule produced an extracted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionRule {
    StructuredField,
    ConfirmationLabel,
    ReferenceLabel,
    FilingLabel,
    AgencyPrefixed,
    DigitFallback,
}

/// A normalized confirmation code and how it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedCode {
    pub code: String,
    pub rule: ExtractionRule,
    /// Set when only the generic fallback matched; a human should confirm it.
    pub needs_review: bool,
}

const STRUCTURED_KEYS: &[&str] = &[
    "confirmation_code",
    "confirmation_number",
    "reference_number",
    "complaint_id",
    "report_number",
];

const CODE: &str = r"([A-Za-z0-9][A-Za-z0-9-]*[A-Za-z0-9]|[A-Za-z0-9])";

static LABELED_RULES: LazyLock<Vec<(ExtractionRule, Regex)>> = LazyLock::new(|| {
    vec![
        (
            ExtractionRule::ConfirmationLabel,
            Regex::new(&format!(
                r"(?i)\bconfirmation(?:\s*(?:#|no\.?|number|code|id))?\s*(?:[:#]|\bis\b|\bwas\b)?\s*{CODE}"
            ))
            .expect("regex for confirmation labels"),
        ),
        (
            ExtractionRule::ReferenceLabel,
            Regex::new(&format!(
                r"(?i)\b(?:reference|ref\.?)(?:\s*(?:#|no\.?|number|code|id))?\s*(?:[:#]|\bis\b|\bwas\b)?\s*{CODE}"
            ))
            .expect("regex for reference labels"),
        ),
        (
            ExtractionRule::FilingLabel,
            Regex::new(&format!(
                r"(?i)\b(?:dispute|complaint|report|case|tracking)\s*(?:#|no\.?|number|id)\s*(?:[:#]|\bis\b|\bwas\b)?\s*{CODE}"
            ))
            .expect("regex for filing labels"),
        ),
    ]
});

static AGENCY_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\bFTC\s*(?:report)?\s*(?:#|no\.?|number)?\s*[:#]?\s*(\d{6,12})\b")
            .expect("regex for FTC report numbers"),
        Regex::new(r"\b(\d{6}-\d{7,8})\b").expect("regex for CFPB complaint ids"),
    ]
});

static DIGIT_FALLBACK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{8,})\b").expect("regex for long digit runs"));

/// Extract the most specific confirmation code present in `text`.
pub fn extract(text: &str) -> Option<ExtractedCode> {
    if text.trim().is_empty() {
        return None;
    }
    if let Some(code) = extract_structured(text) {
        return Some(found(code, ExtractionRule::StructuredField));
    }
    for (rule, pattern) in LABELED_RULES.iter() {
        for cap in pattern.captures_iter(text) {
            let token = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
            if let Some(code) = normalize_code(token) {
                return Some(found(code, *rule));
            }
        }
    }
    for pattern in AGENCY_RULES.iter() {
        if let Some(code) = pattern
            .captures(text)
            .and_then(|cap| cap.get(1))
            .and_then(|m| normalize_code(m.as_str()))
        {
            return Some(found(code, ExtractionRule::AgencyPrefixed));
        }
    }
    DIGIT_FALLBACK
        .captures(text)
        .and_then(|cap| cap.get(1))
        .map(|m| ExtractedCode {
            code: m.as_str().to_string(),
            rule: ExtractionRule::DigitFallback,
            needs_review: true,
        })
}

/// Convenience wrapper returning only the code.
pub fn extract_code(text: &str) -> Option<String> {
    extract(text).map(|hit| hit.code)
}

fn found(code: String, rule: ExtractionRule) -> ExtractedCode {
    ExtractedCode {
        code,
        rule,
        needs_review: false,
    }
}

/// Codes must carry at least one digit so labels followed by prose
/// ("Confirmation pending") are not mistaken for codes.
fn normalize_code(token: &str) -> Option<String> {
    let trimmed = token.trim_matches(|ch: char| !ch.is_ascii_alphanumeric());
    if trimmed.len() < 3 || !trimmed.chars().any(|ch| ch.is_ascii_digit()) {
        return None;
    }
    Some(trimmed.to_ascii_uppercase())
}

fn extract_structured(text: &str) -> Option<String> {
    for (idx, ch) in text.char_indices() {
        if ch != '{' {
            continue;
        }
        let mut deserializer = serde_json::Deserializer::from_str(&text[idx..]);
        let Ok(value) = Value::deserialize(&mut deserializer) else {
            continue;
        };
        if let Some(code) = structured_code(&value) {
            return Some(code);
        }
    }
    None
}

fn structured_code(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    for key in STRUCTURED_KEYS {
        let candidate = match object.get(*key) {
            Some(Value::String(text)) => normalize_code(text),
            Some(Value::Number(number)) => normalize_code(&number.to_string()),
            _ => None,
        };
        if candidate.is_some() {
            return candidate;
        }
    }
    None
}
