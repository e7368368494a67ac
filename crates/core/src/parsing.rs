//! Pulls structured payloads out of free-form model output.

use crate::error::ScoringError;
use crate::interview::Question;
use serde_json::Value;

/// The structured part of one scoring call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredAnswer {
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub score: u8,
    pub tips: String,
}

/// Text from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    extract_between(text, '{', '}')
}

/// Text from the first `[` to the last `]`.
pub fn extract_json_array(text: &str) -> Option<&str> {
    extract_between(text, '[', ']')
}

fn extract_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_feedback(raw: &str) -> Result<ScoredAnswer, ScoringError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| ScoringError::Malformed("no JSON object in scoring output".to_string()))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| ScoringError::Malformed(format!("invalid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| ScoringError::Malformed("expected a JSON object".to_string()))?;

    let score = object
        .get("score")
        .ok_or_else(|| ScoringError::Malformed("missing score".to_string()))
        .and_then(parse_score)?;

    Ok(ScoredAnswer {
        strengths: string_list(object.get("strengths")),
        improvements: string_list(object.get("improvements")),
        score,
        tips: match object.get("tips") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(text_of)
                .collect::<Vec<_>>()
                .join(" "),
            Some(other) => text_of(other).unwrap_or_default(),
            None => String::new(),
        },
    })
}

fn parse_score(value: &Value) -> Result<u8, ScoringError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ScoringError::Malformed(format!("score is not a number: {value}")))?;

    if number.fract() != 0.0 || !(1.0..=10.0).contains(&number) {
        return Err(ScoringError::Malformed(format!(
            "score must be an integer from 1 to 10, got {number}"
        )));
    }
    Ok(number as u8)
}

/// Accepts a list of strings or a single string.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(text_of).collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_questions(raw: &str) -> anyhow::Result<Vec<Question>> {
    let json = extract_json_array(raw).ok_or_else(|| anyhow::anyhow!("No JSON found in response"))?;
    let questions: Vec<Question> = serde_json::from_str(json)?;
    if questions.is_empty() {
        anyhow::bail!("Generated question list is empty");
    }
    Ok(questions)
}
