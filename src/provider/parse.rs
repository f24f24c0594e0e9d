//! Model output → JSON array.
//!
//! Even when told "output only the JSON array", vision models wrap answers in
//! ```` ```json ```` fences, prefix them with a sentence, or occasionally
//! return nothing parseable at all. Two strategies live here:
//!
//! * [`parse_simple`] — strip one leading/trailing fence and parse.
//! * [`parse_lenient`] — look for an array inside a fenced block first, fall
//!   back to fence stripping, then to the raw text.
//!
//! Both return a [`ParseError`] rather than panicking; the gateway turns that
//! into an empty record set so one bad page never aborts a batch.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Why a model answer could not be read as a JSON array.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("model output is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("model output is JSON but not an array (found {0})")]
    NotAnArray(&'static str),
}

// ── Fence stripping ──────────────────────────────────────────────────────────

static RE_LEADING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```[a-zA-Z]*\n?").unwrap());
static RE_TRAILING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```\s*$").unwrap());

/// Remove one opening fence (with optional language tag) and one closing fence.
pub fn strip_code_fences(text: &str) -> String {
    let s = text.trim();
    let s = RE_LEADING_FENCE.replace(s, "");
    let s = RE_TRAILING_FENCE.replace(&s, "");
    s.trim().to_string()
}

// ── Fenced-array search ──────────────────────────────────────────────────────

static RE_FENCED_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\[.*?\])\s*```").unwrap());

/// The first JSON-array-looking body inside a fenced code block, if any.
pub fn find_fenced_array(text: &str) -> Option<&str> {
    RE_FENCED_ARRAY
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

// ── Parsing ──────────────────────────────────────────────────────────────────

fn parse_array(text: &str) -> Result<Vec<Value>, ParseError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        Value::Object(_) => Err(ParseError::NotAnArray("object")),
        Value::String(_) => Err(ParseError::NotAnArray("string")),
        Value::Number(_) => Err(ParseError::NotAnArray("number")),
        Value::Bool(_) => Err(ParseError::NotAnArray("bool")),
    }
}

/// Strip fences, then parse as an array. A JSON `null` is an empty array.
pub fn parse_simple(text: &str) -> Result<Vec<Value>, ParseError> {
    parse_array(&strip_code_fences(text))
}

/// Fenced-array search → fence stripping → raw text, first success wins.
///
/// The error of the last attempt is returned when all three fail.
pub fn parse_lenient(text: &str) -> Result<Vec<Value>, ParseError> {
    let cleaned = match find_fenced_array(text) {
        Some(body) => body.to_string(),
        None => strip_code_fences(text),
    };
    match parse_array(&cleaned) {
        Ok(items) => Ok(items),
        Err(_) => parse_array(text.trim()),
    }
}
