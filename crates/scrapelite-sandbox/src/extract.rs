//! Structured result recovery from script stdout.
//!
//! Scripts return data by printing JSON between two sentinel lines. When the
//! sentinels are missing (or their content does not parse), the first stdout
//! line that is a complete JSON object is used instead. That fallback can pick
//! up unrelated diagnostic JSON; it is kept because existing scripts rely on it.

use serde_json::Value;

pub const RESULTS_START: &str = "=== EXECUTION_RESULTS_START ===";
pub const RESULTS_END: &str = "=== EXECUTION_RESULTS_END ===";

/// Which strategy produced the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    Sentinels,
    JsonLine,
}

/// Payload recovered from stdout.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPayload {
    /// Records, from the payload's `data` array (or the payload itself when it is an array).
    pub data: Vec<Value>,
    /// `totalFound` as reported by the script; informational only.
    pub reported_total: Option<u64>,
    pub source: ExtractionSource,
}

impl ExtractedPayload {
    /// `None` for values that carry no payload: empty objects and arrays,
    /// and anything that is neither.
    fn from_value(value: Value, source: ExtractionSource) -> Option<Self> {
        let (data, reported_total) = match value {
            Value::Array(items) if !items.is_empty() => (items, None),
            Value::Object(mut map) if !map.is_empty() => {
                let reported_total = map.get("totalFound").and_then(Value::as_u64);
                let data = match map.remove("data") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                (data, reported_total)
            }
            _ => return None,
        };
        Some(Self {
            data,
            reported_total,
            source,
        })
    }
}

fn between_sentinels(stdout: &str) -> Option<Value> {
    let start = stdout.find(RESULTS_START)? + RESULTS_START.len();
    let end = start + stdout[start..].find(RESULTS_END)?;
    match serde_json::from_str(stdout[start..end].trim()) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Sentinel payload is not valid JSON: {}", e);
            None
        }
    }
}

fn first_json_lines(stdout: &str) -> impl Iterator<Item = Value> + '_ {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{') && line.ends_with('}'))
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
}

/// Recover the structured payload, or `None` when the script printed none.
pub fn extract_result(stdout: &str) -> Option<ExtractedPayload> {
    if let Some(payload) = between_sentinels(stdout)
        .and_then(|value| ExtractedPayload::from_value(value, ExtractionSource::Sentinels))
    {
        return Some(payload);
    }
    let payload = first_json_lines(stdout)
        .find_map(|value| ExtractedPayload::from_value(value, ExtractionSource::JsonLine))?;
    tracing::debug!("No sentinel payload, using first JSON line");
    Some(payload)
}
