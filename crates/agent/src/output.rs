//! Parsing of the model's final answer into a key/value mapping, and of
//! raw tool-call arguments.

use serde_json::{Map, Value};

/// Key used when the final text is not structured data.
pub const DEFAULT_OUTPUT_KEY: &str = "response";

/// Parse the final confirmed text.
///
/// Tries, in order: the whole text as a JSON object, the first fenced code
/// block as a JSON object, and finally wraps the entire text under
/// [`DEFAULT_OUTPUT_KEY`].
pub fn parse_final_output(text: &str) -> Map<String, Value> {
    if let Some(map) = parse_object(text.trim()) {
        return map;
    }
    if let Some(map) = fenced_block(text).and_then(parse_object) {
        return map;
    }
    let mut map = Map::new();
    map.insert(DEFAULT_OUTPUT_KEY.to_string(), Value::String(text.to_string()));
    map
}

/// Parse raw tool arguments.
///
/// Blank payloads mean "no arguments". Anything else must be a JSON object.
pub fn parse_arguments(raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        )),
        Err(e) => Err(format!("malformed JSON: {e}")),
    }
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Body of the first ``` fenced block, with an optional language tag stripped.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
