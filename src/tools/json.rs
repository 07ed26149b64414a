// src/tools/json.rs
//! Decoding of JSON tool call payloads.
//!
//! The text handed in is whatever the extractor has buffered after the tool
//! prefix, so it may still be incomplete, may carry prose around the JSON and
//! may hold several calls (an array, or several objects back to back).

use super::{FunctionCall, ToolParseError};
use serde_json::{Map, Value};

/// Slices of the top-level `{...}` / `[...]` values in `text`.
///
/// Quotes are only tracked inside a value so that apostrophes and stray quotes
/// in surrounding prose do not matter.
fn top_level_values(text: &str) -> Result<Vec<&str>, ToolParseError> {
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' | '[' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' | ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or(ToolParseError::InvalidToolCallFormat)?;
                if depth == 0 {
                    if let Some(start) = start.take() {
                        values.push(&text[start..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    if depth > 0 {
        return Err(ToolParseError::AccumulateMore);
    }
    Ok(values)
}

/// Arguments may be an object or a JSON-encoded string holding an object.
fn flexible_arguments(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s).ok()? {
            args @ Value::Object(_) => Some(args),
            _ => None,
        },
        _ => None,
    }
}

fn as_function_call(
    map: &Map<String, Value>,
    name_field: &str,
    arguments_field: &str,
) -> Option<FunctionCall> {
    let name = map.get(name_field)?.as_str()?;
    let arguments = flexible_arguments(map.get(arguments_field)?)?;
    Some(FunctionCall {
        name: name.to_string(),
        arguments,
    })
}

/// Depth-first search for call-shaped objects. Matched objects are not searched further.
fn collect_calls(value: &Value, name_field: &str, arguments_field: &str, out: &mut Vec<FunctionCall>) {
    match value {
        Value::Object(map) => {
            if let Some(call) = as_function_call(map, name_field, arguments_field) {
                out.push(call);
                return;
            }
            for nested in map.values() {
                collect_calls(nested, name_field, arguments_field, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_calls(item, name_field, arguments_field, out);
            }
        }
        _ => {}
    }
}

/// Decode the tool calls held in `text`.
///
/// * `AccumulateMore`: `text` is blank or ends inside an unfinished value.
/// * `InvalidToolCallFormat`: `text` holds no JSON value, has an unmatched
///   closing bracket, or its values contain no call-shaped object.
/// * `Decode`: every value in `text` failed to parse as JSON.
pub fn parse_json_tool_calls(
    text: &str,
    name_field: &str,
    arguments_field: &str,
) -> Result<Vec<FunctionCall>, ToolParseError> {
    if text.trim().is_empty() {
        return Err(ToolParseError::AccumulateMore);
    }
    let values = top_level_values(text)?;
    if values.is_empty() {
        return Err(ToolParseError::InvalidToolCallFormat);
    }

    let mut calls = Vec::new();
    let mut parsed_any = false;
    let mut last_error = None;
    for raw in values {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => {
                parsed_any = true;
                collect_calls(&value, name_field, arguments_field, &mut calls);
            }
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    if !calls.is_empty() {
        return Ok(calls);
    }
    match (parsed_any, last_error) {
        (false, Some(err)) => Err(ToolParseError::Decode(err)),
        _ => Err(ToolParseError::InvalidToolCallFormat),
    }
}
