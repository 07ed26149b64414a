// src/tools/format.rs
//! Tool call format discovery.
//!
//! Renders an assistant turn holding two sentinel tool calls through the chat
//! template and reads back how the calls were serialized: the marker emitted
//! between the content and the JSON, the marker closing each call, and the
//! JSON keys used for the function name and its arguments.

use crate::utils::chat_template::{ApplyChatTemplateError, ChatTemplate, Message};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const USER: &str = "@@user@@";
const CONTENT: &str = "@@content@@";
const NAME: &str = "@@name@@";
const NEXT_NAME: &str = "@@next@@";
const ARGUMENT: &str = "@@argument@@";
const VALUE: &str = "@@value@@";

/// How a template serializes tool calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFormat {
    /// Marker preceding the JSON payload; empty when the JSON starts right away
    pub prefix: String,
    pub name_field: String,
    pub arguments_field: String,
    /// Marker closing each call, e.g. `</tool_call>`
    #[serde(default)]
    pub suffix: String,
}

impl ToolCallFormat {
    pub fn new(
        prefix: impl Into<String>,
        name_field: impl Into<String>,
        arguments_field: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            name_field: name_field.into(),
            arguments_field: arguments_field.into(),
            suffix: String::new(),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }
}

impl Default for ToolCallFormat {
    fn default() -> Self {
        Self::new("", "name", "arguments")
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ToolFormatError {
    #[error(transparent)]
    Render(#[from] ApplyChatTemplateError),
    #[error("template does not render assistant content")]
    MissingContent,
    #[error("template does not render tool calls")]
    MissingToolCall,
    #[error("rendered tool call is not JSON")]
    MissingJson,
    #[error("rendered tool call has no name/arguments fields")]
    MissingFields,
}

fn sentinel_call(id: &str, name: &str) -> Value {
    let arguments = json!({ ARGUMENT: VALUE });
    json!({
        "id": id,
        "type": "function",
        "name": name,
        "arguments": arguments,
        "function": { "name": name, "arguments": arguments },
    })
}

fn sentinel_messages() -> Vec<Message> {
    let calls = vec![sentinel_call("123456789", NAME), sentinel_call("987654321", NEXT_NAME)];
    vec![
        Message::new("user", USER),
        Message::new("assistant", CONTENT).with_tool_calls(calls),
    ]
}

fn holds_arguments(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.contains_key(ARGUMENT),
        Value::String(s) => s.contains(ARGUMENT),
        _ => false,
    }
}

/// Keys of the first object carrying both the sentinel name and arguments.
fn find_fields(value: &Value) -> Option<(String, String)> {
    match value {
        Value::Object(map) => {
            let name = map.iter().find(|(_, v)| v.as_str() == Some(NAME));
            let arguments = map.iter().find(|(_, v)| holds_arguments(v));
            if let (Some((name, _)), Some((arguments, _))) = (name, arguments) {
                return Some((name.clone(), arguments.clone()));
            }
            map.values().find_map(find_fields)
        }
        Value::Array(items) => items.iter().find_map(find_fields),
        _ => None,
    }
}

/// A JSON value found in the rendered template.
struct JsonSpan {
    start: usize,
    end: usize,
    value: Value,
}

/// Outermost JSON value starting in `rendered[from..to]` that spans past `to`.
fn enclosing_json(rendered: &str, from: usize, to: usize) -> Option<JsonSpan> {
    let mut found = None;
    for (idx, c) in rendered[from..to].char_indices().rev() {
        if c != '{' && c != '[' {
            continue;
        }
        let start = from + idx;
        let mut values = serde_json::Deserializer::from_str(&rendered[start..]).into_iter::<Value>();
        if let Some(Ok(value)) = values.next() {
            let end = start + values.byte_offset();
            if end > to {
                found = Some(JsonSpan { start, end, value });
            }
        }
    }
    found
}

/// Text closing a call: what sits between the first call's JSON and the
/// prefix of the second. Empty when both calls share one JSON value.
fn call_suffix<'r>(rendered: &'r str, first: &JsonSpan, prefix: &str) -> &'r str {
    let Some(next_name) = rendered[first.start..].find(NEXT_NAME).map(|idx| first.start + idx) else {
        return "";
    };
    if next_name < first.end {
        return "";
    }
    let Some(next) = enclosing_json(rendered, first.end, next_name) else {
        return "";
    };
    let gap = &rendered[first.end..next.start];
    let gap = match prefix {
        "" => gap,
        prefix => gap.find(prefix).map_or(gap, |idx| &gap[..idx]),
    };
    gap.trim()
}

/// Derive the tool call prefix and field names used by `template`.
pub fn infer_tool_call_format(template: &ChatTemplate) -> Result<ToolCallFormat, ToolFormatError> {
    let rendered = template.render(&sentinel_messages(), false)?;
    let content_end = rendered
        .find(CONTENT)
        .map(|idx| idx + CONTENT.len())
        .ok_or(ToolFormatError::MissingContent)?;
    let name_start = rendered[content_end..]
        .find(NAME)
        .map(|idx| content_end + idx)
        .ok_or(ToolFormatError::MissingToolCall)?;

    let first =
        enclosing_json(&rendered, content_end, name_start).ok_or(ToolFormatError::MissingJson)?;
    let (name_field, arguments_field) =
        find_fields(&first.value).ok_or(ToolFormatError::MissingFields)?;
    let prefix = rendered[content_end..first.start].trim();
    let suffix = call_suffix(&rendered, &first, prefix);
    let format = ToolCallFormat::new(prefix, name_field, arguments_field).with_suffix(suffix);
    tracing::debug!("inferred tool call format {:?}", format);
    Ok(format)
}
