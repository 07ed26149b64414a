// src/tools/mod.rs
//! Tool call extraction from streamed model output.
//!
//! The model announces a tool invocation with a template-specific prefix
//! (e.g. `<tool_call>` or `[TOOL_CALLS]`) followed by a JSON payload. The
//! [`parser::ToolCallParser`] watches the content stream for that prefix and
//! hands complete JSON values to [`json::parse_json_tool_calls`].

pub mod format;
pub mod json;
pub mod parser;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use format::{infer_tool_call_format, ToolCallFormat, ToolFormatError};
pub use parser::ToolCallParser;

/// A decoded function invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
}

/// A tool call emitted by a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// Position in the sequence's emission order, starting at 0
    pub index: usize,
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(index: usize, function: FunctionCall) -> Self {
        Self {
            id: generate_tool_call_id(),
            index,
            tool_type: "function".to_string(),
            function,
        }
    }
}

/// Generate a compact tool call ID with required `call_` prefix.
/// Uses 16 hex chars (64 bits) from UUIDv4.
pub fn generate_tool_call_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("call_{}", &raw[..16])
}

/// Control signals and failures of tool call extraction.
///
/// None of these are fatal for the sequence: they tell the caller to either
/// wait for more text or to commit text as plain content.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolParseError {
    /// The buffered text may still become a tool call
    #[error("need to accumulate more content")]
    AccumulateMore,
    /// The sequence will not contain a tool call; carries the held text
    #[error("prefix not found")]
    PrefixNotFound(String),
    #[error("invalid tool call format")]
    InvalidToolCallFormat,
    #[error("failed to decode tool call: {0}")]
    Decode(String),
}
