// src/utils/config.rs
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

/// Per-deployment switches for output parsing.
///
/// Unset tag/format fields are inferred from the chat template.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
    /// Separate thinking text from content
    #[serde(default = "default_true")]
    pub think: bool,
    #[serde(default)]
    pub opening_tag: Option<String>,
    #[serde(default)]
    pub closing_tag: Option<String>,
    /// Extract tool calls from content
    #[serde(default = "default_true")]
    pub tools: bool,
    #[serde(default)]
    pub tool_prefix: Option<String>,
    #[serde(default)]
    pub tool_name_field: Option<String>,
    #[serde(default)]
    pub tool_arguments_field: Option<String>,
    #[serde(default)]
    pub tool_suffix: Option<String>,
    #[serde(default = "default_true")]
    pub greedy_parse: bool,
    /// Bytes the tool call extractor may hold before giving up
    #[serde(default)]
    pub max_tool_buffer: Option<usize>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            think: true,
            opening_tag: None,
            closing_tag: None,
            tools: true,
            tool_prefix: None,
            tool_name_field: None,
            tool_arguments_field: None,
            tool_suffix: None,
            greedy_parse: true,
            max_tool_buffer: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {0}")]
    Read(String, #[source] std::io::Error),
    #[error("invalid config {0}")]
    Parse(String, #[source] serde_json::Error),
}

impl ParserConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(path.display().to_string(), e))
    }
}
