// src/tools/parser.rs
//! Incremental tool call extraction.
//!
//! Content is fed in generation order. Text that cannot be part of a tool call
//! is handed back right away; text that may still turn into one (a partial
//! prefix, or a JSON value that is not closed yet) is held until it resolves.

use super::json::parse_json_tool_calls;
use super::{ToolCall, ToolCallFormat, ToolParseError};
use crate::utils::suffix_overlap;
use std::mem;

/// Outcome of looking for the tool prefix in the buffer.
enum PrefixScan {
    /// Decode the buffer from this byte offset
    Decode(usize),
    /// The prefix starts later in the buffer: emit the text before it, then
    /// decode what follows the prefix
    Split(String),
    /// Emit this text as content and wait for more
    Hold(String),
}

/// Per-sequence tool call extractor.
#[derive(Debug, Clone)]
pub struct ToolCallParser {
    format: ToolCallFormat,
    greedy_parse: bool,
    prefix_found: bool,
    /// A call was just decoded and its closing marker may still follow
    awaiting_suffix: bool,
    buffer: String,
    index: usize,
    max_buffer: Option<usize>,
    done: bool,
}

impl ToolCallParser {
    pub fn new(format: ToolCallFormat) -> Self {
        Self {
            format,
            greedy_parse: true,
            prefix_found: false,
            awaiting_suffix: false,
            buffer: String::new(),
            index: 0,
            max_buffer: None,
            done: false,
        }
    }

    /// Keep trying to decode JSON before the prefix has been seen.
    pub fn with_greedy_parse(mut self, greedy_parse: bool) -> Self {
        self.greedy_parse = greedy_parse;
        self
    }

    /// Release held text as content once the buffer grows past `max_buffer` bytes.
    pub fn with_max_buffer(mut self, max_buffer: Option<usize>) -> Self {
        self.max_buffer = max_buffer;
        self
    }

    /// Terminal: all further input is passed through as content.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Drop the closing marker of the previous call from the front of the
    /// buffer. Returns `true` while the buffer may still be that marker.
    fn strip_suffix(&mut self) -> bool {
        let suffix = self.format.suffix.as_str();
        let trimmed = self.buffer.trim_start();
        if let Some(rest) = trimmed.strip_prefix(suffix) {
            let consumed = self.buffer.len() - rest.len();
            self.buffer.replace_range(..consumed, "");
            self.awaiting_suffix = false;
            return false;
        }
        if suffix.starts_with(trimmed) {
            return true;
        }
        self.awaiting_suffix = false;
        false
    }

    fn scan_prefix(&mut self) -> PrefixScan {
        let prefix = self.format.prefix.as_str();
        if prefix.is_empty() {
            return PrefixScan::Decode(0);
        }
        if self.buffer.starts_with(prefix) {
            if !self.prefix_found {
                tracing::debug!("tool call prefix {:?} detected", prefix);
            }
            self.prefix_found = true;
            return PrefixScan::Decode(prefix.len());
        }
        // a complete prefix later on wins over a partial one at the end
        if let Some(idx) = self.buffer.find(prefix) {
            if !self.prefix_found {
                tracing::debug!("tool call prefix {:?} detected", prefix);
            }
            self.prefix_found = true;
            let rest = self.buffer.split_off(idx);
            return PrefixScan::Split(mem::replace(&mut self.buffer, rest));
        }
        let overlap = suffix_overlap(&self.buffer, prefix);
        if overlap > 0 {
            let tail = self.buffer.split_off(self.buffer.len() - overlap);
            return PrefixScan::Hold(mem::replace(&mut self.buffer, tail));
        }
        PrefixScan::Decode(0)
    }

    /// Feed the next content fragment.
    ///
    /// Returns decoded calls and the content that is definitely not part of a
    /// call. `AccumulateMore` means nothing can be emitted yet;
    /// `PrefixNotFound` carries held text that the caller should emit as
    /// content.
    pub fn add(&mut self, text: &str) -> Result<(Vec<ToolCall>, String), ToolParseError> {
        if self.done {
            return Ok((Vec::new(), text.to_string()));
        }
        if text.is_empty() {
            return Err(ToolParseError::AccumulateMore);
        }
        self.buffer.push_str(text);

        if let Some(max) = self.max_buffer {
            if self.buffer.len() > max {
                tracing::warn!(
                    "tool call buffer exceeded {} bytes, releasing as content",
                    max
                );
                self.done = true;
                return Ok((Vec::new(), mem::take(&mut self.buffer)));
            }
        }

        if self.awaiting_suffix && self.strip_suffix() {
            return Err(ToolParseError::AccumulateMore);
        }
        if self.buffer.is_empty() {
            return Err(ToolParseError::AccumulateMore);
        }

        let (content, start) = match self.scan_prefix() {
            PrefixScan::Decode(start) => (String::new(), start),
            PrefixScan::Split(content) => (content, self.format.prefix.len()),
            PrefixScan::Hold(content) if !content.is_empty() => {
                return Ok((Vec::new(), content));
            }
            PrefixScan::Hold(_) => return Err(ToolParseError::AccumulateMore),
        };

        if !self.greedy_parse && !self.prefix_found {
            return Err(ToolParseError::PrefixNotFound(mem::take(&mut self.buffer)));
        }

        match self.decode(start) {
            Ok((calls, text)) => Ok((calls, content + &text)),
            Err(ToolParseError::AccumulateMore) if !content.is_empty() => Ok((Vec::new(), content)),
            Err(e) => Err(e),
        }
    }

    fn decode(&mut self, start: usize) -> Result<(Vec<ToolCall>, String), ToolParseError> {
        let decoded = parse_json_tool_calls(
            &self.buffer[start..],
            &self.format.name_field,
            &self.format.arguments_field,
        );
        match decoded {
            Err(ToolParseError::AccumulateMore) => Err(ToolParseError::AccumulateMore),
            Err(e) => {
                let text = mem::take(&mut self.buffer);
                self.greedy_parse = false;
                if self.format.prefix.is_empty() {
                    self.done = true;
                }
                if self.prefix_found {
                    tracing::warn!("dropping malformed tool call ({}): {:?}", e, text);
                    return Err(ToolParseError::AccumulateMore);
                }
                tracing::debug!("content is not a tool call ({}), extraction now needs the prefix", e);
                Ok((Vec::new(), text))
            }
            Ok(functions) => {
                let calls: Vec<ToolCall> = functions
                    .into_iter()
                    .map(|function| {
                        let call = ToolCall::new(self.index, function);
                        self.index += 1;
                        call
                    })
                    .collect();
                tracing::debug!(
                    "decoded {} tool call(s): {:?}",
                    calls.len(),
                    calls.iter().map(|c| &c.function.name).collect::<Vec<_>>()
                );
                self.buffer.clear();
                self.awaiting_suffix = !self.format.suffix.is_empty();
                if self.format.prefix.is_empty() {
                    self.done = true;
                }
                Ok((calls, String::new()))
            }
        }
    }

    /// Release whatever is still held as plain content at end of stream.
    ///
    /// A dangling closing marker of the last call is dropped.
    pub fn finish(&mut self) -> String {
        let held = mem::take(&mut self.buffer);
        if self.awaiting_suffix && self.format.suffix.starts_with(held.trim()) {
            return String::new();
        }
        held
    }
}
