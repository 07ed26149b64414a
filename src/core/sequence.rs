// src/core/sequence.rs
//! Output parsing pipeline of one generation sequence.
//!
//! Decoded text goes through the thinking segmenter first; only its regular
//! content is offered to the tool call extractor.

use super::profile::TemplateProfile;
use crate::reasoning::{ThinkingParser, ThinkingState};
use crate::tools::{ToolCall, ToolCallParser, ToolParseError};
use crate::utils::config::ParserConfig;
use serde::Serialize;

/// What one fragment resolved into.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedDelta {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub thinking: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ParsedDelta {
    pub fn is_empty(&self) -> bool {
        self.thinking.is_empty() && self.content.is_empty() && self.tool_calls.is_empty()
    }

    /// Append a later delta to this one.
    pub fn append(&mut self, later: ParsedDelta) {
        self.thinking.push_str(&later.thinking);
        self.content.push_str(&later.content);
        self.tool_calls.extend(later.tool_calls);
    }
}

pub struct SequenceParser {
    thinking: Option<ThinkingParser>,
    tools: Option<ToolCallParser>,
}

impl SequenceParser {
    pub fn new(profile: &TemplateProfile, config: &ParserConfig) -> Self {
        let profile = profile.with_overrides(config);
        let thinking = config
            .think
            .then(|| ThinkingParser::new(profile.thinking_tags.clone()));
        let tools = config.tools.then(|| {
            ToolCallParser::new(profile.tool_format.clone())
                .with_greedy_parse(config.greedy_parse)
                .with_max_buffer(config.max_tool_buffer)
        });
        Self { thinking, tools }
    }

    pub fn thinking_state(&self) -> Option<ThinkingState> {
        self.thinking.as_ref().map(ThinkingParser::state)
    }

    /// Feed the next decoded fragment.
    pub fn add(&mut self, text: &str) -> ParsedDelta {
        let (thinking, content) = match self.thinking.as_mut() {
            Some(parser) => parser.add_content(text),
            None => (String::new(), text.to_string()),
        };
        let mut delta = ParsedDelta {
            thinking,
            ..Default::default()
        };
        self.extract(&content, &mut delta);
        delta
    }

    /// End of stream: release everything still held back.
    pub fn finish(&mut self) -> ParsedDelta {
        let (thinking, content) = match self.thinking.as_mut() {
            Some(parser) => parser.finish(),
            None => (String::new(), String::new()),
        };
        let mut delta = ParsedDelta {
            thinking,
            ..Default::default()
        };
        self.extract(&content, &mut delta);
        if let Some(tools) = self.tools.as_mut() {
            delta.content.push_str(&tools.finish());
        }
        delta
    }

    fn extract(&mut self, content: &str, delta: &mut ParsedDelta) {
        let Some(tools) = self.tools.as_mut() else {
            delta.content.push_str(content);
            return;
        };
        if content.is_empty() {
            return;
        }
        match tools.add(content) {
            Ok((calls, text)) => {
                delta.tool_calls.extend(calls);
                delta.content.push_str(&text);
            }
            Err(ToolParseError::PrefixNotFound(text)) => delta.content.push_str(&text),
            Err(e) => tracing::trace!("holding content: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::ThinkingTags;
    use crate::tools::ToolCallFormat;

    fn profile() -> TemplateProfile {
        TemplateProfile {
            thinking_tags: ThinkingTags::think(),
            tool_format: ToolCallFormat::new("<tool_call>", "name", "arguments"),
        }
    }

    fn run(parser: &mut SequenceParser, fragments: &[&str]) -> ParsedDelta {
        let mut deltas: Vec<ParsedDelta> = fragments.iter().map(|f| parser.add(f)).collect();
        deltas.push(parser.finish());
        let mut total = ParsedDelta::default();
        for delta in deltas {
            total.append(delta);
        }
        total
    }

    #[test]
    fn test_thinking_content_and_tool_call() {
        let mut parser = SequenceParser::new(&profile(), &ParserConfig::default());
        let first = parser.add("<think>plan</think>");
        assert_eq!(first.thinking, "plan");
        assert!(first.content.is_empty());
        assert_eq!(
            parser.thinking_state(),
            Some(ThinkingState::ThinkingDoneEatingWhitespace)
        );

        let second = parser.add("\nSure. <tool_call>{\"name\": \"a\",");
        assert_eq!(second.content, "Sure. ");
        assert!(second.tool_calls.is_empty());

        let third = parser.add(" \"arguments\": {\"x\": 1}}");
        assert_eq!(third.tool_calls.len(), 1);
        assert_eq!(third.tool_calls[0].function.name, "a");
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn test_tool_call_closing_tag_stays_hidden() {
        let profile = TemplateProfile {
            thinking_tags: ThinkingTags::think(),
            tool_format: ToolCallFormat::new("<tool_call>", "name", "arguments")
                .with_suffix("</tool_call>"),
        };
        let mut parser = SequenceParser::new(&profile, &ParserConfig::default());
        let total = run(
            &mut parser,
            &[
                "<think>x</think>",
                "<tool_call>",
                "\n{\"name\": \"a\", \"arguments\": {}}",
                "\n",
                "</",
                "tool_call",
                ">",
            ],
        );
        assert_eq!(total.thinking, "x");
        assert_eq!(total.content, "");
        assert_eq!(total.tool_calls.len(), 1);
    }

    #[test]
    fn test_call_in_last_fragment_is_decoded() {
        let mut parser = SequenceParser::new(&profile(), &ParserConfig::default());
        let total = run(
            &mut parser,
            &[
                "<think>x</think>",
                "Checking. <tool_call>{\"name\": \"a\", \"arguments\": {}}",
            ],
        );
        assert_eq!(total.content, "Checking. ");
        assert_eq!(total.tool_calls.len(), 1);
        assert_eq!(total.tool_calls[0].function.name, "a");
    }

    #[test]
    fn test_plain_answer_without_thinking() {
        let mut parser = SequenceParser::new(&profile(), &ParserConfig::default());
        let total = run(&mut parser, &["Hello", " world", "!"]);
        assert_eq!(total.content, "Hello world!");
        assert!(total.thinking.is_empty());
        assert!(total.tool_calls.is_empty());
    }

    #[test]
    fn test_disabled_stages() {
        let config = ParserConfig {
            think: false,
            tools: false,
            ..Default::default()
        };
        let mut parser = SequenceParser::new(&profile(), &config);
        assert_eq!(parser.thinking_state(), None);
        let total = run(&mut parser, &["<think>x</think>", "<tool_call>{}"]);
        assert_eq!(total.content, "<think>x</think><tool_call>{}");
    }

    #[test]
    fn test_finish_releases_partial_tool_call() {
        let mut parser = SequenceParser::new(&profile(), &ParserConfig::default());
        let total = run(&mut parser, &["<think>a</think>ok ", "<tool_call>{\"name\""]);
        assert_eq!(total.thinking, "a");
        assert_eq!(total.content, "ok <tool_call>{\"name\"");
    }

    #[test]
    fn test_unterminated_thinking_is_kept() {
        let mut parser = SequenceParser::new(&profile(), &ParserConfig::default());
        let total = run(&mut parser, &["<think>still going</th"]);
        assert_eq!(total.thinking, "still going</th");
        assert!(total.content.is_empty());
    }

    #[test]
    fn test_config_tag_override() {
        let config = ParserConfig {
            opening_tag: Some("[THINK]".into()),
            closing_tag: Some("[/THINK]".into()),
            ..Default::default()
        };
        let mut parser = SequenceParser::new(&TemplateProfile::default(), &config);
        let total = run(&mut parser, &["[THINK]hm[/THINK]", "done"]);
        assert_eq!(total.thinking, "hm");
        assert_eq!(total.content, "done");
    }

    #[test]
    fn test_delta_serialization_skips_empty_channels() {
        let delta = ParsedDelta {
            content: "hi".into(),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&delta).unwrap(),
            serde_json::json!({"content": "hi"})
        );
    }
}
