// src/reasoning/mod.rs
//! Incremental separation of reasoning ("thinking") text from regular content.
//!
//! The parser is fed decoded text fragments in generation order and returns,
//! per call, the thinking text and the regular content that are already
//! unambiguous. Anything that could still turn out to be part of a delimiter
//! tag is held back until more text arrives (or the stream finishes).

pub mod tags;

use crate::utils::{split_once_at, suffix_overlap};
use std::fmt;

pub use tags::infer_thinking_tags;

/// Opening/closing delimiters that bracket thinking output.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ThinkingTags {
    pub opening: String,
    pub closing: String,
}

impl ThinkingTags {
    pub fn new(opening: impl Into<String>, closing: impl Into<String>) -> Self {
        Self {
            opening: opening.into(),
            closing: closing.into(),
        }
    }

    /// The pair used by most reasoning models.
    pub fn think() -> Self {
        Self::new("<think>", "</think>")
    }

    /// Thinking is disabled unless both tags are known.
    pub fn is_empty(&self) -> bool {
        self.opening.is_empty() || self.closing.is_empty()
    }
}

/// Parse phase of a single sequence. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThinkingState {
    /// Only whitespace (or a partial opening tag) seen so far
    LookingForOpening,
    /// Inside the thinking block, waiting for the closing tag
    Thinking,
    /// Closing tag seen; swallowing whitespace before the real content
    ThinkingDoneEatingWhitespace,
    /// Terminal: everything else is regular content
    ThinkingDone,
}

impl fmt::Display for ThinkingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThinkingState::LookingForOpening => write!(f, "LookingForOpening"),
            ThinkingState::Thinking => write!(f, "Thinking"),
            ThinkingState::ThinkingDoneEatingWhitespace => {
                write!(f, "ThinkingDoneEatingWhitespace")
            }
            ThinkingState::ThinkingDone => write!(f, "ThinkingDone"),
        }
    }
}

/// Outcome of a single state evaluation.
struct Step {
    thinking: String,
    content: String,
    /// Evaluate again: the state changed and the buffer still needs a look
    again: bool,
}

impl Step {
    fn wait() -> Self {
        Self {
            thinking: String::new(),
            content: String::new(),
            again: false,
        }
    }
}

/// Streaming segmenter for one generation sequence.
#[derive(Debug, Clone)]
pub struct ThinkingParser {
    state: ThinkingState,
    tags: ThinkingTags,
    buffer: String,
}

impl ThinkingParser {
    /// Empty tags disable the thinking phase: all input is passed through as content.
    pub fn new(tags: ThinkingTags) -> Self {
        let state = if tags.is_empty() {
            ThinkingState::ThinkingDone
        } else {
            ThinkingState::LookingForOpening
        };
        Self {
            state,
            tags,
            buffer: String::new(),
        }
    }

    pub fn state(&self) -> ThinkingState {
        self.state
    }

    /// Text received but not yet classified.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Feed the next fragment. Returns `(thinking, content)` that can be emitted now.
    pub fn add_content(&mut self, content: &str) -> (String, String) {
        if self.state == ThinkingState::ThinkingDone && self.buffer.is_empty() {
            return (String::new(), content.to_string());
        }
        self.buffer.push_str(content);

        let mut thinking = String::new();
        let mut regular = String::new();
        // a single fragment may cross several states; never make the caller
        // wait for text that is already unambiguous
        loop {
            let step = self.step();
            thinking.push_str(&step.thinking);
            regular.push_str(&step.content);
            if !step.again {
                break;
            }
        }
        (thinking, regular)
    }

    /// End of stream: release whatever is still held and go terminal.
    ///
    /// A partial opening tag (or leading whitespace) becomes content, a partial
    /// closing tag stays thinking text.
    pub fn finish(&mut self) -> (String, String) {
        let held = std::mem::take(&mut self.buffer);
        let prev = self.state;
        self.state = ThinkingState::ThinkingDone;
        match prev {
            ThinkingState::Thinking => (held, String::new()),
            ThinkingState::ThinkingDoneEatingWhitespace => (String::new(), String::new()),
            ThinkingState::LookingForOpening | ThinkingState::ThinkingDone => {
                (String::new(), held)
            }
        }
    }

    fn transition(&mut self, next: ThinkingState) {
        debug_assert!(next >= self.state, "thinking state moved backwards");
        if next != self.state {
            tracing::debug!("thinking parser: {} -> {}", self.state, next);
        }
        self.state = next;
    }

    fn step(&mut self) -> Step {
        match self.state {
            ThinkingState::LookingForOpening => {
                let trimmed = self.buffer.trim_start();
                if let Some(after) = trimmed.strip_prefix(self.tags.opening.as_str()) {
                    // the remainder may already hold the closing tag; let the
                    // Thinking rule decide instead of emitting it here
                    self.buffer = after.trim_start().to_string();
                    self.transition(ThinkingState::Thinking);
                    Step {
                        again: true,
                        ..Step::wait()
                    }
                } else if trimmed.is_empty() || self.tags.opening.starts_with(trimmed) {
                    Step::wait()
                } else {
                    // no opening tag: thinking was skipped. Emit the untrimmed
                    // text, real content keeps its leading whitespace.
                    self.transition(ThinkingState::ThinkingDone);
                    Step {
                        content: std::mem::take(&mut self.buffer),
                        ..Step::wait()
                    }
                }
            }
            ThinkingState::Thinking => {
                if let Some((thinking, rest)) = split_once_at(&self.buffer, &self.tags.closing) {
                    let thinking = thinking.to_string();
                    let rest = rest.trim_start().to_string();
                    self.buffer.clear();
                    if rest.is_empty() {
                        self.transition(ThinkingState::ThinkingDoneEatingWhitespace);
                    } else {
                        self.transition(ThinkingState::ThinkingDone);
                    }
                    tracing::debug!("thinking block closed ({} bytes pending)", rest.len());
                    Step {
                        thinking,
                        content: rest,
                        again: false,
                    }
                } else {
                    let overlap = suffix_overlap(&self.buffer, &self.tags.closing);
                    // hold back a candidate closing tag until it is disambiguated
                    let held = self.buffer.split_off(self.buffer.len() - overlap);
                    let thinking = std::mem::replace(&mut self.buffer, held);
                    Step {
                        thinking,
                        ..Step::wait()
                    }
                }
            }
            ThinkingState::ThinkingDoneEatingWhitespace => {
                let trimmed = self.buffer.trim_start().to_string();
                self.buffer.clear();
                if !trimmed.is_empty() {
                    self.transition(ThinkingState::ThinkingDone);
                }
                Step {
                    content: trimmed,
                    ..Step::wait()
                }
            }
            ThinkingState::ThinkingDone => Step {
                content: std::mem::take(&mut self.buffer),
                ..Step::wait()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ThinkingParser {
        ThinkingParser::new(ThinkingTags::think())
    }

    /// Feeds every fragment, then finishes; returns the concatenated channels.
    fn run(parser: &mut ThinkingParser, fragments: &[&str]) -> (String, String) {
        let mut thinking = String::new();
        let mut content = String::new();
        for fragment in fragments {
            let (t, c) = parser.add_content(fragment);
            thinking.push_str(&t);
            content.push_str(&c);
        }
        let (t, c) = parser.finish();
        thinking.push_str(&t);
        content.push_str(&c);
        (thinking, content)
    }

    #[test]
    fn test_single_fragment() {
        let mut p = parser();
        let (thinking, content) = p.add_content("<think>reasoning</think>answer");
        assert_eq!(thinking, "reasoning");
        assert_eq!(content, "answer");
        assert_eq!(p.state(), ThinkingState::ThinkingDone);
    }

    #[test]
    fn test_split_opening_and_closing_tags() {
        let mut p = parser();
        assert_eq!(p.add_content("<thi"), (String::new(), String::new()));
        assert_eq!(p.state(), ThinkingState::LookingForOpening);

        let (thinking, content) = p.add_content("nk>partial reason");
        assert_eq!(thinking, "partial reason");
        assert_eq!(content, "");
        assert_eq!(p.state(), ThinkingState::Thinking);

        let (thinking, content) = p.add_content("ing</think> done");
        assert_eq!(thinking, "ing");
        assert_eq!(content, "done");
        assert_eq!(p.state(), ThinkingState::ThinkingDone);
    }

    #[test]
    fn test_no_opening_tag() {
        let mut p = parser();
        let (thinking, content) = p.add_content("just text");
        assert_eq!(thinking, "");
        assert_eq!(content, "just text");
        assert_eq!(p.state(), ThinkingState::ThinkingDone);
    }

    #[test]
    fn test_untagged_content_keeps_leading_whitespace() {
        let mut p = parser();
        assert_eq!(p.add_content("  \n"), (String::new(), String::new()));
        let (_, content) = p.add_content("  hello");
        assert_eq!(content, "  \n  hello");
    }

    #[test]
    fn test_whitespace_before_opening_tag_is_dropped() {
        let mut p = parser();
        let (thinking, content) = run(&mut p, &["\n\n", "<think>", "abc", "</think>", "xyz"]);
        assert_eq!(thinking, "abc");
        assert_eq!(content, "xyz");
    }

    #[test]
    fn test_closing_tag_overlap_is_held() {
        let mut p = parser();
        let (thinking, _) = p.add_content("<think>abc</th");
        assert_eq!(thinking, "abc");
        assert_eq!(p.buffered(), "</th");

        // false alarm: the held text was thinking after all
        let (thinking, content) = p.add_content("ought");
        assert_eq!(thinking, "</thought");
        assert_eq!(content, "");
        assert_eq!(p.state(), ThinkingState::Thinking);
    }

    #[test]
    fn test_overlap_bound_while_thinking() {
        let tags = ThinkingTags::think();
        let mut p = ThinkingParser::new(tags.clone());
        p.add_content("<think>");
        for piece in ["a", "<", "/", "t", "h", "i", "n", "k", "x", "<", "/th"] {
            p.add_content(piece);
            assert!(p.buffered().len() < tags.closing.len());
        }
    }

    #[test]
    fn test_whitespace_after_closing_tag_is_eaten() {
        let mut p = parser();
        let (thinking, content) = p.add_content("<think>abc</think>");
        assert_eq!((thinking.as_str(), content.as_str()), ("abc", ""));
        assert_eq!(p.state(), ThinkingState::ThinkingDoneEatingWhitespace);

        assert_eq!(p.add_content("\n\n "), (String::new(), String::new()));
        assert_eq!(p.state(), ThinkingState::ThinkingDoneEatingWhitespace);

        let (_, content) = p.add_content("  answer  ");
        assert_eq!(content, "answer  ");
        assert_eq!(p.state(), ThinkingState::ThinkingDone);

        // terminal: whitespace is no longer touched, tags are plain text
        let (thinking, content) = p.add_content(" <think>x</think>");
        assert_eq!(thinking, "");
        assert_eq!(content, " <think>x</think>");
    }

    #[test]
    fn test_empty_tags_disable_thinking() {
        let mut p = ThinkingParser::new(ThinkingTags::default());
        assert_eq!(p.state(), ThinkingState::ThinkingDone);
        let (thinking, content) = p.add_content("<think>abc</think>");
        assert_eq!(thinking, "");
        assert_eq!(content, "<think>abc</think>");

        let p = ThinkingParser::new(ThinkingTags::new("<think>", ""));
        assert_eq!(p.state(), ThinkingState::ThinkingDone);
    }

    #[test]
    fn test_custom_tags() {
        let mut p = ThinkingParser::new(ThinkingTags::new("[THINK]", "[/THINK]"));
        let (thinking, content) = run(&mut p, &["[TH", "INK]plan", " it[/", "THINK]", " go"]);
        assert_eq!(thinking, "plan it");
        assert_eq!(content, "go");
    }

    #[test]
    fn test_finish_releases_held_text() {
        let mut p = parser();
        p.add_content("<thi");
        assert_eq!(p.finish(), (String::new(), "<thi".to_string()));
        assert_eq!(p.state(), ThinkingState::ThinkingDone);

        let mut p = parser();
        let (thinking, _) = p.add_content("<think>unfinished </thi");
        assert_eq!(thinking, "unfinished ");
        assert_eq!(p.finish(), ("</thi".to_string(), String::new()));
    }

    #[test]
    fn test_no_content_loss_for_every_split() {
        let input = "  <think>\nstep one </th then</think>\n\n final answer";
        for i in 0..=input.len() {
            for j in i..=input.len() {
                let mut p = parser();
                let (thinking, content) = run(&mut p, &[&input[..i], &input[i..j], &input[j..]]);
                // the newline after the opening tag is only trimmed when it
                // arrives together with the tag
                assert_eq!(thinking.trim_start(), "step one </th then", "split at {i}/{j}");
                assert_eq!(content, "final answer", "split at {i}/{j}");
            }
        }
    }

    #[test]
    fn test_state_is_monotonic() {
        let mut p = parser();
        let mut last = p.state();
        for piece in "<think>a</think> b <think>c</think>".split_inclusive('>') {
            p.add_content(piece);
            assert!(p.state() >= last);
            last = p.state();
        }
        assert_eq!(last, ThinkingState::ThinkingDone);
    }

    #[test]
    fn test_multibyte_content() {
        let mut p = parser();
        let (thinking, content) = run(&mut p, &["<think>思考", "中</thi", "nk>答案😀"]);
        assert_eq!(thinking, "思考中");
        assert_eq!(content, "答案😀");
    }
}
