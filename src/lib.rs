//! Streaming reclassification of model output.
//!
//! Decoded text from a generation sequence is split into reasoning
//! ("thinking") text, user-visible content and structured tool calls, with
//! delimiters and tool call formats inferred from the model's chat template.
//! Outgoing records are flushed without ever splitting a UTF-8 character.

pub mod core;
pub mod reasoning;
pub mod server;
pub mod template;
pub mod tools;
pub mod utils;
