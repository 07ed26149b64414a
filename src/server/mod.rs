// src/server/mod.rs
//! Response records passed from the model runner to the client channel.
//!
//! The runner queues [`PendingResponse`]s holding raw detokenized bytes; the
//! flusher in [`streaming`] turns them into [`CompletionResponse`]s that are
//! always valid UTF-8.

pub mod streaming;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneReason {
    Stop,
    Length,
    ConnectionClosed,
}

impl fmt::Display for DoneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoneReason::Stop => write!(f, "stop"),
            DoneReason::Length => write!(f, "length"),
            DoneReason::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

/// A queued output fragment; `content` may end inside a multi-byte character.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PendingResponse {
    pub content: Vec<u8>,
    pub done: bool,
    pub done_reason: Option<DoneReason>,
}

impl PendingResponse {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn done(content: impl Into<Vec<u8>>, reason: Option<DoneReason>) -> Self {
        Self {
            content: content.into(),
            done: true,
            done_reason: reason,
        }
    }
}

/// A record as sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<DoneReason>,
}

impl CompletionResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn done(content: impl Into<String>, reason: Option<DoneReason>) -> Self {
        Self {
            content: content.into(),
            done: true,
            done_reason: reason,
        }
    }
}

/// Output side of one generation sequence.
pub trait ResponseSequence {
    /// Records queued since the last flush, in generation order
    fn pending(&self) -> &[PendingResponse];

    fn clear(&mut self);

    /// Deliver one record; `false` asks the producer to stop.
    fn send(&mut self, response: CompletionResponse) -> bool;
}
