// src/server/streaming.rs
use super::{CompletionResponse, PendingResponse, ResponseSequence};
use tokio::sync::{mpsc, watch};

/// Send every pending record of `seq` as valid UTF-8, then clear the queue.
///
/// Bytes of a character that is split across records are carried into the
/// next record. The last record, and the first one flagged done, are trimmed
/// to their valid prefix instead and are always sent, even when empty.
/// Returns `false` as soon as the sink refuses a record.
pub fn flush_pending<S: ResponseSequence + ?Sized>(seq: &mut S) -> bool {
    let pending = seq.pending().to_vec();
    if pending.is_empty() {
        return true;
    }
    let done_index = pending.iter().position(|r| r.done);
    let last = pending.len() - 1;
    let mut carry: Vec<u8> = Vec::new();

    for (i, record) in pending.into_iter().enumerate() {
        let mut bytes = std::mem::take(&mut carry);
        bytes.extend_from_slice(&record.content);
        let valid = match std::str::from_utf8(&bytes) {
            Ok(_) => bytes.len(),
            Err(e) => e.valid_up_to(),
        };

        if valid < bytes.len() {
            if i == last || Some(i) == done_index {
                tracing::debug!(
                    "dropping {} incomplete UTF-8 byte(s) at end of stream",
                    bytes.len() - valid
                );
            } else {
                carry = bytes.split_off(valid);
                if bytes.is_empty() {
                    continue;
                }
            }
        }

        bytes.truncate(valid);
        // everything up to `valid` was checked above
        let content = String::from_utf8(bytes).unwrap_or_default();
        let response = CompletionResponse {
            content,
            done: record.done,
            done_reason: record.done_reason,
        };
        if !seq.send(response) {
            return false;
        }
    }

    seq.clear();
    true
}

/// Whether the queued bytes end on a character boundary, i.e. a flush now
/// would not have to drop a partial character from the last record.
///
/// Invalid bytes that no continuation can repair count as a boundary.
pub fn ends_on_char_boundary(pending: &[PendingResponse]) -> bool {
    let bytes: Vec<u8> = pending
        .iter()
        .flat_map(|r| r.content.iter().copied())
        .collect();
    match std::str::from_utf8(&bytes) {
        Ok(_) => true,
        Err(e) => e.error_len().is_some(),
    }
}

/// A sequence whose flushed records go to a channel.
///
/// Sending stops once the quit signal is raised or the receiver is gone.
pub struct ResponseChannel {
    pending: Vec<PendingResponse>,
    tx: mpsc::UnboundedSender<CompletionResponse>,
    quit: watch::Receiver<bool>,
}

impl ResponseChannel {
    pub fn new(
        tx: mpsc::UnboundedSender<CompletionResponse>,
        quit: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pending: Vec::new(),
            tx,
            quit,
        }
    }

    pub fn push(&mut self, response: PendingResponse) {
        self.pending.push(response);
    }
}

impl ResponseSequence for ResponseChannel {
    fn pending(&self) -> &[PendingResponse] {
        &self.pending
    }

    fn clear(&mut self) {
        self.pending.clear();
    }

    fn send(&mut self, response: CompletionResponse) -> bool {
        if *self.quit.borrow() {
            return false;
        }
        self.tx.send(response).is_ok()
    }
}
