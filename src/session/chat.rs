//! Chat log bookkeeping
//!
//! Local arrival order is authoritative; the sender's `timestamp` is kept for
//! display only.

use super::info::now_millis;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Author of locally synthesised notifications
pub const SYSTEM_AUTHOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub author: String,
    pub text: String,
    #[serde(default)]
    pub is_system: bool,
    /// Sender's clock, milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: u64,
    /// Local arrival time; assigned on append
    #[serde(skip)]
    pub arrived_at: u64,
}

impl ChatMessage {
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author: author.into(),
            text: text.into(),
            is_system: false,
            timestamp: now_millis(),
            arrived_at: 0,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            is_system: true,
            ..Self::new(SYSTEM_AUTHOR, text)
        }
    }
}

/// Append-only chat log for one session
#[derive(Debug, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    seen: HashSet<String>,
    last_arrival: u64,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, stamping its arrival time.
    ///
    /// Returns the stored copy, or `None` if a message with the same id is already present.
    pub fn append(&mut self, mut message: ChatMessage) -> Option<ChatMessage> {
        if !self.seen.insert(message.id.clone()) {
            return None;
        }
        self.last_arrival = now_millis().max(self.last_arrival);
        message.arrived_at = self.last_arrival;
        self.messages.push(message.clone());
        Some(message)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop every message; only done on teardown
    pub fn clear(&mut self) {
        self.messages.clear();
        self.seen.clear();
    }
}
