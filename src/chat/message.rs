//! Room and private message records, plus the capped recent-message ring.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message posted to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Globally unique id.
    pub id: String,
    /// Author identity; used for ownership checks.
    pub username: String,
    /// Name shown to clients; carries the admin marker for admin authors.
    pub display_name: String,
    /// Message body.
    pub text: String,
    /// Author's color at send time.
    pub color: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    /// Id of the message this one replies to.
    pub reply_to: Option<String>,
    /// Whether the text was edited.
    pub edited: bool,
    /// When it was last edited (Unix milliseconds).
    pub edited_at: Option<i64>,
    /// Sent by a SessionAdmin or PrivilegedAdmin.
    pub is_admin: bool,
    /// Produced by a game or oracle command.
    pub is_command_result: bool,
    /// Author's status text at send time.
    pub status_text: Option<String>,
}

impl ChatMessage {
    /// Create a message with a fresh id.
    pub fn new(
        username: impl Into<String>,
        display_name: impl Into<String>,
        text: impl Into<String>,
        color: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: new_message_id(),
            username: username.into(),
            display_name: display_name.into(),
            text: text.into(),
            color: color.into(),
            timestamp,
            reply_to: None,
            edited: false,
            edited_at: None,
            is_admin: false,
            is_command_result: false,
            status_text: None,
        }
    }
}

/// A point-to-point message. Never enters the room ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessage {
    /// Globally unique id.
    pub id: String,
    /// Sending identity.
    pub sender: String,
    /// Receiving identity.
    pub recipient: String,
    /// Message body.
    pub text: String,
    /// Sender's color at send time.
    pub color: String,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl PrivateMessage {
    /// Create a private message with a fresh id.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        text: impl Into<String>,
        color: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: new_message_id(),
            sender: sender.into(),
            recipient: recipient.into(),
            text: text.into(),
            color: color.into(),
            timestamp,
        }
    }

    /// Whether `identity` is the sender or recipient.
    pub fn involves(&self, identity: &str) -> bool {
        self.sender == identity || self.recipient == identity
    }
}

/// Generate a new message id.
pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Bounded, ordered cache of recent room messages.
///
/// Pushing past the cap evicts the oldest entry.
#[derive(Debug)]
pub struct MessageRing {
    messages: VecDeque<ChatMessage>,
    capacity: usize,
}

impl MessageRing {
    /// Create an empty ring. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a message, evicting the oldest past the cap.
    pub fn push(&mut self, message: ChatMessage) -> Option<ChatMessage> {
        self.messages.push_back(message);
        if self.messages.len() > self.capacity {
            self.messages.pop_front()
        } else {
            None
        }
    }

    /// Replace the contents with the newest `capacity` of `messages`.
    pub fn fill(&mut self, messages: Vec<ChatMessage>) {
        self.messages.clear();
        for message in messages {
            self.push(message);
        }
    }

    /// Mirror an edit. Returns the updated message if it is cached.
    pub fn edit(&mut self, id: &str, text: &str, edited_at: i64) -> Option<ChatMessage> {
        let message = self.messages.iter_mut().find(|m| m.id == id)?;
        message.text = text.to_string();
        message.edited = true;
        message.edited_at = Some(edited_at);
        Some(message.clone())
    }

    /// Mirror a delete. Returns the removed message if it was cached.
    pub fn remove(&mut self, id: &str) -> Option<ChatMessage> {
        let index = self.messages.iter().position(|m| m.id == id)?;
        self.messages.remove(index)
    }

    /// Drop every cached message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Look up a cached message.
    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Snapshot, oldest first.
    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    /// Number of cached messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Maximum number of cached messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
