//! JSON wire events exchanged over the WebSocket.
//!
//! Every frame is an object tagged by `event`. Inbound frames may carry an
//! `ack` number; the server then answers with exactly one `ack` frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::message::{ChatMessage, PrivateMessage};
use crate::chat::registry::{UserIp, UserIpHistory};
use crate::store::{Account, ProfileUpdate};

/// Event sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Create an account.
    Signup {
        /// Desired username.
        username: String,
        /// Password.
        password: String,
    },
    /// Authenticate this connection.
    #[serde(rename_all = "camelCase")]
    Login {
        /// Account name.
        username: String,
        /// Password, for a password login.
        #[serde(default)]
        password: Option<String>,
        /// Session token, for a token login.
        #[serde(default)]
        token: Option<String>,
        /// Admin override password.
        #[serde(default)]
        admin_password: Option<String>,
    },
    /// Drop this connection's identity.
    Logout,
    /// Change color, theme or status text.
    UpdateProfile(ProfileUpdate),
    /// Post a message or slash command.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        /// Body.
        text: String,
        /// Id of the message being replied to.
        #[serde(default)]
        reply_to: Option<String>,
    },
    /// Edit a room or private message.
    #[serde(rename_all = "camelCase")]
    EditMessage {
        /// Message id.
        id: String,
        /// Replacement text.
        new_text: String,
    },
    /// Delete a room or private message.
    DeleteMessage {
        /// Message id.
        id: String,
    },
    /// The user started typing.
    Typing,
    /// The user stopped typing.
    StopTyping,
}

/// An inbound frame: the event plus its optional ack number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFrame {
    /// Ack number to echo back.
    pub ack: Option<u64>,
    /// The event.
    pub event: ClientEvent,
}

impl ClientFrame {
    /// Parse a text frame.
    ///
    /// On failure the ack number is still returned when it could be read, so
    /// the caller can answer it.
    pub fn parse(text: &str) -> Result<Self, (Option<u64>, serde_json::Error)> {
        let mut value: Value = serde_json::from_str(text).map_err(|e| (None, e))?;
        let ack = value
            .as_object_mut()
            .and_then(|obj| obj.remove("ack"))
            .and_then(|v| v.as_u64());
        let event = ClientEvent::deserialize(value).map_err(|e| (ack, e))?;
        Ok(Self { ack, event })
    }
}

/// Outcome of a request, sent back in an `ack` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Whether the request succeeded.
    pub success: bool,
    /// Error message on failure.
    pub error: Option<String>,
    /// Account, for login and profile updates.
    pub account: Option<Account>,
    /// Id of a posted message.
    pub id: Option<String>,
}

impl Reply {
    /// Plain success.
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Failure with a message.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Severity of a system line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemKind {
    /// Informational.
    Info,
    /// Something the user did failed.
    Error,
}

/// Event sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Answer to a request carrying `ack`.
    Ack {
        /// Echoed ack number.
        ack: u64,
        /// Whether the request succeeded.
        success: bool,
        /// Error message on failure.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Account, for login and profile updates.
        #[serde(skip_serializing_if = "Option::is_none")]
        account: Option<Account>,
        /// Id of a posted message.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// A new room message.
    Message(ChatMessage),
    /// A system line.
    SystemMessage {
        /// Severity.
        kind: SystemKind,
        /// Text.
        text: String,
    },
    /// A room message was edited.
    #[serde(rename_all = "camelCase")]
    MessageEdited {
        /// Message id.
        id: String,
        /// New text.
        text: String,
        /// Edit time.
        edited_at: i64,
    },
    /// A room message was deleted.
    MessageDeleted {
        /// Message id.
        id: String,
    },
    /// The room history was wiped.
    AllMessagesDeleted,
    /// An identity came online.
    #[serde(rename_all = "camelCase")]
    UserJoined {
        /// Who joined.
        username: String,
        /// Online identity count.
        user_count: usize,
        /// Online identities.
        users: Vec<String>,
    },
    /// An identity went offline.
    #[serde(rename_all = "camelCase")]
    UserLeft {
        /// Who left.
        username: String,
        /// Online identity count.
        user_count: usize,
        /// Online identities.
        users: Vec<String>,
    },
    /// Snapshot of who is online.
    #[serde(rename_all = "camelCase")]
    OnlineUsers {
        /// Online identity count.
        user_count: usize,
        /// Online identities.
        users: Vec<String>,
    },
    /// An identity changed its status text.
    #[serde(rename_all = "camelCase")]
    UserStatusUpdate {
        /// Who.
        username: String,
        /// New status text.
        status_text: Option<String>,
    },
    /// Someone is typing.
    UserTyping {
        /// Who.
        username: String,
    },
    /// Someone stopped typing.
    UserStoppedTyping {
        /// Who.
        username: String,
    },
    /// Private message delivered to its recipient.
    PrivateMessage(PrivateMessage),
    /// Delivery confirmation to the sender.
    PrivateMessageSent(PrivateMessage),
    /// Copy for privileged admins.
    PrivateMessageMonitor(PrivateMessage),
    /// A private message was edited.
    PrivateMessageEdited(PrivateMessage),
    /// A private message was deleted.
    PrivateMessageDeleted {
        /// Message id.
        id: String,
        /// Original sender.
        sender: String,
        /// Original recipient.
        recipient: String,
    },
    /// Current address of every online identity (privileged admins only).
    UserIpList {
        /// Entries in presence order.
        users: Vec<UserIp>,
    },
    /// Address history per identity (privileged admins only).
    UserIpHistory {
        /// Entries.
        history: Vec<UserIpHistory>,
    },
    /// This connection was removed from the room.
    Banned {
        /// Why.
        reason: String,
    },
    /// Recent room messages, sent after login.
    History {
        /// Oldest first.
        messages: Vec<ChatMessage>,
    },
    /// Private conversation visible to this identity, sent after login.
    PrivateHistory {
        /// Oldest first.
        messages: Vec<PrivateMessage>,
    },
}

impl ServerEvent {
    /// Ack frame for a request.
    pub fn ack(ack: u64, reply: Reply) -> Self {
        ServerEvent::Ack {
            ack,
            success: reply.success,
            error: reply.error,
            account: reply.account,
            id: reply.id,
        }
    }

    /// Informational system line.
    pub fn system(text: impl Into<String>) -> Self {
        ServerEvent::SystemMessage {
            kind: SystemKind::Info,
            text: text.into(),
        }
    }

    /// Error system line.
    pub fn error(text: impl Into<String>) -> Self {
        ServerEvent::SystemMessage {
            kind: SystemKind::Error,
            text: text.into(),
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Ack { .. } => "ack",
            ServerEvent::Message(_) => "message",
            ServerEvent::SystemMessage { .. } => "systemMessage",
            ServerEvent::MessageEdited { .. } => "messageEdited",
            ServerEvent::MessageDeleted { .. } => "messageDeleted",
            ServerEvent::AllMessagesDeleted => "allMessagesDeleted",
            ServerEvent::UserJoined { .. } => "userJoined",
            ServerEvent::UserLeft { .. } => "userLeft",
            ServerEvent::OnlineUsers { .. } => "onlineUsers",
            ServerEvent::UserStatusUpdate { .. } => "userStatusUpdate",
            ServerEvent::UserTyping { .. } => "userTyping",
            ServerEvent::UserStoppedTyping { .. } => "userStoppedTyping",
            ServerEvent::PrivateMessage(_) => "privateMessage",
            ServerEvent::PrivateMessageSent(_) => "privateMessageSent",
            ServerEvent::PrivateMessageMonitor(_) => "privateMessageMonitor",
            ServerEvent::PrivateMessageEdited(_) => "privateMessageEdited",
            ServerEvent::PrivateMessageDeleted { .. } => "privateMessageDeleted",
            ServerEvent::UserIpList { .. } => "userIpList",
            ServerEvent::UserIpHistory { .. } => "userIpHistory",
            ServerEvent::Banned { .. } => "banned",
            ServerEvent::History { .. } => "history",
            ServerEvent::PrivateHistory { .. } => "privateHistory",
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
