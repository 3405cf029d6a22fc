//! Durable storage consumed by the chat room.
//!
//! The room keeps presence, moderation and the recent-message ring in memory;
//! accounts, message history, private messages and IP bans live behind
//! [`ChatStore`]. Two implementations exist: [`MemoryStore`] and, with the
//! `sqlite` feature, [`SqliteStore`].

mod memory;
pub mod password;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::chat::message::{ChatMessage, PrivateMessage};
use crate::config::{DatabaseConfig, StoreBackend};

/// Errors reported by a store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The actor does not own the record.
    #[error("{0}")]
    Forbidden(String),

    /// Unknown account or wrong password / token.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Uniqueness violated (e.g. the username is taken).
    #[error("{0}")]
    Conflict(String),

    /// Input rejected by the store.
    #[error("{0}")]
    Invalid(String),

    /// Backend failure.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<password::PasswordError> for StoreError {
    fn from(e: password::PasswordError) -> Self {
        match e {
            password::PasswordError::TooShort | password::PasswordError::TooLong => {
                StoreError::Invalid(e.to_string())
            }
            password::PasswordError::VerificationFailed => StoreError::InvalidCredentials,
            password::PasswordError::HashError(_) | password::PasswordError::InvalidHash => {
                StoreError::Unavailable(e.to_string())
            }
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A registered account as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Unique username, also the chat identity.
    pub username: String,
    /// Preferred message color (`#rgb` .. `#rrggbb`).
    pub color: String,
    /// Client theme name.
    pub theme: String,
    /// Free-form status line shown next to messages.
    pub status_text: Option<String>,
    /// Account-level admin flag (grants SessionAdmin at login).
    pub is_admin: bool,
    /// Session token for reconnecting without the password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Default message color for new accounts.
pub const DEFAULT_COLOR: &str = "#000000";

/// Default client theme for new accounts.
pub const DEFAULT_THEME: &str = "light";

impl Account {
    /// A fresh account with default profile values.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            color: DEFAULT_COLOR.to_string(),
            theme: DEFAULT_THEME.to_string(),
            status_text: None,
            is_admin: false,
            token: None,
        }
    }
}

/// Partial profile update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    /// New color.
    #[serde(default)]
    pub color: Option<String>,
    /// New theme.
    #[serde(default)]
    pub theme: Option<String>,
    /// New status text; an empty string clears it.
    #[serde(default)]
    pub status_text: Option<String>,
}

impl ProfileUpdate {
    /// Update only the color.
    pub fn color(color: impl Into<String>) -> Self {
        Self {
            color: Some(color.into()),
            ..Self::default()
        }
    }

    pub(crate) fn apply(&self, account: &mut Account) {
        if let Some(color) = &self.color {
            account.color = color.clone();
        }
        if let Some(theme) = &self.theme {
            account.theme = theme.clone();
        }
        if let Some(status) = &self.status_text {
            account.status_text = if status.trim().is_empty() {
                None
            } else {
                Some(status.trim().to_string())
            };
        }
    }
}

/// A persisted IP ban.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpBan {
    /// Banned address.
    pub ip: String,
    /// Optional reason given by the admin.
    pub reason: Option<String>,
    /// Admin who issued the ban.
    pub banned_by: String,
    /// Unix milliseconds.
    pub created_at: i64,
}

/// Generate a new random session token.
pub(crate) fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Durable storage contract used by the room.
///
/// Ownership checks for edits and deletes live here: the room trusts the
/// result instead of repeating the check.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Create an account. Fails with `Conflict` if the name is taken.
    async fn signup(&self, username: &str, password: &str) -> StoreResult<Account>;

    /// Password login. Issues a fresh token.
    async fn login(&self, username: &str, password: &str) -> StoreResult<Account>;

    /// Token login.
    async fn login_with_token(&self, username: &str, token: &str) -> StoreResult<Account>;

    /// Apply a profile update and return the updated account.
    async fn update_account_profile(
        &self,
        username: &str,
        update: &ProfileUpdate,
    ) -> StoreResult<Account>;

    /// Append a room message.
    async fn add_message(&self, message: &ChatMessage) -> StoreResult<()>;

    /// The most recent `limit` room messages, oldest first.
    async fn get_messages(&self, limit: usize) -> StoreResult<Vec<ChatMessage>>;

    /// Edit a room message owned by `actor` (or any message when `is_privileged`).
    async fn update_message(
        &self,
        id: &str,
        actor: &str,
        text: &str,
        is_privileged: bool,
        edited_at: i64,
    ) -> StoreResult<()>;

    /// Delete a room message owned by `actor` (or any message when `is_privileged`).
    async fn delete_message(&self, id: &str, actor: &str, is_privileged: bool) -> StoreResult<()>;

    /// Remove every room message.
    async fn delete_all_messages(&self) -> StoreResult<()>;

    /// Persist a private message.
    async fn add_private_message(&self, message: &PrivateMessage) -> StoreResult<()>;

    /// Look up a private message by id.
    async fn get_private_message_by_id(&self, id: &str) -> StoreResult<Option<PrivateMessage>>;

    /// Edit a private message sent by `actor` (or any when `is_privileged`).
    async fn update_private_message(
        &self,
        id: &str,
        actor: &str,
        text: &str,
        is_privileged: bool,
    ) -> StoreResult<PrivateMessage>;

    /// Delete a private message sent by `actor` (or any when `is_privileged`).
    async fn delete_private_message(
        &self,
        id: &str,
        actor: &str,
        is_privileged: bool,
    ) -> StoreResult<PrivateMessage>;

    /// Every private message the user sent or received, oldest first.
    async fn get_all_private_messages_for_user(
        &self,
        username: &str,
    ) -> StoreResult<Vec<PrivateMessage>>;

    /// Every private message, oldest first.
    async fn get_all_private_messages(&self) -> StoreResult<Vec<PrivateMessage>>;

    /// Ban an address. Re-banning replaces the reason.
    async fn add_ip_ban(&self, ip: &str, reason: Option<&str>, banned_by: &str)
        -> StoreResult<()>;

    /// Lift an address ban. Fails with `NotFound` if absent.
    async fn remove_ip_ban(&self, ip: &str) -> StoreResult<()>;

    /// All address bans, oldest first.
    async fn get_all_ip_bans(&self) -> StoreResult<Vec<IpBan>>;

    /// Whether an address is banned.
    async fn is_ip_banned(&self, ip: &str) -> StoreResult<bool>;
}

/// Open the store selected by the configuration.
pub async fn open(config: &DatabaseConfig) -> crate::Result<Arc<dyn ChatStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "sqlite")]
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&config.path).await?)),
        #[cfg(not(feature = "sqlite"))]
        StoreBackend::Sqlite => Err(crate::ParlorError::Config(
            "this build has no sqlite support".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_update_apply() {
        let mut account = Account::new("alice");
        ProfileUpdate {
            color: Some("#f00".to_string()),
            theme: None,
            status_text: Some("  away  ".to_string()),
        }
        .apply(&mut account);

        assert_eq!(account.color, "#f00");
        assert_eq!(account.theme, DEFAULT_THEME);
        assert_eq!(account.status_text.as_deref(), Some("away"));

        ProfileUpdate {
            status_text: Some(String::new()),
            ..ProfileUpdate::default()
        }
        .apply(&mut account);
        assert_eq!(account.status_text, None);
    }

    #[test]
    fn test_account_serializes_camel_case() {
        let json = serde_json::to_value(Account::new("alice")).unwrap();
        assert_eq!(json["username"], "alice");
        assert_eq!(json["isAdmin"], false);
        assert!(json.get("token").is_none());
        assert!(json.get("statusText").is_some());
    }

    #[test]
    fn test_password_error_mapping() {
        let err: StoreError = password::PasswordError::TooShort.into();
        assert!(matches!(err, StoreError::Invalid(_)));
        let err: StoreError = password::PasswordError::VerificationFailed.into();
        assert_eq!(err, StoreError::InvalidCredentials);
    }
}
