//! SQLite-backed store using `sqlx`.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use super::password::{hash_password, validate_username, verify_password};
use super::{
    new_token, Account, ChatStore, IpBan, ProfileUpdate, StoreError, StoreResult,
};
use crate::chat::message::{ChatMessage, PrivateMessage};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        username TEXT PRIMARY KEY,
        password_hash TEXT NOT NULL,
        color TEXT NOT NULL,
        theme TEXT NOT NULL,
        status_text TEXT,
        is_admin INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        username TEXT NOT NULL REFERENCES accounts(username) ON DELETE CASCADE,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        username TEXT NOT NULL,
        display_name TEXT NOT NULL,
        text TEXT NOT NULL,
        color TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        reply_to TEXT,
        edited INTEGER NOT NULL DEFAULT 0,
        edited_at INTEGER,
        is_admin INTEGER NOT NULL DEFAULT 0,
        is_command_result INTEGER NOT NULL DEFAULT 0,
        status_text TEXT
    )",
    "CREATE TABLE IF NOT EXISTS private_messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        sender TEXT NOT NULL,
        recipient TEXT NOT NULL,
        text TEXT NOT NULL,
        color TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_private_messages_sender ON private_messages(sender)",
    "CREATE INDEX IF NOT EXISTS idx_private_messages_recipient ON private_messages(recipient)",
    "CREATE TABLE IF NOT EXISTS ip_bans (
        ip TEXT PRIMARY KEY,
        reason TEXT,
        banned_by TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
];

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Database row type for accounts.
#[derive(sqlx::FromRow)]
struct AccountRow {
    username: String,
    password_hash: String,
    color: String,
    theme: String,
    status_text: Option<String>,
    is_admin: bool,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            username: row.username,
            color: row.color,
            theme: row.theme,
            status_text: row.status_text,
            is_admin: row.is_admin,
            token: None,
        }
    }
}

/// Database row type for room messages.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    username: String,
    display_name: String,
    text: String,
    color: String,
    timestamp: i64,
    reply_to: Option<String>,
    edited: bool,
    edited_at: Option<i64>,
    is_admin: bool,
    is_command_result: bool,
    status_text: Option<String>,
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            display_name: row.display_name,
            text: row.text,
            color: row.color,
            timestamp: row.timestamp,
            reply_to: row.reply_to,
            edited: row.edited,
            edited_at: row.edited_at,
            is_admin: row.is_admin,
            is_command_result: row.is_command_result,
            status_text: row.status_text,
        }
    }
}

/// Database row type for private messages.
#[derive(sqlx::FromRow)]
struct PrivateMessageRow {
    id: String,
    sender: String,
    recipient: String,
    text: String,
    color: String,
    timestamp: i64,
}

impl From<PrivateMessageRow> for PrivateMessage {
    fn from(row: PrivateMessageRow) -> Self {
        Self {
            id: row.id,
            sender: row.sender,
            recipient: row.recipient,
            text: row.text,
            color: row.color,
            timestamp: row.timestamp,
        }
    }
}

/// Database row type for IP bans.
#[derive(sqlx::FromRow)]
struct IpBanRow {
    ip: String,
    reason: Option<String>,
    banned_by: String,
    created_at: i64,
}

impl From<IpBanRow> for IpBan {
    fn from(row: IpBanRow) -> Self {
        Self {
            ip: row.ip,
            reason: row.reason,
            banned_by: row.banned_by,
            created_at: row.created_at,
        }
    }
}

const PRIVATE_COLUMNS: &str = "id, sender, recipient, text, color, timestamp";

/// Store backed by a SQLite database file.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        Self::with_pool(pool).await
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        // Every connection to :memory: is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(unavailable)?;
        }
        Ok(Self { pool })
    }

    async fn account_row(&self, username: &str) -> StoreResult<Option<AccountRow>> {
        sqlx::query_as(
            "SELECT username, password_hash, color, theme, status_text, is_admin
             FROM accounts WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)
    }

    async fn message_owner(&self, id: &str) -> StoreResult<String> {
        let owner: Option<String> = sqlx::query_scalar("SELECT username FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        owner.ok_or_else(|| StoreError::NotFound("message".to_string()))
    }

    async fn owned_private_message(
        &self,
        id: &str,
        actor: &str,
        is_privileged: bool,
    ) -> StoreResult<PrivateMessage> {
        let message = self
            .get_private_message_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound("private message".to_string()))?;
        check_owner(&message.sender, actor, is_privileged)?;
        Ok(message)
    }
}

fn check_owner(owner: &str, actor: &str, is_privileged: bool) -> StoreResult<()> {
    if is_privileged || owner == actor {
        Ok(())
    } else {
        Err(StoreError::Forbidden(
            "you can only change your own messages".to_string(),
        ))
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn signup(&self, username: &str, password: &str) -> StoreResult<Account> {
        validate_username(username).map_err(StoreError::Invalid)?;
        if self.account_row(username).await?.is_some() {
            return Err(StoreError::Conflict("username is already taken".to_string()));
        }

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))??;

        let account = Account::new(username);
        let result = sqlx::query(
            "INSERT INTO accounts (username, password_hash, color, theme, status_text, is_admin, created_at)
             VALUES (?, ?, ?, ?, NULL, 0, ?)",
        )
        .bind(&account.username)
        .bind(&password_hash)
        .bind(&account.color)
        .bind(&account.theme)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(account),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Conflict("username is already taken".to_string()))
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn login(&self, username: &str, password: &str) -> StoreResult<Account> {
        let row = self
            .account_row(username)
            .await?
            .ok_or(StoreError::InvalidCredentials)?;

        let password = password.to_string();
        let hash = row.password_hash.clone();
        tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))??;

        let token = new_token();
        sqlx::query("INSERT INTO sessions (token, username, created_at) VALUES (?, ?, ?)")
            .bind(&token)
            .bind(username)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        let mut account = Account::from(row);
        account.token = Some(token);
        Ok(account)
    }

    async fn login_with_token(&self, username: &str, token: &str) -> StoreResult<Account> {
        let owner: Option<String> =
            sqlx::query_scalar("SELECT username FROM sessions WHERE token = ?")
                .bind(token)
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?;
        if owner.as_deref() != Some(username) {
            return Err(StoreError::InvalidCredentials);
        }

        let row = self
            .account_row(username)
            .await?
            .ok_or(StoreError::InvalidCredentials)?;
        let mut account = Account::from(row);
        account.token = Some(token.to_string());
        Ok(account)
    }

    async fn update_account_profile(
        &self,
        username: &str,
        update: &ProfileUpdate,
    ) -> StoreResult<Account> {
        let row = self
            .account_row(username)
            .await?
            .ok_or_else(|| StoreError::NotFound("account".to_string()))?;
        let mut account = Account::from(row);
        update.apply(&mut account);

        sqlx::query("UPDATE accounts SET color = ?, theme = ?, status_text = ? WHERE username = ?")
            .bind(&account.color)
            .bind(&account.theme)
            .bind(&account.status_text)
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(account)
    }

    async fn add_message(&self, message: &ChatMessage) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO messages (id, username, display_name, text, color, timestamp, reply_to,
                                   edited, edited_at, is_admin, is_command_result, status_text)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.username)
        .bind(&message.display_name)
        .bind(&message.text)
        .bind(&message.color)
        .bind(message.timestamp)
        .bind(&message.reply_to)
        .bind(message.edited)
        .bind(message.edited_at)
        .bind(message.is_admin)
        .bind(message.is_command_result)
        .bind(&message.status_text)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn get_messages(&self, limit: usize) -> StoreResult<Vec<ChatMessage>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, username, display_name, text, color, timestamp, reply_to, edited,
                    edited_at, is_admin, is_command_result, status_text
             FROM messages ORDER BY seq DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.reverse();
        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }

    async fn update_message(
        &self,
        id: &str,
        actor: &str,
        text: &str,
        is_privileged: bool,
        edited_at: i64,
    ) -> StoreResult<()> {
        let owner = self.message_owner(id).await?;
        check_owner(&owner, actor, is_privileged)?;

        sqlx::query("UPDATE messages SET text = ?, edited = 1, edited_at = ? WHERE id = ?")
            .bind(text)
            .bind(edited_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn delete_message(&self, id: &str, actor: &str, is_privileged: bool) -> StoreResult<()> {
        let owner = self.message_owner(id).await?;
        check_owner(&owner, actor, is_privileged)?;

        sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn delete_all_messages(&self) -> StoreResult<()> {
        sqlx::query("DELETE FROM messages")
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn add_private_message(&self, message: &PrivateMessage) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO private_messages (id, sender, recipient, text, color, timestamp)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.sender)
        .bind(&message.recipient)
        .bind(&message.text)
        .bind(&message.color)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn get_private_message_by_id(&self, id: &str) -> StoreResult<Option<PrivateMessage>> {
        let row: Option<PrivateMessageRow> = sqlx::query_as(&format!(
            "SELECT {PRIVATE_COLUMNS} FROM private_messages WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(row.map(PrivateMessage::from))
    }

    async fn update_private_message(
        &self,
        id: &str,
        actor: &str,
        text: &str,
        is_privileged: bool,
    ) -> StoreResult<PrivateMessage> {
        let mut message = self.owned_private_message(id, actor, is_privileged).await?;

        sqlx::query("UPDATE private_messages SET text = ? WHERE id = ?")
            .bind(text)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        message.text = text.to_string();
        Ok(message)
    }

    async fn delete_private_message(
        &self,
        id: &str,
        actor: &str,
        is_privileged: bool,
    ) -> StoreResult<PrivateMessage> {
        let message = self.owned_private_message(id, actor, is_privileged).await?;

        sqlx::query("DELETE FROM private_messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(message)
    }

    async fn get_all_private_messages_for_user(
        &self,
        username: &str,
    ) -> StoreResult<Vec<PrivateMessage>> {
        let rows: Vec<PrivateMessageRow> = sqlx::query_as(&format!(
            "SELECT {PRIVATE_COLUMNS} FROM private_messages
             WHERE sender = ? OR recipient = ? ORDER BY seq"
        ))
        .bind(username)
        .bind(username)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(rows.into_iter().map(PrivateMessage::from).collect())
    }

    async fn get_all_private_messages(&self) -> StoreResult<Vec<PrivateMessage>> {
        let rows: Vec<PrivateMessageRow> = sqlx::query_as(&format!(
            "SELECT {PRIVATE_COLUMNS} FROM private_messages ORDER BY seq"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(rows.into_iter().map(PrivateMessage::from).collect())
    }

    async fn add_ip_ban(
        &self,
        ip: &str,
        reason: Option<&str>,
        banned_by: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO ip_bans (ip, reason, banned_by, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(ip) DO UPDATE SET reason = excluded.reason,
                                           banned_by = excluded.banned_by,
                                           created_at = excluded.created_at",
        )
        .bind(ip)
        .bind(reason)
        .bind(banned_by)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn remove_ip_ban(&self, ip: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM ip_bans WHERE ip = ?")
            .bind(ip)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("IP ban for {ip}")));
        }
        Ok(())
    }

    async fn get_all_ip_bans(&self) -> StoreResult<Vec<IpBan>> {
        let rows: Vec<IpBanRow> = sqlx::query_as(
            "SELECT ip, reason, banned_by, created_at FROM ip_bans ORDER BY created_at, ip",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(rows.into_iter().map(IpBan::from).collect())
    }

    async fn is_ip_banned(&self, ip: &str) -> StoreResult<bool> {
        let banned: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM ip_bans WHERE ip = ?)")
            .bind(ip)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(banned)
    }
}
