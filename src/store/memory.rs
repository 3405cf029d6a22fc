//! In-process store. Nothing survives a restart.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::password::{hash_password, validate_username, verify_password};
use super::{
    new_token, Account, ChatStore, IpBan, ProfileUpdate, StoreError, StoreResult,
};
use crate::chat::message::{ChatMessage, PrivateMessage};

struct StoredAccount {
    account: Account,
    password_hash: String,
    tokens: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, StoredAccount>,
    messages: Vec<ChatMessage>,
    private_messages: Vec<PrivateMessage>,
    ip_bans: Vec<IpBan>,
}

/// Store backed by `RwLock`-guarded maps.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the account-level admin flag.
    pub async fn grant_admin(&self, username: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .accounts
            .get_mut(username)
            .ok_or_else(|| StoreError::NotFound("account".to_string()))?;
        stored.account.is_admin = true;
        Ok(())
    }

    /// Number of persisted room messages.
    pub async fn message_count(&self) -> usize {
        self.inner.read().await.messages.len()
    }
}

async fn hash_blocking(password: String) -> StoreResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
        .map_err(StoreError::from)
}

async fn verify_blocking(password: String, hash: String) -> StoreResult<()> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
        .map_err(StoreError::from)
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
impl ChatStore for MemoryStore {
    async fn signup(&self, username: &str, password: &str) -> StoreResult<Account> {
        validate_username(username).map_err(StoreError::Invalid)?;
        if self.inner.read().await.accounts.contains_key(username) {
            return Err(StoreError::Conflict("username is already taken".to_string()));
        }

        let password_hash = hash_blocking(password.to_string()).await?;

        let mut inner = self.inner.write().await;
        if inner.accounts.contains_key(username) {
            return Err(StoreError::Conflict("username is already taken".to_string()));
        }
        let account = Account::new(username);
        inner.accounts.insert(
            username.to_string(),
            StoredAccount {
                account: account.clone(),
                password_hash,
                tokens: HashSet::new(),
            },
        );
        Ok(account)
    }

    async fn login(&self, username: &str, password: &str) -> StoreResult<Account> {
        let hash = {
            let inner = self.inner.read().await;
            inner
                .accounts
                .get(username)
                .map(|s| s.password_hash.clone())
                .ok_or(StoreError::InvalidCredentials)?
        };

        verify_blocking(password.to_string(), hash).await?;

        let mut inner = self.inner.write().await;
        let stored = inner
            .accounts
            .get_mut(username)
            .ok_or(StoreError::InvalidCredentials)?;
        let token = new_token();
        stored.tokens.insert(token.clone());

        let mut account = stored.account.clone();
        account.token = Some(token);
        Ok(account)
    }

    async fn login_with_token(&self, username: &str, token: &str) -> StoreResult<Account> {
        let inner = self.inner.read().await;
        let stored = inner
            .accounts
            .get(username)
            .filter(|s| s.tokens.contains(token))
            .ok_or(StoreError::InvalidCredentials)?;

        let mut account = stored.account.clone();
        account.token = Some(token.to_string());
        Ok(account)
    }

    async fn update_account_profile(
        &self,
        username: &str,
        update: &ProfileUpdate,
    ) -> StoreResult<Account> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .accounts
            .get_mut(username)
            .ok_or_else(|| StoreError::NotFound("account".to_string()))?;
        update.apply(&mut stored.account);
        Ok(stored.account.clone())
    }

    async fn add_message(&self, message: &ChatMessage) -> StoreResult<()> {
        self.inner.write().await.messages.push(message.clone());
        Ok(())
    }

    async fn get_messages(&self, limit: usize) -> StoreResult<Vec<ChatMessage>> {
        let inner = self.inner.read().await;
        let skip = inner.messages.len().saturating_sub(limit);
        Ok(inner.messages[skip..].to_vec())
    }

    async fn update_message(
        &self,
        id: &str,
        actor: &str,
        text: &str,
        is_privileged: bool,
        edited_at: i64,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::NotFound("message".to_string()))?;
        check_owner(&message.username, actor, is_privileged)?;

        message.text = text.to_string();
        message.edited = true;
        message.edited_at = Some(edited_at);
        Ok(())
    }

    async fn delete_message(&self, id: &str, actor: &str, is_privileged: bool) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let index = inner
            .messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| StoreError::NotFound("message".to_string()))?;
        check_owner(&inner.messages[index].username, actor, is_privileged)?;

        inner.messages.remove(index);
        Ok(())
    }

    async fn delete_all_messages(&self) -> StoreResult<()> {
        self.inner.write().await.messages.clear();
        Ok(())
    }

    async fn add_private_message(&self, message: &PrivateMessage) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .private_messages
            .push(message.clone());
        Ok(())
    }

    async fn get_private_message_by_id(&self, id: &str) -> StoreResult<Option<PrivateMessage>> {
        let inner = self.inner.read().await;
        Ok(inner.private_messages.iter().find(|m| m.id == id).cloned())
    }

    async fn update_private_message(
        &self,
        id: &str,
        actor: &str,
        text: &str,
        is_privileged: bool,
    ) -> StoreResult<PrivateMessage> {
        let mut inner = self.inner.write().await;
        let message = inner
            .private_messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::NotFound("private message".to_string()))?;
        check_owner(&message.sender, actor, is_privileged)?;

        message.text = text.to_string();
        Ok(message.clone())
    }

    async fn delete_private_message(
        &self,
        id: &str,
        actor: &str,
        is_privileged: bool,
    ) -> StoreResult<PrivateMessage> {
        let mut inner = self.inner.write().await;
        let index = inner
            .private_messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| StoreError::NotFound("private message".to_string()))?;
        check_owner(&inner.private_messages[index].sender, actor, is_privileged)?;

        Ok(inner.private_messages.remove(index))
    }

    async fn get_all_private_messages_for_user(
        &self,
        username: &str,
    ) -> StoreResult<Vec<PrivateMessage>> {
        let inner = self.inner.read().await;
        Ok(inner
            .private_messages
            .iter()
            .filter(|m| m.involves(username))
            .cloned()
            .collect())
    }

    async fn get_all_private_messages(&self) -> StoreResult<Vec<PrivateMessage>> {
        Ok(self.inner.read().await.private_messages.clone())
    }

    async fn add_ip_ban(
        &self,
        ip: &str,
        reason: Option<&str>,
        banned_by: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.ip_bans.retain(|b| b.ip != ip);
        inner.ip_bans.push(IpBan {
            ip: ip.to_string(),
            reason: reason.map(str::to_string),
            banned_by: banned_by.to_string(),
            created_at: Utc::now().timestamp_millis(),
        });
        Ok(())
    }

    async fn remove_ip_ban(&self, ip: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let before = inner.ip_bans.len();
        inner.ip_bans.retain(|b| b.ip != ip);
        if inner.ip_bans.len() == before {
            return Err(StoreError::NotFound(format!("IP ban for {ip}")));
        }
        Ok(())
    }

    async fn get_all_ip_bans(&self) -> StoreResult<Vec<IpBan>> {
        Ok(self.inner.read().await.ip_bans.clone())
    }

    async fn is_ip_banned(&self, ip: &str) -> StoreResult<bool> {
        Ok(self.inner.read().await.ip_bans.iter().any(|b| b.ip == ip))
    }
}
