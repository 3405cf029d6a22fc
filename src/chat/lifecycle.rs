//! Message lifecycle: send, edit and delete room messages.
//!
//! The ring append and broadcast happen under the room lock before the store
//! write is awaited. Broadcast order therefore follows handler order, while
//! the order in which writes land in the store is not guaranteed.

use std::time::Duration;

use tracing::info;

use super::bus::ConnId;
use super::hub::{Actor, ChatHub};
use super::ledger::MuteStatus;
use super::message::ChatMessage;
use crate::rate_limit::RateLimitResult;
use crate::web::events::ServerEvent;
use crate::{ParlorError, Result};

/// Trim message text and enforce the length limit.
pub fn normalize_text(text: &str, max_len: usize) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParlorError::Validation(
            "message text must not be empty".to_string(),
        ));
    }
    if text.chars().count() > max_len {
        return Err(ParlorError::Validation(format!(
            "message text must be at most {max_len} characters"
        )));
    }
    Ok(text.to_string())
}

fn retry_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

impl ChatHub {
    /// Post a line to the room.
    ///
    /// Lines starting with `/` go to the command dispatcher first; unknown
    /// commands are posted as ordinary text. Returns the id of the posted
    /// message, or `None` when a command handled the line.
    pub async fn send_message(
        &self,
        conn: ConnId,
        text: &str,
        reply_to: Option<String>,
    ) -> Result<Option<String>> {
        let actor = self.actor(conn)?;
        let text = normalize_text(text, self.config.max_message_length)?;

        let mute = self.lock().ledger.check_mute(&actor.identity, self.now());
        if let MuteStatus::Muted { remaining_secs } = mute {
            return Err(ParlorError::Muted { remaining_secs });
        }

        if !actor.tier.is_admin() {
            if let RateLimitResult::Denied { retry_after } = self
                .limiter
                .check_and_record(&actor.identity, self.clock.as_ref())
            {
                return Err(ParlorError::RateLimited {
                    retry_after_secs: retry_secs(retry_after),
                });
            }
        }

        if text.starts_with('/') {
            if let Some(result) = self.dispatch(&actor, &text).await {
                self.deliver(&actor, result).await?;
                return Ok(None);
            }
        }

        let mut message = self.compose(&actor, text);
        message.reply_to = reply_to;
        let id = message.id.clone();
        self.post(message).await;
        Ok(Some(id))
    }

    /// Build a room message authored by `actor`.
    pub(crate) fn compose(&self, actor: &Actor, text: String) -> ChatMessage {
        let display_name = if actor.tier.is_admin() {
            format!("{}{}", actor.identity, self.config.admin_marker)
        } else {
            actor.identity.clone()
        };
        let status_text = self
            .lock()
            .registry
            .status(&actor.identity)
            .map(str::to_string);

        let mut message = ChatMessage::new(
            actor.identity.as_str(),
            display_name,
            text,
            actor.color.as_str(),
            self.now(),
        );
        message.is_admin = actor.tier.is_admin();
        message.status_text = status_text;
        message
    }

    /// Append to the ring, broadcast, then persist (best effort).
    pub(crate) async fn post(&self, message: ChatMessage) {
        {
            let mut state = self.lock();
            state.ring.push(message.clone());
            self.bus.broadcast(&ServerEvent::Message(message.clone()));
        }
        if let Err(e) = self.store.add_message(&message).await {
            self.degraded("message", e);
        }
    }

    /// Edit a room or private message.
    pub async fn edit_message(&self, conn: ConnId, id: &str, new_text: &str) -> Result<()> {
        let actor = self.actor(conn)?;
        let text = normalize_text(new_text, self.config.max_message_length)?;

        if self.store.get_private_message_by_id(id).await?.is_some() {
            self.edit_private(&actor, id, &text).await?;
            return Ok(());
        }

        let edited_at = self.now();
        self.store
            .update_message(
                id,
                &actor.identity,
                &text,
                actor.tier.is_privileged(),
                edited_at,
            )
            .await?;

        let mut state = self.lock();
        state.ring.edit(id, &text, edited_at);
        self.bus.broadcast(&ServerEvent::MessageEdited {
            id: id.to_string(),
            text,
            edited_at,
        });
        Ok(())
    }

    /// Delete a room or private message.
    pub async fn delete_message(&self, conn: ConnId, id: &str) -> Result<()> {
        let actor = self.actor(conn)?;

        if self.store.get_private_message_by_id(id).await?.is_some() {
            self.delete_private(&actor, id).await?;
            return Ok(());
        }

        self.store
            .delete_message(id, &actor.identity, actor.tier.is_privileged())
            .await?;

        let mut state = self.lock();
        state.ring.remove(id);
        self.bus
            .broadcast(&ServerEvent::MessageDeleted { id: id.to_string() });
        info!(user = %actor.identity, id, "Message deleted");
        Ok(())
    }

    /// Snapshot of the ring, oldest first.
    pub fn recent_messages(&self) -> Vec<ChatMessage> {
        self.lock().ring.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::chat::bus::Outbound;
    use crate::chat::hub::LoginRequest;
    use crate::clock::ManualClock;
    use crate::config::ChatConfig;
    use crate::store::{ChatStore, MemoryStore};

    async fn setup(config: ChatConfig, names: &[&str]) -> (ChatHub, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for name in names {
            store.signup(name, "password123").await.unwrap();
        }
        let hub = ChatHub::new(config, store.clone()).with_clock(Arc::new(ManualClock::new(0)));
        (hub, store)
    }

    async fn join(hub: &ChatHub, name: &str) -> (ConnId, UnboundedReceiver<Outbound>) {
        let (conn, mut rx) = hub.open_connection("127.0.0.1");
        hub.login(
            conn,
            LoginRequest {
                username: name.to_string(),
                password: Some("password123".to_string()),
                ..LoginRequest::default()
            },
        )
        .await
        .unwrap();
        while rx.try_recv().is_ok() {}
        (conn, rx)
    }

    fn events(rx: &mut UnboundedReceiver<Outbound>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(Outbound::Event(event)) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  hi  ", 10).unwrap(), "hi");
        assert!(matches!(
            normalize_text("   ", 10),
            Err(ParlorError::Validation(_))
        ));
        assert!(normalize_text("ああああ", 4).is_ok());
        assert!(normalize_text("あああああ", 4).is_err());
    }

    #[test]
    fn test_retry_secs_rounds_up() {
        assert_eq!(retry_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_secs(Duration::from_secs(3)), 3);
        assert_eq!(retry_secs(Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn test_send_broadcasts_and_persists() {
        let (hub, store) = setup(ChatConfig::default(), &["alice", "bob"]).await;
        let (alice, _alice_rx) = join(&hub, "alice").await;
        let (_bob, mut bob_rx) = join(&hub, "bob").await;

        let id = hub
            .send_message(alice, "hello", Some("earlier".to_string()))
            .await
            .unwrap()
            .unwrap();

        let received = events(&mut bob_rx);
        let ServerEvent::Message(message) = &received[0] else {
            panic!("expected a message, got {received:?}");
        };
        assert_eq!(message.id, id);
        assert_eq!(message.display_name, "alice");
        assert_eq!(message.reply_to.as_deref(), Some("earlier"));
        assert!(!message.is_admin);

        assert_eq!(hub.recent_messages().len(), 1);
        assert_eq!(store.message_count().await, 1);
    }

    #[tokio::test]
    async fn test_admin_marker() {
        let config = ChatConfig {
            privileged_admins: vec!["root".to_string()],
            ..ChatConfig::default()
        };
        let (hub, _store) = setup(config, &["root"]).await;
        let (root, _rx) = join(&hub, "root").await;

        hub.send_message(root, "hi all", None).await.unwrap();
        let message = &hub.recent_messages()[0];
        assert_eq!(message.display_name, "root [admin]");
        assert!(message.is_admin);
    }

    #[tokio::test]
    async fn test_ring_cap() {
        let config = ChatConfig {
            max_history: 3,
            rate_limit_messages: 100,
            ..ChatConfig::default()
        };
        let (hub, store) = setup(config, &["alice"]).await;
        let (alice, _rx) = join(&hub, "alice").await;

        for i in 0..5 {
            hub.send_message(alice, &format!("m{i}"), None).await.unwrap();
        }
        let texts: Vec<_> = hub.recent_messages().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
        assert_eq!(store.message_count().await, 5);
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let config = ChatConfig {
            rate_limit_messages: 2,
            rate_limit_window_secs: 10,
            ..ChatConfig::default()
        };
        let (hub, _store) = setup(config, &["alice"]).await;
        let (alice, _rx) = join(&hub, "alice").await;

        hub.send_message(alice, "one", None).await.unwrap();
        hub.send_message(alice, "two", None).await.unwrap();
        let err = hub.send_message(alice, "three", None).await.unwrap_err();
        assert!(matches!(
            err,
            ParlorError::RateLimited {
                retry_after_secs: 10
            }
        ));
        assert_eq!(hub.recent_messages().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_command_is_posted() {
        let (hub, _store) = setup(ChatConfig::default(), &["alice"]).await;
        let (alice, _rx) = join(&hub, "alice").await;

        let id = hub.send_message(alice, "/shrug", None).await.unwrap();
        assert!(id.is_some());
        assert_eq!(hub.recent_messages()[0].text, "/shrug");
    }

    #[tokio::test]
    async fn test_edit_and_delete_ownership() {
        let config = ChatConfig {
            privileged_admins: vec!["root".to_string()],
            ..ChatConfig::default()
        };
        let (hub, _store) = setup(config, &["alice", "bob", "root"]).await;
        let (alice, _a) = join(&hub, "alice").await;
        let (bob, mut bob_rx) = join(&hub, "bob").await;
        let (root, _r) = join(&hub, "root").await;
        events(&mut bob_rx);

        let id = hub
            .send_message(alice, "original", None)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            hub.edit_message(bob, &id, "hijack").await,
            Err(ParlorError::Authorization(_))
        ));
        assert!(matches!(
            hub.edit_message(alice, &id, "   ").await,
            Err(ParlorError::Validation(_))
        ));

        hub.edit_message(alice, &id, "fixed").await.unwrap();
        let cached = &hub.recent_messages()[0];
        assert_eq!(cached.text, "fixed");
        assert!(cached.edited);

        assert!(matches!(
            hub.delete_message(bob, &id).await,
            Err(ParlorError::Authorization(_))
        ));
        hub.delete_message(root, &id).await.unwrap();
        assert!(hub.recent_messages().is_empty());

        let names: Vec<_> = events(&mut bob_rx).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["message", "messageEdited", "messageDeleted"]);

        assert!(matches!(
            hub.delete_message(alice, "missing").await,
            Err(ParlorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_edit_routes_private_messages() {
        let (hub, store) = setup(ChatConfig::default(), &["alice", "bob"]).await;
        let (alice, _a) = join(&hub, "alice").await;
        let (_bob, mut bob_rx) = join(&hub, "bob").await;

        let actor = hub.actor(alice).unwrap();
        let pm = hub.send_private(&actor, "bob", "secret").await.unwrap();
        events(&mut bob_rx);

        hub.edit_message(alice, &pm.id, "still secret").await.unwrap();
        let received = events(&mut bob_rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name(), "privateMessageEdited");
        assert_eq!(
            store
                .get_private_message_by_id(&pm.id)
                .await
                .unwrap()
                .unwrap()
                .text,
            "still secret"
        );
        assert!(hub.recent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_send_requires_login() {
        let (hub, _store) = setup(ChatConfig::default(), &[]).await;
        let (conn, _rx) = hub.open_connection("127.0.0.1");
        assert!(matches!(
            hub.send_message(conn, "hi", None).await,
            Err(ParlorError::NotAuthenticated)
        ));
    }
}
