//! Private messaging: point-to-point delivery with a monitoring copy for
//! privileged admins.

use tracing::debug;

use super::bus::ConnId;
use super::hub::{Actor, ChatHub};
use super::lifecycle::normalize_text;
use super::message::PrivateMessage;
use crate::web::events::ServerEvent;
use crate::{ParlorError, Result};

impl ChatHub {
    /// Send a private message from `actor` to `recipient`.
    ///
    /// The recipient's connections get `privateMessage`, every privileged
    /// admin connection gets `privateMessageMonitor` (even when it is also the
    /// recipient), and only the originating connection gets
    /// `privateMessageSent`.
    pub async fn send_private(
        &self,
        actor: &Actor,
        recipient: &str,
        text: &str,
    ) -> Result<PrivateMessage> {
        if recipient == actor.identity {
            return Err(ParlorError::Validation(
                "you cannot send a private message to yourself".to_string(),
            ));
        }
        let text = normalize_text(text, self.config.max_message_length)?;
        if !self.lock().registry.is_present(recipient) {
            return Err(ParlorError::NotFound(format!("{recipient} is not online")));
        }

        let message = PrivateMessage::new(
            actor.identity.as_str(),
            recipient,
            text,
            actor.color.as_str(),
            self.now(),
        );
        if let Err(e) = self.store.add_private_message(&message).await {
            self.degraded("private message", e);
        }

        {
            let state = self.lock();
            let recipient_conns = state.registry.connections(recipient).to_vec();
            self.bus.send_to_many(
                &recipient_conns,
                &ServerEvent::PrivateMessage(message.clone()),
            );
            self.bus.send_to_many(
                &self.privileged_conns(&state),
                &ServerEvent::PrivateMessageMonitor(message.clone()),
            );
        }
        self.bus
            .send_to(actor.conn, ServerEvent::PrivateMessageSent(message.clone()));

        debug!(from = %message.sender, to = %message.recipient, "Private message delivered");
        Ok(message)
    }

    /// Edit a private message. Only its sender or a privileged admin may.
    pub(crate) async fn edit_private(
        &self,
        actor: &Actor,
        id: &str,
        text: &str,
    ) -> Result<PrivateMessage> {
        let updated = self
            .store
            .update_private_message(id, &actor.identity, text, actor.tier.is_privileged())
            .await?;

        let targets = self.private_audience(&updated);
        self.bus.send_to_many(
            &targets,
            &ServerEvent::PrivateMessageEdited(updated.clone()),
        );
        Ok(updated)
    }

    /// Delete a private message. Only its sender or a privileged admin may.
    pub(crate) async fn delete_private(&self, actor: &Actor, id: &str) -> Result<PrivateMessage> {
        let deleted = self
            .store
            .delete_private_message(id, &actor.identity, actor.tier.is_privileged())
            .await?;

        let targets = self.private_audience(&deleted);
        self.bus.send_to_many(
            &targets,
            &ServerEvent::PrivateMessageDeleted {
                id: deleted.id.clone(),
                sender: deleted.sender.clone(),
                recipient: deleted.recipient.clone(),
            },
        );
        Ok(deleted)
    }

    /// Sender, recipient and privileged admin connections, without duplicates.
    fn private_audience(&self, message: &PrivateMessage) -> Vec<ConnId> {
        let state = self.lock();
        let mut targets: Vec<ConnId> = state
            .registry
            .connections(&message.sender)
            .iter()
            .chain(state.registry.connections(&message.recipient))
            .copied()
            .collect();
        targets.extend(self.privileged_conns(&state));
        targets.sort_unstable();
        targets.dedup();
        targets
    }
}
