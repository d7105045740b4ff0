//! Message dispatch.
//!
//! Receives send/read/typing requests from connection handlers, persists
//! durable state first, then delivers live or leaves messages queued for the
//! redelivery coordinator. Errors are recovered at this boundary and
//! translated to error frames for the originating socket; they never cross a
//! user boundary and never poison the registry.

use crate::error::CoreError;
use crate::registry::SessionRegistry;
use roost_protocol::{Presence, ServerFrame, UserId};
use roost_store::{MessageStore, NewMessage, StoredMessage, UserStore};
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of dispatching a message.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// The persisted message.
    pub message: StoredMessage,
    /// Whether the message was emitted to a live session.
    pub delivered: bool,
    /// Whether the recipient was reachable at dispatch time.
    pub recipient_online: bool,
}

/// Routes direct messages, read marks, and typing indicators.
pub struct MessageDispatcher {
    registry: Arc<SessionRegistry>,
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserStore>,
}

impl MessageDispatcher {
    /// Create a new dispatcher.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            registry,
            messages,
            users,
        }
    }

    /// Send a direct message.
    ///
    /// The durable write precedes every emission. The sender is acknowledged
    /// regardless of recipient reachability; a reachable recipient gets the
    /// message on all sessions and the row is marked delivered. An Away
    /// recipient's standing away text is echoed back as a persisted,
    /// auto-response-tagged message whether or not the original was delivered
    /// live.
    ///
    /// # Errors
    ///
    /// Blank content and a missing recipient id are rejected before any
    /// durable write; store failures abort the operation.
    pub async fn send_message(
        &self,
        sender_id: UserId,
        recipient_id: UserId,
        content: &str,
    ) -> Result<DispatchOutcome, CoreError> {
        if content.trim().is_empty() {
            return Err(CoreError::EmptyMessage);
        }
        if recipient_id == 0 {
            return Err(CoreError::InvalidRecipient);
        }

        let stored = self
            .messages
            .create(NewMessage {
                from: sender_id,
                to: recipient_id,
                content: content.to_string(),
                auto_response: false,
            })
            .await?;

        self.registry.emit_to_user(
            sender_id,
            &ServerFrame::MessageSent {
                message_id: stored.id,
                created_at: stored.created_at,
            },
        );

        let recipient_online = self.registry.is_reachable(recipient_id);
        let mut delivered = false;
        let away_text = if recipient_online {
            delivered = self
                .registry
                .emit_to_user(recipient_id, &ServerFrame::receive(stored.to_wire()));
            if delivered {
                self.messages.mark_delivered(&[stored.id]).await?;
            }
            match self.registry.presence_of(recipient_id) {
                Some((Presence::Away, text)) => text,
                _ => None,
            }
        } else {
            // The offline notice carries the standing away text, if any.
            let (_, standing) = self.users.status(recipient_id).await?;
            standing
        };

        self.registry.emit_to_user(
            sender_id,
            &ServerFrame::MessageDeliveryStatus {
                message_id: stored.id,
                delivered,
                recipient_online,
                away_text: away_text.clone(),
            },
        );

        if let Some(text) = away_text {
            self.send_auto_response(recipient_id, sender_id, &text)
                .await?;
        }

        debug!(
            from = sender_id,
            to = recipient_id,
            message = stored.id,
            delivered,
            "Message dispatched"
        );
        Ok(DispatchOutcome {
            message: stored,
            delivered,
            recipient_online,
        })
    }

    /// Persist and deliver the away-message reply on behalf of `from`.
    async fn send_auto_response(
        &self,
        from: UserId,
        to: UserId,
        text: &str,
    ) -> Result<(), CoreError> {
        let stored = self
            .messages
            .create(NewMessage {
                from,
                to,
                content: text.to_string(),
                auto_response: true,
            })
            .await?;

        if self
            .registry
            .emit_to_user(to, &ServerFrame::receive(stored.to_wire()))
        {
            self.messages.mark_delivered(&[stored.id]).await?;
        }
        Ok(())
    }

    /// Mark all messages from `counterpart_id` to `reader_id` as read.
    ///
    /// A reachable counterpart gets a read receipt; an unreachable one gets
    /// nothing, now or later (receipts are never queued). Returns the number
    /// of messages marked.
    pub async fn mark_read(
        &self,
        reader_id: UserId,
        counterpart_id: UserId,
    ) -> Result<u64, CoreError> {
        let marked = self.messages.mark_read(reader_id, counterpart_id).await?;
        if marked > 0 {
            self.registry
                .emit_to_user(counterpart_id, &ServerFrame::MessageRead { reader_id });
        }
        Ok(marked)
    }

    /// Relay a typing indicator. Best-effort and transient: not persisted,
    /// silently dropped if the recipient is unreachable.
    pub fn typing(&self, from: UserId, to: UserId, is_typing: bool) {
        if !self.registry.emit_to_user(to, &ServerFrame::Typing { from, is_typing }) {
            trace!(from, to, "Typing indicator dropped");
        }
    }
}
