//! Offline backlog redelivery.
//!
//! When a user's first session is established, messages persisted while they
//! were unreachable are flushed to the new connection in original send order,
//! then marked delivered as one batch. Delivery is at-least-once: the durable
//! mark runs after emission with no transactional link, so a store failure
//! mid-flush leaves the batch unmarked and it is re-flushed on the next
//! reconnect. Clients treat message ids idempotently.

use crate::error::CoreError;
use crate::registry::SessionRegistry;
use roost_protocol::{MessageId, ServerFrame, UserId, WireMessage};
use roost_store::{MessageStore, StoredMessage};
use std::sync::Arc;
use tracing::info;

/// Flushes queued messages to reconnecting users.
pub struct RedeliveryCoordinator {
    registry: Arc<SessionRegistry>,
    messages: Arc<dyn MessageStore>,
}

impl RedeliveryCoordinator {
    /// Create a new coordinator.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, messages: Arc<dyn MessageStore>) -> Self {
        Self { registry, messages }
    }

    /// Flush the user's undelivered backlog to their session(s).
    ///
    /// Emits each message in send-time order, marks the whole batch delivered
    /// in a single durable update, then emits one summary frame so the client
    /// can distinguish the flush from live delivery. An empty backlog emits
    /// nothing. Returns the number of messages flushed.
    ///
    /// # Errors
    ///
    /// Store errors abort the flush; unmarked messages stay in the backlog
    /// for the next reconnect.
    pub async fn flush_for(&self, user_id: UserId) -> Result<u64, CoreError> {
        let pending = self.messages.find_undelivered(user_id).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let wire: Vec<WireMessage> = pending.iter().map(StoredMessage::to_wire).collect();
        for message in &wire {
            self.registry
                .emit_to_user(user_id, &ServerFrame::receive(message.clone()));
        }

        let ids: Vec<MessageId> = pending.iter().map(|m| m.id).collect();
        self.messages.mark_delivered(&ids).await?;

        let count = wire.len() as u64;
        self.registry.emit_to_user(
            user_id,
            &ServerFrame::BacklogDelivered {
                count,
                messages: wire,
            },
        );

        info!(user = user_id, count, "Flushed offline backlog");
        Ok(count)
    }
}
