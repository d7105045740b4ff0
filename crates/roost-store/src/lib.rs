//! # roost-store
//!
//! Persistence collaborator interfaces for the roost chat server.
//!
//! The chat core is a leaf consumer of persistence: it calls these narrow,
//! already-atomic operations and never exposes storage outward. The traits
//! here define the contract; [`MemoryStore`] is the in-process implementation
//! (the server is single-process, in-memory state). A SQL-backed store is an
//! external concern behind the same traits.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use roost_protocol::{MessageId, Presence, UserId, WireMessage};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store is unavailable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Referenced row does not exist.
    #[error("Not found")]
    NotFound,
}

/// A message to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Sender user id.
    pub from: UserId,
    /// Recipient user id.
    pub to: UserId,
    /// Message content.
    pub content: String,
    /// Whether this is a synthesized away-message reply.
    pub auto_response: bool,
}

/// A persisted message.
///
/// Immutable once created except for the delivered and read flags. The
/// delivered flag transitions false to true at most once and is never reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub from: UserId,
    pub to: UserId,
    pub content: String,
    /// Creation timestamp, milliseconds since the Unix epoch.
    pub created_at: u64,
    pub delivered: bool,
    pub delivered_at: Option<u64>,
    pub read: bool,
    pub auto_response: bool,
}

impl StoredMessage {
    /// Project to the wire representation.
    #[must_use]
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            id: self.id,
            from: self.from,
            to: self.to,
            content: self.content.clone(),
            created_at: self.created_at,
            auto_response: self.auto_response,
        }
    }
}

/// Durable message state.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message. Returns the stored row with its assigned id.
    async fn create(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;

    /// All undelivered messages addressed to `user_id`, ordered by send time
    /// ascending (ties broken by id).
    async fn find_undelivered(&self, user_id: UserId) -> Result<Vec<StoredMessage>, StoreError>;

    /// Mark a batch of messages delivered. Already-delivered messages keep
    /// their original delivery timestamp.
    async fn mark_delivered(&self, ids: &[MessageId]) -> Result<(), StoreError>;

    /// Mark all unread messages from `counterpart_id` to `reader_id` as read.
    /// Returns the number of messages marked.
    async fn mark_read(&self, reader_id: UserId, counterpart_id: UserId)
        -> Result<u64, StoreError>;

    /// Count unread messages addressed to `user_id`.
    async fn count_unread(&self, user_id: UserId) -> Result<u64, StoreError>;
}

/// Durable per-user presence state.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Write the user's presence. `away_text` is stored for Away and cleared
    /// for every other status.
    async fn update_status(
        &self,
        user_id: UserId,
        status: Presence,
        away_text: Option<&str>,
    ) -> Result<(), StoreError>;

    /// The user's standing presence and away text. Users with no recorded
    /// status are Offline.
    async fn status(&self, user_id: UserId) -> Result<(Presence, Option<String>), StoreError>;
}

/// Buddy-list edges. Owned and mutated by the roster collaborator; the chat
/// core only reads them.
#[async_trait]
pub trait BuddyStore: Send + Sync {
    /// Users who hold `user_id` as a buddy (the fan-out audience).
    async fn watchers_of(&self, user_id: UserId) -> Result<Vec<UserId>, StoreError>;

    /// Users that `user_id` holds as buddies (the roster direction).
    async fn buddies_of(&self, user_id: UserId) -> Result<Vec<UserId>, StoreError>;
}
