//! In-memory store implementation.
//!
//! Backs the single-process server and the test suites. All operations are
//! single-row-shaped and atomic, matching what a SQL implementation of the
//! same traits would provide.

use async_trait::async_trait;
use dashmap::DashMap;
use roost_protocol::{MessageId, Presence, UserId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::{MessageStore, NewMessage, StoreError, StoredMessage, UserStore};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// In-memory implementation of all three collaborator stores.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: DashMap<MessageId, StoredMessage>,
    next_message_id: AtomicU64,
    statuses: DashMap<UserId, (Presence, Option<String>)>,
    /// user -> the users on their buddy list.
    buddies: DashMap<UserId, HashSet<UserId>>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directed buddy edge: `owner` holds `buddy` on their list.
    ///
    /// Roster management is an external collaborator; this exists so the
    /// server and tests can seed edges.
    pub fn add_buddy(&self, owner: UserId, buddy: UserId) {
        self.buddies.entry(owner).or_default().insert(buddy);
    }

    /// Remove a directed buddy edge.
    pub fn remove_buddy(&self, owner: UserId, buddy: UserId) {
        if let Some(mut set) = self.buddies.get_mut(&owner) {
            set.remove(&buddy);
        }
    }

    /// Number of persisted messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Fetch a message by id.
    #[must_use]
    pub fn message(&self, id: MessageId) -> Option<StoredMessage> {
        self.messages.get(&id).map(|m| m.clone())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1;
        let stored = StoredMessage {
            id,
            from: message.from,
            to: message.to,
            content: message.content,
            created_at: now_millis(),
            delivered: false,
            delivered_at: None,
            read: false,
            auto_response: message.auto_response,
        };
        self.messages.insert(id, stored.clone());
        debug!(message = id, from = stored.from, to = stored.to, "Message persisted");
        Ok(stored)
    }

    async fn find_undelivered(&self, user_id: UserId) -> Result<Vec<StoredMessage>, StoreError> {
        let mut pending: Vec<StoredMessage> = self
            .messages
            .iter()
            .filter(|m| m.to == user_id && !m.delivered)
            .map(|m| m.clone())
            .collect();
        pending.sort_by_key(|m| (m.created_at, m.id));
        Ok(pending)
    }

    async fn mark_delivered(&self, ids: &[MessageId]) -> Result<(), StoreError> {
        let now = now_millis();
        for id in ids {
            if let Some(mut m) = self.messages.get_mut(id) {
                if !m.delivered {
                    m.delivered = true;
                    m.delivered_at = Some(now);
                }
            }
        }
        Ok(())
    }

    async fn mark_read(
        &self,
        reader_id: UserId,
        counterpart_id: UserId,
    ) -> Result<u64, StoreError> {
        let mut marked = 0;
        for mut m in self.messages.iter_mut() {
            if m.to == reader_id && m.from == counterpart_id && !m.read {
                m.read = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn count_unread(&self, user_id: UserId) -> Result<u64, StoreError> {
        Ok(self
            .messages
            .iter()
            .filter(|m| m.to == user_id && !m.read)
            .count() as u64)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn update_status(
        &self,
        user_id: UserId,
        status: Presence,
        away_text: Option<&str>,
    ) -> Result<(), StoreError> {
        let text = match status {
            Presence::Away => away_text.map(str::to_string),
            _ => None,
        };
        self.statuses.insert(user_id, (status, text));
        Ok(())
    }

    async fn status(&self, user_id: UserId) -> Result<(Presence, Option<String>), StoreError> {
        Ok(self
            .statuses
            .get(&user_id)
            .map(|s| s.clone())
            .unwrap_or((Presence::Offline, None)))
    }
}

#[async_trait]
impl crate::BuddyStore for MemoryStore {
    async fn watchers_of(&self, user_id: UserId) -> Result<Vec<UserId>, StoreError> {
        Ok(self
            .buddies
            .iter()
            .filter(|e| e.value().contains(&user_id))
            .map(|e| *e.key())
            .collect())
    }

    async fn buddies_of(&self, user_id: UserId) -> Result<Vec<UserId>, StoreError> {
        Ok(self
            .buddies
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuddyStore;

    fn new_message(from: UserId, to: UserId, content: &str) -> NewMessage {
        NewMessage {
            from,
            to,
            content: content.to_string(),
            auto_response: false,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let m1 = store.create(new_message(1, 2, "first")).await.unwrap();
        let m2 = store.create(new_message(1, 2, "second")).await.unwrap();

        assert!(m2.id > m1.id);
        assert!(!m1.delivered);
        assert!(!m1.read);
    }

    #[tokio::test]
    async fn test_find_undelivered_ordered() {
        let store = MemoryStore::new();
        let m1 = store.create(new_message(1, 2, "a")).await.unwrap();
        let m2 = store.create(new_message(3, 2, "b")).await.unwrap();
        let other = store.create(new_message(1, 9, "elsewhere")).await.unwrap();

        store.mark_delivered(&[other.id]).await.unwrap();

        let pending = store.find_undelivered(2).await.unwrap();
        assert_eq!(
            pending.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![m1.id, m2.id]
        );

        let pending = store.find_undelivered(9).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_mark_delivered_keeps_first_timestamp() {
        let store = MemoryStore::new();
        let m = store.create(new_message(1, 2, "hi")).await.unwrap();

        store.mark_delivered(&[m.id]).await.unwrap();
        let first = store.message(m.id).unwrap();
        assert!(first.delivered);
        let stamp = first.delivered_at;
        assert!(stamp.is_some());

        // Marking again keeps delivered=true and the original timestamp.
        store.mark_delivered(&[m.id]).await.unwrap();
        let second = store.message(m.id).unwrap();
        assert!(second.delivered);
        assert_eq!(second.delivered_at, stamp);
    }

    #[tokio::test]
    async fn test_mark_read_scoped_to_counterpart() {
        let store = MemoryStore::new();
        store.create(new_message(1, 2, "from 1")).await.unwrap();
        store.create(new_message(1, 2, "also from 1")).await.unwrap();
        store.create(new_message(3, 2, "from 3")).await.unwrap();

        let marked = store.mark_read(2, 1).await.unwrap();
        assert_eq!(marked, 2);
        assert_eq!(store.count_unread(2).await.unwrap(), 1);

        // Nothing left to mark for that counterpart.
        let marked = store.mark_read(2, 1).await.unwrap();
        assert_eq!(marked, 0);
    }

    #[tokio::test]
    async fn test_status_defaults_to_offline() {
        let store = MemoryStore::new();
        assert_eq!(store.status(5).await.unwrap(), (Presence::Offline, None));

        store
            .update_status(5, Presence::Away, Some("brb"))
            .await
            .unwrap();
        assert_eq!(
            store.status(5).await.unwrap(),
            (Presence::Away, Some("brb".to_string()))
        );

        // Away text is cleared when leaving Away, even if one is passed.
        store
            .update_status(5, Presence::Online, Some("stale"))
            .await
            .unwrap();
        assert_eq!(store.status(5).await.unwrap(), (Presence::Online, None));
    }

    #[tokio::test]
    async fn test_buddy_edges_are_directed() {
        let store = MemoryStore::new();
        store.add_buddy(1, 2);
        store.add_buddy(3, 2);

        let mut watchers = store.watchers_of(2).await.unwrap();
        watchers.sort_unstable();
        assert_eq!(watchers, vec![1, 3]);

        // The reverse direction is not implied.
        assert!(store.watchers_of(1).await.unwrap().is_empty());
        assert_eq!(store.buddies_of(1).await.unwrap(), vec![2]);

        store.remove_buddy(1, 2);
        assert_eq!(store.watchers_of(2).await.unwrap(), vec![3]);
    }
}
