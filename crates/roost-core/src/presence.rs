//! Presence fan-out.
//!
//! Pure orchestration with no state of its own: computes who should hear
//! about a presence change (users who hold the subject as a buddy, and are
//! themselves reachable) and pushes the event through the registry. Also owns
//! the status-change protocol and the connect/disconnect edges.

use crate::backlog::RedeliveryCoordinator;
use crate::error::CoreError;
use crate::registry::SessionRegistry;
use roost_protocol::{Presence, ServerFrame, UserId};
use roost_store::{BuddyStore, UserStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Presence fan-out and status-change protocol.
pub struct PresenceFanout {
    registry: Arc<SessionRegistry>,
    users: Arc<dyn UserStore>,
    buddies: Arc<dyn BuddyStore>,
    redelivery: Arc<RedeliveryCoordinator>,
}

impl PresenceFanout {
    /// Create a new fan-out service.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        users: Arc<dyn UserStore>,
        buddies: Arc<dyn BuddyStore>,
        redelivery: Arc<RedeliveryCoordinator>,
    ) -> Self {
        Self {
            registry,
            users,
            buddies,
            redelivery,
        }
    }

    /// Push `frame` to every reachable user who holds `user_id` as a buddy.
    ///
    /// Returns the number of users notified.
    ///
    /// # Errors
    ///
    /// If the buddy lookup fails the whole notification fails; the caller
    /// surfaces it to the originating connection. There is no partial,
    /// silently-swallowed fan-out.
    pub async fn notify_buddies(
        &self,
        user_id: UserId,
        frame: ServerFrame,
    ) -> Result<usize, CoreError> {
        let watchers = self.buddies.watchers_of(user_id).await?;

        let mut notified = 0;
        for watcher in watchers {
            if self.registry.emit_to_user(watcher, &frame) {
                notified += 1;
            }
        }
        debug!(
            user = user_id,
            frame = frame.name(),
            notified,
            "Presence fan-out"
        );
        Ok(notified)
    }

    /// Explicit status-change protocol.
    ///
    /// Persists the new state, updates the registry snapshot for all of the
    /// user's sessions, then notifies buddies. Invisible is announced to
    /// buddies as offline while the user stays reachable for messaging.
    ///
    /// # Errors
    ///
    /// `InvalidStatus` if the target is not requestable (Offline is the
    /// absence of sessions, never a target); store errors propagate.
    pub async fn set_status(
        &self,
        user_id: UserId,
        target: Presence,
        away_text: Option<String>,
    ) -> Result<(), CoreError> {
        if !target.is_requestable() {
            return Err(CoreError::InvalidStatus(target.to_string()));
        }
        // Away text only exists while Away; entering any other state clears it.
        let away_text = match target {
            Presence::Away => away_text,
            _ => None,
        };

        self.users
            .update_status(user_id, target, away_text.as_deref())
            .await?;
        self.registry.set_presence(user_id, target, away_text.clone());

        let frame = match target {
            Presence::Invisible => ServerFrame::buddy_offline(user_id),
            _ => ServerFrame::buddy_status(user_id, target, away_text),
        };
        self.notify_buddies(user_id, frame).await?;

        info!(user = user_id, status = %target, "Status changed");
        Ok(())
    }

    /// Idle-driven demotion to Away.
    ///
    /// No-op unless the user's current presence is Online, which also
    /// guarantees a manually set away text is never overwritten. Returns
    /// whether the user was demoted.
    pub async fn auto_away(&self, user_id: UserId, away_text: String) -> Result<bool, CoreError> {
        match self.registry.presence_of(user_id) {
            Some((Presence::Online, _)) => {}
            _ => return Ok(false),
        }

        self.users
            .update_status(user_id, Presence::Away, Some(&away_text))
            .await?;
        self.registry
            .set_presence(user_id, Presence::Away, Some(away_text.clone()));
        self.notify_buddies(
            user_id,
            ServerFrame::buddy_status(user_id, Presence::Away, Some(away_text)),
        )
        .await?;

        info!(user = user_id, "Idle, demoted to away");
        Ok(true)
    }

    /// Connect edge. On the user's first session (0 to 1): durable Online
    /// write, offline backlog flush to the new session, then the buddy
    /// announcement. Redelivery completes before the fan-out so buddies
    /// never message a user mid-flush. Returns the number of backlog
    /// messages flushed.
    pub async fn session_connected(
        &self,
        user_id: UserId,
        display_name: &str,
        came_online: bool,
    ) -> Result<u64, CoreError> {
        if !came_online {
            return Ok(0);
        }

        self.users
            .update_status(user_id, Presence::Online, None)
            .await?;
        let flushed = self.redelivery.flush_for(user_id).await?;
        self.notify_buddies(user_id, ServerFrame::buddy_online(user_id, display_name))
            .await?;
        Ok(flushed)
    }

    /// Disconnect edge. On the user's last session (1 to 0), write Offline
    /// durably and announce to buddies.
    pub async fn session_disconnected(
        &self,
        user_id: UserId,
        went_offline: bool,
    ) -> Result<(), CoreError> {
        if !went_offline {
            return Ok(());
        }

        if let Err(e) = self
            .users
            .update_status(user_id, Presence::Offline, None)
            .await
        {
            // The user is already gone; the durable write failing must not
            // suppress the offline announcement to buddies.
            warn!(user = user_id, error = %e, "Offline status write failed");
        }
        self.notify_buddies(user_id, ServerFrame::buddy_offline(user_id))
            .await?;
        Ok(())
    }

    /// The user's currently-reachable buddies (excluding Invisible ones),
    /// for the connection-established frame.
    pub async fn roster(&self, user_id: UserId) -> Result<Vec<UserId>, CoreError> {
        let buddies = self.buddies.buddies_of(user_id).await?;
        Ok(buddies
            .into_iter()
            .filter(|b| match self.registry.presence_of(*b) {
                Some((Presence::Invisible, _)) => false,
                Some(_) => true,
                None => false,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roost_protocol::codes;
    use roost_store::{MemoryStore, StoreError};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn harness() -> (Arc<SessionRegistry>, Arc<MemoryStore>, PresenceFanout) {
        let registry = Arc::new(SessionRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let redelivery = Arc::new(RedeliveryCoordinator::new(
            Arc::clone(&registry),
            store.clone() as Arc<dyn roost_store::MessageStore>,
        ));
        let fanout = PresenceFanout::new(
            Arc::clone(&registry),
            store.clone() as Arc<dyn UserStore>,
            store.clone() as Arc<dyn BuddyStore>,
            redelivery,
        );
        (registry, store, fanout)
    }

    fn connect(
        registry: &SessionRegistry,
        user_id: UserId,
        connection_id: &str,
    ) -> UnboundedReceiver<ServerFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.add_session(user_id, connection_id, format!("user-{user_id}"), tx);
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<ServerFrame>) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_fanout_reaches_only_reachable_watchers() {
        let (registry, store, fanout) = harness();
        // 2 and 3 hold 1 as a buddy; 4 does not.
        store.add_buddy(2, 1);
        store.add_buddy(3, 1);
        store.add_buddy(4, 9);

        let mut rx2 = connect(&registry, 2, "conn-2");
        let mut rx4 = connect(&registry, 4, "conn-4");
        // 3 is not connected.

        let notified = fanout
            .notify_buddies(1, ServerFrame::buddy_online(1, "alice"))
            .await
            .unwrap();

        assert_eq!(notified, 1);
        assert_eq!(drain(&mut rx2).len(), 1);
        assert!(drain(&mut rx4).is_empty());
    }

    #[tokio::test]
    async fn test_scenario_a_online_then_offline_exactly_once() {
        let (registry, store, fanout) = harness();
        store.add_buddy(2, 1);
        let mut rx2 = connect(&registry, 2, "conn-b");

        // A connects with zero prior sessions, then disconnects.
        let (tx, _rx) = mpsc::unbounded_channel();
        let came_online = registry.add_session(1, "conn-a", "alice", tx);
        fanout
            .session_connected(1, "alice", came_online)
            .await
            .unwrap();

        let removed = registry.remove_session("conn-a").unwrap();
        fanout
            .session_disconnected(removed.user_id, removed.went_offline)
            .await
            .unwrap();

        let frames = drain(&mut rx2);
        let online: Vec<_> = frames
            .iter()
            .filter(|f| matches!(f, ServerFrame::BuddyOnline { user_id: 1, .. }))
            .collect();
        let offline: Vec<_> = frames
            .iter()
            .filter(|f| matches!(f, ServerFrame::BuddyOffline { user_id: 1 }))
            .collect();
        assert_eq!(online.len(), 1);
        assert_eq!(offline.len(), 1);
    }

    #[tokio::test]
    async fn test_second_session_produces_no_fanout() {
        let (registry, store, fanout) = harness();
        store.add_buddy(2, 1);
        let mut rx2 = connect(&registry, 2, "conn-b");

        let _rx1a = connect(&registry, 1, "conn-a1");
        fanout.session_connected(1, "alice", true).await.unwrap();
        drain(&mut rx2);

        // Second tab: count stays >= 1, no edge, no fan-out.
        let _rx1b = connect(&registry, 1, "conn-a2");
        fanout.session_connected(1, "alice", false).await.unwrap();

        let removed = registry.remove_session("conn-a1").unwrap();
        fanout
            .session_disconnected(removed.user_id, removed.went_offline)
            .await
            .unwrap();

        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_set_status_persists_and_notifies() {
        let (registry, store, fanout) = harness();
        store.add_buddy(2, 1);
        let _rx1 = connect(&registry, 1, "conn-a");
        let mut rx2 = connect(&registry, 2, "conn-b");

        fanout
            .set_status(1, Presence::Away, Some("lunch".to_string()))
            .await
            .unwrap();

        assert_eq!(
            UserStore::status(store.as_ref(), 1).await.unwrap(),
            (Presence::Away, Some("lunch".to_string()))
        );
        assert_eq!(
            registry.presence_of(1),
            Some((Presence::Away, Some("lunch".to_string())))
        );
        assert_eq!(
            drain(&mut rx2),
            vec![ServerFrame::buddy_status(
                1,
                Presence::Away,
                Some("lunch".to_string())
            )]
        );

        // Leaving Away clears the text.
        fanout.set_status(1, Presence::Online, None).await.unwrap();
        assert_eq!(
            UserStore::status(store.as_ref(), 1).await.unwrap(),
            (Presence::Online, None)
        );
    }

    #[tokio::test]
    async fn test_invisible_announced_as_offline_but_reachable() {
        let (registry, store, fanout) = harness();
        store.add_buddy(2, 1);
        let _rx1 = connect(&registry, 1, "conn-a");
        let mut rx2 = connect(&registry, 2, "conn-b");

        fanout
            .set_status(1, Presence::Invisible, None)
            .await
            .unwrap();

        assert_eq!(drain(&mut rx2), vec![ServerFrame::buddy_offline(1)]);
        // Still reachable to the server: messages keep flowing.
        assert!(registry.is_reachable(1));
    }

    #[tokio::test]
    async fn test_offline_target_is_rejected() {
        let (_registry, _store, fanout) = harness();

        let err = fanout
            .set_status(1, Presence::Offline, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_STATUS);
    }

    #[tokio::test]
    async fn test_auto_away_skips_non_online_users() {
        let (registry, store, fanout) = harness();
        store.add_buddy(2, 1);
        let _rx1 = connect(&registry, 1, "conn-a");
        let mut rx2 = connect(&registry, 2, "conn-b");

        fanout
            .set_status(1, Presence::Away, Some("manual text".to_string()))
            .await
            .unwrap();
        drain(&mut rx2);

        // The monitor must not overwrite a manually set away text.
        let demoted = fanout
            .auto_away(1, "Idle for 10 minutes".to_string())
            .await
            .unwrap();
        assert!(!demoted);
        assert_eq!(
            registry.presence_of(1),
            Some((Presence::Away, Some("manual text".to_string())))
        );
        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_roster_filters_unreachable_and_invisible() {
        let (registry, store, fanout) = harness();
        store.add_buddy(1, 2);
        store.add_buddy(1, 3);
        store.add_buddy(1, 4);

        let _rx2 = connect(&registry, 2, "conn-2");
        let _rx3 = connect(&registry, 3, "conn-3");
        registry.set_presence(3, Presence::Invisible, None);
        // 4 is not connected.

        let roster = fanout.roster(1).await.unwrap();
        assert_eq!(roster, vec![2]);
    }

    #[tokio::test]
    async fn test_buddy_lookup_failure_is_loud() {
        struct FailingBuddies;

        #[async_trait::async_trait]
        impl BuddyStore for FailingBuddies {
            async fn watchers_of(&self, _user_id: UserId) -> Result<Vec<UserId>, StoreError> {
                Err(StoreError::Unavailable("edge table down".into()))
            }
            async fn buddies_of(&self, _user_id: UserId) -> Result<Vec<UserId>, StoreError> {
                Err(StoreError::Unavailable("edge table down".into()))
            }
        }

        let registry = Arc::new(SessionRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let redelivery = Arc::new(RedeliveryCoordinator::new(
            Arc::clone(&registry),
            store.clone() as Arc<dyn roost_store::MessageStore>,
        ));
        let fanout = PresenceFanout::new(
            Arc::clone(&registry),
            store as Arc<dyn UserStore>,
            Arc::new(FailingBuddies),
            redelivery,
        );

        let err = fanout
            .notify_buddies(1, ServerFrame::buddy_online(1, "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Store(_)));
    }
}
