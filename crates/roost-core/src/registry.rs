//! Session registry.
//!
//! The registry is the one piece of mutable state shared by every connection
//! task: a bidirectional index of connections and users, and the sole source
//! of truth for "is user X reachable now". Critical sections are short map
//! mutations; outbound emission is a non-blocking enqueue onto each session's
//! writer channel, so no lock is ever held across socket or store I/O.

use crate::session::{ConnectionId, Session};
use dashmap::DashMap;
use roost_protocol::{Presence, ServerFrame, UserId};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Sender half of a session's outbound event queue. The receiving end is
/// owned by the connection's writer task.
pub type EventSender = mpsc::UnboundedSender<ServerFrame>;

struct SessionSlot {
    session: Session,
    outbox: EventSender,
}

#[derive(Default)]
struct UserEntry {
    sessions: HashMap<ConnectionId, SessionSlot>,
}

/// Outcome of removing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovedSession {
    /// The user that owned the removed connection.
    pub user_id: UserId,
    /// True if this was the user's last session (1 to 0 transition).
    pub went_offline: bool,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy)]
pub struct RegistryStats {
    /// Number of reachable users.
    pub user_count: usize,
    /// Number of live sessions.
    pub session_count: usize,
}

/// In-memory bidirectional index of sessions and users.
///
/// Explicitly constructed and injected; there is no process-wide instance.
pub struct SessionRegistry {
    /// Users with at least one live session.
    users: DashMap<UserId, UserEntry>,
    /// Reverse index: connection -> owning user.
    connections: DashMap<ConnectionId, UserId>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            connections: DashMap::new(),
        }
    }

    /// Register a new session.
    ///
    /// Returns `true` if this was the user's first session (0 to 1
    /// transition). A new session adopts the presence snapshot of the user's
    /// existing sessions, or starts Online.
    ///
    /// Safe under concurrent calls for different users and for the same user
    /// from multiple connections: the transition edge is detected inside the
    /// per-user entry lock.
    pub fn add_session(
        &self,
        user_id: UserId,
        connection_id: impl Into<ConnectionId>,
        display_name: impl Into<String>,
        outbox: EventSender,
    ) -> bool {
        let connection_id = connection_id.into();
        let came_online;
        {
            let mut entry = self.users.entry(user_id).or_default();
            came_online = entry.sessions.is_empty();

            let mut session = Session::new(connection_id.clone(), user_id, display_name);
            if let Some(slot) = entry.sessions.values().next() {
                session.presence = slot.session.presence;
                session.away_text = slot.session.away_text.clone();
            }

            entry
                .sessions
                .insert(connection_id.clone(), SessionSlot { session, outbox });
        }
        self.connections.insert(connection_id.clone(), user_id);

        debug!(
            user = user_id,
            connection = %connection_id,
            came_online,
            "Session added"
        );
        came_online
    }

    /// Remove one session.
    ///
    /// Returns `None` if the connection id is unknown (already cleaned up) -
    /// that is a no-op, not an error.
    pub fn remove_session(&self, connection_id: &str) -> Option<RemovedSession> {
        let (_, user_id) = self.connections.remove(connection_id)?;

        let went_offline = match self.users.get_mut(&user_id) {
            Some(mut entry) => {
                entry.sessions.remove(connection_id);
                entry.sessions.is_empty()
            }
            None => false,
        };
        if went_offline {
            // Re-checked under the entry lock: a concurrent connect between
            // the guard drop and this call keeps the entry alive.
            self.users.remove_if(&user_id, |_, e| e.sessions.is_empty());
        }

        debug!(
            user = user_id,
            connection = %connection_id,
            went_offline,
            "Session removed"
        );
        Some(RemovedSession {
            user_id,
            went_offline,
        })
    }

    /// Update a session's last-activity timestamp. No-op if unknown.
    pub fn touch_activity(&self, connection_id: &str) {
        let Some(user_id) = self.connections.get(connection_id).map(|r| *r.value()) else {
            return;
        };
        if let Some(mut entry) = self.users.get_mut(&user_id) {
            if let Some(slot) = entry.sessions.get_mut(connection_id) {
                slot.session.touch();
            }
        }
    }

    /// Whether the user has at least one live session.
    #[must_use]
    pub fn is_reachable(&self, user_id: UserId) -> bool {
        self.users
            .get(&user_id)
            .map(|e| !e.sessions.is_empty())
            .unwrap_or(false)
    }

    /// Connection ids of the user's live sessions (empty if unreachable).
    #[must_use]
    pub fn sessions_for(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.users
            .get(&user_id)
            .map(|e| e.sessions.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Fan an event out to every session of a user.
    ///
    /// Returns `true` iff at least one session existed. A closed outbox means
    /// the writer task is already tearing down; transport failure is outside
    /// this contract.
    pub fn emit_to_user(&self, user_id: UserId, frame: &ServerFrame) -> bool {
        let Some(entry) = self.users.get(&user_id) else {
            return false;
        };
        if entry.sessions.is_empty() {
            return false;
        }
        for slot in entry.sessions.values() {
            let _ = slot.outbox.send(frame.clone());
        }
        trace!(
            user = user_id,
            frame = frame.name(),
            sessions = entry.sessions.len(),
            "Emitted to user"
        );
        true
    }

    /// Snapshot of every live session, for the idle monitor.
    #[must_use]
    pub fn all_sessions(&self) -> Vec<Session> {
        self.users
            .iter()
            .flat_map(|e| {
                e.sessions
                    .values()
                    .map(|s| s.session.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Update the cached presence snapshot on all of a user's sessions.
    ///
    /// Returns `false` if the user has no sessions.
    pub fn set_presence(
        &self,
        user_id: UserId,
        presence: Presence,
        away_text: Option<String>,
    ) -> bool {
        let Some(mut entry) = self.users.get_mut(&user_id) else {
            return false;
        };
        for slot in entry.sessions.values_mut() {
            slot.session.presence = presence;
            slot.session.away_text = away_text.clone();
        }
        true
    }

    /// The user's current presence snapshot, if they have any session.
    #[must_use]
    pub fn presence_of(&self, user_id: UserId) -> Option<(Presence, Option<String>)> {
        self.users.get(&user_id).and_then(|e| {
            e.sessions
                .values()
                .next()
                .map(|s| (s.session.presence, s.session.away_text.clone()))
        })
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            user_count: self.users.len(),
            session_count: self.connections.len(),
        }
    }

    /// Backdate a session's last-activity timestamp, for idle tests.
    #[cfg(test)]
    pub(crate) fn backdate_activity(&self, connection_id: &str, millis_ago: u64) {
        let Some(user_id) = self.connections.get(connection_id).map(|r| *r.value()) else {
            return;
        };
        if let Some(mut entry) = self.users.get_mut(&user_id) {
            if let Some(slot) = entry.sessions.get_mut(connection_id) {
                slot.session.last_activity =
                    slot.session.last_activity.saturating_sub(millis_ago);
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
