//! Session types.
//!
//! A session is one live transport connection for one authenticated user.
//! Sessions are created and destroyed by the registry at connect/disconnect
//! speed; everything else about a user lives in the persistence collaborator.

use roost_protocol::{Presence, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A connection identifier, unique for the lifetime of the process.
pub type ConnectionId = String;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static CONN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Generate a unique connection ID.
#[must_use]
pub fn generate_connection_id() -> ConnectionId {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = CONN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("conn_{:x}", timestamp.wrapping_add(counter))
}

/// State for a single live connection.
#[derive(Debug, Clone)]
pub struct Session {
    /// Connection ID.
    pub connection_id: ConnectionId,
    /// Owning user.
    pub user_id: UserId,
    /// Display name presented to buddies.
    pub display_name: String,
    /// When the connection was established.
    pub connected_at: u64,
    /// Last activity timestamp.
    pub last_activity: u64,
    /// The user's current displayed presence.
    pub presence: Presence,
    /// Away text, set while the presence is Away.
    pub away_text: Option<String>,
}

impl Session {
    /// Create a new session, Online with fresh timestamps.
    #[must_use]
    pub fn new(
        connection_id: impl Into<ConnectionId>,
        user_id: UserId,
        display_name: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            connection_id: connection_id.into(),
            user_id,
            display_name: display_name.into(),
            connected_at: now,
            last_activity: now,
            presence: Presence::Online,
            away_text: None,
        }
    }

    /// Update the last activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = now_millis();
    }

    /// Check if this session has been inactive for at least `threshold`.
    #[must_use]
    pub fn is_idle(&self, threshold: Duration, now: u64) -> bool {
        now.saturating_sub(self.last_activity) >= threshold.as_millis() as u64
    }
}
