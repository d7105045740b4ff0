//! Idle detection.
//!
//! A fixed-interval sweep over live sessions demotes users who have been
//! inactive past the threshold to Away, through the same path as an explicit
//! status change. The monitor never promotes anyone back to Online; that
//! takes an explicit status change.

use crate::presence::PresenceFanout;
use crate::registry::SessionRegistry;
use crate::session::now_millis;
use roost_protocol::{Presence, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Idle monitor configuration.
#[derive(Debug, Clone)]
pub struct IdleConfig {
    /// Inactivity duration after which an Online session is demoted.
    pub threshold: Duration,
    /// How often the sweep runs.
    pub sweep_interval: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Generated system away text for idle demotions.
fn system_away_text(threshold: Duration) -> String {
    format!("Idle for {} minutes", threshold.as_secs() / 60)
}

/// Periodic idle sweep over the session registry.
pub struct IdleMonitor {
    registry: Arc<SessionRegistry>,
    fanout: Arc<PresenceFanout>,
    config: IdleConfig,
}

impl IdleMonitor {
    /// Create a new monitor.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        fanout: Arc<PresenceFanout>,
        config: IdleConfig,
    ) -> Self {
        Self {
            registry,
            fanout,
            config,
        }
    }

    /// Run one sweep. Returns the number of users demoted to Away.
    ///
    /// Only Online sessions are considered; Away, Invisible, and departed
    /// sessions are skipped, which also keeps the sweep idempotent within an
    /// idle episode and protects manually set away texts.
    pub async fn sweep_once(&self) -> usize {
        let now = now_millis();
        let mut idle_users: Vec<UserId> = Vec::new();
        for session in self.registry.all_sessions() {
            if session.presence != Presence::Online {
                continue;
            }
            if !session.is_idle(self.config.threshold, now) {
                continue;
            }
            if !idle_users.contains(&session.user_id) {
                idle_users.push(session.user_id);
            }
        }

        let mut demoted = 0;
        for user_id in idle_users {
            match self
                .fanout
                .auto_away(user_id, system_away_text(self.config.threshold))
                .await
            {
                Ok(true) => demoted += 1,
                Ok(false) => {}
                Err(e) => warn!(user = user_id, error = %e, "Auto-away failed"),
            }
        }
        if demoted > 0 {
            debug!(demoted, "Idle sweep");
        }
        demoted
    }

    /// Spawn the periodic sweep. The returned handle stops it
    /// deterministically on shutdown.
    pub fn spawn(self) -> IdleMonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                }
            }
            debug!("Idle monitor stopped");
        });
        IdleMonitorHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Handle owning the idle monitor task.
pub struct IdleMonitorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl IdleMonitorHandle {
    /// Stop the monitor and wait for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::RedeliveryCoordinator;
    use roost_protocol::ServerFrame;
    use roost_store::{MemoryStore, MessageStore, UserStore};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    const TEN_MINUTES_MS: u64 = 600_000;

    fn harness() -> (Arc<SessionRegistry>, Arc<MemoryStore>, IdleMonitor) {
        let registry = Arc::new(SessionRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let redelivery = Arc::new(RedeliveryCoordinator::new(
            Arc::clone(&registry),
            store.clone() as Arc<dyn MessageStore>,
        ));
        let fanout = Arc::new(PresenceFanout::new(
            Arc::clone(&registry),
            store.clone() as Arc<dyn UserStore>,
            store.clone() as Arc<dyn roost_store::BuddyStore>,
            redelivery,
        ));
        let monitor = IdleMonitor::new(Arc::clone(&registry), fanout, IdleConfig::default());
        (registry, store, monitor)
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
    async fn test_scenario_c_idle_session_demoted_once() {
        let (registry, store, monitor) = harness();
        store.add_buddy(2, 1);
        let _rx1 = connect(&registry, 1, "conn-a");
        let mut rx2 = connect(&registry, 2, "conn-b");

        // 11 minutes idle under a 10-minute threshold.
        registry.backdate_activity("conn-a", 11 * 60_000);

        assert_eq!(monitor.sweep_once().await, 1);

        let (status, text) = UserStore::status(store.as_ref(), 1).await.unwrap();
        assert_eq!(status, Presence::Away);
        assert_eq!(text.as_deref(), Some("Idle for 10 minutes"));

        // Buddy saw exactly one status change.
        let frames = drain(&mut rx2);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0],
            ServerFrame::BuddyStatusChange {
                user_id: 1,
                status: Presence::Away,
                ..
            }
        ));

        // Second sweep in the same idle episode does nothing.
        assert_eq!(monitor.sweep_once().await, 0);
        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_fresh_sessions_not_demoted() {
        let (registry, _store, monitor) = harness();
        let _rx1 = connect(&registry, 1, "conn-a");

        assert_eq!(monitor.sweep_once().await, 0);
        assert_eq!(registry.presence_of(1), Some((Presence::Online, None)));
    }

    #[tokio::test]
    async fn test_manual_away_text_survives_sweep() {
        let (registry, store, monitor) = harness();
        let _rx1 = connect(&registry, 1, "conn-a");

        registry.set_presence(1, Presence::Away, Some("brb".to_string()));
        store
            .update_status(1, Presence::Away, Some("brb"))
            .await
            .unwrap();
        registry.backdate_activity("conn-a", TEN_MINUTES_MS * 2);

        assert_eq!(monitor.sweep_once().await, 0);
        assert_eq!(
            registry.presence_of(1),
            Some((Presence::Away, Some("brb".to_string())))
        );
    }

    #[tokio::test]
    async fn test_invisible_sessions_skipped() {
        let (registry, _store, monitor) = harness();
        let _rx1 = connect(&registry, 1, "conn-a");

        registry.set_presence(1, Presence::Invisible, None);
        registry.backdate_activity("conn-a", TEN_MINUTES_MS * 2);

        assert_eq!(monitor.sweep_once().await, 0);
        assert_eq!(registry.presence_of(1), Some((Presence::Invisible, None)));
    }

    #[tokio::test]
    async fn test_one_idle_session_demotes_user_once() {
        let (registry, _store, monitor) = harness();
        let _rx1 = connect(&registry, 1, "conn-a");
        let _rx2 = connect(&registry, 1, "conn-b");

        registry.backdate_activity("conn-a", TEN_MINUTES_MS * 2);
        registry.backdate_activity("conn-b", TEN_MINUTES_MS * 2);

        // Two idle sessions, one user: one demotion.
        assert_eq!(monitor.sweep_once().await, 1);
    }

    #[tokio::test]
    async fn test_spawned_monitor_shuts_down() {
        let (_registry, _store, monitor) = harness();
        let handle = monitor.spawn();
        handle.shutdown().await;
    }
}
