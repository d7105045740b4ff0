//! # roost-core
//!
//! Presence tracking and message delivery for the roost chat server.
//!
//! This crate provides the building blocks the server composes:
//!
//! - **SessionRegistry** - who is reachable right now, and over which
//!   connections
//! - **PresenceFanout** - buddy-scoped presence notifications and the
//!   status-change protocol
//! - **MessageDispatcher** - direct messages, read marks, typing indicators
//! - **RedeliveryCoordinator** - offline backlog flush on reconnect
//! - **IdleMonitor** - auto-away for inactive sessions
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────────┐
//! │  Connection │────▶│  Dispatcher  │────▶│ SessionRegistry │
//! └─────────────┘     └──────────────┘     └─────────────────┘
//!                            │                      ▲
//!                            ▼                      │
//!                     ┌──────────────┐     ┌─────────────────┐
//!                     │    Stores    │     │ PresenceFanout  │
//!                     └──────────────┘     └─────────────────┘
//! ```
//!
//! Everything is explicitly constructed and injected by the server's startup
//! sequence; there is no global mutable state.

pub mod backlog;
pub mod dispatcher;
pub mod error;
pub mod idle;
pub mod presence;
pub mod registry;
pub mod session;

pub use backlog::RedeliveryCoordinator;
pub use dispatcher::{DispatchOutcome, MessageDispatcher};
pub use error::CoreError;
pub use idle::{IdleConfig, IdleMonitor, IdleMonitorHandle};
pub use presence::PresenceFanout;
pub use registry::{EventSender, RegistryStats, SessionRegistry};
pub use session::{generate_connection_id, now_millis, ConnectionId, Session};
