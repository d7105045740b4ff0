//! # roost-protocol
//!
//! Wire protocol definitions for the roost chat server.
//!
//! This crate defines the binary protocol spoken between chat clients and the
//! server: frame types, the codec, and versioning.
//!
//! ## Frame Types
//!
//! - [`ClientFrame`] - status changes, messages, read marks, typing, heartbeat
//! - [`ServerFrame`] - buddy presence events, message delivery, backlog
//!   flushes, acks and errors
//!
//! ## Example
//!
//! ```rust
//! use roost_protocol::{codec, ClientFrame};
//!
//! let frame = ClientFrame::SendMessage { to: 42, content: "hello".into() };
//!
//! // Encode and decode
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded: ClientFrame = codec::decode(&encoded).unwrap();
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::ProtocolError;
pub use frames::{codes, ClientFrame, MessageId, Presence, ServerFrame, UserId, WireMessage};
pub use version::{Version, PROTOCOL_VERSION};
