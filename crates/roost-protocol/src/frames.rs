//! Frame types for the roost protocol.
//!
//! Frames are the messages exchanged between chat clients and the server.
//! Client and server frames are separate closed enums so that an unhandled
//! event kind is a compile error, not a silent runtime no-op.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A user identifier, assigned by the account collaborator.
pub type UserId = u64;

/// A message identifier, assigned by the message store.
pub type MessageId = u64;

/// Application error codes carried by [`ServerFrame::Error`].
pub mod codes {
    /// Requested presence value is not one of the recognized states.
    pub const INVALID_STATUS: u16 = 1001;
    /// Message content is empty or blank.
    pub const EMPTY_MESSAGE: u16 = 1002;
    /// Recipient id is missing or malformed.
    pub const INVALID_RECIPIENT: u16 = 1003;
    /// Malformed or oversized frame.
    pub const PROTOCOL: u16 = 1400;
    /// Internal server error (persistence unavailable, etc.).
    pub const INTERNAL: u16 = 1500;
}

/// Presence value shown to buddies.
///
/// `Offline` is never a requestable target: it is the absence of any session
/// for a user (or an Invisible user as seen by their buddies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Away,
    Invisible,
    Offline,
}

impl Presence {
    /// Whether a client may request this presence via a status change.
    #[must_use]
    pub fn is_requestable(self) -> bool {
        !matches!(self, Presence::Offline)
    }
}

impl FromStr for Presence {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Presence::Online),
            "away" => Ok(Presence::Away),
            "invisible" => Ok(Presence::Invisible),
            "offline" => Ok(Presence::Offline),
            _ => Err("unrecognized presence value"),
        }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Presence::Online => "online",
            Presence::Away => "away",
            Presence::Invisible => "invisible",
            Presence::Offline => "offline",
        };
        write!(f, "{s}")
    }
}

/// A chat message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Store-assigned message id.
    pub id: MessageId,
    /// Sender user id.
    pub from: UserId,
    /// Recipient user id.
    pub to: UserId,
    /// Message content.
    pub content: String,
    /// Creation timestamp, milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Set on synthesized away-message replies so clients can render them
    /// distinctly from messages the user typed.
    #[serde(default)]
    pub auto_response: bool,
}

/// A frame sent by a client.
///
/// The connection itself carries the authenticated identity; none of these
/// frames name the acting user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Request a presence change.
    ///
    /// `status` stays a string on the wire: an unrecognized value must be
    /// answered with an error to this socket only, not fail frame decoding.
    #[serde(rename = "status-change")]
    StatusChange {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        away_text: Option<String>,
    },

    /// Send a direct message.
    #[serde(rename = "message:send")]
    SendMessage { to: UserId, content: String },

    /// Mark all messages from `from` to the acting user as read.
    #[serde(rename = "message:read")]
    MarkRead { from: UserId },

    /// Typing indicator, best-effort.
    #[serde(rename = "typing")]
    Typing { to: UserId, is_typing: bool },

    /// Keepalive; touches activity and is echoed back.
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

impl ClientFrame {
    /// Short frame name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientFrame::StatusChange { .. } => "status-change",
            ClientFrame::SendMessage { .. } => "message:send",
            ClientFrame::MarkRead { .. } => "message:read",
            ClientFrame::Typing { .. } => "typing",
            ClientFrame::Heartbeat => "heartbeat",
        }
    }
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// First frame on every connection.
    #[serde(rename = "connection-established")]
    ConnectionEstablished {
        user_id: UserId,
        /// Buddies of this user that are currently reachable (and not
        /// Invisible).
        reachable_buddies: Vec<UserId>,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat_ms: u64,
        /// Server protocol version.
        protocol: crate::version::Version,
    },

    /// A buddy became reachable.
    #[serde(rename = "buddy:online")]
    BuddyOnline {
        user_id: UserId,
        display_name: String,
    },

    /// A buddy became unreachable (or went invisible).
    #[serde(rename = "buddy:offline")]
    BuddyOffline { user_id: UserId },

    /// A buddy changed their displayed presence.
    #[serde(rename = "buddy:status-change")]
    BuddyStatusChange {
        user_id: UserId,
        status: Presence,
        #[serde(skip_serializing_if = "Option::is_none")]
        away_text: Option<String>,
    },

    /// An inbound chat message (live or part of a backlog flush).
    #[serde(rename = "message:receive")]
    MessageReceive { message: WireMessage },

    /// Acknowledgement that a sent message was persisted.
    #[serde(rename = "message:sent")]
    MessageSent {
        message_id: MessageId,
        created_at: u64,
    },

    /// Outcome of the delivery attempt for a sent message.
    #[serde(rename = "message:delivery-status")]
    MessageDeliveryStatus {
        message_id: MessageId,
        delivered: bool,
        recipient_online: bool,
        /// The recipient's standing away text, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        away_text: Option<String>,
    },

    /// The counterpart read the conversation.
    #[serde(rename = "message:read")]
    MessageRead { reader_id: UserId },

    /// Relayed typing indicator.
    #[serde(rename = "typing")]
    Typing { from: UserId, is_typing: bool },

    /// Summary after flushing queued messages on reconnect, so clients can
    /// distinguish a backlog flush from live delivery.
    #[serde(rename = "offline-backlog-delivered")]
    BacklogDelivered {
        count: u64,
        messages: Vec<WireMessage>,
    },

    /// Heartbeat echo.
    #[serde(rename = "heartbeat:ack")]
    HeartbeatAck,

    /// Error scoped to this connection; never broadcast.
    #[serde(rename = "error")]
    Error { code: u16, message: String },
}

impl ServerFrame {
    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a new BuddyOnline frame.
    #[must_use]
    pub fn buddy_online(user_id: UserId, display_name: impl Into<String>) -> Self {
        ServerFrame::BuddyOnline {
            user_id,
            display_name: display_name.into(),
        }
    }

    /// Create a new BuddyOffline frame.
    #[must_use]
    pub fn buddy_offline(user_id: UserId) -> Self {
        ServerFrame::BuddyOffline { user_id }
    }

    /// Create a new BuddyStatusChange frame.
    #[must_use]
    pub fn buddy_status(user_id: UserId, status: Presence, away_text: Option<String>) -> Self {
        ServerFrame::BuddyStatusChange {
            user_id,
            status,
            away_text,
        }
    }

    /// Create a new MessageReceive frame.
    #[must_use]
    pub fn receive(message: WireMessage) -> Self {
        ServerFrame::MessageReceive { message }
    }

    /// Short frame name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerFrame::ConnectionEstablished { .. } => "connection-established",
            ServerFrame::BuddyOnline { .. } => "buddy:online",
            ServerFrame::BuddyOffline { .. } => "buddy:offline",
            ServerFrame::BuddyStatusChange { .. } => "buddy:status-change",
            ServerFrame::MessageReceive { .. } => "message:receive",
            ServerFrame::MessageSent { .. } => "message:sent",
            ServerFrame::MessageDeliveryStatus { .. } => "message:delivery-status",
            ServerFrame::MessageRead { .. } => "message:read",
            ServerFrame::Typing { .. } => "typing",
            ServerFrame::BacklogDelivered { .. } => "offline-backlog-delivered",
            ServerFrame::HeartbeatAck => "heartbeat:ack",
            ServerFrame::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_from_str() {
        assert_eq!("online".parse::<Presence>(), Ok(Presence::Online));
        assert_eq!("away".parse::<Presence>(), Ok(Presence::Away));
        assert_eq!("invisible".parse::<Presence>(), Ok(Presence::Invisible));
        assert_eq!("offline".parse::<Presence>(), Ok(Presence::Offline));
        assert!("busy".parse::<Presence>().is_err());
        assert!("Online".parse::<Presence>().is_err());
    }

    #[test]
    fn test_presence_requestable() {
        assert!(Presence::Online.is_requestable());
        assert!(Presence::Away.is_requestable());
        assert!(Presence::Invisible.is_requestable());
        assert!(!Presence::Offline.is_requestable());
    }

    #[test]
    fn test_presence_display_roundtrip() {
        for p in [
            Presence::Online,
            Presence::Away,
            Presence::Invisible,
            Presence::Offline,
        ] {
            assert_eq!(p.to_string().parse::<Presence>(), Ok(p));
        }
    }

    #[test]
    fn test_frame_names() {
        let frame = ClientFrame::SendMessage {
            to: 7,
            content: "hi".into(),
        };
        assert_eq!(frame.name(), "message:send");

        let frame = ServerFrame::error(codes::EMPTY_MESSAGE, "empty message");
        assert_eq!(frame.name(), "error");
    }
}
