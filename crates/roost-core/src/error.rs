//! Core errors.

use roost_protocol::{codes, ServerFrame};
use roost_store::StoreError;
use thiserror::Error;

/// Errors raised by the chat core.
///
/// Validation errors are reported only to the originating connection;
/// persistence failures are reported there too, as a generic internal error.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Requested presence is not a recognized, requestable value.
    #[error("Invalid status value: {0}")]
    InvalidStatus(String),

    /// Message content is empty or blank.
    #[error("Message content is empty")]
    EmptyMessage,

    /// Recipient id is missing or malformed.
    #[error("Invalid recipient")]
    InvalidRecipient,

    /// Persistence collaborator failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CoreError {
    /// The wire error code for this error.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            CoreError::InvalidStatus(_) => codes::INVALID_STATUS,
            CoreError::EmptyMessage => codes::EMPTY_MESSAGE,
            CoreError::InvalidRecipient => codes::INVALID_RECIPIENT,
            CoreError::Store(_) => codes::INTERNAL,
        }
    }

    /// Translate to an error frame for the originating connection.
    ///
    /// Store failures are deliberately reported without detail.
    #[must_use]
    pub fn to_frame(&self) -> ServerFrame {
        match self {
            CoreError::Store(_) => ServerFrame::error(codes::INTERNAL, "internal error"),
            other => ServerFrame::error(other.code(), other.to_string()),
        }
    }
}
