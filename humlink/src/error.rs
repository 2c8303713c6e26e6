//! High-level error types

use std::time::Duration;

use humlink_core::Command;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, Error>;

/// Result of one controller exchange
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] humlink_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] humlink_transport::Error),

    #[error("License error: {0}")]
    License(#[from] humlink_license::Error),

    #[error("Controller exchange failed: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registration requires an activation key")]
    MissingActivationKey,
}

impl Error {
    /// Check if an operator has to fix something before retrying
    pub fn requires_operator(&self) -> bool {
        match self {
            Self::License(e) => e.requires_operator(),
            Self::Config(_) | Self::MissingActivationKey => true,
            _ => false,
        }
    }
}

/// Failure of a single request/response exchange with the controller
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serial channel is not open")]
    NotOpen,

    #[error("Failed to write {command}: {source}")]
    WriteFailed {
        command: Command,
        #[source]
        source: humlink_transport::Error,
    },

    #[error("Cannot encode command: {0}")]
    Encode(#[source] humlink_core::Error),

    #[error("No complete response within {timeout:?} ({received} bytes received)")]
    Timeout { timeout: Duration, received: usize },

    #[error("Malformed response: {0}")]
    Decode(#[from] humlink_core::Error),

    #[error("{command} rejected by pad {pad_address}: error {error_code}")]
    Rejected {
        command: Command,
        pad_address: u8,
        error_code: u16,
    },

    #[error("Expected {expected} response, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Receive buffer closed")]
    ChannelClosed,
}

impl ProtocolError {
    /// Check if the link is still usable and the exchange may be repeated
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Decode(_) | Self::Rejected { .. } | Self::UnexpectedResponse { .. }
        )
    }

    /// Check if the response arrived but could not be decoded
    pub fn is_framing(&self) -> bool {
        matches!(self, Self::Decode(e) if e.is_framing())
    }
}
