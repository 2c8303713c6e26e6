//! License errors

use std::io;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid token size: expected {expected} bytes, got {actual} bytes")]
    InvalidTokenSize { expected: usize, actual: usize },

    #[error("Invalid activation key: {0}")]
    InvalidActivationKey(String),

    #[error("Stored token is not valid hex: {0}")]
    CorruptToken(#[from] hex::FromHexError),

    #[error("Key store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Key store format error: {0}")]
    KeyStore(String),

    #[error("No data directory available for the key store")]
    NoDataDir,

    #[error("License authority unreachable: {0}")]
    Connect(#[source] humlink_transport::Error),

    #[error("Failed to send validation request: {0}")]
    Send(#[source] humlink_transport::Error),

    #[error("No response from license authority within {0:?}")]
    Timeout(Duration),

    #[error("Empty response from license authority")]
    EmptyResponse,

    #[error("License authority connection failed: {0}")]
    Receive(#[source] humlink_transport::Error),
}

impl Error {
    /// Check if the encrypted channel to the authority could not be established
    pub fn is_channel_failure(&self) -> bool {
        matches!(self, Self::Connect(_))
    }

    /// Check if trying again later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Send(_) | Self::Timeout(_) | Self::Receive(_)
        )
    }

    /// Check if an operator has to fix something before retrying
    pub fn requires_operator(&self) -> bool {
        matches!(
            self,
            Self::InvalidActivationKey(_) | Self::CorruptToken(_) | Self::KeyStore(_) | Self::NoDataDir
        )
    }
}
