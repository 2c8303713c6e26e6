//! Transport errors

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Invalid serial parameters {value:?}: {reason}")]
    InvalidSerialParams { value: String, reason: &'static str },

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Read timeout ({available} bytes buffered)")]
    ReadTimeout { available: usize },

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Receive buffer closed")]
    BufferClosed,

    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Invalid trust anchor: {0}")]
    TrustAnchor(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl Error {
    /// Check if the operation may succeed when tried again on the same link
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ReadTimeout { .. } | Self::WriteTimeout | Self::ConnectionTimeout
        )
    }
}
