//! Error types for humlink-core

/// Result type alias for frame operations
pub type Result<T> = std::result::Result<T, Error>;

/// Frame encoding/decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Buffer cannot hold even an empty frame
    #[error("Frame too short: expected at least {expected} bytes, got {actual} bytes")]
    TooShort {
        expected: usize,
        actual: usize,
    },

    /// Leading marker is not the response header
    #[error("Bad header marker: expected 0x{expected:04X}, found 0x{found:04X}")]
    BadHeader {
        expected: u16,
        found: u16,
    },

    /// Checksum verification failed
    #[error("Checksum mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    ChecksumMismatch {
        expected: u16,
        received: u16,
    },

    /// Frame is shorter than the variant its command code announces
    #[error("Frame too short for 0x{command:02X}: expected {expected} bytes, got {actual} bytes")]
    TooShortForVariant {
        command: u8,
        expected: usize,
        actual: usize,
    },

    /// Command code matches no known response and no ACK/NACK
    #[error("Unknown command code: 0x{0:02X}")]
    UnknownCommand(u8),

    /// A field holds a value outside its defined range
    #[error("Invalid {field}: 0x{value:02X}")]
    InvalidField {
        field: &'static str,
        value: u8,
    },

    /// Payload too large
    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge {
        size: usize,
        max: usize,
    },

    /// Payload given to a command that takes none
    #[error("Command 0x{0:02X} takes no payload")]
    UnexpectedPayload(u8),
}

impl Error {
    /// Check if the error concerns a received frame (discard it, keep the link)
    pub fn is_framing(&self) -> bool {
        !matches!(self, Self::PayloadTooLarge { .. } | Self::UnexpectedPayload(_))
    }
}
