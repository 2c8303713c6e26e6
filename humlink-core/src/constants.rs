//! Protocol constants

/// Header marker opening every host → controller frame (sent as `FE ED`)
pub const CMD_HEADER_MARKER: u16 = 0xFEED;

/// Header marker opening every controller → host frame (sent as `BE EF`)
pub const RSP_HEADER_MARKER: u16 = 0xBEEF;

/// End-of-transmission byte, sent twice after the checksum
pub const PROTOCOL_EOT: u8 = 0x04;

/// Positive acknowledge code
pub const ACK_CODE: u8 = 0x06;

/// Negative acknowledge code
pub const NAK_CODE: u8 = 0x15;

/// Command code carried by unsolicited notifications
pub const NOTIFY_COMMAND: u8 = 0x00;

/// Lowest notification code (NOTIFY_0)
pub const NOTIFY_FIRST: u8 = 0xF0;

/// Highest notification code (NOTIFY_7)
pub const NOTIFY_LAST: u8 = 0xF7;

/// Target mask addressing the controller itself
pub const CONTROLLER_MASK: u16 = 0x0001;

/// Target mask addressing every pad
pub const BROADCAST_MASK: u16 = 0xFFFF;

/// Fixed field widths
pub mod fields {
    /// Serial number string
    pub const SERIAL_ID_LEN: usize = 20;

    /// Firmware version string ("001.002.003")
    pub const FW_VERSION_LEN: usize = 15;

    /// Serial parameter string ("115200,8,n,1")
    pub const SERIAL_PARAM_LEN: usize = 20;

    /// Wi-Fi SSID
    pub const SSID_LEN: usize = 32;

    /// Wi-Fi passphrase
    pub const PASSWORD_LEN: usize = 64;
}

/// Frame envelope sizes
pub mod sizes {
    /// Header marker
    pub const HEADER: usize = 2;

    /// Checksum + two EOT bytes
    pub const TRAILER: usize = 4;

    /// Smallest buffer worth inspecting (header + trailer)
    pub const MIN_RESPONSE: usize = HEADER + TRAILER;

    /// Default read limit for a single response
    pub const MAX_RESPONSE: usize = 64;

    /// Command envelope without payload: header, mask, code, checksum, EOT x2
    pub const COMMAND_ENVELOPE: usize = 9;

    /// Largest payload the host ever sends (SSID + password)
    pub const MAX_COMMAND_PAYLOAD: usize = 96;
}

/// Default response timeout (milliseconds)
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;

/// Default write timeout (milliseconds)
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 1000;

/// Default reader poll interval (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;
