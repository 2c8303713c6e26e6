//! Controller → host response frames
//!
//! Every response shares one envelope:
//!
//! ```text
//! ┌──────────┬────────────┬─────────┬──────────────┬──────────┬─────────┐
//! │  Header  │ PadAddress │ Command │     Body     │ Checksum │ EOT EOT │
//! │  BE EF   │   1 byte   │ 1 byte  │ per variant  │ (LE u16) │  04 04  │
//! └──────────┴────────────┴─────────┴──────────────┴──────────┴─────────┘
//! ```
//!
//! The checksum covers pad address, command and body. The command byte keys
//! the variant; ACK/NACK echo the code of the command they answer.

use std::fmt;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::{
    checksum,
    command::Command,
    constants::{
        fields, sizes, ACK_CODE, NAK_CODE, NOTIFY_COMMAND, NOTIFY_FIRST, NOTIFY_LAST,
        PROTOCOL_EOT, RSP_HEADER_MARKER,
    },
    error::{Error, Result},
    layout::{self, common, Field},
};

/// Offset table per response variant
pub mod offsets {
    use super::Field;
    use crate::constants::fields;

    pub mod serial_number {
        use super::*;
        pub const SERIAL_ID: Field = Field::new(4, fields::SERIAL_ID_LEN);
        pub const SIZE: usize = 28;
    }

    pub mod firmware_version {
        use super::*;
        pub const STM32: Field = Field::new(4, fields::FW_VERSION_LEN);
        pub const ESP32: Field = Field::new(19, fields::FW_VERSION_LEN);
        pub const SIZE: usize = 38;
    }

    pub mod sample_rate {
        pub const RATE: usize = 4;
        pub const SIZE: usize = 10;
    }

    pub mod channel_mask {
        pub const MASK: usize = 4;
        pub const SIZE: usize = 9;
    }

    pub mod status {
        use super::*;
        pub const ERROR_FLAGS: usize = 4;
        pub const TEMPERATURE: usize = 8;
        pub const SERIAL_PARAMS: Field = Field::new(9, fields::SERIAL_PARAM_LEN);
        pub const WIFI_SSID: Field = Field::new(29, fields::SSID_LEN);
        pub const WIFI_IP: usize = 61;
        pub const WIFI_MASK: usize = 65;
        pub const WIFI_GATEWAY: usize = 69;
        pub const SIZE: usize = 77;
    }

    pub mod frame {
        pub const TIMESTAMP: usize = 4;
        pub const FORCE_X: usize = 8;
        pub const MOMENT_X: usize = 14;
        pub const SIZE: usize = 24;
    }

    pub mod ack {
        pub const CODE: usize = 4;
        pub const SIZE: usize = 9;
    }

    pub mod nack {
        pub const CODE: usize = 4;
        pub const ERROR_CODE: usize = 5;
        pub const SIZE: usize = 11;
    }

    pub mod notify {
        pub const CODE: usize = 4;
        pub const SIZE: usize = 9;
    }
}

/// Smallest envelope that still carries pad address and command
const ENVELOPE_WITH_COMMAND: usize = sizes::MIN_RESPONSE + 2;

bitflags! {
    /// Measurement channels enabled on a pad
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Channels: u8 {
        const FORCE_X = 1 << 0;
        const FORCE_Y = 1 << 1;
        const FORCE_Z = 1 << 2;
        const MOMENT_X = 1 << 3;
        const MOMENT_Y = 1 << 4;
        const MOMENT_Z = 1 << 5;
    }
}

/// GET_SERIAL_NUMBER answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialNumber {
    pub pad_address: u8,
    pub serial_id: String,
}

/// GET_FW_VERSION answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub pad_address: u8,
    pub stm32: String,
    pub esp32: String,
}

/// GET_SAMPLING_RATE answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRate {
    pub pad_address: u8,
    pub rate: u16,
}

/// GET_CHANNEL_MASK answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMask {
    pub pad_address: u8,
    pub channels: Channels,
}

/// GET_STATUS answer (pad address 0 = controller)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub pad_address: u8,
    pub error_flags: u32,
    /// Degrees Celsius
    pub temperature: i8,
    pub serial_params: String,
    pub wifi_ssid: String,
    pub wifi_ip: Ipv4Addr,
    pub wifi_mask: Ipv4Addr,
    pub wifi_gateway: Ipv4Addr,
}

impl ControllerStatus {
    pub fn has_errors(&self) -> bool {
        self.error_flags != 0
    }
}

/// Force/moment sample, streamed or fetched from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForceFrame {
    pub pad_address: u8,
    /// START_STREAM for live samples, GET_FRAME for cached ones
    pub command: u8,
    pub timestamp: u32,
    pub force: [i16; 3],
    pub moment: [i16; 3],
}

/// Positive acknowledge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub pad_address: u8,
    pub command: u8,
}

/// Negative acknowledge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nack {
    pub pad_address: u8,
    pub command: u8,
    pub error_code: u16,
}

/// Unsolicited notification sent while streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notify {
    pub pad_address: u8,
    pub code: u8,
}

impl Notify {
    /// NOTIFY_n index (0..=7), `None` for a code outside the notify range
    pub fn index(&self) -> Option<u8> {
        (NOTIFY_FIRST..=NOTIFY_LAST)
            .contains(&self.code)
            .then(|| self.code - NOTIFY_FIRST)
    }
}

/// Decoded controller response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    SerialNumber(SerialNumber),
    FirmwareVersion(FirmwareVersion),
    SampleRate(SampleRate),
    ChannelMask(ChannelMask),
    Status(ControllerStatus),
    Frame(ForceFrame),
    Ack(Ack),
    Nack(Nack),
    Notify(Notify),
}

/// Fixed size of the data variant answering `code`, if it has one
pub fn variant_size(code: u8) -> Option<usize> {
    match Command::try_from(code).ok()? {
        Command::GetSerialNumber => Some(offsets::serial_number::SIZE),
        Command::GetFirmwareVersion => Some(offsets::firmware_version::SIZE),
        Command::GetSampleRate => Some(offsets::sample_rate::SIZE),
        Command::GetChannelMask => Some(offsets::channel_mask::SIZE),
        Command::GetStatus => Some(offsets::status::SIZE),
        Command::StartStream | Command::GetFrame => Some(offsets::frame::SIZE),
        _ => None,
    }
}

impl Response {
    /// Decode a response frame
    ///
    /// `buf` must hold exactly one frame: the checksum is read from its last
    /// four bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::TooShort`] below the envelope size
    /// - [`Error::BadHeader`] if the frame does not start with `BE EF`
    /// - [`Error::ChecksumMismatch`] if the body was corrupted
    /// - [`Error::TooShortForVariant`] if the frame is shorter than its variant
    /// - [`Error::UnknownCommand`] if nothing matches the command code
    ///
    /// # Examples
    ///
    /// ```
    /// use humlink_core::response::{self, Response};
    ///
    /// let mut body = b"SN12345".to_vec();
    /// body.resize(20, 0);
    /// let frame = response::seal(0, 0x24, &body);
    ///
    /// match Response::decode(&frame).unwrap() {
    ///     Response::SerialNumber(sn) => assert_eq!(sn.serial_id, "SN12345"),
    ///     other => panic!("unexpected {:?}", other),
    /// }
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let n = buf.len();

        if n < sizes::MIN_RESPONSE {
            return Err(Error::TooShort {
                expected: sizes::MIN_RESPONSE,
                actual: n,
            });
        }

        let header = u16::from_be_bytes([buf[0], buf[1]]);
        if header != RSP_HEADER_MARKER {
            return Err(Error::BadHeader {
                expected: RSP_HEADER_MARKER,
                found: header,
            });
        }

        let received = layout::read_u16_le(buf, n - sizes::TRAILER)?;
        let calculated = checksum::calculate(&buf[sizes::HEADER..n - sizes::TRAILER]);
        if calculated != received {
            return Err(Error::ChecksumMismatch {
                expected: calculated,
                received,
            });
        }

        if n < ENVELOPE_WITH_COMMAND {
            return Err(Error::TooShort {
                expected: ENVELOPE_WITH_COMMAND,
                actual: n,
            });
        }

        let pad_address = layout::read_u8(buf, common::PAD_ADDRESS.offset)?;
        let code = layout::read_u8(buf, common::COMMAND.offset)?;

        trace!(pad_address, command = code, len = n, "Decoding response");

        if code == NOTIFY_COMMAND {
            return decode_notify(buf, pad_address);
        }

        let size = variant_size(code);

        // An exact ACK/NACK shape wins unless it is also the variant's own size
        if size != Some(n) {
            if let Some(response) = decode_ack_or_nack(buf, pad_address, code, true) {
                return Ok(response);
            }
        }

        match size {
            Some(size) if n >= size => decode_variant(buf, pad_address, code),
            _ => match decode_ack_or_nack(buf, pad_address, code, false) {
                Some(response) => Ok(response),
                None => match size {
                    Some(expected) => Err(Error::TooShortForVariant {
                        command: code,
                        expected,
                        actual: n,
                    }),
                    None => Err(Error::UnknownCommand(code)),
                },
            },
        }
    }

    /// Pad that sent the response
    pub fn pad_address(&self) -> u8 {
        match self {
            Self::SerialNumber(r) => r.pad_address,
            Self::FirmwareVersion(r) => r.pad_address,
            Self::SampleRate(r) => r.pad_address,
            Self::ChannelMask(r) => r.pad_address,
            Self::Status(r) => r.pad_address,
            Self::Frame(r) => r.pad_address,
            Self::Ack(r) => r.pad_address,
            Self::Nack(r) => r.pad_address,
            Self::Notify(r) => r.pad_address,
        }
    }

    /// Variant name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SerialNumber(_) => "SerialNumber",
            Self::FirmwareVersion(_) => "FirmwareVersion",
            Self::SampleRate(_) => "SampleRate",
            Self::ChannelMask(_) => "ChannelMask",
            Self::Status(_) => "Status",
            Self::Frame(_) => "Frame",
            Self::Ack(_) => "Ack",
            Self::Nack(_) => "Nack",
            Self::Notify(_) => "Notify",
        }
    }

    /// Check if the response arrives unprompted while streaming
    pub fn is_unsolicited(&self) -> bool {
        matches!(self, Self::Notify(_))
            || matches!(self, Self::Frame(f) if f.command == u8::from(Command::StartStream))
    }
}

/// Decode a response frame (see [`Response::decode`])
pub fn decode_response(buf: &[u8]) -> Result<Response> {
    Response::decode(buf)
}

fn decode_notify(buf: &[u8], pad_address: u8) -> Result<Response> {
    if buf.len() < offsets::notify::SIZE {
        return Err(Error::TooShortForVariant {
            command: NOTIFY_COMMAND,
            expected: offsets::notify::SIZE,
            actual: buf.len(),
        });
    }

    let code = layout::read_u8(buf, offsets::notify::CODE)?;
    if !(NOTIFY_FIRST..=NOTIFY_LAST).contains(&code) {
        return Err(Error::InvalidField {
            field: "notify code",
            value: code,
        });
    }

    Ok(Response::Notify(Notify { pad_address, code }))
}

fn decode_ack_or_nack(buf: &[u8], pad_address: u8, command: u8, exact: bool) -> Option<Response> {
    let n = buf.len();
    let fits = |size: usize| if exact { n == size } else { n >= size };

    if fits(offsets::ack::SIZE) && buf[offsets::ack::CODE] == ACK_CODE {
        return Some(Response::Ack(Ack { pad_address, command }));
    }

    if fits(offsets::nack::SIZE) && buf[offsets::nack::CODE] == NAK_CODE {
        let error_code = layout::read_u16_le(buf, offsets::nack::ERROR_CODE).ok()?;
        return Some(Response::Nack(Nack {
            pad_address,
            command,
            error_code,
        }));
    }

    None
}

fn decode_variant(buf: &[u8], pad_address: u8, code: u8) -> Result<Response> {
    let command = Command::try_from(code)?;

    let response = match command {
        Command::GetSerialNumber => Response::SerialNumber(SerialNumber {
            pad_address,
            serial_id: layout::read_str(buf, offsets::serial_number::SERIAL_ID)?,
        }),
        Command::GetFirmwareVersion => Response::FirmwareVersion(FirmwareVersion {
            pad_address,
            stm32: layout::read_str(buf, offsets::firmware_version::STM32)?,
            esp32: layout::read_str(buf, offsets::firmware_version::ESP32)?,
        }),
        Command::GetSampleRate => Response::SampleRate(SampleRate {
            pad_address,
            rate: layout::read_u16_le(buf, offsets::sample_rate::RATE)?,
        }),
        Command::GetChannelMask => Response::ChannelMask(ChannelMask {
            pad_address,
            channels: Channels::from_bits_retain(layout::read_u8(buf, offsets::channel_mask::MASK)?),
        }),
        Command::GetStatus => {
            use offsets::status::*;
            Response::Status(ControllerStatus {
                pad_address,
                error_flags: layout::read_u32_le(buf, ERROR_FLAGS)?,
                temperature: layout::read_i8(buf, TEMPERATURE)?,
                serial_params: layout::read_str(buf, SERIAL_PARAMS)?,
                wifi_ssid: layout::read_str(buf, WIFI_SSID)?,
                wifi_ip: layout::read_ipv4(buf, WIFI_IP)?,
                wifi_mask: layout::read_ipv4(buf, WIFI_MASK)?,
                wifi_gateway: layout::read_ipv4(buf, WIFI_GATEWAY)?,
            })
        }
        Command::StartStream | Command::GetFrame => {
            use offsets::frame::*;
            let axis = |base: usize| -> Result<[i16; 3]> {
                Ok([
                    layout::read_i16_le(buf, base)?,
                    layout::read_i16_le(buf, base + 2)?,
                    layout::read_i16_le(buf, base + 4)?,
                ])
            };
            Response::Frame(ForceFrame {
                pad_address,
                command: code,
                timestamp: layout::read_u32_le(buf, TIMESTAMP)?,
                force: axis(FORCE_X)?,
                moment: axis(MOMENT_X)?,
            })
        }
        _ => return Err(Error::UnknownCommand(code)),
    };

    Ok(response)
}

/// Check if an accumulating receive buffer holds a complete frame
///
/// A frame is complete once it ends with the two end markers and is long
/// enough for the variant its command code announces (or has the exact
/// ACK/NACK shape). Buffers that can never become valid report complete so
/// the decoder can reject them without waiting for a timeout.
pub fn frame_complete(buf: &[u8]) -> bool {
    let n = buf.len();

    if n < offsets::ack::SIZE {
        return false;
    }

    if buf[n - 2..] != [PROTOCOL_EOT, PROTOCOL_EOT] {
        return false;
    }

    if u16::from_be_bytes([buf[0], buf[1]]) != RSP_HEADER_MARKER {
        return true;
    }

    let code = buf[common::COMMAND.offset];
    if code == NOTIFY_COMMAND {
        return true;
    }

    match variant_size(code) {
        Some(size) if n >= size => true,
        Some(_) => {
            (n == offsets::ack::SIZE && buf[offsets::ack::CODE] == ACK_CODE)
                || (n == offsets::nack::SIZE && buf[offsets::nack::CODE] == NAK_CODE)
        }
        None => true,
    }
}

/// Build a response frame around `body`
///
/// This is the controller side of the protocol; the host only needs it to
/// simulate a controller.
pub fn seal(pad_address: u8, command: u8, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(sizes::MIN_RESPONSE + 2 + body.len());

    buf.put_u16(RSP_HEADER_MARKER);
    buf.put_u8(pad_address);
    buf.put_u8(command);
    buf.put_slice(body);

    let crc = checksum::calculate(&buf[sizes::HEADER..]);
    buf.put_u16_le(crc);
    buf.put_u8(PROTOCOL_EOT);
    buf.put_u8(PROTOCOL_EOT);

    buf
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerialNumber(r) => write!(f, "SerialNumber({})", r.serial_id),
            Self::FirmwareVersion(r) => {
                write!(f, "FirmwareVersion(stm32={}, esp32={})", r.stm32, r.esp32)
            }
            Self::SampleRate(r) => write!(f, "SampleRate({} Hz)", r.rate),
            Self::ChannelMask(r) => write!(f, "ChannelMask(0x{:02X})", r.channels.bits()),
            Self::Status(r) => write!(
                f,
                "Status(flags=0x{:08X}, {}°C, ssid={})",
                r.error_flags, r.temperature, r.wifi_ssid
            ),
            Self::Frame(r) => write!(
                f,
                "Frame(pad={}, t={}, F={:?}, M={:?})",
                r.pad_address, r.timestamp, r.force, r.moment
            ),
            Self::Ack(r) => write!(f, "Ack(0x{:02X})", r.command),
            Self::Nack(r) => write!(f, "Nack(0x{:02X}, error={})", r.command, r.error_code),
            Self::Notify(r) => match r.index() {
                Some(index) => write!(f, "Notify({})", index),
                None => write!(f, "Notify(0x{:02X})", r.code),
            },
        }
    }
}

/// Body builders used to simulate controller answers
pub mod body {
    use super::*;
    use crate::layout::put_fixed_str;

    pub fn serial_number(serial_id: &str) -> BytesMut {
        let mut buf = BytesMut::new();
        put_fixed_str(&mut buf, serial_id, fields::SERIAL_ID_LEN);
        buf
    }

    pub fn firmware_version(stm32: &str, esp32: &str) -> BytesMut {
        let mut buf = BytesMut::new();
        put_fixed_str(&mut buf, stm32, fields::FW_VERSION_LEN);
        put_fixed_str(&mut buf, esp32, fields::FW_VERSION_LEN);
        buf
    }

    pub fn status(status: &ControllerStatus) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32_le(status.error_flags);
        buf.put_i8(status.temperature);
        put_fixed_str(&mut buf, &status.serial_params, fields::SERIAL_PARAM_LEN);
        put_fixed_str(&mut buf, &status.wifi_ssid, fields::SSID_LEN);
        buf.put_slice(&status.wifi_ip.octets());
        buf.put_slice(&status.wifi_mask.octets());
        buf.put_slice(&status.wifi_gateway.octets());
        buf
    }

    pub fn frame(timestamp: u32, force: [i16; 3], moment: [i16; 3]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32_le(timestamp);
        for v in force.iter().chain(moment.iter()) {
            buf.put_i16_le(*v);
        }
        buf
    }

    pub fn ack() -> BytesMut {
        BytesMut::from(&[ACK_CODE][..])
    }

    pub fn nack(error_code: u16) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(NAK_CODE);
        buf.put_u16_le(error_code);
        buf
    }
}
