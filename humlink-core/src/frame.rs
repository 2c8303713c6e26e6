//! Host → controller command frames

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{
    checksum,
    command::Command,
    constants::{sizes, CMD_HEADER_MARKER, CONTROLLER_MASK, PROTOCOL_EOT},
    error::{Error, Result},
    layout::put_fixed_str,
};

/// Command frame sent to the pad controller
///
/// # Frame Structure
///
/// ```text
/// ┌──────────┬────────────┬─────────┬───────────┬──────────┬───────────┐
/// │  Header  │ TargetMask │ Command │  Payload  │ Checksum │  EOT EOT  │
/// │  FE ED   │  2 bytes   │ 1 byte  │  N bytes  │ 2 bytes  │   04 04   │
/// │  (BE)    │  (LE u16)  │         │           │ (LE u16) │           │
/// └──────────┴────────────┴─────────┴───────────┴──────────┴───────────┘
/// ```
///
/// The checksum covers target mask, command and payload; never the header
/// marker or the end markers.
///
/// # Examples
///
/// ```
/// use humlink_core::{Command, CommandFrame};
///
/// let frame = CommandFrame::new(Command::GetSerialNumber);
/// assert_eq!(
///     &frame.encode()[..],
///     &[0xFE, 0xED, 0x01, 0x00, 0x24, 0x4A, 0x9F, 0x04, 0x04]
/// );
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Pads the command is addressed to
    pub target_mask: u16,

    /// Command code
    pub command: Command,

    /// Command-specific payload
    pub payload: Bytes,
}

impl CommandFrame {
    /// Create a frame addressed to the controller with an empty payload
    pub fn new(command: Command) -> Self {
        Self {
            target_mask: CONTROLLER_MASK,
            command,
            payload: Bytes::new(),
        }
    }

    /// Create a frame with payload
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedPayload`] if `command` takes no payload
    /// - [`Error::PayloadTooLarge`] if the payload exceeds what the
    ///   controller accepts
    pub fn with_payload(command: Command, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();

        if !command.has_payload() && !payload.is_empty() {
            return Err(Error::UnexpectedPayload(command.into()));
        }

        if payload.len() > sizes::MAX_COMMAND_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max: sizes::MAX_COMMAND_PAYLOAD,
            });
        }

        Ok(Self {
            target_mask: CONTROLLER_MASK,
            command,
            payload,
        })
    }

    /// Address the frame to a different set of pads
    pub fn to(mut self, target_mask: u16) -> Self {
        self.target_mask = target_mask;
        self
    }

    /// Checksum over mask, command and payload
    pub fn checksum(&self) -> u16 {
        let mut body = BytesMut::with_capacity(3 + self.payload.len());
        self.put_body(&mut body);
        checksum::calculate(&body)
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.target_mask);
        buf.put_u8(self.command.into());
        buf.put_slice(&self.payload);
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());

        buf.put_u16(CMD_HEADER_MARKER);
        self.put_body(&mut buf);

        let crc = checksum::calculate(&buf[sizes::HEADER..]);
        buf.put_u16_le(crc);
        buf.put_u8(PROTOCOL_EOT);
        buf.put_u8(PROTOCOL_EOT);

        buf
    }

    /// Decode a command frame (the controller side of the link)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Buffer is shorter than an empty command
    /// - Header marker is wrong
    /// - Checksum verification fails
    /// - Command code is unknown
    pub fn decode(mut buf: BytesMut) -> Result<Self> {
        if buf.len() < sizes::COMMAND_ENVELOPE {
            return Err(Error::TooShort {
                expected: sizes::COMMAND_ENVELOPE,
                actual: buf.len(),
            });
        }

        let header = buf.get_u16();
        if header != CMD_HEADER_MARKER {
            return Err(Error::BadHeader {
                expected: CMD_HEADER_MARKER,
                found: header,
            });
        }

        let trailer = buf.split_off(buf.len() - sizes::TRAILER);
        let received = u16::from_le_bytes([trailer[0], trailer[1]]);
        let calculated = checksum::calculate(&buf);
        if calculated != received {
            return Err(Error::ChecksumMismatch {
                expected: calculated,
                received,
            });
        }

        let target_mask = buf.get_u16_le();
        let command = Command::try_from(buf.get_u8())?;

        Ok(Self {
            target_mask,
            command,
            payload: buf.freeze(),
        })
    }

    /// Get total frame size
    pub fn size(&self) -> usize {
        sizes::COMMAND_ENVELOPE + self.payload.len()
    }
}

/// Payload builders for commands that carry arguments
pub mod payload {
    use super::*;
    use crate::constants::fields;

    /// CMD_SET_SAMPLING_RATE: u16 rate in Hz
    pub fn sample_rate(rate: u16) -> Bytes {
        Bytes::copy_from_slice(&rate.to_le_bytes())
    }

    /// CMD_SET_CHANNEL_MASK: one bit per channel
    pub fn channel_mask(mask: u8) -> Bytes {
        Bytes::copy_from_slice(&[mask])
    }

    /// CMD_SET_SERIAL_PARAM: "baud,dataBits,parity,stopBits"
    pub fn serial_params(params: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(fields::SERIAL_PARAM_LEN);
        put_fixed_str(&mut buf, params, fields::SERIAL_PARAM_LEN);
        buf.freeze()
    }

    /// CMD_SET_WIFI_SSID: SSID followed by passphrase
    pub fn wifi_credentials(ssid: &str, password: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(fields::SSID_LEN + fields::PASSWORD_LEN);
        put_fixed_str(&mut buf, ssid, fields::SSID_LEN);
        put_fixed_str(&mut buf, password, fields::PASSWORD_LEN);
        buf.freeze()
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandFrame")
            .field("command", &self.command)
            .field("target_mask", &format!("0x{:04X}", self.target_mask))
            .field("checksum", &format!("0x{:04X}", self.checksum()))
            .field("payload", &hex::encode(&self.payload))
            .finish()
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Command[{}](mask=0x{:04X}, len={})",
            self.command,
            self.target_mask,
            self.payload.len()
        )
    }
}
