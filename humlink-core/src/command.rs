//! Controller command codes

use std::fmt;

use crate::error::{Error, Result};

/// Protocol command codes
///
/// Every code the pad controller firmware accepts. Responses echo the code
/// of the command they answer, so the same table keys response decoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    // Streaming & acquisition
    StartStream = 0x01,
    StartAcquisition = 0x02,
    StopAcquisition = 0x03,
    ClearCache = 0x04,
    StopStream = 0x05,
    GetFrame = 0x06,
    SetSampleRate = 0x07,
    GetSampleRate = 0x08,

    // Channel configuration
    SetCalibration = 0x11,
    SetChannelMask = 0x12,
    GetChannelMask = 0x13,

    // Diagnostics & identity
    RunSelfTest = 0x21,
    GetStatus = 0x22,
    GetFirmwareVersion = 0x23,
    GetSerialNumber = 0x24,

    // Link settings
    SetSerialParams = 0x31,
    SetWifiSsid = 0x32,
}

impl Command {
    /// Check if this command carries a payload
    pub fn has_payload(self) -> bool {
        matches!(
            self,
            Self::SetSampleRate
                | Self::SetCalibration
                | Self::SetChannelMask
                | Self::SetSerialParams
                | Self::SetWifiSsid
        )
    }

    /// Get command name
    pub fn name(self) -> &'static str {
        match self {
            Self::StartStream => "CMD_START_STREAM",
            Self::StartAcquisition => "CMD_START_ACQ",
            Self::StopAcquisition => "CMD_STOP_ACQ",
            Self::ClearCache => "CMD_CLEAR_CACHE",
            Self::StopStream => "CMD_STOP_STREAM",
            Self::GetFrame => "CMD_GET_FRAME",
            Self::SetSampleRate => "CMD_SET_SAMPLING_RATE",
            Self::GetSampleRate => "CMD_GET_SAMPLING_RATE",
            Self::SetCalibration => "CMD_SET_CALIBRATION",
            Self::SetChannelMask => "CMD_SET_CHANNEL_MASK",
            Self::GetChannelMask => "CMD_GET_CHANNEL_MASK",
            Self::RunSelfTest => "CMD_RUN_SELF_TEST",
            Self::GetStatus => "CMD_GET_STATUS",
            Self::GetFirmwareVersion => "CMD_GET_FW_VERSION",
            Self::GetSerialNumber => "CMD_GET_SERIAL_NUMBER",
            Self::SetSerialParams => "CMD_SET_SERIAL_PARAM",
            Self::SetWifiSsid => "CMD_SET_WIFI_SSID",
        }
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> u8 {
        cmd as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::StartStream),
            0x02 => Ok(Self::StartAcquisition),
            0x03 => Ok(Self::StopAcquisition),
            0x04 => Ok(Self::ClearCache),
            0x05 => Ok(Self::StopStream),
            0x06 => Ok(Self::GetFrame),
            0x07 => Ok(Self::SetSampleRate),
            0x08 => Ok(Self::GetSampleRate),
            0x11 => Ok(Self::SetCalibration),
            0x12 => Ok(Self::SetChannelMask),
            0x13 => Ok(Self::GetChannelMask),
            0x21 => Ok(Self::RunSelfTest),
            0x22 => Ok(Self::GetStatus),
            0x23 => Ok(Self::GetFirmwareVersion),
            0x24 => Ok(Self::GetSerialNumber),
            0x31 => Ok(Self::SetSerialParams),
            0x32 => Ok(Self::SetWifiSsid),
            _ => Err(Error::UnknownCommand(value)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), *self as u8)
    }
}
