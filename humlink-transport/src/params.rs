//! Serial line settings in the controller's `"baud,dataBits,parity,stopBits"` form

use std::fmt;
use std::str::FromStr;

use serialport::{DataBits, Parity, StopBits};
use tracing::warn;

use crate::error::{Error, Result};

/// Line settings for the serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialParams {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl SerialParams {
    /// Parse `"115200,8,n,1"`
    ///
    /// Data bits 5-8, parity `n`/`e`/`o` (case-insensitive), stop bits 1-2.
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidSerialParams {
            value: value.to_string(),
            reason,
        };

        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        let [baud, data, parity, stop] = parts[..] else {
            return Err(invalid("expected four comma-separated fields"));
        };

        let baud_rate = baud
            .parse::<u32>()
            .ok()
            .filter(|b| *b > 0)
            .ok_or_else(|| invalid("baud rate"))?;

        let data_bits = match data {
            "5" => DataBits::Five,
            "6" => DataBits::Six,
            "7" => DataBits::Seven,
            "8" => DataBits::Eight,
            _ => return Err(invalid("data bits")),
        };

        let parity = match parity.to_ascii_lowercase().as_str() {
            "n" => Parity::None,
            "e" => Parity::Even,
            "o" => Parity::Odd,
            _ => return Err(invalid("parity")),
        };

        let stop_bits = match stop {
            "1" => StopBits::One,
            "2" => StopBits::Two,
            _ => return Err(invalid("stop bits")),
        };

        Ok(Self {
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        })
    }

    /// Parse, falling back to [`SerialParams::default`] on malformed input
    pub fn parse_or_default(value: &str) -> Self {
        Self::parse(value).unwrap_or_else(|e| {
            let fallback = Self::default();
            warn!(error = %e, %fallback, "Malformed serial parameters, using defaults");
            fallback
        })
    }
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl FromStr for SerialParams {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SerialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = match self.data_bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let parity = match self.parity {
            Parity::None => 'n',
            Parity::Even => 'e',
            Parity::Odd => 'o',
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(f, "{},{},{},{}", self.baud_rate, data, parity, stop)
    }
}
