//! Physical link abstraction
//!
//! The channel talks to a [`SerialLink`], never to `serialport` directly, so
//! tests and simulators can swap in an in-memory link.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::debug;

use crate::error::{Error, Result};
use crate::params::SerialParams;

/// A bidirectional byte link with a read timeout
pub trait SerialLink: Read + Write + Send {
    /// Second handle on the same link, used by the reader thread
    fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>>;

    /// Bound blocking reads and writes
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl SerialLink for Box<dyn SerialPort> {
    fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>> {
        let port = self.try_clone()?;
        Ok(Box::new(port))
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        SerialPort::set_timeout(self.as_mut(), timeout).map_err(io::Error::from)
    }
}

/// Opens links by port name
pub trait LinkOpener: Send + Sync {
    fn open(&self, port: &str, params: &SerialParams, timeout: Duration) -> Result<Box<dyn SerialLink>>;
}

/// Opens the host's serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl LinkOpener for SystemPorts {
    fn open(&self, port: &str, params: &SerialParams, timeout: Duration) -> Result<Box<dyn SerialLink>> {
        debug!(port, %params, "Opening serial port");

        let link = serialport::new(port, params.baud_rate)
            .data_bits(params.data_bits)
            .parity(params.parity)
            .stop_bits(params.stop_bits)
            .timeout(timeout)
            .open()
            .map_err(|source| Error::Open {
                port: port.to_string(),
                source,
            })?;

        Ok(Box::new(link))
    }
}

/// Names of the serial ports present on this host
pub fn available_ports() -> Vec<String> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default()
}
