//! Serial channel: link lifecycle, blocking writes and the background reader

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use humlink_core::constants::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_WRITE_TIMEOUT_MS};
use tracing::{debug, error, trace, warn};

use crate::buffer::{ReceiveBuffer, DEFAULT_CAPACITY};
use crate::error::{Error, Result};
use crate::link::{LinkOpener, SerialLink, SystemPorts};
use crate::params::SerialParams;

/// Immutable channel settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub params: SerialParams,
    pub write_timeout: Duration,
    /// Reader poll interval; bounds how long `close` waits for the reader
    pub poll_interval: Duration,
    pub buffer_capacity: usize,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Set line settings from `"baud,dataBits,parity,stopBits"`, falling back
    /// to `115200,8,n,1` if malformed
    pub fn with_params(mut self, params: &str) -> Self {
        self.params = SerialParams::parse_or_default(params);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            params: SerialParams::default(),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            buffer_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Serial link to the pad controller
///
/// `open` starts one reader thread that drains the link into a
/// [`ReceiveBuffer`] until `close` clears the shared running flag.
pub struct SerialChannel {
    config: SerialConfig,
    opener: Box<dyn LinkOpener>,
    writer: Option<Box<dyn SerialLink>>,
    reader: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    buffer: Arc<ReceiveBuffer>,
}

impl SerialChannel {
    /// Channel on a host serial port
    pub fn new(config: SerialConfig) -> Self {
        Self::with_opener(config, SystemPorts)
    }

    /// Channel on links produced by `opener`
    pub fn with_opener(config: SerialConfig, opener: impl LinkOpener + 'static) -> Self {
        let buffer = Arc::new(ReceiveBuffer::new(config.buffer_capacity));
        Self {
            config,
            opener: Box::new(opener),
            writer: None,
            reader: None,
            running: Arc::new(AtomicBool::new(false)),
            buffer,
        }
    }

    /// Open the link and start the reader; a no-op if already open
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let port = self.config.port.clone();
        let mut link = self
            .opener
            .open(&port, &self.config.params, self.config.poll_interval)?;

        let mut reader_link = link.try_clone_link()?;
        reader_link.set_timeout(self.config.poll_interval)?;
        link.set_timeout(self.config.write_timeout)?;

        self.buffer.reset();
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let buffer = Arc::clone(&self.buffer);
        let handle = thread::Builder::new()
            .name(format!("humlink-rx-{}", port))
            .spawn(move || read_loop(reader_link, running, buffer))
            .inspect_err(|_| self.running.store(false, Ordering::SeqCst))?;

        self.writer = Some(link);
        self.reader = Some(handle);

        debug!(port, params = %self.config.params, "Serial channel open");
        Ok(())
    }

    /// Stop the reader, release the link and close the buffer; a no-op if closed
    pub fn close(&mut self) {
        if self.writer.is_none() && self.reader.is_none() {
            return;
        }

        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                error!(port = %self.config.port, "Serial reader thread panicked");
            }
        }

        self.buffer.close();
        self.writer = None;

        debug!(port = %self.config.port, "Serial channel closed");
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Write all of `data`, blocking at most the write timeout per chunk
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the channel is closed
    /// - [`Error::WriteTimeout`] if the link stalls
    /// - [`Error::ShortWrite`] if the link stops accepting bytes
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let link = self.writer.as_mut().ok_or(Error::NotConnected)?;

        trace!(len = data.len(), bytes = ?data, "Serial write");

        let mut written = 0;
        while written < data.len() {
            match link.write(&data[written..]) {
                Ok(0) => {
                    return Err(Error::ShortWrite {
                        written,
                        expected: data.len(),
                    });
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::TimedOut => return Err(Error::WriteTimeout),
                Err(e) => return Err(Error::Io(e)),
            }
        }

        match link.flush() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(Error::WriteTimeout),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Queue filled by the reader thread
    pub fn buffer(&self) -> &ReceiveBuffer {
        &self.buffer
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        if self.is_open() {
            warn!(port = %self.config.port, "Serial channel dropped while open");
            self.close();
        }
    }
}

fn read_loop(mut link: Box<dyn SerialLink>, running: Arc<AtomicBool>, buffer: Arc<ReceiveBuffer>) {
    let mut tmp = [0u8; 512];

    while running.load(Ordering::SeqCst) {
        match link.read(&mut tmp) {
            Ok(0) => {}
            Ok(n) => {
                trace!(len = n, bytes = ?&tmp[..n], "Serial read");
                buffer.push(&tmp[..n]);
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                error!(error = %e, "Serial read failed, stopping reader");
                buffer.close();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::Loopback;
    use pretty_assertions::assert_eq;

    fn channel(loopback: &Loopback) -> SerialChannel {
        SerialChannel::with_opener(SerialConfig::new("loop0"), loopback.clone())
    }

    #[test]
    fn test_open_close_idempotent() {
        let loopback = Loopback::new();
        let mut channel = channel(&loopback);

        channel.open().unwrap();
        channel.open().unwrap();
        assert!(channel.is_open());
        assert_eq!(loopback.open_count(), 1);

        channel.close();
        channel.close();
        assert!(!channel.is_open());
        assert!(channel.buffer().is_closed());
    }

    #[test]
    fn test_reader_fills_buffer() {
        let loopback = Loopback::new();
        let mut channel = channel(&loopback);
        channel.open().unwrap();

        loopback.inject(b"\xBE\xEF\x00\x24");
        let bytes = channel
            .buffer()
            .take_at_least(4, 64, Duration::from_secs(2))
            .unwrap();
        assert_eq!(&bytes[..], b"\xBE\xEF\x00\x24");
    }

    #[test]
    fn test_write_reaches_link() {
        let loopback = Loopback::new();
        let mut channel = channel(&loopback);
        channel.open().unwrap();

        channel.write(&[0xFE, 0xED, 0x01]).unwrap();
        assert_eq!(loopback.written(), vec![0xFE, 0xED, 0x01]);
    }

    #[test]
    fn test_write_when_closed() {
        let loopback = Loopback::new();
        let mut channel = channel(&loopback);
        assert!(matches!(channel.write(b"x"), Err(Error::NotConnected)));
    }

    #[test]
    fn test_write_failures() {
        let loopback = Loopback::new();
        let mut channel = channel(&loopback);
        channel.open().unwrap();

        loopback.set_write_stall(true);
        assert!(matches!(channel.write(b"abc"), Err(Error::WriteTimeout)));

        loopback.set_write_stall(false);
        loopback.set_write_limit(Some(2));
        assert!(matches!(
            channel.write(b"abcd"),
            Err(Error::ShortWrite { written: 2, expected: 4 })
        ));
    }

    #[test]
    fn test_open_failure() {
        let loopback = Loopback::new();
        loopback.set_fail_open(true);
        let mut channel = channel(&loopback);

        assert!(matches!(channel.open(), Err(Error::Open { .. })));
        assert!(!channel.is_open());
    }

    #[test]
    fn test_reopen_after_close() {
        let loopback = Loopback::new();
        let mut channel = channel(&loopback);

        channel.open().unwrap();
        channel.close();
        channel.open().unwrap();

        loopback.inject(b"ok");
        let bytes = channel
            .buffer()
            .take_at_least(2, 2, Duration::from_secs(2))
            .unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[test]
    fn test_malformed_params_fall_back() {
        let config = SerialConfig::new("loop0").with_params("115200;8;n;1");
        assert_eq!(config.params, SerialParams::default());
    }
}
