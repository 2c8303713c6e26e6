//! In-memory serial link for tests and controller simulators
//!
//! A [`Loopback`] handle is both the [`LinkOpener`] handed to a
//! [`SerialChannel`](crate::SerialChannel) and the far end of the wire: bytes
//! injected on it arrive at the channel's reader, bytes the channel writes are
//! recorded and may be answered by a scripted responder.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::link::{LinkOpener, SerialLink};
use crate::params::SerialParams;

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct Shared {
    inbound: Mutex<VecDeque<u8>>,
    arrived: Condvar,
    written: Mutex<Vec<u8>>,
    responder: Mutex<Option<Responder>>,
    write_stall: AtomicBool,
    write_limit: Mutex<Option<usize>>,
    fail_open: AtomicBool,
    opens: AtomicUsize,
}

impl Shared {
    fn inject(&self, bytes: &[u8]) {
        self.inbound.lock().extend(bytes.iter().copied());
        self.arrived.notify_all();
    }
}

/// Far end of an in-memory serial link
#[derive(Clone, Default)]
pub struct Loopback {
    shared: Arc<Shared>,
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver bytes to the channel's reader
    pub fn inject(&self, bytes: &[u8]) {
        self.shared.inject(bytes);
    }

    /// Everything the channel has written so far
    pub fn written(&self) -> Vec<u8> {
        self.shared.written.lock().clone()
    }

    /// Drain the write log
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut *self.shared.written.lock())
    }

    /// Answer every write with the bytes `responder` returns
    pub fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        *self.shared.responder.lock() = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        *self.shared.responder.lock() = None;
    }

    /// Make writes fail with a timeout
    pub fn set_write_stall(&self, stall: bool) {
        self.shared.write_stall.store(stall, Ordering::SeqCst);
    }

    /// Accept only `limit` more bytes, then report zero-length writes
    pub fn set_write_limit(&self, limit: Option<usize>) {
        *self.shared.write_limit.lock() = limit;
    }

    /// Make the next opens fail
    pub fn set_fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }
}

impl LinkOpener for Loopback {
    fn open(&self, port: &str, _params: &SerialParams, timeout: Duration) -> Result<Box<dyn SerialLink>> {
        if self.shared.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Open {
                port: port.to_string(),
                source: serialport::Error::new(serialport::ErrorKind::NoDevice, "loopback refused"),
            });
        }

        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackLink {
            shared: Arc::clone(&self.shared),
            timeout,
        }))
    }
}

struct LoopbackLink {
    shared: Arc<Shared>,
    timeout: Duration,
}

impl Read for LoopbackLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbound = self.shared.inbound.lock();
        if inbound.is_empty() {
            self.shared.arrived.wait_for(&mut inbound, self.timeout);
        }
        if inbound.is_empty() {
            return Err(io::ErrorKind::TimedOut.into());
        }

        let n = inbound.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for LoopbackLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.shared.write_stall.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::TimedOut.into());
        }

        let n = match self.shared.write_limit.lock().as_mut() {
            Some(remaining) => {
                let n = (*remaining).min(buf.len());
                *remaining -= n;
                n
            }
            None => buf.len(),
        };
        if n == 0 {
            return Ok(0);
        }

        let accepted = &buf[..n];
        self.shared.written.lock().extend_from_slice(accepted);

        let reply = self
            .shared
            .responder
            .lock()
            .as_mut()
            .and_then(|respond| respond(accepted));
        if let Some(reply) = reply {
            self.shared.inject(&reply);
        }

        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for LoopbackLink {
    fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>> {
        Ok(Box::new(LoopbackLink {
            shared: Arc::clone(&self.shared),
            timeout: self.timeout,
        }))
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_responder_answers_writes() {
        let loopback = Loopback::new();
        loopback.respond_with(|frame| Some(frame.iter().rev().copied().collect()));

        let mut link = loopback
            .open("loop0", &SerialParams::default(), Duration::from_millis(50))
            .unwrap();
        link.write_all(b"abc").unwrap();

        let mut buf = [0u8; 8];
        let n = link.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"cba");
    }

    #[test]
    fn test_read_times_out_when_idle() {
        let loopback = Loopback::new();
        let mut link = loopback
            .open("loop0", &SerialParams::default(), Duration::from_millis(10))
            .unwrap();

        let mut buf = [0u8; 8];
        let err = link.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
