//! Bounded receive queue between the reader thread and request/response calls

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::error::{Error, Result};

/// Default queue capacity in bytes
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Inner {
    data: BytesMut,
    closed: bool,
}

/// Thread-safe byte queue with blocking, deadline-bounded reads
///
/// One reader thread pushes, one caller takes. Bytes that do not fit are
/// dropped and counted. Waiting happens on a condition variable, so the
/// lock is released for the whole wait.
#[derive(Debug)]
pub struct ReceiveBuffer {
    inner: Mutex<Inner>,
    ready: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl ReceiveBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                data: BytesMut::with_capacity(capacity),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append bytes, returning how many were accepted
    pub fn push(&self, bytes: &[u8]) -> usize {
        let mut inner = self.inner.lock();
        if inner.closed {
            return 0;
        }

        let room = self.capacity.saturating_sub(inner.data.len());
        let accepted = room.min(bytes.len());
        inner.data.extend_from_slice(&bytes[..accepted]);
        drop(inner);

        if accepted > 0 {
            trace!(accepted, "Queued received bytes");
            self.ready.notify_all();
        }

        let dropped = bytes.len() - accepted;
        if dropped > 0 {
            let total = self.dropped.fetch_add(dropped as u64, Ordering::Relaxed) + dropped as u64;
            warn!(
                dropped,
                total,
                capacity = self.capacity,
                "Receive buffer full, dropping bytes"
            );
        }

        accepted
    }

    /// Block until at least `min` bytes are queued, then take up to `max`
    ///
    /// `min` is clamped to the capacity so a request can always be met. A
    /// timeout too large to form a deadline waits without one.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadTimeout`] when the deadline passes first; queued bytes
    ///   stay in place
    /// - [`Error::BufferClosed`] once the buffer is closed and drained below `min`
    pub fn take_at_least(&self, min: usize, max: usize, timeout: Duration) -> Result<Bytes> {
        let min = min.min(self.capacity);
        let max = max.max(min);
        let deadline = Instant::now().checked_add(timeout);

        let mut inner = self.inner.lock();
        loop {
            let available = inner.data.len();
            if available >= min {
                let n = available.min(max);
                return Ok(inner.data.split_to(n).freeze());
            }

            if inner.closed {
                return Err(Error::BufferClosed);
            }

            let Some(deadline) = deadline else {
                self.ready.wait(&mut inner);
                continue;
            };

            if self.ready.wait_until(&mut inner, deadline).timed_out() {
                let available = inner.data.len();
                if available >= min {
                    continue;
                }
                return Err(Error::ReadTimeout { available });
            }
        }
    }

    /// Take up to `max` queued bytes without waiting
    pub fn take_available(&self, max: usize) -> Bytes {
        let mut inner = self.inner.lock();
        let n = inner.data.len().min(max);
        inner.data.split_to(n).freeze()
    }

    pub fn available(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Discard queued bytes, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.data.len();
        inner.data.clear();
        n
    }

    /// Close the buffer and wake every waiter
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.ready.notify_all();
    }

    /// Empty and reopen a closed buffer
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.data.clear();
        inner.closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Bytes dropped on overflow since creation
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_push_and_take() {
        let buffer = ReceiveBuffer::default();
        assert_eq!(buffer.push(b"hello world"), 11);
        assert_eq!(buffer.available(), 11);

        let taken = buffer.take_at_least(5, 5, SHORT).unwrap();
        assert_eq!(&taken[..], b"hello");
        assert_eq!(buffer.available(), 6);
    }

    #[test]
    fn test_take_returns_everything_up_to_max() {
        let buffer = ReceiveBuffer::default();
        buffer.push(b"abc");

        let taken = buffer.take_at_least(1, 64, SHORT).unwrap();
        assert_eq!(&taken[..], b"abc");
    }

    #[test]
    fn test_overflow_is_dropped_and_counted() {
        let buffer = ReceiveBuffer::new(8);
        assert_eq!(buffer.push(b"12345"), 5);
        assert_eq!(buffer.push(b"67890"), 3);
        assert_eq!(buffer.dropped_bytes(), 2);
        assert_eq!(&buffer.take_available(64)[..], b"12345678");
    }

    #[test]
    fn test_timeout_keeps_bytes() {
        let buffer = ReceiveBuffer::default();
        buffer.push(b"abc");

        let result = buffer.take_at_least(6, 64, SHORT);
        assert!(matches!(result, Err(Error::ReadTimeout { available: 3 })));
        assert_eq!(buffer.available(), 3);
    }

    #[test]
    fn test_min_clamped_to_capacity() {
        let buffer = ReceiveBuffer::new(4);
        buffer.push(b"abcdef");

        let taken = buffer.take_at_least(100, 100, SHORT).unwrap();
        assert_eq!(&taken[..], b"abcd");
    }

    #[test]
    fn test_waiter_woken_by_push() {
        let buffer = Arc::new(ReceiveBuffer::default());
        let producer = Arc::clone(&buffer);

        let handle = thread::spawn(move || {
            for chunk in [&b"BE"[..], b"EF", b"0000"] {
                thread::sleep(Duration::from_millis(10));
                producer.push(chunk);
            }
        });

        let taken = buffer.take_at_least(8, 64, Duration::from_secs(2)).unwrap();
        assert_eq!(&taken[..], b"BEEF0000");
        handle.join().unwrap();
    }

    #[test]
    fn test_unbounded_timeout() {
        let buffer = Arc::new(ReceiveBuffer::default());
        buffer.push(b"BEEF00");
        assert_eq!(&buffer.take_at_least(6, 6, Duration::MAX).unwrap()[..], b"BEEF00");

        let producer = Arc::clone(&buffer);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(b"0404");
        });

        let taken = buffer.take_at_least(4, 4, Duration::MAX).unwrap();
        assert_eq!(&taken[..], b"0404");
        handle.join().unwrap();
    }

    #[test]
    fn test_close_wakes_waiter() {
        let buffer = Arc::new(ReceiveBuffer::default());
        let closer = Arc::clone(&buffer);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });

        let result = buffer.take_at_least(1, 1, Duration::from_secs(5));
        assert!(matches!(result, Err(Error::BufferClosed)));
        handle.join().unwrap();

        assert_eq!(buffer.push(b"late"), 0);
    }

    #[test]
    fn test_closed_buffer_still_drains() {
        let buffer = ReceiveBuffer::default();
        buffer.push(b"tail");
        buffer.close();

        assert_eq!(&buffer.take_at_least(4, 4, SHORT).unwrap()[..], b"tail");
        assert!(matches!(
            buffer.take_at_least(1, 1, SHORT),
            Err(Error::BufferClosed)
        ));
    }

    #[test]
    fn test_clear_and_reset() {
        let buffer = ReceiveBuffer::default();
        buffer.push(b"stale");
        assert_eq!(buffer.clear(), 5);
        assert_eq!(buffer.available(), 0);

        buffer.close();
        buffer.reset();
        assert!(!buffer.is_closed());
        assert_eq!(buffer.push(b"x"), 1);
    }

    proptest! {
        #[test]
        fn prop_bytes_come_out_in_order(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..32), 0..16),
        ) {
            let buffer = ReceiveBuffer::default();
            let mut expected = Vec::new();
            for chunk in &chunks {
                buffer.push(chunk);
                expected.extend_from_slice(chunk);
            }

            let mut out = Vec::new();
            while buffer.available() > 0 {
                out.extend_from_slice(&buffer.take_available(7));
            }
            prop_assert_eq!(out, expected);
        }
    }
}
