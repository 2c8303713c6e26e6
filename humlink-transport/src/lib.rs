//! Transport layer for humlink
//!
//! - [`SerialChannel`]: blocking serial link to the pad controller with a
//!   background reader feeding a [`ReceiveBuffer`]
//! - [`TlsTransport`]: async TLS connection to the license authority, pinned
//!   to a single [`TrustAnchor`]

pub mod buffer;
pub mod error;
pub mod link;
pub mod params;
pub mod serial;
pub mod tls;

#[cfg(any(test, feature = "test-util"))]
pub mod loopback;

pub use buffer::ReceiveBuffer;
pub use error::{Error, Result};
pub use link::{available_ports, LinkOpener, SerialLink, SystemPorts};
pub use params::SerialParams;
pub use serial::{SerialChannel, SerialConfig};
pub use tls::{TlsTransport, TrustAnchor};

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;

/// Transport trait for stream connections
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the remote end
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the remote end
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send raw bytes
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive whatever arrives next (with timeout)
    async fn receive(&mut self, timeout: Duration) -> Result<BytesMut>;

    /// Get remote address
    fn remote_addr(&self) -> String;
}
