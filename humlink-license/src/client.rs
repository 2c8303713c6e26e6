//! Token validation against the remote license authority
//!
//! One exchange per connection:
//!
//! ```text
//! host → authority:  '1' | activation key (32) | provisional token (88)
//! authority → host:  signed token (88)
//! ```

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use humlink_transport::{self as transport, TlsTransport, Transport, TrustAnchor};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::activation_key::ActivationKey;
use crate::error::{Error, Result};
use crate::token::{IdentityToken, DIGEST_LEN, TOKEN_LEN};

/// Operation code for token validation
pub const VALIDATE_OP: u8 = b'1';

/// Default authority port
pub const DEFAULT_PORT: u16 = 5678;

/// Default time to wait for the signed token
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default TCP connect + TLS handshake timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable authority settings
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    pub host: String,
    pub port: u16,
    pub anchor: TrustAnchor,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl AuthorityConfig {
    pub fn new(host: impl Into<String>, anchor: TrustAnchor) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            anchor,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Client for the license authority
pub struct LicenseClient<T: Transport = TlsTransport> {
    transport: T,
    response_timeout: Duration,
}

impl LicenseClient<TlsTransport> {
    /// Client over TLS, trusting only the configured anchor
    pub fn new(config: &AuthorityConfig) -> Result<Self> {
        let transport = TlsTransport::new(config.host.clone(), config.port, &config.anchor)
            .map_err(Error::Connect)?
            .with_connect_timeout(config.connect_timeout);

        Ok(Self::with_transport(transport, config.response_timeout))
    }
}

impl<T: Transport> LicenseClient<T> {
    pub fn with_transport(transport: T, response_timeout: Duration) -> Self {
        Self {
            transport,
            response_timeout,
        }
    }

    /// Ask the authority to sign `provisional`
    ///
    /// Returns the raw response; the caller commits it to the token store,
    /// which checks its size. Nothing is retried.
    ///
    /// # Errors
    ///
    /// - [`Error::Connect`] if the encrypted channel cannot be established
    /// - [`Error::Send`] if the request cannot be written
    /// - [`Error::Timeout`] if nothing arrives within the response timeout
    /// - [`Error::EmptyResponse`] if the authority closes without answering
    pub async fn validate(&mut self, key: &ActivationKey, provisional: &IdentityToken) -> Result<Bytes> {
        let addr = self.transport.remote_addr();
        debug!(%addr, controller = provisional.controller_id(), "Requesting token validation");

        self.transport.connect().await.map_err(Error::Connect)?;

        let result = self.exchange(key, provisional).await;

        if let Err(e) = self.transport.disconnect().await {
            debug!(error = %e, "Disconnect from license authority failed");
        }

        match &result {
            Ok(token) => info!(%addr, len = token.len(), "License authority answered"),
            Err(e) => warn!(%addr, error = %e, "Token validation failed"),
        }

        result
    }

    async fn exchange(&mut self, key: &ActivationKey, provisional: &IdentityToken) -> Result<Bytes> {
        let mut request = BytesMut::with_capacity(1 + DIGEST_LEN + TOKEN_LEN);
        request.put_u8(VALIDATE_OP);
        request.put_slice(key.as_bytes());
        request.put_slice(&provisional.to_bytes());

        self.transport.send(&request).await.map_err(Error::Send)?;

        let deadline = Instant::now().checked_add(self.response_timeout);
        let mut response = BytesMut::with_capacity(TOKEN_LEN);
        let mut timed_out = false;

        while response.len() < TOKEN_LEN {
            let remaining = deadline.map_or(self.response_timeout, |d| d.saturating_duration_since(Instant::now()));
            if remaining.is_zero() {
                timed_out = true;
                break;
            }

            match self.transport.receive(remaining).await {
                Ok(chunk) => response.extend_from_slice(&chunk),
                Err(transport::Error::ConnectionClosed) => break,
                Err(transport::Error::ReadTimeout { .. }) => {
                    timed_out = true;
                    break;
                }
                Err(e) => return Err(Error::Receive(e)),
            }
        }

        if response.is_empty() {
            return Err(if timed_out {
                Error::Timeout(self.response_timeout)
            } else {
                Error::EmptyResponse
            });
        }

        Ok(response.freeze())
    }
}
