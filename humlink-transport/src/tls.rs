//! TLS transport pinned to a single trust anchor
//!
//! The license authority presents either the anchor certificate itself or a
//! chain ending at it. Host names are not checked: the authority is reached by
//! whatever address the deployment configures. Every other certificate
//! problem (unknown issuer, expiry, bad signature) aborts the handshake.

use std::fs;
use std::io::{BufReader, Cursor};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::verify_server_cert_signed_by_trust_anchor;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, warn};

use crate::{error::*, Transport};

/// Pre-provisioned certificate authenticating the license authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    der: CertificateDer<'static>,
}

impl TrustAnchor {
    pub fn from_der(der: impl Into<Vec<u8>>) -> Self {
        Self {
            der: CertificateDer::from(der.into()),
        }
    }

    /// Use the first certificate in a PEM document
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let mut reader = BufReader::new(Cursor::new(pem));
        let der = rustls_pemfile::certs(&mut reader)
            .next()
            .ok_or_else(|| Error::TrustAnchor("no certificate in PEM input".into()))?
            .map_err(|e| Error::TrustAnchor(e.to_string()))?;

        Ok(Self { der })
    }

    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = fs::read(path)
            .map_err(|e| Error::TrustAnchor(format!("{}: {}", path.display(), e)))?;
        Self::from_pem(&pem)
    }

    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }
}

/// Certificate validity window, seconds since the Unix epoch
#[derive(Debug, Clone, Copy)]
struct Validity {
    not_before: i64,
    not_after: i64,
}

impl Validity {
    fn of(der: &CertificateDer<'_>) -> Result<Self> {
        let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
            .map_err(|e| Error::TrustAnchor(e.to_string()))?;
        let validity = cert.validity();

        Ok(Self {
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
        })
    }

    fn check(&self, now: UnixTime) -> std::result::Result<(), CertificateError> {
        let now = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);

        if now < self.not_before {
            Err(CertificateError::NotValidYet)
        } else if now > self.not_after {
            Err(CertificateError::Expired)
        } else {
            Ok(())
        }
    }
}

/// Accepts the pinned anchor itself or any chain that ends at it
#[derive(Debug)]
pub struct PinnedAnchorVerifier {
    anchor: CertificateDer<'static>,
    anchor_validity: Validity,
    roots: RootCertStore,
    provider: Arc<CryptoProvider>,
}

impl PinnedAnchorVerifier {
    pub fn new(anchor: &TrustAnchor, provider: Arc<CryptoProvider>) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.add(anchor.der.clone())?;

        Ok(Self {
            anchor: anchor.der.clone(),
            anchor_validity: Validity::of(&anchor.der)?,
            roots,
            provider,
        })
    }
}

impl ServerCertVerifier for PinnedAnchorVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.anchor.as_ref() {
            trace!("Server presented the trust anchor itself");
            self.anchor_validity.check(now).map_err(|e| {
                warn!(error = ?e, "Trust anchor is outside its validity period");
                rustls::Error::InvalidCertificate(e)
            })?;
            return Ok(ServerCertVerified::assertion());
        }

        let cert = ParsedCertificate::try_from(end_entity)?;
        verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )?;

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Client configuration trusting only `anchor`
pub fn client_config(anchor: &TrustAnchor) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = PinnedAnchorVerifier::new(anchor, Arc::clone(&provider))?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// TLS-over-TCP transport
pub struct TlsTransport {
    host: String,
    port: u16,
    config: Arc<ClientConfig>,
    stream: Option<TlsStream<TcpStream>>,
    connect_timeout: Duration,
}

impl TlsTransport {
    /// Create a transport to `host:port` trusting only `anchor`
    pub fn new(host: impl Into<String>, port: u16, anchor: &TrustAnchor) -> Result<Self> {
        Ok(Self {
            host: host.into(),
            port,
            config: client_config(anchor)?,
            stream: None,
            connect_timeout: Duration::from_secs(10),
        })
    }

    /// Set connection (TCP + handshake) timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn handshake(&self) -> Result<TlsStream<TcpStream>> {
        let addr = format!("{}:{}", self.host, self.port);
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", self.host, e)))?;

        let tcp = TcpStream::connect(&addr).await?;
        tcp.set_nodelay(true)?;

        let connector = TlsConnector::from(Arc::clone(&self.config));
        connector.connect(server_name, tcp).await.map_err(Error::Handshake)
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        debug!("Connecting to {}...", self.remote_addr());

        let stream = timeout(self.connect_timeout, self.handshake())
            .await
            .map_err(|_| Error::ConnectionTimeout)??;

        debug!("TLS session established with {}", self.remote_addr());

        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("Disconnecting from {}...", self.remote_addr());

            // Sends close_notify
            let _ = stream.shutdown().await;
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        trace!("Sending {} bytes", data.len());

        stream.write_all(data).await?;
        stream.flush().await?;

        Ok(())
    }

    async fn receive(&mut self, read_timeout: Duration) -> Result<BytesMut> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        let mut buf = BytesMut::with_capacity(1024);

        let n = timeout(read_timeout, stream.read_buf(&mut buf))
            .await
            .map_err(|_| Error::ReadTimeout { available: 0 })?
            .map_err(Error::Io)?;

        if n == 0 {
            return Err(Error::ConnectionClosed);
        }

        trace!("Received {} bytes", n);

        Ok(buf)
    }

    fn remote_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Drop for TlsTransport {
    fn drop(&mut self) {
        if self.is_connected() {
            warn!("TLS transport dropped while still connected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rustls::ServerConfig;
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    const ANCHOR_PEM: &[u8] = include_bytes!("../testdata/anchor.pem");
    const SERVER_PEM: &[u8] = include_bytes!("../testdata/server.pem");
    const SERVER_KEY: &[u8] = include_bytes!("../testdata/server.key");
    const ROGUE_PEM: &[u8] = include_bytes!("../testdata/rogue.pem");

    fn verifier() -> PinnedAnchorVerifier {
        let anchor = TrustAnchor::from_pem(ANCHOR_PEM).unwrap();
        PinnedAnchorVerifier::new(&anchor, Arc::new(rustls::crypto::ring::default_provider()))
            .unwrap()
    }

    fn verify(cert_pem: &[u8], name: &str) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let cert = TrustAnchor::from_pem(cert_pem).unwrap();
        let name = ServerName::try_from(name.to_string()).unwrap();
        verifier().verify_server_cert(cert.der(), &[], &name, &[], UnixTime::now())
    }

    #[test]
    fn test_anchor_from_pem() {
        let anchor = TrustAnchor::from_pem(ANCHOR_PEM).unwrap();
        assert!(!anchor.der().is_empty());
        assert_eq!(anchor, TrustAnchor::from_der(anchor.der().to_vec()));
    }

    #[test]
    fn test_anchor_from_garbage() {
        assert!(matches!(
            TrustAnchor::from_pem(b"not a certificate"),
            Err(Error::TrustAnchor(_))
        ));
    }

    #[test]
    fn test_accepts_anchor_itself() {
        assert!(verify(ANCHOR_PEM, "anything.example").is_ok());
    }

    #[test]
    fn test_anchor_itself_checked_for_validity() {
        let anchor = TrustAnchor::from_pem(ANCHOR_PEM).unwrap();
        let name = ServerName::try_from("anything.example".to_string()).unwrap();
        let at = |secs| UnixTime::since_unix_epoch(Duration::from_secs(secs));

        // 1970, before the anchor was issued
        assert!(matches!(
            verifier().verify_server_cert(anchor.der(), &[], &name, &[], at(0)),
            Err(rustls::Error::InvalidCertificate(CertificateError::NotValidYet))
        ));
        // 2200, after it lapsed
        assert!(matches!(
            verifier().verify_server_cert(anchor.der(), &[], &name, &[], at(7_258_118_400)),
            Err(rustls::Error::InvalidCertificate(CertificateError::Expired))
        ));
    }

    #[test]
    fn test_accepts_chain_despite_name_mismatch() {
        assert!(verify(SERVER_PEM, "license.humlink.test").is_ok());
        assert!(verify(SERVER_PEM, "127.0.0.1").is_ok());
    }

    #[test]
    fn test_rejects_foreign_certificate() {
        assert!(verify(ROGUE_PEM, "license.humlink.test").is_err());
    }

    fn server_acceptor() -> TlsAcceptor {
        let chain = rustls_pemfile::certs(&mut BufReader::new(Cursor::new(SERVER_PEM)))
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        let key = rustls_pemfile::private_key(&mut BufReader::new(Cursor::new(SERVER_KEY)))
            .unwrap()
            .unwrap();

        let config = ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .unwrap();

        TlsAcceptor::from(Arc::new(config))
    }

    #[tokio::test]
    async fn test_round_trip_over_tls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let acceptor = server_acceptor();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut tls = acceptor.accept(tcp).await.unwrap();
            let mut request = [0u8; 4];
            tls.read_exact(&mut request).await.unwrap();
            tls.write_all(b"pong").await.unwrap();
            tls.shutdown().await.unwrap();
            request
        });

        let anchor = TrustAnchor::from_pem(ANCHOR_PEM).unwrap();
        let mut transport = TlsTransport::new("127.0.0.1", port, &anchor).unwrap();
        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        transport.send(b"ping").await.unwrap();
        let reply = transport.receive(Duration::from_secs(5)).await.unwrap();
        assert_eq!(&reply[..], b"pong");

        transport.disconnect().await.unwrap();
        assert_eq!(&server.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_handshake_rejected_for_untrusted_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let acceptor = server_acceptor();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let _ = acceptor.accept(tcp).await;
        });

        let rogue = TrustAnchor::from_pem(ROGUE_PEM).unwrap();
        let mut transport = TlsTransport::new("127.0.0.1", port, &rogue).unwrap();

        assert!(matches!(transport.connect().await, Err(Error::Handshake(_))));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_send_when_disconnected() {
        let anchor = TrustAnchor::from_pem(ANCHOR_PEM).unwrap();
        let mut transport = TlsTransport::new("127.0.0.1", 5678, &anchor).unwrap();
        assert!(matches!(transport.send(b"x").await, Err(Error::NotConnected)));
    }
}
