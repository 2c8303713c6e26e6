//! Host hardware identity

use std::fmt;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::token::DIGEST_LEN;

/// Where the hardware identity comes from
pub trait FingerprintSource {
    /// Hardware addresses of the host's network interfaces
    fn hardware_addresses(&self) -> Vec<[u8; 6]>;

    fn hostname(&self) -> String;
}

/// The running host's interfaces and name
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSource;

impl FingerprintSource for SystemSource {
    fn hardware_addresses(&self) -> Vec<[u8; 6]> {
        match mac_address::MacAddressIterator::new() {
            Ok(addresses) => addresses.map(|mac| mac.bytes()).collect(),
            Err(e) => {
                warn!(error = %e, "Cannot enumerate network interfaces");
                Vec::new()
            }
        }
    }

    fn hostname(&self) -> String {
        gethostname::gethostname().to_string_lossy().into_owned()
    }
}

/// Fixed identity, for tests and provisioning tools
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticSource {
    pub addresses: Vec<[u8; 6]>,
    pub hostname: String,
}

impl StaticSource {
    pub fn new(addresses: Vec<[u8; 6]>, hostname: impl Into<String>) -> Self {
        Self {
            addresses,
            hostname: hostname.into(),
        }
    }
}

impl FingerprintSource for StaticSource {
    fn hardware_addresses(&self) -> Vec<[u8; 6]> {
        self.addresses.clone()
    }

    fn hostname(&self) -> String {
        self.hostname.clone()
    }
}

/// SHA-256 over the sorted interface addresses and the host name
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceFingerprint([u8; DIGEST_LEN]);

impl DeviceFingerprint {
    /// Compute from `source`
    ///
    /// All-zero (loopback) addresses are skipped and duplicates removed;
    /// the rest are hashed in `AA:BB:CC:DD:EE:FF` form, sorted, followed by
    /// the host name.
    pub fn compute(source: &impl FingerprintSource) -> Self {
        let mut addresses: Vec<String> = source
            .hardware_addresses()
            .into_iter()
            .filter(|mac| mac.iter().any(|&b| b != 0))
            .map(|mac| format_mac(&mac))
            .collect();
        addresses.sort();
        addresses.dedup();

        let hostname = source.hostname();

        let mut hasher = Sha256::new();
        for address in &addresses {
            hasher.update(address.as_bytes());
        }
        hasher.update(hostname.as_bytes());

        let fingerprint = Self(hasher.finalize().into());
        debug!(interfaces = addresses.len(), %hostname, %fingerprint, "Computed device fingerprint");
        fingerprint
    }

    /// Fingerprint of the running host
    pub fn system() -> Self {
        Self::compute(&SystemSource)
    }

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// UUID-style rendering of the first 16 bytes, for display to operators
    pub fn uuid(&self) -> String {
        let h = hex::encode(&self.0[..16]);
        format!("{}-{}-{}-{}-{}", &h[..8], &h[8..12], &h[12..16], &h[16..20], &h[20..])
    }
}

fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

impl fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for DeviceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceFingerprint({})", self)
    }
}
