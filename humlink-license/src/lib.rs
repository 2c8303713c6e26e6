//! # humlink-license
//!
//! License binding for humlink hosts:
//! - [`IdentityToken`]: the 88-byte record binding a controller to a host
//! - [`DeviceFingerprint`]: stable hash of the host's hardware identity
//! - [`TokenStore`]: persisted tokens and the local validity decision
//! - [`LicenseClient`]: token validation against the remote authority

pub mod activation_key;
pub mod client;
pub mod error;
pub mod fingerprint;
pub mod keystore;
pub mod store;
pub mod token;

pub use activation_key::ActivationKey;
pub use client::{AuthorityConfig, LicenseClient};
pub use error::{Error, Result};
pub use fingerprint::{DeviceFingerprint, FingerprintSource, StaticSource, SystemSource};
pub use keystore::{FileStore, KeyValueStore, MemoryStore};
pub use store::{LicenseState, TokenStore};
pub use token::{IdentityToken, TOKEN_LEN};
