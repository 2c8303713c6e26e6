//! # humlink
//!
//! Host-side driver for force-measurement pad controllers.
//!
//! ## Features
//!
//! - Typed request/response exchanges over the controller's serial link
//! - Live force/moment streaming with unsolicited notifications
//! - License binding of a controller to one host, validated against a
//!   remote authority over pinned TLS
//! - TOML configuration with validated defaults
//!
//! ## Quick Start
//!
//! ```no_run
//! use humlink::config::AppConfig;
//! use humlink::ControllerSession;
//!
//! fn main() -> humlink::Result<()> {
//!     let config = AppConfig::load(&AppConfig::default_path())?;
//!
//!     // Open the serial link
//!     let mut session = ControllerSession::open(config.serial.channel_config())?
//!         .with_timeout(config.serial.response_timeout());
//!
//!     // Identify the controller
//!     let info = session.get_controller_info()?;
//!     println!("{}", info);
//!
//!     session.close();
//!     Ok(())
//! }
//! ```

pub mod authorize;
pub mod config;
pub mod controller;
pub mod error;
pub mod info;

// Re-exports
pub use authorize::{authorize, Authorization, UnlicensedReason};
pub use config::{AppConfig, ConfigError, ConfigLoadResult};
pub use controller::{ControllerSession, StreamEvent};
pub use error::{Error, ProtocolError, ProtocolResult, Result};
pub use info::ControllerInfo;

// Re-export types
pub use humlink_core::response::{Channels, ControllerStatus, FirmwareVersion, ForceFrame, Notify};
pub use humlink_core::{Command, CommandFrame, Response};
pub use humlink_license::{
    ActivationKey, AuthorityConfig, DeviceFingerprint, FileStore, IdentityToken, KeyValueStore, LicenseClient,
    LicenseState, MemoryStore, TokenStore,
};
pub use humlink_license::Error as LicenseError;
pub use humlink_transport::{SerialChannel, SerialConfig, SerialParams, TrustAnchor};
