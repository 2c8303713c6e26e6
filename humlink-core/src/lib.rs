//! # humlink-core
//!
//! Wire protocol for force-measurement pad controllers.
//!
//! This crate provides the low-level protocol primitives:
//! - Command frame encoding
//! - Response frame decoding into typed variants
//! - CRC-16 checksum calculation
//! - Command codes and protocol constants
//!
//! It performs no I/O; see `humlink-transport` for the serial link.

pub mod checksum;
pub mod command;
pub mod constants;
pub mod error;
pub mod frame;
pub mod layout;
pub mod response;

pub use command::Command;
pub use error::{Error, Result};
pub use frame::CommandFrame;
pub use response::{frame_complete, Response};
