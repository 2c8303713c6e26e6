//! Identity token binding a controller to one host
//!
//! # Layout (88 bytes)
//!
//! ```text
//! ┌───────────────┬─────────────┬────────────┬───────────────┐
//! │ ControllerID  │ Fingerprint │ CheckTime  │ ValidatedKey  │
//! │ 20 bytes UTF8 │  32 bytes   │ u32 (BE)   │   32 bytes    │
//! │ nul-padded    │  SHA-256    │ epoch secs │               │
//! └───────────────┴─────────────┴────────────┴───────────────┘
//! ```
//!
//! CheckTime is midnight UTC of the check date. It is the only big-endian
//! field anywhere in the system.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use chrono::{Days, NaiveDate};
use tracing::warn;

use crate::error::{Error, Result};

/// Serialized token size
pub const TOKEN_LEN: usize = 88;

/// Controller id field width
pub const CONTROLLER_ID_LEN: usize = 20;

/// Fingerprint and key field width
pub const DIGEST_LEN: usize = 32;

mod offsets {
    pub const CONTROLLER_ID: usize = 0;
    pub const FINGERPRINT: usize = 20;
    pub const CHECK_TIME: usize = 52;
    pub const VALIDATED_KEY: usize = 56;
}

const SECS_PER_DAY: u64 = 86_400;

/// Token record; the all-zero value is the "no token" token
#[derive(Clone, Default, PartialEq, Eq)]
pub struct IdentityToken {
    controller_id: String,
    fingerprint: [u8; DIGEST_LEN],
    check_time: u32,
    validated_key: [u8; DIGEST_LEN],
}

impl IdentityToken {
    pub fn new(
        controller_id: &str,
        fingerprint: [u8; DIGEST_LEN],
        check_date: NaiveDate,
        validated_key: [u8; DIGEST_LEN],
    ) -> Self {
        let mut token = Self {
            fingerprint,
            validated_key,
            ..Self::default()
        };
        token.set_controller_id(controller_id);
        token.set_check_date(check_date);
        token
    }

    /// Set the controller id, trimmed and cut to 20 bytes on a character boundary
    pub fn set_controller_id(&mut self, id: &str) {
        self.controller_id = normalize_controller_id(id);
    }

    pub fn controller_id(&self) -> &str {
        &self.controller_id
    }

    pub fn fingerprint(&self) -> &[u8; DIGEST_LEN] {
        &self.fingerprint
    }

    pub fn set_fingerprint(&mut self, fingerprint: [u8; DIGEST_LEN]) {
        self.fingerprint = fingerprint;
    }

    /// Seconds since the Unix epoch, as stored
    pub fn check_time(&self) -> u32 {
        self.check_time
    }

    /// Date the token must next be checked against the authority
    pub fn check_date(&self) -> NaiveDate {
        NaiveDate::default()
            .checked_add_days(Days::new(u64::from(self.check_time) / SECS_PER_DAY))
            .unwrap_or_default()
    }

    /// Store midnight UTC of `date`; dates outside the u32 range saturate
    pub fn set_check_date(&mut self, date: NaiveDate) {
        let days = date.signed_duration_since(NaiveDate::default()).num_days();
        let secs = days.saturating_mul(SECS_PER_DAY as i64);
        self.check_time = u32::try_from(secs.max(0)).unwrap_or(u32::MAX);
    }

    pub fn validated_key(&self) -> &[u8; DIGEST_LEN] {
        &self.validated_key
    }

    pub fn set_validated_key(&mut self, key: [u8; DIGEST_LEN]) {
        self.validated_key = key;
    }

    /// Check if this is the zero token
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Serialize to the 88-byte wire/storage form
    pub fn to_bytes(&self) -> [u8; TOKEN_LEN] {
        let mut out = [0u8; TOKEN_LEN];

        let id = self.controller_id.as_bytes();
        let id = &id[..id.len().min(CONTROLLER_ID_LEN)];
        out[offsets::CONTROLLER_ID..offsets::CONTROLLER_ID + id.len()].copy_from_slice(id);
        out[offsets::FINGERPRINT..offsets::CHECK_TIME].copy_from_slice(&self.fingerprint);
        BigEndian::write_u32(&mut out[offsets::CHECK_TIME..offsets::VALIDATED_KEY], self.check_time);
        out[offsets::VALIDATED_KEY..].copy_from_slice(&self.validated_key);

        out
    }

    /// Deserialize; fewer than 88 bytes yields the zero token
    pub fn from_bytes(data: &[u8]) -> Self {
        if data.len() < TOKEN_LEN {
            warn!(len = data.len(), "Token too short, using empty token");
            return Self::default();
        }

        let mut fingerprint = [0u8; DIGEST_LEN];
        fingerprint.copy_from_slice(&data[offsets::FINGERPRINT..offsets::CHECK_TIME]);

        let mut validated_key = [0u8; DIGEST_LEN];
        validated_key.copy_from_slice(&data[offsets::VALIDATED_KEY..TOKEN_LEN]);

        let mut token = Self {
            controller_id: String::new(),
            fingerprint,
            check_time: BigEndian::read_u32(&data[offsets::CHECK_TIME..offsets::VALIDATED_KEY]),
            validated_key,
        };

        let raw_id = String::from_utf8_lossy(&data[offsets::CONTROLLER_ID..offsets::FINGERPRINT]);
        token.set_controller_id(raw_id.trim_matches('\0'));
        token
    }

    /// Deserialize, rejecting anything that is not exactly one token
    pub fn try_from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != TOKEN_LEN {
            return Err(Error::InvalidTokenSize {
                expected: TOKEN_LEN,
                actual: data.len(),
            });
        }
        Ok(Self::from_bytes(data))
    }

    /// Hex form used by the key/value store
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text.trim())?;
        Self::try_from_bytes(&bytes)
    }
}

/// Controller id as a token stores it: trimmed, at most 20 bytes
pub fn normalize_controller_id(id: &str) -> String {
    let id = id.trim();
    if id.len() <= CONTROLLER_ID_LEN {
        return id.to_string();
    }

    let mut end = CONTROLLER_ID_LEN;
    while !id.is_char_boundary(end) {
        end -= 1;
    }
    warn!(id, "Controller id longer than {} bytes, truncating", CONTROLLER_ID_LEN);
    id[..end].to_string()
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityToken")
            .field("controller_id", &self.controller_id)
            .field("fingerprint", &hex::encode(self.fingerprint))
            .field("check_date", &self.check_date())
            .field("validated", &(self.validated_key != [0u8; DIGEST_LEN]))
            .finish()
    }
}
