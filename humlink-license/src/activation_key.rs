//! Activation key entered by the operator

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::token::DIGEST_LEN;

/// 32-byte activation key, written as 64 hex characters
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ActivationKey([u8; DIGEST_LEN]);

impl ActivationKey {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse 64 hex digits; surrounding whitespace is ignored
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();

        if text.len() != DIGEST_LEN * 2 {
            return Err(Error::InvalidActivationKey(format!(
                "expected {} hex characters, got {}",
                DIGEST_LEN * 2,
                text.len()
            )));
        }

        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(text, &mut bytes).map_err(|_| {
            Error::InvalidActivationKey("use only the characters 0-9 and A-F".into())
        })?;

        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl FromStr for ActivationKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// Never print the key itself
impl fmt::Debug for ActivationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActivationKey({}…)", &self.to_hex()[..4])
    }
}

impl Serialize for ActivationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ActivationKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
