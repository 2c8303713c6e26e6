//! Persisted tokens and the local license decision

use std::fmt;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::fingerprint::DeviceFingerprint;
use crate::keystore::KeyValueStore;
use crate::token::{normalize_controller_id, IdentityToken, DIGEST_LEN};

/// Key holding the authority-signed token
pub const TOKEN_KEY: &str = "identity_token";

/// Key holding the token awaiting validation
pub const PROVISIONAL_KEY: &str = "provisional_token";

/// Local license decision for one controller on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LicenseState {
    /// No token persisted yet; registration needed
    Unregistered,
    /// Binding matches and the check date is still ahead
    Valid,
    /// Binding matches but the check date has passed; renewal needed
    ExpiredRenewable,
    /// Token bound to another host or controller; never repaired automatically
    Invalid,
}

impl LicenseState {
    pub fn requires_operator(&self) -> bool {
        matches!(self, Self::Invalid)
    }
}

impl fmt::Display for LicenseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unregistered => "unregistered",
            Self::Valid => "valid",
            Self::ExpiredRenewable => "expired",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Current and provisional tokens over a [`KeyValueStore`]
pub struct TokenStore<S: KeyValueStore> {
    store: S,
    fingerprint: DeviceFingerprint,
}

impl<S: KeyValueStore> TokenStore<S> {
    /// `fingerprint` is the snapshot every binding is checked against
    pub fn new(store: S, fingerprint: DeviceFingerprint) -> Self {
        Self { store, fingerprint }
    }

    pub fn fingerprint(&self) -> &DeviceFingerprint {
        &self.fingerprint
    }

    fn load(&self, key: &str) -> Option<IdentityToken> {
        let text = self.store.get(key)?;
        if text.trim().is_empty() {
            return None;
        }

        match IdentityToken::from_hex(&text) {
            Ok(token) => Some(token),
            Err(e) => {
                // Present but unbound, so the binding check rejects it
                warn!(key, error = %e, "Stored token is corrupt");
                Some(IdentityToken::default())
            }
        }
    }

    fn save(&mut self, key: &str, token: &IdentityToken) -> Result<()> {
        self.store.set(key, &token.to_hex());
        self.store.sync()
    }

    /// Authority-signed token, if one was committed
    pub fn token(&self) -> Option<IdentityToken> {
        self.load(TOKEN_KEY)
    }

    /// Token created locally and not yet validated
    pub fn provisional(&self) -> Option<IdentityToken> {
        self.load(PROVISIONAL_KEY)
    }

    /// Bind `serial` to this host as of today and persist it as provisional
    pub fn create_provisional(&mut self, serial: &str) -> Result<IdentityToken> {
        self.create_provisional_at(serial, today())
    }

    pub fn create_provisional_at(&mut self, serial: &str, today: NaiveDate) -> Result<IdentityToken> {
        let token = IdentityToken::new(serial, *self.fingerprint.as_bytes(), today, [0u8; DIGEST_LEN]);
        self.save(PROVISIONAL_KEY, &token)?;

        debug!(controller = token.controller_id(), "Created provisional token");
        Ok(token)
    }

    /// Provisional token to send for renewal
    ///
    /// Reuses the stored provisional token when it still binds `serial` to
    /// this host, otherwise creates a new one.
    pub fn provisional_for_renewal(&mut self, serial: &str) -> Result<IdentityToken> {
        match self.provisional() {
            Some(token) if self.binds(&token, serial) => Ok(token),
            _ => self.create_provisional(serial),
        }
    }

    fn binds(&self, token: &IdentityToken, serial: &str) -> bool {
        token.fingerprint() == self.fingerprint.as_bytes()
            && token.controller_id() == normalize_controller_id(serial)
    }

    pub fn state(&self, serial: &str) -> LicenseState {
        self.state_at(serial, today())
    }

    /// Decide the license state for `serial` as of `today`
    pub fn state_at(&self, serial: &str, today: NaiveDate) -> LicenseState {
        let Some(token) = self.token() else {
            return LicenseState::Unregistered;
        };

        if !self.binds(&token, serial) {
            return LicenseState::Invalid;
        }

        if token.check_date() > today {
            LicenseState::Valid
        } else {
            LicenseState::ExpiredRenewable
        }
    }

    pub fn is_still_valid(&self, serial: &str) -> bool {
        self.state(serial) == LicenseState::Valid
    }

    /// Check if the binding is intact but the check date has passed
    pub fn is_expired(&self, serial: &str) -> bool {
        self.state(serial) == LicenseState::ExpiredRenewable
    }

    /// Persist a token returned by the authority
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTokenSize`](crate::Error::InvalidTokenSize)
    /// unless `bytes` is exactly one token.
    pub fn commit(&mut self, bytes: &[u8]) -> Result<IdentityToken> {
        let token = IdentityToken::try_from_bytes(bytes)?;
        self.save(TOKEN_KEY, &token)?;

        info!(
            controller = token.controller_id(),
            renewal = %token.check_date(),
            "License token stored"
        );
        Ok(token)
    }

    /// Date the committed token must be renewed by
    pub fn renewal_date(&self) -> Option<NaiveDate> {
        self.token().map(|t| t.check_date())
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}
