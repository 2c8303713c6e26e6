//! Startup license decision

use std::fmt;

use chrono::{NaiveDate, Utc};
use tracing::{error, info, warn};

use humlink_license::{ActivationKey, KeyValueStore, LicenseClient, LicenseState, TokenStore};
use humlink_transport::Transport;

use crate::error::{Error, Result};

/// Outcome of the startup license decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// Fully operational until `renewal`
    Licensed { renewal: NaiveDate },
    /// Test mode only
    Unlicensed { reason: UnlicensedReason },
}

impl Authorization {
    pub fn is_licensed(&self) -> bool {
        matches!(self, Self::Licensed { .. })
    }
}

/// Why the host runs unlicensed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlicensedReason {
    /// The authority refused or garbled the registration
    RegistrationRejected,
    /// The token expired and could not be renewed
    RenewalFailed,
    /// The token belongs to another host or controller
    InvalidBinding,
}

impl UnlicensedReason {
    /// Check if only an operator (new activation key) can fix it
    pub fn requires_operator(&self) -> bool {
        matches!(self, Self::InvalidBinding)
    }
}

impl fmt::Display for UnlicensedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RegistrationRejected => "registration rejected",
            Self::RenewalFailed => "renewal failed",
            Self::InvalidBinding => "license bound to another host or controller",
        };
        f.write_str(s)
    }
}

/// Decide whether the controller `serial` may run on this host
///
/// - Valid token: licensed, nothing leaves the host
/// - No token: register with `activation_key`
/// - Expired token: renew with `activation_key`; failure degrades to unlicensed
/// - Foreign token: unlicensed until an operator intervenes
///
/// `connect` builds the license authority client and is only called when
/// the authority has to be asked.
///
/// # Errors
///
/// - [`Error::MissingActivationKey`] if registration is needed and no key is given
/// - [`Error::License`] or [`Error::Config`] if the license authority cannot
///   be reached during registration
/// - [`Error::License`] if the key store cannot be written
pub async fn authorize<S, T, C>(
    serial: &str,
    store: &mut TokenStore<S>,
    connect: C,
    activation_key: Option<&ActivationKey>,
) -> Result<Authorization>
where
    S: KeyValueStore,
    T: Transport,
    C: FnOnce() -> Result<LicenseClient<T>>,
{
    authorize_at(serial, store, connect, activation_key, Utc::now().date_naive()).await
}

/// [`authorize`] as of `today`
pub async fn authorize_at<S, T, C>(
    serial: &str,
    store: &mut TokenStore<S>,
    connect: C,
    activation_key: Option<&ActivationKey>,
    today: NaiveDate,
) -> Result<Authorization>
where
    S: KeyValueStore,
    T: Transport,
    C: FnOnce() -> Result<LicenseClient<T>>,
{
    let state = store.state_at(serial, today);
    info!(controller = serial, %state, "License state");

    match state {
        LicenseState::Valid => Ok(licensed(store, serial, today, UnlicensedReason::InvalidBinding)),

        LicenseState::Unregistered => {
            let key = activation_key.ok_or(Error::MissingActivationKey)?;
            warn!("Product registration in progress, license authority connection required");

            let provisional = store.create_provisional_at(serial, today)?;
            let mut client = connect().inspect_err(|e| {
                error!(error = %e, "Cannot set up the license authority connection");
            })?;
            match client.validate(key, &provisional).await {
                Ok(response) => Ok(commit(store, serial, today, &response, UnlicensedReason::RegistrationRejected)?),
                Err(e) if e.is_channel_failure() => Err(e.into()),
                Err(e) => {
                    error!(error = %e, "License validation error, system in test mode");
                    Ok(unlicensed(UnlicensedReason::RegistrationRejected))
                }
            }
        }

        LicenseState::ExpiredRenewable => {
            warn!("Token validity expired, license authority connection required for renewal");

            let Some(key) = activation_key else {
                error!("No activation key configured for renewal, system in test mode");
                return Ok(unlicensed(UnlicensedReason::RenewalFailed));
            };

            let provisional = store.provisional_for_renewal(serial)?;
            let mut client = match connect() {
                Ok(client) => client,
                Err(e) => {
                    error!(error = %e, "Cannot set up the license authority connection, system in test mode");
                    return Ok(unlicensed(UnlicensedReason::RenewalFailed));
                }
            };
            match client.validate(key, &provisional).await {
                Ok(response) => Ok(commit(store, serial, today, &response, UnlicensedReason::RenewalFailed)?),
                Err(e) => {
                    error!(error = %e, "License renewal error, system in test mode");
                    Ok(unlicensed(UnlicensedReason::RenewalFailed))
                }
            }
        }

        LicenseState::Invalid => {
            warn!("This license is invalid, system in test mode; a new activation key is required");
            Ok(unlicensed(UnlicensedReason::InvalidBinding))
        }
    }
}

/// Persist the authority's answer and re-check the binding
fn commit<S: KeyValueStore>(
    store: &mut TokenStore<S>,
    serial: &str,
    today: NaiveDate,
    response: &[u8],
    failure: UnlicensedReason,
) -> Result<Authorization> {
    match store.commit(response) {
        Ok(_) => Ok(licensed(store, serial, today, failure)),
        Err(humlink_license::Error::InvalidTokenSize { actual, .. }) => {
            error!(len = actual, "License authority returned no usable token, system in test mode");
            Ok(unlicensed(failure))
        }
        Err(e) => Err(e.into()),
    }
}

fn licensed<S: KeyValueStore>(
    store: &TokenStore<S>,
    serial: &str,
    today: NaiveDate,
    failure: UnlicensedReason,
) -> Authorization {
    match (store.state_at(serial, today), store.renewal_date()) {
        (LicenseState::Valid, Some(renewal)) => {
            info!(%renewal, "License valid, system fully operational");
            Authorization::Licensed { renewal }
        }
        (state, _) => {
            error!(%state, "License token does not validate this controller, system in test mode");
            unlicensed(failure)
        }
    }
}

fn unlicensed(reason: UnlicensedReason) -> Authorization {
    Authorization::Unlicensed { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::BytesMut;
    use humlink_license::{DeviceFingerprint, IdentityToken, MemoryStore, StaticSource};
    use humlink_transport as transport;
    use mockall::mock;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    mock! {
        pub Authority {}

        #[async_trait]
        impl Transport for Authority {
            async fn connect(&mut self) -> transport::Result<()>;
            async fn disconnect(&mut self) -> transport::Result<()>;
            fn is_connected(&self) -> bool;
            async fn send(&mut self, data: &[u8]) -> transport::Result<()>;
            async fn receive(&mut self, timeout: Duration) -> transport::Result<BytesMut>;
            fn remote_addr(&self) -> String;
        }
    }

    const SERIAL: &str = "CTRL-001";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        date(2025, 6, 1)
    }

    fn fingerprint() -> DeviceFingerprint {
        DeviceFingerprint::compute(&StaticSource::new(vec![[2, 0, 0, 0, 0, 1]], "bench-pc"))
    }

    fn store() -> TokenStore<MemoryStore> {
        TokenStore::new(MemoryStore::new(), fingerprint())
    }

    fn signed(serial: &str, fp: &DeviceFingerprint, check: NaiveDate) -> [u8; 88] {
        IdentityToken::new(serial, *fp.as_bytes(), check, [0x5A; 32]).to_bytes()
    }

    fn key() -> ActivationKey {
        ActivationKey::from_bytes([0xAB; 32])
    }

    type Connect = Box<dyn FnOnce() -> Result<LicenseClient<MockAuthority>>>;

    /// Authority that must never be contacted
    fn offline() -> Connect {
        Box::new(|| -> Result<LicenseClient<MockAuthority>> { panic!("license authority contacted") })
    }

    /// Authority client that cannot be built, e.g. an unreadable certificate
    fn misconfigured() -> Connect {
        Box::new(|| -> Result<LicenseClient<MockAuthority>> {
            Err(Error::License(humlink_license::Error::Connect(
                transport::Error::ConnectionTimeout,
            )))
        })
    }

    fn ready(client: LicenseClient<MockAuthority>) -> Connect {
        Box::new(move || Ok(client))
    }

    /// Authority answering every request with `response`
    fn answering(response: Vec<u8>) -> Connect {
        let mut mock = MockAuthority::new();
        mock.expect_remote_addr().return_const("authority:5678".to_string());
        mock.expect_connect().times(1).returning(|| Ok(()));
        mock.expect_send().times(1).returning(|_| Ok(()));
        let mut pending = Some(response);
        mock.expect_receive().returning(move |_| match pending.take() {
            Some(bytes) => Ok(BytesMut::from(&bytes[..])),
            None => Err(transport::Error::ConnectionClosed),
        });
        mock.expect_disconnect().returning(|| Ok(()));
        ready(LicenseClient::with_transport(mock, Duration::from_secs(1)))
    }

    fn unreachable() -> Connect {
        let mut mock = MockAuthority::new();
        mock.expect_remote_addr().return_const("authority:5678".to_string());
        mock.expect_connect()
            .returning(|| Err(transport::Error::ConnectionTimeout));
        mock.expect_disconnect().returning(|| Ok(()));
        ready(LicenseClient::with_transport(mock, Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_valid_token_stays_offline() {
        let mut store = store();
        store.commit(&signed(SERIAL, &fingerprint(), date(2026, 1, 1))).unwrap();

        let auth = authorize_at(SERIAL, &mut store, offline(), None, today()).await.unwrap();
        assert_eq!(auth, Authorization::Licensed { renewal: date(2026, 1, 1) });
    }

    #[tokio::test]
    async fn test_valid_token_ignores_authority_setup() {
        let mut store = store();
        store.commit(&signed(SERIAL, &fingerprint(), date(2026, 1, 1))).unwrap();

        let auth = authorize_at(SERIAL, &mut store, misconfigured(), None, today()).await.unwrap();
        assert!(auth.is_licensed());
    }

    #[tokio::test]
    async fn test_registration_aborts_without_authority_setup() {
        let mut store = store();
        let err = authorize_at(SERIAL, &mut store, misconfigured(), Some(&key()), today())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::License(e) if e.is_channel_failure()));
    }

    #[tokio::test]
    async fn test_renewal_degrades_without_authority_setup() {
        let mut store = store();
        store.commit(&signed(SERIAL, &fingerprint(), date(2025, 1, 1))).unwrap();

        let auth = authorize_at(SERIAL, &mut store, misconfigured(), Some(&key()), today())
            .await
            .unwrap();

        assert_eq!(
            auth,
            Authorization::Unlicensed {
                reason: UnlicensedReason::RenewalFailed
            }
        );
    }

    #[tokio::test]
    async fn test_registration_requires_key() {
        let mut store = store();
        let err = authorize_at(SERIAL, &mut store, offline(), None, today())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingActivationKey));
        assert!(err.requires_operator());
    }

    #[tokio::test]
    async fn test_registration() {
        let mut store = store();
        let client = answering(signed(SERIAL, &fingerprint(), date(2026, 6, 1)).to_vec());

        let auth = authorize_at(SERIAL, &mut store, client, Some(&key()), today())
            .await
            .unwrap();

        assert_eq!(auth, Authorization::Licensed { renewal: date(2026, 6, 1) });
        assert_eq!(store.state_at(SERIAL, today()), LicenseState::Valid);
        assert_eq!(store.provisional().unwrap().controller_id(), SERIAL);
    }

    #[tokio::test]
    async fn test_registration_unreachable_aborts() {
        let mut store = store();
        let err = authorize_at(SERIAL, &mut store, unreachable(), Some(&key()), today())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::License(e) if e.is_channel_failure()));
    }

    #[tokio::test]
    async fn test_registration_rejected_degrades() {
        let mut store = store();
        let client = answering(b"denied".to_vec());

        let auth = authorize_at(SERIAL, &mut store, client, Some(&key()), today())
            .await
            .unwrap();

        assert_eq!(
            auth,
            Authorization::Unlicensed {
                reason: UnlicensedReason::RegistrationRejected
            }
        );
        assert_eq!(store.token(), None);
    }

    #[tokio::test]
    async fn test_renewal() {
        let mut store = store();
        store.commit(&signed(SERIAL, &fingerprint(), date(2025, 1, 1))).unwrap();
        let client = answering(signed(SERIAL, &fingerprint(), date(2026, 1, 1)).to_vec());

        let auth = authorize_at(SERIAL, &mut store, client, Some(&key()), today())
            .await
            .unwrap();

        assert_eq!(auth, Authorization::Licensed { renewal: date(2026, 1, 1) });
    }

    #[tokio::test]
    async fn test_renewal_failure_degrades() {
        let mut store = store();
        store.commit(&signed(SERIAL, &fingerprint(), date(2025, 1, 1))).unwrap();

        let auth = authorize_at(SERIAL, &mut store, unreachable(), Some(&key()), today())
            .await
            .unwrap();

        assert_eq!(
            auth,
            Authorization::Unlicensed {
                reason: UnlicensedReason::RenewalFailed
            }
        );
        assert_eq!(store.state_at(SERIAL, today()), LicenseState::ExpiredRenewable);
    }

    #[tokio::test]
    async fn test_foreign_token_never_repaired() {
        let other = DeviceFingerprint::compute(&StaticSource::new(vec![[2, 0, 0, 0, 0, 2]], "bench-pc"));
        let mut store = store();
        store.commit(&signed(SERIAL, &other, date(2099, 1, 1))).unwrap();

        let auth = authorize_at(SERIAL, &mut store, offline(), Some(&key()), today())
            .await
            .unwrap();

        match auth {
            Authorization::Unlicensed { reason } => assert!(reason.requires_operator()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_authority_token_for_other_host_not_accepted() {
        let other = DeviceFingerprint::compute(&StaticSource::new(vec![[2, 0, 0, 0, 0, 9]], "elsewhere"));
        let mut store = store();
        let client = answering(signed(SERIAL, &other, date(2026, 6, 1)).to_vec());

        let auth = authorize_at(SERIAL, &mut store, client, Some(&key()), today())
            .await
            .unwrap();

        assert!(!auth.is_licensed());
    }
}
