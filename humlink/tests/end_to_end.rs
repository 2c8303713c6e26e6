//! Controller exchanges and license decisions against simulated peers

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{Days, NaiveDate, Utc};
use mockall::mock;
use pretty_assertions::assert_eq;

use humlink::authorize::authorize_at;
use humlink::{
    ActivationKey, AppConfig, Authorization, Command, CommandFrame, ControllerSession, DeviceFingerprint, FileStore,
    IdentityToken, LicenseClient, LicenseState, MemoryStore, ProtocolError, SerialChannel, SerialConfig, TokenStore,
};
use humlink_core::response::{self, body};
use humlink_license::StaticSource;
use humlink_transport::loopback::Loopback;
use humlink_transport::{self as transport, Transport};

mock! {
    Authority {}

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

fn open_session(loopback: &Loopback) -> ControllerSession {
    let mut channel = SerialChannel::with_opener(SerialConfig::new("loop0"), loopback.clone());
    channel.open().unwrap();
    ControllerSession::new(channel).with_timeout(Duration::from_secs(2))
}

fn serial_number_reply(data: &[u8]) -> Option<Vec<u8>> {
    let frame = CommandFrame::decode(BytesMut::from(data)).ok()?;
    assert_eq!(frame.command, Command::GetSerialNumber);
    Some(response::seal(0, 0x24, &body::serial_number("SN12345")).to_vec())
}

fn fingerprint() -> DeviceFingerprint {
    DeviceFingerprint::compute(&StaticSource::new(
        vec![[0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E]],
        "bench-pc",
    ))
}

fn future_token(serial: &str, fingerprint: &DeviceFingerprint) -> [u8; 88] {
    let check = Utc::now().date_naive().checked_add_days(Days::new(365)).unwrap();
    IdentityToken::new(serial, *fingerprint.as_bytes(), check, [0x5A; 32]).to_bytes()
}

#[test]
fn scenario_a_serial_number_exchange() {
    assert_eq!(
        &CommandFrame::new(Command::GetSerialNumber).encode()[..],
        &[0xFE, 0xED, 0x01, 0x00, 0x24, 0x4A, 0x9F, 0x04, 0x04]
    );

    let loopback = Loopback::new();
    loopback.respond_with(serial_number_reply);
    let mut session = open_session(&loopback);

    assert_eq!(session.get_serial_number().unwrap(), "SN12345");
    assert_eq!(
        loopback.written(),
        vec![0xFE, 0xED, 0x01, 0x00, 0x24, 0x4A, 0x9F, 0x04, 0x04]
    );

    session.close();
    assert!(!session.is_open());
}

#[test]
fn scenario_b_checksum_off_by_one_bit() {
    let loopback = Loopback::new();
    loopback.respond_with(|data| {
        let mut reply = serial_number_reply(data)?;
        let checksum_at = reply.len() - 4;
        reply[checksum_at] ^= 0x01;
        Some(reply)
    });
    let mut session = open_session(&loopback);

    let err = session.get_serial_number().unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Decode(humlink_core::Error::ChecksumMismatch { .. })
    ));
    assert!(err.is_framing());
    assert!(session.is_open());

    // The same channel keeps working
    loopback.respond_with(serial_number_reply);
    assert_eq!(session.get_serial_number().unwrap(), "SN12345");
}

#[test]
fn scenario_c_provisional_then_committed_token() {
    let mut store = TokenStore::new(MemoryStore::new(), fingerprint());

    let provisional = store.create_provisional("CTRL-001").unwrap();
    assert_eq!(provisional.controller_id(), "CTRL-001");
    assert_eq!(store.state("CTRL-001"), LicenseState::Unregistered);

    store.commit(&future_token("CTRL-001", &fingerprint())).unwrap();
    assert_eq!(store.state("CTRL-001"), LicenseState::Valid);
    assert!(store.is_still_valid("CTRL-001"));
}

#[test]
fn token_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keystore.toml");

    {
        let mut store = TokenStore::new(FileStore::open(&path).unwrap(), fingerprint());
        store.commit(&future_token("CTRL-001", &fingerprint())).unwrap();
    }

    let store = TokenStore::new(FileStore::open(&path).unwrap(), fingerprint());
    assert_eq!(store.state("CTRL-001"), LicenseState::Valid);

    // Same file on different hardware
    let moved = TokenStore::new(
        FileStore::open(&path).unwrap(),
        DeviceFingerprint::compute(&StaticSource::new(vec![[0x02, 0, 0, 0, 0, 0x01]], "bench-pc")),
    );
    assert_eq!(moved.state("CTRL-001"), LicenseState::Invalid);
}

#[test]
fn expired_token_needs_renewal() {
    let mut store = TokenStore::new(MemoryStore::new(), fingerprint());
    let past = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    store
        .commit(&IdentityToken::new("CTRL-001", *fingerprint().as_bytes(), past, [0x5A; 32]).to_bytes())
        .unwrap();

    assert_eq!(store.state("CTRL-001"), LicenseState::ExpiredRenewable);
    assert!(store.is_expired("CTRL-001"));
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Authority that expects `key` once and answers with a token valid until `check`
fn authority(
    key: ActivationKey,
    check: NaiveDate,
) -> impl FnOnce() -> humlink::Result<LicenseClient<MockAuthority>> {
    let signed = IdentityToken::new("CTRL-001", *fingerprint().as_bytes(), check, [0x5A; 32]).to_bytes();

    let mut mock = MockAuthority::new();
    mock.expect_remote_addr().return_const("authority:5678".to_string());
    mock.expect_connect().times(1).returning(|| Ok(()));
    mock.expect_send()
        .withf(move |data| data[0] == b'1' && data[1..33] == key.as_bytes()[..])
        .times(1)
        .returning(|_| Ok(()));
    let mut pending = Some(signed);
    mock.expect_receive().returning(move |_| match pending.take() {
        Some(bytes) => Ok(BytesMut::from(&bytes[..])),
        None => Err(transport::Error::ConnectionClosed),
    });
    mock.expect_disconnect().returning(|| Ok(()));

    move || -> humlink::Result<LicenseClient<MockAuthority>> {
        Ok(LicenseClient::with_transport(mock, Duration::from_secs(1)))
    }
}

#[tokio::test]
async fn activation_key_saved_for_renewal() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    let mut store = TokenStore::new(MemoryStore::new(), fingerprint());

    // First start: the operator enters the key
    let mut config = AppConfig::load(&config_path).unwrap();
    assert_eq!(config.license.activation_key, None);
    let entered = ActivationKey::from_bytes([0xC3; 32]);

    let registered = date(2025, 6, 1);
    let auth = authorize_at(
        "CTRL-001",
        &mut store,
        authority(entered, date(2026, 6, 1)),
        Some(&entered),
        registered,
    )
    .await
    .unwrap();
    assert_eq!(auth, Authorization::Licensed { renewal: date(2026, 6, 1) });
    assert!(config.remember_activation_key(&entered, &config_path).unwrap());

    // A year later, after a restart
    let config = AppConfig::load(&config_path).unwrap();
    assert_eq!(config.license.activation_key, Some(entered));

    let later = date(2026, 6, 2);
    assert_eq!(store.state_at("CTRL-001", later), LicenseState::ExpiredRenewable);

    let auth = authorize_at(
        "CTRL-001",
        &mut store,
        authority(entered, date(2027, 6, 1)),
        config.license.activation_key.as_ref(),
        later,
    )
    .await
    .unwrap();
    assert_eq!(auth, Authorization::Licensed { renewal: date(2027, 6, 1) });
}
