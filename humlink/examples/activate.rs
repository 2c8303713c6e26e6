//! License activation example
//!
//! Reads the controller serial number, then runs the startup license
//! decision, prompting for an activation key when the host is not yet
//! registered and none is configured.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use humlink::config::AppConfig;
use humlink::{
    authorize, ActivationKey, Authorization, ControllerSession, DeviceFingerprint, FileStore, LicenseClient,
    LicenseState, TokenStore,
};

fn prompt_activation_key() -> anyhow::Result<ActivationKey> {
    let stdin = io::stdin();
    loop {
        print!("Enter activation key (64 hex characters): ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            anyhow::bail!("no activation key entered");
        }

        match ActivationKey::parse(&line) {
            Ok(key) => return Ok(key),
            Err(e) => eprintln!("{}", e),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config_path = std::env::var("HUMLINK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| AppConfig::default_path());
    let mut config = AppConfig::load(&config_path)?;
    let config_dir = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();

    let serial = {
        let mut session = ControllerSession::open(config.serial.channel_config())?
            .with_timeout(config.serial.response_timeout());
        session.get_serial_number()?
    };
    println!("✓ Controller {}", serial);

    let fingerprint = DeviceFingerprint::system();
    println!("✓ Host {}", fingerprint.uuid());

    let mut store = TokenStore::new(FileStore::open_default()?, fingerprint);

    let mut key = config.license.activation_key;
    if key.is_none() && store.state(&serial) == LicenseState::Unregistered {
        key = Some(prompt_activation_key()?);
    }

    // Only built when the authority has to be asked
    let license = config.license.clone();
    let connect = move || -> humlink::Result<LicenseClient> {
        Ok(LicenseClient::new(&license.authority_config(&config_dir)?)?)
    };

    match authorize(&serial, &mut store, connect, key.as_ref()).await? {
        Authorization::Licensed { renewal } => {
            println!("✓ License valid, renewal date {}", renewal);
            if let Some(key) = key {
                if config.remember_activation_key(&key, &config_path)? {
                    println!("✓ Activation key saved to {}", config_path.display());
                }
            }
        }
        Authorization::Unlicensed { reason } => {
            println!("✗ Running in test mode: {}", reason);
            if reason.requires_operator() {
                println!("  Contact support for a new activation key");
            }
        }
    }

    Ok(())
}
