//! Controller identification and streaming example

use std::time::Duration;

use humlink::{ControllerSession, SerialConfig, StreamEvent};
use humlink_transport::available_ports;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let ports = available_ports();
    println!("Serial ports: {}", ports.join(", "));

    // Set SERIAL_PORT to pick another port
    let port = std::env::var("SERIAL_PORT")
        .ok()
        .or_else(|| ports.into_iter().next())
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let params = std::env::var("SERIAL_PARAMS").unwrap_or_else(|_| "115200,8,n,1".to_string());

    println!("Opening {} ({})...", port, params);
    let config = SerialConfig::new(port).with_params(&params);
    let mut session = ControllerSession::open(config)?.with_timeout(Duration::from_secs(1));

    let info = session.get_controller_info()?;
    println!("✓ {}", info);

    let status = session.get_status()?;
    println!(
        "✓ Status: flags=0x{:08X}, {}°C, Wi-Fi {} ({})",
        status.error_flags, status.temperature, status.wifi_ssid, status.wifi_ip
    );
    println!("✓ Sample rate: {} Hz", session.get_sample_rate()?);

    session.start_stream()?;
    for _ in 0..50 {
        match session.next_stream_event(Duration::from_secs(1))? {
            StreamEvent::Frame(frame) => println!(
                "pad {} t={} F={:?} M={:?}",
                frame.pad_address, frame.timestamp, frame.force, frame.moment
            ),
            StreamEvent::Notify(notify) => println!("pad {} notify 0x{:02X}", notify.pad_address, notify.code),
        }
    }
    session.stop_stream()?;

    session.close();
    println!("✓ Closed");

    Ok(())
}
