//! lmpcm-driver
//!
//! Userspace driver for the Logitech MediaPlay cordless mouse receiver.
//! Attaches every matching receiver, opens it and logs the decoded input
//! events until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use common::{EventSink, InputReceiver, SinkMessage, create_input_bridge, setup_logging};
use driver::DriverConfig;
use driver::usb::{DeviceInstance, DeviceManager};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "lmpcm-driver")]
#[command(
    author,
    version,
    about = "Logitech MediaPlay cordless mouse driver"
)]
#[command(long_about = "
Userspace driver for the Logitech MediaPlay cordless mouse receiver (046d:c50e).
Decodes buttons, motion, wheel and media keys from the receiver's interrupt
endpoint.

EXAMPLES:
    # Run with default config
    lmpcm-driver

    # List matching receivers and exit
    lmpcm-driver --list-devices

    # Run with debug logging
    lmpcm-driver --log-level debug

CONFIGURATION:
    The driver looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/lmpcm-driver/driver.toml
    3. /etc/lmpcm-driver/driver.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List matching USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = DriverConfig::default();
        let path = DriverConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        DriverConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        DriverConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.driver.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("lmpcm-driver v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let table = config.device_table().context("Invalid device table")?;
    let manager = DeviceManager::new(table, config.transport_settings())
        .context("Failed to initialise USB context")?;

    if args.list_devices {
        return list_devices_mode(&manager);
    }

    let (sink, receiver) = create_input_bridge(config.events.channel_capacity);
    let sink: Arc<dyn EventSink> = Arc::new(sink);

    // Drain the bridge for the whole device lifetime; registration and
    // unregistration wait for channel room
    let consumer = tokio::spawn(log_events(receiver.clone()));

    let devices = tokio::task::spawn_blocking(move || -> Result<Vec<DeviceInstance>> {
        let devices = manager
            .attach_all(&sink)
            .context("Failed to enumerate USB devices")?;
        for device in &devices {
            if let Err(e) = device.open() {
                error!("Failed to open {}: {}", device.name(), e);
            }
        }
        Ok(devices)
    })
    .await
    .context("Device setup task failed")?;

    let result = match devices {
        Ok(devices) if devices.is_empty() => {
            warn!("No matching devices found");
            Ok(())
        }
        Ok(devices) => {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            } else {
                info!("Received Ctrl-C");
            }

            info!("Shutting down...");
            tokio::task::spawn_blocking(move || {
                for device in devices {
                    if device.activation_count() > 0 {
                        if let Err(e) = device.close() {
                            warn!("Failed to close {}: {}", device.name(), e);
                        }
                    }
                    device.detach();
                }
            })
            .await
            .context("Device teardown task failed")
        }
        Err(e) => Err(e),
    };

    receiver.close();
    if let Err(e) = consumer.await {
        warn!("Event logger task failed: {}", e);
    }

    result
}

/// Log bridge messages until the bridge closes
async fn log_events(receiver: InputReceiver) {
    while let Ok(message) = receiver.recv().await {
        log_message(&message);
    }
    debug!("Input bridge closed");
}

fn log_message(message: &SinkMessage) {
    match message {
        SinkMessage::Registered { handle, info } => {
            info!("{:?} registered: {} ({})", handle, info.name, info.phys);
        }
        SinkMessage::Event { handle, event } => {
            debug!("{:?}: {:?}", handle, event);
        }
        SinkMessage::Unregistered { handle } => {
            info!("{:?} unregistered", handle);
        }
    }
}

/// List matching USB devices and exit
fn list_devices_mode(manager: &DeviceManager) -> Result<()> {
    let devices = manager.list().context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No matching USB devices found.");
        return Ok(());
    }

    println!("Found {} matching device(s):\n", devices.len());
    for device in devices {
        println!(
            "  {:04x}:{:04x}  Bus {:03} Device {:03}  {}",
            device.vendor_id, device.product_id, device.bus_number, device.address, device.bus_path
        );
    }
    Ok(())
}
