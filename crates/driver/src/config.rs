//! Driver configuration management

use crate::usb::{DeviceTable, TransportSettings};
use anyhow::{Context, Result, anyhow};
use protocol::{DeviceMatch, MEDIAPLAY_RECEIVER};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub driver: DriverSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub events: EventSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSettings {
    pub log_level: String,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Accepted receivers, "0xVVVV:0xPPPP"
    #[serde(default = "UsbSettings::default_devices")]
    pub devices: Vec<String>,
    /// Timeout of a single interrupt read
    #[serde(default = "UsbSettings::default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Upper bound on waiting for a cancelled transfer
    #[serde(default = "UsbSettings::default_cancel_timeout")]
    pub cancel_timeout_ms: u64,
}

impl UsbSettings {
    fn default_devices() -> Vec<String> {
        vec![format!(
            "0x{:04x}:0x{:04x}",
            MEDIAPLAY_RECEIVER.vendor_id, MEDIAPLAY_RECEIVER.product_id
        )]
    }

    fn default_read_timeout() -> u64 {
        10
    }

    fn default_cancel_timeout() -> u64 {
        1000
    }
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            devices: Self::default_devices(),
            read_timeout_ms: Self::default_read_timeout(),
            cancel_timeout_ms: Self::default_cancel_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSettings {
    /// Events buffered between the driver and the consumer
    #[serde(default = "EventSettings::default_capacity")]
    pub channel_capacity: usize,
}

impl EventSettings {
    fn default_capacity() -> usize {
        common::channel::DEFAULT_CHANNEL_CAPACITY
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            channel_capacity: Self::default_capacity(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver: DriverSettings::default(),
            usb: UsbSettings::default(),
            events: EventSettings::default(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from `path`, or from the first standard location
    /// that exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/lmpcm-driver/driver.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: DriverConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {:#}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("lmpcm-driver").join("driver.toml")
        } else {
            PathBuf::from(".config/lmpcm-driver/driver.toml")
        }
    }

    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.driver.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.driver.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.usb.devices.is_empty() {
            return Err(anyhow!("usb.devices must list at least one device"));
        }
        for entry in &self.usb.devices {
            parse_device(entry)?;
        }

        if self.usb.read_timeout_ms == 0 {
            return Err(anyhow!("usb.read_timeout_ms must be greater than zero"));
        }
        if self.usb.cancel_timeout_ms == 0 {
            return Err(anyhow!("usb.cancel_timeout_ms must be greater than zero"));
        }
        if self.events.channel_capacity == 0 {
            return Err(anyhow!("events.channel_capacity must be greater than zero"));
        }

        Ok(())
    }

    /// Accepted devices as a lookup table
    pub fn device_table(&self) -> Result<DeviceTable> {
        let entries = self
            .usb
            .devices
            .iter()
            .map(|entry| parse_device(entry))
            .collect::<Result<Vec<_>>>()?;
        Ok(DeviceTable::new(entries))
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            read_timeout: Duration::from_millis(self.usb.read_timeout_ms),
            cancel_timeout: Duration::from_millis(self.usb.cancel_timeout_ms),
        }
    }
}

/// Expand a leading `~` in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Parse "0xVVVV:0xPPPP"
pub fn parse_device(entry: &str) -> Result<DeviceMatch> {
    let Some((vid, pid)) = entry.split_once(':') else {
        return Err(anyhow!(
            "Invalid device '{}', expected VID:PID (e.g., '0x046d:0xc50e')",
            entry
        ));
    };

    Ok(DeviceMatch {
        vendor_id: parse_hex_id(vid, "VID")?,
        product_id: parse_hex_id(pid, "PID")?,
    })
}

fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
    let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
        return Err(anyhow!(
            "Invalid {} '{}', must start with '0x' (e.g., '0x046d')",
            name,
            id
        ));
    };

    if hex_part.is_empty() || hex_part.len() > 4 {
        return Err(anyhow!(
            "Invalid {} '{}', hex part must be 1-4 digits",
            name,
            id
        ));
    }

    u16::from_str_radix(hex_part, 16)
        .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))
}
