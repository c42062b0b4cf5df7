//! Device table, enumeration and attachment
//!
//! The table of accepted receivers is built once from configuration and
//! handed to the [`DeviceManager`], which enumerates the bus, opens every
//! match through [`RusbTransport`] and attaches a [`DeviceInstance`] to it.

use crate::usb::device::DeviceInstance;
use crate::usb::poller::TransportSettings;
use crate::usb::rusb_transport::{RusbTransport, bus_path};
use crate::usb::transport::Transport;
use common::EventSink;
use protocol::{DeviceIdentity, DeviceMatch, MEDIAPLAY_RECEIVER};
use rusb::{Context, Device, UsbContext};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Accepted (vendor, product) pairs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTable {
    entries: Vec<DeviceMatch>,
}

impl DeviceTable {
    pub fn new(entries: Vec<DeviceMatch>) -> Self {
        Self { entries }
    }

    /// Logitech MediaPlay cordless mouse receiver only
    pub fn mediaplay() -> Self {
        Self::new(vec![MEDIAPLAY_RECEIVER])
    }

    pub fn entries(&self) -> &[DeviceMatch] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.entries.iter().any(|e| e.matches(vendor_id, product_id))
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::mediaplay()
    }
}

/// Display name for an attached receiver
///
/// "<manufacturer> <product>" from whichever string descriptors exist, or a
/// generic name carrying the USB ids when neither does.
pub fn display_name(
    manufacturer: Option<&str>,
    product: Option<&str>,
    identity: &DeviceIdentity,
) -> String {
    let parts: Vec<&str> = [manufacturer, product]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if parts.is_empty() {
        format!(
            "Logitech MediaPlay Mouse on usb{:04x}:{:04x}",
            identity.vendor_id, identity.product_id
        )
    } else {
        parts.join(" ")
    }
}

/// Summary of a matching device on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundDevice {
    pub bus_number: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_path: String,
}

/// Enumerates and attaches matching receivers
pub struct DeviceManager {
    context: Context,
    table: DeviceTable,
    settings: TransportSettings,
}

impl DeviceManager {
    pub fn new(table: DeviceTable, settings: TransportSettings) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        debug!("Device manager created with {} table entries", table.len());
        Ok(Self {
            context,
            table,
            settings,
        })
    }

    pub fn table(&self) -> &DeviceTable {
        &self.table
    }

    fn matching(&self) -> Result<Vec<Device<Context>>, rusb::Error> {
        let devices = self.context.devices()?;
        let mut found = Vec::new();

        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    debug!(
                        "Skipping device at bus {} address {}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };

            if self
                .table
                .matches(descriptor.vendor_id(), descriptor.product_id())
            {
                found.push(device);
            }
        }

        Ok(found)
    }

    /// Matching devices currently on the bus
    pub fn list(&self) -> Result<Vec<FoundDevice>, rusb::Error> {
        let mut found = Vec::new();
        for device in self.matching()? {
            let descriptor = device.device_descriptor()?;
            found.push(FoundDevice {
                bus_number: device.bus_number(),
                address: device.address(),
                vendor_id: descriptor.vendor_id(),
                product_id: descriptor.product_id(),
                bus_path: bus_path(&device),
            });
        }
        Ok(found)
    }

    /// Open and attach every matching device
    ///
    /// Devices that fail to open or attach are logged and skipped.
    pub fn attach_all(&self, sink: &Arc<dyn EventSink>) -> Result<Vec<DeviceInstance>, rusb::Error> {
        let mut attached = Vec::new();

        for device in self.matching()? {
            let location = bus_path(&device);
            let transport = match RusbTransport::open(device, self.settings) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Failed to open {}: {}", location, e);
                    continue;
                }
            };

            let name = display_name(
                transport.manufacturer(),
                transport.product(),
                &transport.identity(),
            );
            let transport: Arc<dyn Transport> = Arc::new(transport);

            match DeviceInstance::attach(transport, Arc::clone(sink), &name) {
                Ok(instance) => attached.push(instance),
                Err(e) => warn!("Failed to attach {}: {}", location, e),
            }
        }

        info!("Attached {} device(s)", attached.len());
        Ok(attached)
    }
}
