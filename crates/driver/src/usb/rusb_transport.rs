//! rusb-backed transport
//!
//! Opens and claims the receiver's interface, then hands transfers to an
//! [`InterruptPoller`] reading from the device handle.

use crate::usb::error::TransportError;
use crate::usb::poller::{InterruptPoller, TransportSettings, map_rusb_error};
use crate::usb::transport::{ReportBuffer, TransferRequest, TransferSlot, Transport};
use protocol::{DeviceIdentity, EndpointDescriptor, InterfaceDescriptor};
use rusb::{Context, Device, DeviceHandle};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Transport for one claimed USB interface
pub struct RusbTransport {
    handle: Arc<DeviceHandle<Context>>,
    identity: DeviceIdentity,
    interface: InterfaceDescriptor,
    bus_path: String,
    manufacturer: Option<String>,
    product: Option<String>,
    kernel_driver_detached: bool,
    poller: InterruptPoller,
    next_slot: AtomicU32,
    live_buffers: AtomicUsize,
}

impl RusbTransport {
    /// Open `device` and claim its first interface
    ///
    /// A kernel driver bound to the interface is detached first and
    /// reattached when the transport is dropped.
    pub fn open(device: Device<Context>, settings: TransportSettings) -> Result<Self, TransportError> {
        let descriptor = device.device_descriptor().map_err(map_rusb_error)?;
        let config = device.active_config_descriptor().map_err(map_rusb_error)?;
        let interface = config
            .interfaces()
            .next()
            .and_then(|iface| iface.descriptors().next())
            .map(|alt| InterfaceDescriptor {
                number: alt.interface_number(),
                endpoints: alt.endpoint_descriptors().map(|ep| map_endpoint(&ep)).collect(),
            })
            .ok_or(TransportError::NotFound)?;

        let handle = device.open().map_err(|e| {
            warn!("Failed to open device: {}", e);
            map_rusb_error(e)
        })?;

        let kernel_driver_detached = match handle.kernel_driver_active(interface.number) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface.number);
                handle
                    .detach_kernel_driver(interface.number)
                    .map_err(map_rusb_error)?;
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface.number, e
                );
                false
            }
        };

        if let Err(e) = handle.claim_interface(interface.number) {
            warn!("Failed to claim interface {}: {}", interface.number, e);
            restore_interface(&handle, interface.number, false, kernel_driver_detached);
            return Err(map_rusb_error(e));
        }

        let manufacturer = descriptor
            .manufacturer_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
        let product = descriptor
            .product_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

        let version = descriptor.device_version();
        let identity = DeviceIdentity::usb(
            descriptor.vendor_id(),
            descriptor.product_id(),
            (u16::from(version.major()) << 8)
                | (u16::from(version.minor()) << 4)
                | u16::from(version.sub_minor()),
        );

        let bus_path = bus_path(&device);
        let handle = Arc::new(handle);
        let poller = match InterruptPoller::spawn(&bus_path, Arc::clone(&handle), settings) {
            Ok(poller) => poller,
            Err(e) => {
                warn!("{}: {}", bus_path, e);
                restore_interface(&handle, interface.number, true, kernel_driver_detached);
                return Err(e);
            }
        };

        debug!(
            "Opened {} ({:04x}:{:04x}), claimed interface {}",
            bus_path, identity.vendor_id, identity.product_id, interface.number
        );

        Ok(Self {
            handle,
            identity,
            interface,
            bus_path,
            manufacturer,
            product,
            kernel_driver_detached,
            poller,
            next_slot: AtomicU32::new(1),
            live_buffers: AtomicUsize::new(0),
        })
    }

    /// Manufacturer string descriptor, if the device has one
    pub fn manufacturer(&self) -> Option<&str> {
        self.manufacturer.as_deref()
    }

    /// Product string descriptor, if the device has one
    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }
}

impl Transport for RusbTransport {
    fn interface(&self) -> InterfaceDescriptor {
        self.interface.clone()
    }

    fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    fn bus_path(&self) -> String {
        self.bus_path.clone()
    }

    fn alloc_buffer(&self) -> Result<ReportBuffer, TransportError> {
        self.live_buffers.fetch_add(1, Ordering::Relaxed);
        Ok(ReportBuffer::new())
    }

    fn free_buffer(&self, _buffer: ReportBuffer) {
        self.live_buffers.fetch_sub(1, Ordering::Relaxed);
    }

    fn alloc_transfer(&self) -> Result<TransferSlot, TransportError> {
        Ok(TransferSlot(self.next_slot.fetch_add(1, Ordering::Relaxed)))
    }

    fn free_transfer(&self, slot: TransferSlot) {
        if self.poller.is_in_flight(slot) {
            warn!("{:?} freed with a transfer in flight", slot);
        }
    }

    fn submit(&self, request: TransferRequest) -> Result<(), TransportError> {
        self.poller.submit(request)
    }

    fn cancel(&self, slot: TransferSlot) {
        self.poller.cancel(slot);
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        self.poller.shutdown();

        let leaked = self.live_buffers.load(Ordering::Relaxed);
        if leaked > 0 {
            warn!("{}: {} report buffers never freed", self.bus_path, leaked);
        }

        restore_interface(
            &self.handle,
            self.interface.number,
            true,
            self.kernel_driver_detached,
        );
    }
}

/// Release a claimed interface and hand it back to the kernel driver
fn restore_interface(
    handle: &DeviceHandle<Context>,
    number: u8,
    claimed: bool,
    kernel_driver_detached: bool,
) {
    if claimed {
        if let Err(e) = handle.release_interface(number) {
            warn!("Failed to release interface {}: {}", number, e);
        }
    }

    if kernel_driver_detached {
        match handle.attach_kernel_driver(number) {
            Ok(()) => debug!("Reattached kernel driver to interface {}", number),
            Err(e) => warn!("Could not reattach kernel driver to interface {}: {}", number, e),
        }
    }
}

fn map_endpoint(ep: &rusb::EndpointDescriptor<'_>) -> EndpointDescriptor {
    let kind = match ep.transfer_type() {
        rusb::TransferType::Control => 0,
        rusb::TransferType::Isochronous => 1,
        rusb::TransferType::Bulk => 2,
        rusb::TransferType::Interrupt => 3,
    };

    EndpointDescriptor {
        address: ep.address(),
        attributes: kind,
        max_packet_size: ep.max_packet_size(),
        interval: ep.interval(),
    }
}

/// `usb-<bus>-<port>[.<port>...]`, falling back to the device address
pub fn bus_path(device: &Device<Context>) -> String {
    match device.port_numbers() {
        Ok(ports) if !ports.is_empty() => {
            let ports: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
            format!("usb-{}-{}", device.bus_number(), ports.join("."))
        }
        _ => format!("usb-{}-{}", device.bus_number(), device.address()),
    }
}
