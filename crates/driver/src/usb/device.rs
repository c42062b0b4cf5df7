//! Attached device instance
//!
//! [`DeviceInstance::attach`] validates the data channel, allocates transfer
//! resources, registers with the input layer and wires up the activation
//! gate. [`DeviceInstance::detach`] tears all of that down again in the
//! reverse order: halt, unregister, release.

use crate::usb::error::{AttachError, GateError, OpenError};
use crate::usb::gate::ActivationGate;
use crate::usb::resources::DeviceResources;
use crate::usb::transfers::{LoopState, LoopStats, TransferLoop};
use crate::usb::transport::Transport;
use common::{EventSink, InputDeviceInfo, SinkHandle};
use protocol::{Capabilities, DeviceIdentity};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest display name kept, in bytes
pub const MAX_NAME_LEN: usize = 127;

/// Longest physical path kept, in bytes
pub const MAX_PHYS_LEN: usize = 63;

/// Truncate `s` to at most `max` bytes on a char boundary
pub fn bounded(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// One attached mouse receiver
pub struct DeviceInstance {
    name: String,
    phys: String,
    identity: DeviceIdentity,
    gate: ActivationGate,
    resources: Option<DeviceResources>,
    sink: Arc<dyn EventSink>,
    sink_handle: Option<SinkHandle>,
}

impl DeviceInstance {
    /// Bind to the device behind `transport`
    ///
    /// The interface must expose exactly one interrupt IN endpoint. Anything
    /// acquired before a failure is released before the error is returned.
    pub fn attach(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        name: &str,
    ) -> Result<Self, AttachError> {
        let interface = transport.interface();
        let endpoint = *interface.single_interrupt_in().map_err(|e| {
            warn!("Rejecting interface {}: {}", interface.number, e);
            e
        })?;

        let resources = DeviceResources::allocate(Arc::clone(&transport))?;

        let info = InputDeviceInfo {
            name: bounded(name, MAX_NAME_LEN),
            phys: bounded(
                &format!("{}/input{}", transport.bus_path(), interface.number),
                MAX_PHYS_LEN,
            ),
            identity: transport.identity(),
            capabilities: Capabilities::mediaplay(),
        };

        // `resources` is dropped (and released) if registration fails.
        let sink_handle = sink.register_device(&info).map_err(|e| {
            warn!("Input layer refused {}: {}", info.name, e);
            e
        })?;

        let transfer = TransferLoop::new(
            Arc::clone(&transport),
            Arc::clone(&sink),
            sink_handle,
            &resources,
            endpoint,
        );

        info!(
            "Detected device: {} ({}, {:04x}:{:04x}, endpoint {:#x})",
            info.name, info.phys, info.identity.vendor_id, info.identity.product_id, endpoint.address
        );

        Ok(Self {
            name: info.name,
            phys: info.phys,
            identity: info.identity,
            gate: ActivationGate::new(transfer),
            resources: Some(resources),
            sink,
            sink_handle: Some(sink_handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phys(&self) -> &str {
        &self.phys
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    pub fn sink_handle(&self) -> Option<SinkHandle> {
        self.sink_handle
    }

    /// Consumer opened the device
    pub fn open(&self) -> Result<(), OpenError> {
        self.gate.open()
    }

    /// Consumer closed the device
    pub fn close(&self) -> Result<(), GateError> {
        self.gate.close()
    }

    pub fn activation_count(&self) -> usize {
        self.gate.count()
    }

    pub fn transfer_state(&self) -> LoopState {
        self.gate.transfer().state()
    }

    pub fn transfer_stats(&self) -> LoopStats {
        self.gate.transfer().stats()
    }

    /// Unbind from the device
    ///
    /// Halts the transfer loop even if consumers still hold the device open,
    /// unregisters from the input layer and releases the transfer resources.
    /// Never fails; problems are logged.
    pub fn detach(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(resources) = self.resources.take() else {
            return;
        };

        let open = self.gate.force_close();
        if open > 0 {
            debug!("{}: detaching with {} open consumers", self.name, open);
        }

        if let Some(handle) = self.sink_handle.take() {
            if let Err(e) = self.sink.unregister_device(handle) {
                warn!("{}: failed to unregister from input layer: {}", self.name, e);
            }
        }

        resources.release();
        info!("Detached device: {} ({})", self.name, self.phys);
    }
}

impl Drop for DeviceInstance {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for DeviceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceInstance")
            .field("name", &self.name)
            .field("phys", &self.phys)
            .field("identity", &self.identity)
            .field("activation_count", &self.gate.count())
            .field("state", &self.gate.transfer().state())
            .finish()
    }
}
