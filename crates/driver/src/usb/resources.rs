//! Per-device transfer resources
//!
//! A [`DeviceResources`] bundles the report buffer and the transfer slot of
//! one device. Both are present or neither is: allocation unwinds on partial
//! failure, and every exit path (explicit release or drop) goes through the
//! same teardown.

use crate::usb::error::AllocationError;
use crate::usb::transport::{ReportBuffer, TransferSlot, Transport};
use std::sync::Arc;
use tracing::{debug, warn};

/// Report buffer and transfer slot owned by one device instance
pub struct DeviceResources {
    transport: Arc<dyn Transport>,
    buffer: ReportBuffer,
    slot: TransferSlot,
    released: bool,
}

impl DeviceResources {
    /// Allocate the buffer, then the transfer slot
    ///
    /// If the slot cannot be allocated the buffer is freed before the error
    /// is returned.
    pub fn allocate(transport: Arc<dyn Transport>) -> Result<Self, AllocationError> {
        let buffer = transport.alloc_buffer().map_err(|e| {
            warn!("Failed to allocate report buffer: {}", e);
            AllocationError::Buffer(e)
        })?;

        let slot = match transport.alloc_transfer() {
            Ok(slot) => slot,
            Err(e) => {
                warn!("Failed to allocate transfer, releasing buffer: {}", e);
                transport.free_buffer(buffer);
                return Err(AllocationError::Transfer(e));
            }
        };

        debug!("Allocated report buffer and transfer {:?}", slot);
        Ok(Self {
            transport,
            buffer,
            slot,
            released: false,
        })
    }

    pub fn buffer(&self) -> &ReportBuffer {
        &self.buffer
    }

    pub fn slot(&self) -> TransferSlot {
        self.slot
    }

    /// Free both pieces
    ///
    /// The caller must have halted any transfer on the slot first.
    pub fn release(mut self) {
        self.free();
    }

    fn free(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        self.transport.free_transfer(self.slot);
        self.transport.free_buffer(self.buffer.clone());
        debug!("Released transfer {:?} and report buffer", self.slot);
    }
}

impl Drop for DeviceResources {
    fn drop(&mut self) {
        self.free();
    }
}

impl std::fmt::Debug for DeviceResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceResources")
            .field("slot", &self.slot)
            .field("released", &self.released)
            .finish()
    }
}
