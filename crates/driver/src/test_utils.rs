//! Test utilities for the driver core
//!
//! [`MockTransport`] stands in for the USB transport: it counts every
//! allocation, free, submission and cancellation, can be told to fail any of
//! them, and lets a test decide when (and with what data) the outstanding
//! transfer completes.
//!
//! # Example
//!
//! ```
//! use driver::test_utils::MockTransport;
//! use driver::usb::Transport;
//!
//! let transport = MockTransport::mediaplay();
//! let buffer = transport.alloc_buffer().unwrap();
//! transport.free_buffer(buffer);
//! assert!(transport.counters().balanced());
//! ```

use crate::usb::error::TransportError;
use crate::usb::transport::{ReportBuffer, TransferRequest, TransferSlot, Transport};
use protocol::{DeviceIdentity, EndpointDescriptor, InterfaceDescriptor, MEDIAPLAY_RECEIVER};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Operation counters of a [`MockTransport`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportCounters {
    pub buffers_allocated: u64,
    pub buffers_freed: u64,
    pub transfers_allocated: u64,
    pub transfers_freed: u64,
    pub submissions: u64,
    pub cancellations: u64,
}

impl TransportCounters {
    /// Every allocation has been freed
    pub fn balanced(&self) -> bool {
        self.buffers_allocated == self.buffers_freed
            && self.transfers_allocated == self.transfers_freed
    }
}

#[derive(Default)]
struct MockState {
    counters: TransportCounters,
    next_slot: u32,
    live_slots: HashSet<TransferSlot>,
    pending: Option<TransferRequest>,
    cancelled: Vec<TransferRequest>,
    fail_buffer: Option<TransportError>,
    fail_transfer: Option<TransportError>,
    fail_submit: Option<TransportError>,
}

/// Scriptable in-memory transport
pub struct MockTransport {
    interface: InterfaceDescriptor,
    identity: DeviceIdentity,
    bus_path: String,
    state: Mutex<MockState>,
}

/// Interrupt IN endpoint 1, 8-byte packets, 10 ms interval
pub fn mediaplay_endpoint() -> EndpointDescriptor {
    EndpointDescriptor {
        address: 0x81,
        attributes: 0x03,
        max_packet_size: 8,
        interval: 10,
    }
}

impl MockTransport {
    /// A MediaPlay receiver with a single interrupt IN endpoint
    pub fn mediaplay() -> Self {
        Self::with_interface(InterfaceDescriptor {
            number: 0,
            endpoints: vec![mediaplay_endpoint()],
        })
    }

    /// A device exposing `interface`
    pub fn with_interface(interface: InterfaceDescriptor) -> Self {
        Self {
            interface,
            identity: DeviceIdentity::usb(
                MEDIAPLAY_RECEIVER.vendor_id,
                MEDIAPLAY_RECEIVER.product_id,
                0x1720,
            ),
            bus_path: "usb-1-2".to_string(),
            state: Mutex::new(MockState {
                next_slot: 1,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_buffer_alloc(&self, error: Option<TransportError>) {
        self.state().fail_buffer = error;
    }

    pub fn fail_transfer_alloc(&self, error: Option<TransportError>) {
        self.state().fail_transfer = error;
    }

    pub fn fail_submit(&self, error: Option<TransportError>) {
        self.state().fail_submit = error;
    }

    pub fn counters(&self) -> TransportCounters {
        self.state().counters
    }

    /// Whether a transfer is outstanding
    pub fn has_pending(&self) -> bool {
        self.state().pending.is_some()
    }

    /// Complete the outstanding transfer with `report`
    ///
    /// The completion runs on the calling thread with no transport lock held.
    /// Returns false when nothing was in flight.
    pub fn complete_pending(&self, report: &[u8]) -> bool {
        let Some(request) = self.state().pending.take() else {
            return false;
        };
        let length = request.buffer.fill(&report[..report.len().min(request.length)]);
        request.completer.complete(Ok(length));
        true
    }

    /// Fail the outstanding transfer with `error`
    pub fn fail_pending(&self, error: TransportError) -> bool {
        let Some(request) = self.state().pending.take() else {
            return false;
        };
        request.completer.complete(Err(error));
        true
    }

    /// Fire the completers of cancelled transfers as if they had succeeded
    ///
    /// Simulates a completion racing past a cancellation. Returns how many
    /// completers were fired.
    pub fn replay_cancelled(&self, report: &[u8]) -> usize {
        let cancelled = std::mem::take(&mut self.state().cancelled);
        for request in &cancelled {
            let length = request.buffer.fill(report);
            request.completer.complete(Ok(length));
        }
        cancelled.len()
    }
}

impl Transport for MockTransport {
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
        let mut state = self.state();
        if let Some(error) = state.fail_buffer.clone() {
            return Err(error);
        }
        state.counters.buffers_allocated += 1;
        Ok(ReportBuffer::new())
    }

    fn free_buffer(&self, _buffer: ReportBuffer) {
        self.state().counters.buffers_freed += 1;
    }

    fn alloc_transfer(&self) -> Result<TransferSlot, TransportError> {
        let mut state = self.state();
        if let Some(error) = state.fail_transfer.clone() {
            return Err(error);
        }
        let slot = TransferSlot(state.next_slot);
        state.next_slot += 1;
        state.live_slots.insert(slot);
        state.counters.transfers_allocated += 1;
        Ok(slot)
    }

    fn free_transfer(&self, slot: TransferSlot) {
        let mut state = self.state();
        assert!(
            state.pending.as_ref().is_none_or(|p| p.slot != slot),
            "freed {:?} with a transfer in flight",
            slot
        );
        state.live_slots.remove(&slot);
        state.counters.transfers_freed += 1;
    }

    fn submit(&self, request: TransferRequest) -> Result<(), TransportError> {
        let mut state = self.state();
        if let Some(error) = state.fail_submit.clone() {
            return Err(error);
        }
        if !state.live_slots.contains(&request.slot) {
            return Err(TransportError::NotFound);
        }
        if state.pending.is_some() {
            return Err(TransportError::Busy);
        }
        state.counters.submissions += 1;
        state.pending = Some(request);
        Ok(())
    }

    fn cancel(&self, slot: TransferSlot) {
        let mut state = self.state();
        if state.pending.as_ref().is_some_and(|p| p.slot == slot) {
            if let Some(request) = state.pending.take() {
                state.cancelled.push(request);
            }
            state.counters.cancellations += 1;
        }
    }
}
