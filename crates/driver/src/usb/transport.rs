//! Device transport contract
//!
//! The driver core only ever talks to hardware through [`Transport`]. A
//! transport hands out report buffers and transfer slots, accepts one
//! outstanding interrupt transfer per slot, and reports the outcome of each
//! transfer later by firing the request's [`Completer`].
//!
//! ```text
//! TransferLoop                 Transport                     Device
//! ────────────                 ─────────                     ──────
//!     │── submit(request) ────────►│                            │
//!     │◄───────── Ok ──────────────│── interrupt IN ───────────►│
//!     │                            │◄── 8-byte report ──────────│
//!     │◄── Completer::complete ────│ (buffer filled)            │
//!     │   decode, forward,         │                            │
//!     │── submit(next request) ───►│                            │
//! ```

use crate::usb::error::TransportError;
use protocol::{DeviceIdentity, InterfaceDescriptor, REPORT_LEN};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Opaque transfer handle issued by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferSlot(pub u32);

/// Report buffer the transport fills on completion
///
/// Cloning shares the same storage; the transport keeps a clone while a
/// transfer is in flight.
#[derive(Clone, Default)]
pub struct ReportBuffer {
    bytes: Arc<Mutex<[u8; REPORT_LEN]>>,
}

impl ReportBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `data` into the buffer, returning the number of bytes written
    ///
    /// Short data leaves the tail as it was; excess data is ignored.
    pub fn fill(&self, data: &[u8]) -> usize {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        let len = data.len().min(REPORT_LEN);
        bytes[..len].copy_from_slice(&data[..len]);
        len
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> [u8; REPORT_LEN] {
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether two handles refer to the same storage
    pub fn same_storage(&self, other: &ReportBuffer) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl fmt::Debug for ReportBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReportBuffer").field(&self.snapshot()).finish()
    }
}

/// Outcome of one transfer, as delivered to the transfer loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Token of the submission this completion belongs to
    pub token: u64,
    /// Bytes transferred, or the transport's failure status
    pub status: Result<usize, TransportError>,
}

/// Receiver of completions
pub trait CompletionHandler: Send + Sync {
    fn on_completion(&self, completion: Completion);
}

/// Fires the completion for one submitted transfer
///
/// Holds only a weak reference to its handler, so a completer that outlives
/// its device is harmless.
#[derive(Clone)]
pub struct Completer {
    handler: Weak<dyn CompletionHandler>,
    token: u64,
}

impl Completer {
    pub fn new(handler: Weak<dyn CompletionHandler>, token: u64) -> Self {
        Self { handler, token }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// Deliver the transfer's outcome
    pub fn complete(&self, status: Result<usize, TransportError>) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_completion(Completion {
                token: self.token,
                status,
            });
        }
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("token", &self.token)
            .field("alive", &(self.handler.strong_count() > 0))
            .finish()
    }
}

/// One interrupt IN transfer
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub slot: TransferSlot,
    /// Endpoint address, direction bit included
    pub endpoint: u8,
    /// Bytes to request (at most [`REPORT_LEN`])
    pub length: usize,
    /// Polling interval from the endpoint descriptor
    pub interval: u8,
    pub buffer: ReportBuffer,
    pub completer: Completer,
}

/// Hardware access for one attached device
///
/// Implementations must never fire a completer from inside `submit`; the
/// completion arrives later, on whatever thread the transport delivers it.
pub trait Transport: Send + Sync {
    /// Active interface the driver binds to
    fn interface(&self) -> InterfaceDescriptor;

    /// Vendor / product / revision of the device
    fn identity(&self) -> DeviceIdentity;

    /// Bus path of the device, e.g. `usb-1-2`
    fn bus_path(&self) -> String;

    /// Allocate a report buffer usable for transfers on this device
    fn alloc_buffer(&self) -> Result<ReportBuffer, TransportError>;

    /// Return a buffer obtained from `alloc_buffer`
    fn free_buffer(&self, buffer: ReportBuffer);

    /// Allocate a transfer slot
    fn alloc_transfer(&self) -> Result<TransferSlot, TransportError>;

    /// Return a slot obtained from `alloc_transfer`; nothing may be in flight on it
    fn free_transfer(&self, slot: TransferSlot);

    /// Start an interrupt transfer on the request's slot
    fn submit(&self, request: TransferRequest) -> Result<(), TransportError>;

    /// Cancel the transfer in flight on `slot`
    ///
    /// Blocks until the transport acknowledges the cancellation. Returns
    /// immediately when nothing is in flight.
    fn cancel(&self, slot: TransferSlot);
}
