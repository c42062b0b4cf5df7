//! Interrupt transfer loop
//!
//! Keeps one interrupt IN transfer outstanding against the device and turns
//! every successful completion into input events:
//!
//! ```text
//!            submit                       completion(ok)
//!   Idle ───────────────► Submitted ──────────────────────┐
//!    ▲  ◄─────────────────    │   decode, forward, resubmit │
//!    │   completion(error)    │ ◄──────────────────────────┘
//!    │                        │ halt
//!    │      cancelled         ▼
//!    └──────────────────── Halting
//! ```
//!
//! Every submission carries a token. A completion is only acted on when the
//! loop is `Submitted` and the token matches the latest submission; halting
//! bumps the token before cancelling, so nothing that completes afterwards
//! can reach the sink.
//!
//! A failed completion stops the chain without retrying. Polling resumes
//! only when the loop is submitted again.

use crate::usb::error::TransportError;
use crate::usb::resources::DeviceResources;
use crate::usb::transport::{
    Completer, Completion, CompletionHandler, ReportBuffer, TransferRequest, TransferSlot,
    Transport,
};
use common::{EventSink, SinkHandle};
use protocol::{EndpointDescriptor, REPORT_LEN, decode_report};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, trace, warn};

/// Transfer loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No transfer in flight
    Idle,
    /// One transfer outstanding, completion pending
    Submitted,
    /// Cancellation requested, waiting for the transport to acknowledge
    Halting,
}

/// Counters for one loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Transfers handed to the transport
    pub submissions: u64,
    /// Reports decoded and forwarded
    pub reports: u64,
    /// Completions with a failure status
    pub failed: u64,
    /// Completions ignored because they were superseded or arrived after halt
    pub stale: u64,
}

struct LoopInner {
    state: LoopState,
    token: u64,
    stats: LoopStats,
}

struct LoopShared {
    me: Weak<LoopShared>,
    inner: Mutex<LoopInner>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    sink_handle: SinkHandle,
    buffer: ReportBuffer,
    slot: TransferSlot,
    endpoint: EndpointDescriptor,
    length: usize,
}

impl LoopShared {
    fn lock(&self) -> MutexGuard<'_, LoopInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit a fresh transfer; the caller holds the state lock
    fn submit_locked(&self, inner: &mut LoopInner) -> Result<(), TransportError> {
        inner.token += 1;
        let handler: Weak<dyn CompletionHandler> = self.me.clone();

        let request = TransferRequest {
            slot: self.slot,
            endpoint: self.endpoint.address,
            length: self.length,
            interval: self.endpoint.interval,
            buffer: self.buffer.clone(),
            completer: Completer::new(handler, inner.token),
        };

        match self.transport.submit(request) {
            Ok(()) => {
                inner.state = LoopState::Submitted;
                inner.stats.submissions += 1;
                Ok(())
            }
            Err(e) => {
                inner.state = LoopState::Idle;
                Err(e)
            }
        }
    }
}

impl CompletionHandler for LoopShared {
    fn on_completion(&self, completion: Completion) {
        let mut inner = self.lock();

        if inner.state != LoopState::Submitted || completion.token != inner.token {
            inner.stats.stale += 1;
            trace!(
                "Ignoring completion token={} (state={:?}, current token={})",
                completion.token, inner.state, inner.token
            );
            return;
        }
        inner.state = LoopState::Idle;

        let length = match completion.status {
            Ok(length) => length,
            Err(e) => {
                inner.stats.failed += 1;
                debug!(
                    "Transfer on endpoint {:#x} failed ({}), polling stopped",
                    self.endpoint.address, e
                );
                return;
            }
        };

        let report = decode_report(&self.buffer.snapshot());
        trace!("Report received: len={}, {:?}", length, report);
        for event in report.events() {
            self.sink.report_event(self.sink_handle, event);
        }
        inner.stats.reports += 1;

        if let Err(e) = self.submit_locked(&mut inner) {
            warn!(
                "Resubmission on endpoint {:#x} failed ({}), polling stopped",
                self.endpoint.address, e
            );
        }
    }
}

/// Recurring interrupt read for one device
pub struct TransferLoop {
    shared: Arc<LoopShared>,
}

impl TransferLoop {
    /// Build an idle loop over the device's resources
    ///
    /// Transfers request `min(max_packet_size, REPORT_LEN)` bytes.
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        sink_handle: SinkHandle,
        resources: &DeviceResources,
        endpoint: EndpointDescriptor,
    ) -> Self {
        let length = usize::from(endpoint.max_packet_size).min(REPORT_LEN);

        let shared = Arc::new_cyclic(|me| LoopShared {
            me: me.clone(),
            inner: Mutex::new(LoopInner {
                state: LoopState::Idle,
                token: 0,
                stats: LoopStats::default(),
            }),
            transport,
            sink,
            sink_handle,
            buffer: resources.buffer().clone(),
            slot: resources.slot(),
            endpoint,
            length,
        });

        Self { shared }
    }

    pub fn state(&self) -> LoopState {
        self.shared.lock().state
    }

    pub fn stats(&self) -> LoopStats {
        self.shared.lock().stats
    }

    /// Bytes requested per transfer
    pub fn transfer_length(&self) -> usize {
        self.shared.length
    }

    /// Start the loop
    ///
    /// A loop that is already running is left alone. On failure the loop
    /// stays idle and the transport's error is returned.
    pub fn submit(&self) -> Result<(), TransportError> {
        let mut inner = self.shared.lock();
        match inner.state {
            LoopState::Idle => {
                self.shared.submit_locked(&mut inner)?;
                debug!(
                    "Transfer loop started on endpoint {:#x}",
                    self.shared.endpoint.address
                );
                Ok(())
            }
            LoopState::Submitted => Ok(()),
            LoopState::Halting => Err(TransportError::Busy),
        }
    }

    /// Stop the loop and wait for the transport to drop the outstanding transfer
    ///
    /// After this returns no completion from an earlier submission is acted
    /// on.
    pub fn halt(&self) {
        {
            let mut inner = self.shared.lock();
            if inner.state != LoopState::Submitted {
                return;
            }
            inner.state = LoopState::Halting;
            inner.token += 1;
        }

        // The state lock is released here so a completion racing with the
        // cancel can run to its (ignored) end.
        self.shared.transport.cancel(self.shared.slot);

        self.shared.lock().state = LoopState::Idle;
        debug!(
            "Transfer loop halted on endpoint {:#x}",
            self.shared.endpoint.address
        );
    }
}

impl Drop for TransferLoop {
    fn drop(&mut self) {
        self.halt();
    }
}
