//! Interrupt poller thread
//!
//! libusb's blocking API is driven from one thread per device. A submitted
//! transfer is handed to the thread, which issues short interrupt reads until
//! data arrives, the read fails, or a cancellation is requested, then fires
//! the request's completer from the poller thread.
//!
//! `cancel` returns once the poller has finished with the transfer, including
//! running its completion, or after the configured bound with a warning.

use crate::usb::error::TransportError;
use crate::usb::transport::{TransferRequest, TransferSlot};
use async_channel::{Receiver, Sender, unbounded};
use protocol::REPORT_LEN;
use rusb::{Context, DeviceHandle};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Timeout of a single interrupt read; bounds cancellation latency
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// How long `cancel` waits for the poller before giving up
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(1);

/// Timing knobs for the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    pub read_timeout: Duration,
    pub cancel_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            cancel_timeout: DEFAULT_CANCEL_TIMEOUT,
        }
    }
}

/// One blocking interrupt read
pub trait InterruptRead: Send + Sync + 'static {
    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error>;
}

impl InterruptRead for DeviceHandle<Context> {
    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        DeviceHandle::read_interrupt(self, endpoint, buf, timeout)
    }
}

enum PollerCommand {
    Submit(TransferRequest),
    Shutdown,
}

#[derive(Default)]
struct Flight {
    /// Slot of the transfer handed to the poller, if any
    in_flight: Option<TransferSlot>,
    /// Poller is running a completion
    completing: bool,
    /// Poller should drop the current transfer
    cancel: bool,
    /// Transfers whose completion has returned
    finished: u64,
}

#[derive(Default)]
struct FlightState {
    flight: Mutex<Flight>,
    changed: Condvar,
}

impl FlightState {
    fn lock(&self) -> MutexGuard<'_, Flight> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the poller thread of one device
pub struct InterruptPoller {
    name: String,
    flight: Arc<FlightState>,
    commands: Sender<PollerCommand>,
    thread: Option<JoinHandle<()>>,
    cancel_timeout: Duration,
}

impl InterruptPoller {
    /// Start the poller thread for `reader`
    pub fn spawn<R: InterruptRead>(
        name: &str,
        reader: Arc<R>,
        settings: TransportSettings,
    ) -> Result<Self, TransportError> {
        let flight = Arc::new(FlightState::default());
        let (commands, receiver) = unbounded();

        let thread = {
            let flight = Arc::clone(&flight);
            let read_timeout = settings.read_timeout;
            std::thread::Builder::new()
                .name(format!("poll-{}", name))
                .spawn(move || run_poller(reader.as_ref(), receiver, &flight, read_timeout))
                .map_err(|e| TransportError::Other {
                    message: format!("Failed to spawn poller thread: {}", e),
                })?
        };

        Ok(Self {
            name: name.to_string(),
            flight,
            commands,
            thread: Some(thread),
            cancel_timeout: settings.cancel_timeout,
        })
    }

    /// Whether a transfer on `slot` is with the poller
    pub fn is_in_flight(&self, slot: TransferSlot) -> bool {
        self.flight.lock().in_flight == Some(slot)
    }

    /// Hand a transfer to the poller
    ///
    /// Only one transfer may be outstanding; a second submission fails with
    /// `Busy`. Submitting from inside a completion is allowed.
    pub fn submit(&self, request: TransferRequest) -> Result<(), TransportError> {
        let slot = request.slot;
        let mut flight = self.flight.lock();
        if flight.in_flight.is_some() {
            return Err(TransportError::Busy);
        }

        self.commands
            .try_send(PollerCommand::Submit(request))
            .map_err(|_| TransportError::NoDevice)?;
        flight.in_flight = Some(slot);
        flight.cancel = false;
        Ok(())
    }

    /// Drop the transfer on `slot` and wait until its completion has run
    pub fn cancel(&self, slot: TransferSlot) {
        let mut flight = self.flight.lock();
        if flight.in_flight != Some(slot) && !flight.completing {
            return;
        }
        flight.cancel = true;
        let finished = flight.finished;

        let (_flight, result) = self
            .flight
            .changed
            .wait_timeout_while(flight, self.cancel_timeout, |f| f.finished == finished)
            .unwrap_or_else(PoisonError::into_inner);

        if result.timed_out() {
            warn!(
                "Cancellation of {:?} on {} not acknowledged within {:?}",
                slot, self.name, self.cancel_timeout
            );
        }
    }

    /// Stop the poller thread
    ///
    /// An outstanding transfer completes with `Cancelled` first. Safe to call
    /// from the poller thread itself, which then exits once its current
    /// completion returns.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        self.flight.lock().cancel = true;
        let _ = self.commands.try_send(PollerCommand::Shutdown);
        self.commands.close();

        if thread.thread().id() == std::thread::current().id() {
            debug!("{}: poller shut down from its own thread", self.name);
            return;
        }
        if thread.join().is_err() {
            warn!("Poller thread for {} panicked", self.name);
        }
    }
}

impl Drop for InterruptPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_poller<R: InterruptRead + ?Sized>(
    reader: &R,
    commands: Receiver<PollerCommand>,
    flight: &FlightState,
    read_timeout: Duration,
) {
    while let Ok(command) = commands.recv_blocking() {
        let request = match command {
            PollerCommand::Submit(request) => request,
            PollerCommand::Shutdown => break,
        };

        let status = read_report(reader, &request, flight, read_timeout);
        trace!("Transfer {:?} finished: {:?}", request.slot, status);

        {
            let mut state = flight.lock();
            state.in_flight = None;
            state.completing = true;
        }

        request.completer.complete(status);
        drop(request);

        {
            let mut state = flight.lock();
            state.completing = false;
            state.finished += 1;
        }
        flight.changed.notify_all();
    }
    debug!("Poller thread stopped");
}

fn read_report<R: InterruptRead + ?Sized>(
    reader: &R,
    request: &TransferRequest,
    flight: &FlightState,
    read_timeout: Duration,
) -> Result<usize, TransportError> {
    let mut data = [0u8; REPORT_LEN];
    let length = request.length.min(REPORT_LEN);

    loop {
        if flight.lock().cancel {
            return Err(TransportError::Cancelled);
        }

        match reader.read_interrupt(request.endpoint, &mut data[..length], read_timeout) {
            Ok(read) => return Ok(request.buffer.fill(&data[..read])),
            Err(rusb::Error::Timeout) => continue,
            Err(e) => return Err(map_rusb_error(e)),
        }
    }
}

/// Map rusb::Error to TransportError
pub fn map_rusb_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::Pipe,
        rusb::Error::NoDevice => TransportError::NoDevice,
        rusb::Error::NotFound => TransportError::NotFound,
        rusb::Error::Busy => TransportError::Busy,
        rusb::Error::Overflow => TransportError::Overflow,
        rusb::Error::Io => TransportError::Io,
        rusb::Error::NoMem => TransportError::NoMemory,
        rusb::Error::Interrupted => TransportError::Cancelled,
        rusb::Error::Access => TransportError::Access,
        _ => TransportError::Other {
            message: err.to_string(),
        },
    }
}
