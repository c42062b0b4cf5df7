//! Open/close reference counting
//!
//! The transfer loop runs only while at least one consumer holds the device
//! open. One mutex guards the count together with the submit/halt decision,
//! so concurrent `open`/`close` calls see a consistent pairing.

use crate::usb::error::{GateError, OpenError};
use crate::usb::transfers::TransferLoop;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Reference-counted activation of a [`TransferLoop`]
pub struct ActivationGate {
    count: Mutex<usize>,
    transfer: TransferLoop,
}

impl ActivationGate {
    pub fn new(transfer: TransferLoop) -> Self {
        Self {
            count: Mutex::new(0),
            transfer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of consumers holding the device open
    pub fn count(&self) -> usize {
        *self.lock()
    }

    pub fn transfer(&self) -> &TransferLoop {
        &self.transfer
    }

    /// Add a consumer
    ///
    /// The first consumer starts the transfer loop; if that submission fails
    /// the count stays at zero and the error is returned.
    pub fn open(&self) -> Result<(), OpenError> {
        let mut count = self.lock();
        if *count > 0 {
            *count += 1;
            debug!("Device opened again (count={})", *count);
            return Ok(());
        }

        self.transfer.submit().map_err(|e| {
            warn!("Failed to start transfer loop: {}", e);
            OpenError::Submission(e)
        })?;
        *count = 1;
        debug!("Device opened, transfer loop active");
        Ok(())
    }

    /// Remove a consumer
    ///
    /// The last consumer halts the transfer loop and waits for the
    /// cancellation. Closing a device nobody holds open is rejected and
    /// leaves the count at zero.
    pub fn close(&self) -> Result<(), GateError> {
        let mut count = self.lock();
        if *count == 0 {
            warn!("close() without matching open()");
            return Err(GateError::NotOpen);
        }

        *count -= 1;
        if *count == 0 {
            self.transfer.halt();
            debug!("Device closed, transfer loop halted");
        } else {
            debug!("Device closed (count={})", *count);
        }
        Ok(())
    }

    /// Halt regardless of open consumers
    ///
    /// Returns how many consumers still held the device open.
    pub fn force_close(&self) -> usize {
        let mut count = self.lock();
        let previous = std::mem::take(&mut *count);
        self.transfer.halt();
        if previous > 0 {
            debug!("Forced close with {} consumers still open", previous);
        }
        previous
    }
}
