//! Test utilities for the lmpcm driver
//!
//! Provides a recording event sink and helpers for tests that wait on work
//! happening in other threads.
//!
//! # Example
//!
//! ```
//! use common::EventSink;
//! use common::test_utils::{RecordingSink, create_mock_input_info};
//!
//! let sink = RecordingSink::new();
//! let handle = sink.register_device(&create_mock_input_info("Test Mouse")).unwrap();
//! sink.report_sync(handle);
//! assert_eq!(sink.event_count(), 1);
//! ```

use crate::channel::SinkMessage;
use crate::sink::{EventSink, InputDeviceInfo, SinkError, SinkHandle};
use protocol::{Capabilities, DeviceIdentity, InputEvent, KeyCode, MEDIAPLAY_RECEIVER, RelAxis};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create an InputDeviceInfo for the MediaPlay receiver
pub fn create_mock_input_info(name: &str) -> InputDeviceInfo {
    InputDeviceInfo {
        name: name.to_string(),
        phys: "usb-1-1/input0".to_string(),
        identity: DeviceIdentity::usb(
            MEDIAPLAY_RECEIVER.vendor_id,
            MEDIAPLAY_RECEIVER.product_id,
            0x0100,
        ),
        capabilities: Capabilities::mediaplay(),
    }
}

/// Event sink that records every call in order
///
/// Registration can be made to fail to exercise attach unwinding.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<SinkMessage>>,
    next_handle: AtomicU32,
    reject_registration: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU32::new(1),
            ..Default::default()
        }
    }

    /// Make the next registrations fail with [`SinkError::Rejected`]
    pub fn reject_registrations(&self, reject: bool) {
        self.reject_registration.store(reject, Ordering::SeqCst);
    }

    fn messages(&self) -> MutexGuard<'_, Vec<SinkMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of everything recorded so far
    pub fn recorded(&self) -> Vec<SinkMessage> {
        self.messages().clone()
    }

    /// Decoded events recorded so far, registration messages excluded
    pub fn events(&self) -> Vec<InputEvent> {
        self.messages()
            .iter()
            .filter_map(|m| match m {
                SinkMessage::Event { event, .. } => Some(*event),
                _ => None,
            })
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.events().len()
    }

    /// Number of sync events, i.e. fully forwarded reports
    pub fn frame_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, InputEvent::Sync))
            .count()
    }

    /// Handles currently registered
    pub fn registered(&self) -> Vec<SinkHandle> {
        let mut handles = Vec::new();
        for message in self.messages().iter() {
            match message {
                SinkMessage::Registered { handle, .. } => handles.push(*handle),
                SinkMessage::Unregistered { handle } => handles.retain(|h| h != handle),
                SinkMessage::Event { .. } => {}
            }
        }
        handles
    }
}

impl EventSink for RecordingSink {
    fn register_device(&self, info: &InputDeviceInfo) -> Result<SinkHandle, SinkError> {
        if self.reject_registration.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("test sink rejects registration".to_string()));
        }
        let handle = SinkHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.messages().push(SinkMessage::Registered {
            handle,
            info: info.clone(),
        });
        Ok(handle)
    }

    fn unregister_device(&self, handle: SinkHandle) -> Result<(), SinkError> {
        if !self.registered().contains(&handle) {
            return Err(SinkError::UnknownHandle(handle));
        }
        self.messages().push(SinkMessage::Unregistered { handle });
        Ok(())
    }

    fn report_key(&self, handle: SinkHandle, code: KeyCode, pressed: bool) {
        self.messages().push(SinkMessage::Event {
            handle,
            event: InputEvent::Key { code, pressed },
        });
    }

    fn report_relative(&self, handle: SinkHandle, axis: RelAxis, delta: i32) {
        self.messages().push(SinkMessage::Event {
            handle,
            event: InputEvent::Relative { axis, delta },
        });
    }

    fn report_sync(&self, handle: SinkHandle) {
        self.messages().push(SinkMessage::Event {
            handle,
            event: InputEvent::Sync,
        });
    }
}

/// Poll `condition` until it holds or `timeout` elapses
///
/// Returns whether the condition was met. For tests waiting on transport
/// threads.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
