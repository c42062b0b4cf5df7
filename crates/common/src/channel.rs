//! Async channel bridge between the driver's completion context and a consumer
//!
//! The driver side ([`ChannelSink`]) never blocks when forwarding events: a
//! full channel drops the event and counts it. Registration and
//! unregistration are control messages: they wait for room, but only up to
//! the sink's control timeout, so teardown never hangs on a stalled consumer.

use crate::sink::{EventSink, InputDeviceInfo, SinkError, SinkHandle};
use async_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::{InputEvent, KeyCode, RelAxis};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default bridge capacity in messages
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default upper bound on waiting for room for a control message
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_millis(500);

const CONTROL_RETRY_INTERVAL: Duration = Duration::from_millis(2);

/// Messages delivered to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMessage {
    /// Device registered
    Registered {
        handle: SinkHandle,
        info: InputDeviceInfo,
    },

    /// Decoded event for a registered device
    Event {
        handle: SinkHandle,
        event: InputEvent,
    },

    /// Device unregistered
    Unregistered { handle: SinkHandle },
}

/// Driver-side end of the bridge
pub struct ChannelSink {
    tx: Sender<SinkMessage>,
    registered: Mutex<HashSet<SinkHandle>>,
    next_handle: AtomicU32,
    dropped: AtomicU64,
    control_timeout: Duration,
}

impl ChannelSink {
    /// Bound the wait for room when sending control messages
    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    /// Number of events dropped because the consumer fell behind
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn forward(&self, handle: SinkHandle, event: InputEvent) {
        match self.tx.try_send(SinkMessage::Event { handle, event }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Input channel full, dropped event for {:?} (total dropped: {})",
                    handle, total
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Input channel closed, discarding event for {:?}", handle);
            }
        }
    }

    /// Send a control message, waiting at most the control timeout for room
    fn send_control(&self, mut message: SinkMessage) -> Result<(), SinkError> {
        let deadline = Instant::now() + self.control_timeout;
        loop {
            match self.tx.try_send(message) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => return Err(SinkError::Closed),
                Err(TrySendError::Full(pending)) => {
                    if Instant::now() >= deadline {
                        warn!(
                            "Input channel still full after {:?}, giving up on control message",
                            self.control_timeout
                        );
                        return Err(SinkError::Full);
                    }
                    message = pending;
                    std::thread::sleep(CONTROL_RETRY_INTERVAL);
                }
            }
        }
    }
}

impl EventSink for ChannelSink {
    fn register_device(&self, info: &InputDeviceInfo) -> Result<SinkHandle, SinkError> {
        let handle = SinkHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));

        self.send_control(SinkMessage::Registered {
            handle,
            info: info.clone(),
        })?;

        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle);

        debug!("Registered {:?} as {:?}", info.name, handle);
        Ok(handle)
    }

    fn unregister_device(&self, handle: SinkHandle) -> Result<(), SinkError> {
        let known = self
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        if !known {
            return Err(SinkError::UnknownHandle(handle));
        }

        self.send_control(SinkMessage::Unregistered { handle })
    }

    fn report_key(&self, handle: SinkHandle, code: KeyCode, pressed: bool) {
        self.forward(handle, InputEvent::Key { code, pressed });
    }

    fn report_relative(&self, handle: SinkHandle, axis: RelAxis, delta: i32) {
        self.forward(handle, InputEvent::Relative { axis, delta });
    }

    fn report_sync(&self, handle: SinkHandle) {
        self.forward(handle, InputEvent::Sync);
    }
}

/// Consumer-side end of the bridge
#[derive(Clone)]
pub struct InputReceiver {
    rx: Receiver<SinkMessage>,
}

impl InputReceiver {
    /// Receive the next message
    pub async fn recv(&self) -> crate::Result<SinkMessage> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive the next message (blocking)
    pub fn recv_blocking(&self) -> crate::Result<SinkMessage> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a message without blocking
    pub fn try_recv(&self) -> Option<SinkMessage> {
        self.rx.try_recv().ok()
    }

    /// Number of messages waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Stop accepting messages
    ///
    /// Messages already queued can still be received; after that `recv`
    /// fails and the sink side reports [`SinkError::Closed`].
    pub fn close(&self) {
        self.rx.close();
    }
}

/// Create the bridge between the driver and an input consumer
///
/// Returns (ChannelSink for the driver, InputReceiver for the consumer)
pub fn create_input_bridge(capacity: usize) -> (ChannelSink, InputReceiver) {
    let (tx, rx) = bounded(capacity.max(1));

    (
        ChannelSink {
            tx,
            registered: Mutex::new(HashSet::new()),
            next_handle: AtomicU32::new(1),
            dropped: AtomicU64::new(0),
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
        },
        InputReceiver { rx },
    )
}
