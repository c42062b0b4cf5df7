//! Event sink contract
//!
//! The sink is the input layer the driver reports into. A device registers
//! once on attach, streams key/motion/sync events while its transfer loop is
//! running, and unregisters on detach.

use protocol::{Capabilities, DeviceIdentity, InputEvent, KeyCode, RelAxis};
use thiserror::Error;

/// Registration handle issued by a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkHandle(pub u32);

/// Everything a sink learns about a device at registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDeviceInfo {
    /// Display name
    pub name: String,
    /// Physical path, e.g. `usb-1-2/input0`
    pub phys: String,
    pub identity: DeviceIdentity,
    /// Exactly the keys and axes the device can emit
    pub capabilities: Capabilities,
}

/// Errors raised by a sink
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// Consumer side has gone away
    #[error("Input consumer closed")]
    Closed,

    /// Consumer is not draining and the control timeout ran out
    #[error("Input channel full")]
    Full,

    /// Handle was never issued or is already unregistered
    #[error("Unknown sink handle {0:?}")]
    UnknownHandle(SinkHandle),

    /// Sink refused the device
    #[error("Registration rejected: {0}")]
    Rejected(String),
}

/// Input layer the driver core reports into
///
/// The `report_*` methods are called from the transport's completion context
/// and must not block.
pub trait EventSink: Send + Sync {
    /// Register a device and return its handle
    fn register_device(&self, info: &InputDeviceInfo) -> Result<SinkHandle, SinkError>;

    /// Remove a device registered earlier
    fn unregister_device(&self, handle: SinkHandle) -> Result<(), SinkError>;

    /// Report a key or button state
    fn report_key(&self, handle: SinkHandle, code: KeyCode, pressed: bool);

    /// Report relative motion on one axis
    fn report_relative(&self, handle: SinkHandle, axis: RelAxis, delta: i32);

    /// Mark the end of one report frame
    fn report_sync(&self, handle: SinkHandle);

    /// Dispatch a decoded event to the matching `report_*` method
    fn report_event(&self, handle: SinkHandle, event: InputEvent) {
        match event {
            InputEvent::Key { code, pressed } => self.report_key(handle, code, pressed),
            InputEvent::Relative { axis, delta } => self.report_relative(handle, axis, delta),
            InputEvent::Sync => self.report_sync(handle),
        }
    }
}
