//! Wire contract for the Logitech MediaPlay cordless mouse
//!
//! This crate defines everything that has to be bit-exact between the device
//! and the driver core: the 8-byte interrupt report layout and its decoder,
//! the key and axis codes the decoder emits, the capability set advertised to
//! the input layer, and the endpoint descriptor model used to validate the
//! device's data channel.
//!
//! Nothing here performs I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{InputEvent, KeyCode, decode_report};
//!
//! let report = decode_report(&[0b0000_0001, 10, 0xfb, 0, 0, 0, 0b0000_0100, 0]);
//! assert!(report.buttons.is_set(0));
//! assert_eq!(report.rel_x, 10);
//! assert_eq!(report.rel_y, -5);
//!
//! let events: Vec<InputEvent> = report.events().collect();
//! assert_eq!(events[0], InputEvent::Key { code: KeyCode::Left, pressed: true });
//! assert_eq!(events.last(), Some(&InputEvent::Sync));
//! ```

pub mod descriptor;
pub mod error;
pub mod report;
pub mod types;

pub use descriptor::{Direction, EndpointDescriptor, InterfaceDescriptor, TransferKind};
pub use error::{ProtocolError, Result};
pub use report::{
    BASIC_KEYS, BitMask, DecodedReport, MEDIA_KEYS, REPORT_EVENT_COUNT, REPORT_LEN, decode_report,
};
pub use types::{
    BUS_USB, Capabilities, DeviceIdentity, DeviceMatch, InputEvent, KeyCode, MEDIAPLAY_RECEIVER,
    RelAxis,
};
