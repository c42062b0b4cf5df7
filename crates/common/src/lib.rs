//! Common utilities for the lmpcm driver
//!
//! This crate provides what the driver core and its consumers share: the
//! event sink contract, an async channel bridge that carries decoded input
//! from the driver's completion context to a consumer, error handling and
//! logging setup.

pub mod channel;
pub mod error;
pub mod logging;
pub mod sink;
pub mod test_utils;

pub use channel::{ChannelSink, InputReceiver, SinkMessage, create_input_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use sink::{EventSink, InputDeviceInfo, SinkError, SinkHandle};
