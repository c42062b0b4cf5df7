//! Logitech MediaPlay cordless mouse driver
//!
//! Binds to the receiver's interrupt endpoint, keeps one transfer in flight
//! while at least one consumer holds the device open, and forwards every
//! decoded report to an [`common::EventSink`].

pub mod config;
pub mod usb;

pub mod test_utils;

pub use config::DriverConfig;
pub use usb::{DeviceInstance, DeviceManager, DeviceTable, Transport};
