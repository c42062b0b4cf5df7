//! USB side of the driver
//!
//! - [`transport`]: the contract between the driver core and a USB stack
//! - [`resources`], [`transfers`], [`gate`], [`device`]: the driver core
//! - [`poller`], [`rusb_transport`], [`manager`]: the libusb-backed
//!   implementation and device enumeration

pub mod device;
pub mod error;
pub mod gate;
pub mod manager;
pub mod poller;
pub mod resources;
pub mod rusb_transport;
pub mod transfers;
pub mod transport;

pub use device::{DeviceInstance, MAX_NAME_LEN, MAX_PHYS_LEN};
pub use error::{AllocationError, AttachError, GateError, OpenError, TransportError};
pub use gate::ActivationGate;
pub use manager::{DeviceManager, DeviceTable, FoundDevice, display_name};
pub use resources::DeviceResources;
pub use poller::{InterruptPoller, InterruptRead, TransportSettings};
pub use rusb_transport::RusbTransport;
pub use transfers::{LoopState, LoopStats, TransferLoop};
pub use transport::{
    Completer, Completion, CompletionHandler, ReportBuffer, TransferRequest, TransferSlot,
    Transport,
};
