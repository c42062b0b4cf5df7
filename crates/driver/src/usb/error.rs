//! Driver core error types
//!
//! Allocation and submission errors are returned to the immediate caller
//! (attach / open). Completion errors never surface here: the transfer loop
//! absorbs them and stops polling.

use common::SinkError;
use protocol::ProtocolError;
use thiserror::Error;

/// Errors reported by a transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transfer timed out")]
    Timeout,

    #[error("Endpoint stalled")]
    Pipe,

    #[error("Device disconnected")]
    NoDevice,

    #[error("Device or endpoint not found")]
    NotFound,

    #[error("Transport busy")]
    Busy,

    #[error("Buffer overflow")]
    Overflow,

    #[error("I/O error")]
    Io,

    #[error("Out of memory")]
    NoMemory,

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Access denied")]
    Access,

    #[error("{message}")]
    Other { message: String },
}

/// Buffer or transfer-handle allocation failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("Failed to allocate report buffer: {0}")]
    Buffer(TransportError),

    #[error("Failed to allocate transfer: {0}")]
    Transfer(TransportError),
}

/// Attaching to a device failed; nothing is left allocated
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttachError {
    /// Data channel does not have the required shape
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(#[from] ProtocolError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("Failed to register with input layer: {0}")]
    Registration(#[from] SinkError),
}

/// Opening the device failed; the activation count is unchanged
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OpenError {
    #[error("Failed to submit transfer: {0}")]
    Submission(#[from] TransportError),
}

/// Misuse of the activation gate
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GateError {
    /// `close` without a matching `open`
    #[error("Device is not open")]
    NotOpen,
}
