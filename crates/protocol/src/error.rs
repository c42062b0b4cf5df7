//! Protocol error types

use thiserror::Error;

/// Errors raised while validating the descriptors supplied by the device
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Interface exposes the wrong number of endpoints
    #[error("Interface has {found} endpoints (expected exactly {expected})")]
    EndpointCount { expected: usize, found: usize },

    /// Data endpoint points host-to-device
    #[error("Endpoint {address:#04x} is not device-to-host")]
    WrongDirection { address: u8 },

    /// Data endpoint is not a periodic interrupt endpoint
    #[error("Endpoint {address:#04x} uses {kind:?} transfers (expected Interrupt)")]
    WrongTransferKind {
        address: u8,
        kind: crate::TransferKind,
    },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
