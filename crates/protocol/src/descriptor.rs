//! Endpoint and interface descriptor model
//!
//! Only the fields the driver core validates are modelled: endpoint address
//! (number + direction), transfer type, max packet size and polling interval.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};

const DIRECTION_IN: u8 = 0x80;
const TRANSFER_TYPE_MASK: u8 = 0x03;

/// Endpoint data direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Device-to-host
    In,
    /// Host-to-device
    Out,
}

/// Endpoint transfer type (bmAttributes bits 0-1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferKind {
    fn from_attributes(attributes: u8) -> Self {
        match attributes & TRANSFER_TYPE_MASK {
            0 => TransferKind::Control,
            1 => TransferKind::Isochronous,
            2 => TransferKind::Bulk,
            _ => TransferKind::Interrupt,
        }
    }
}

/// One endpoint of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// bEndpointAddress, direction bit included
    pub address: u8,
    /// bmAttributes
    pub attributes: u8,
    /// wMaxPacketSize
    pub max_packet_size: u16,
    /// bInterval
    pub interval: u8,
}

impl EndpointDescriptor {
    pub fn direction(&self) -> Direction {
        if self.address & DIRECTION_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn kind(&self) -> TransferKind {
        TransferKind::from_attributes(self.attributes)
    }

    /// Endpoint number without the direction bit
    pub fn number(&self) -> u8 {
        self.address & 0x0f
    }
}

/// The active alternate setting of the interface the driver binds to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    /// bInterfaceNumber
    pub number: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl InterfaceDescriptor {
    /// The interface's only endpoint, if it is an interrupt IN endpoint
    ///
    /// The mouse exposes exactly one data channel; any other shape is not a
    /// device this driver understands.
    pub fn single_interrupt_in(&self) -> Result<&EndpointDescriptor> {
        let endpoint = match self.endpoints.as_slice() {
            [endpoint] => endpoint,
            other => {
                return Err(ProtocolError::EndpointCount {
                    expected: 1,
                    found: other.len(),
                });
            }
        };

        if endpoint.direction() != Direction::In {
            return Err(ProtocolError::WrongDirection {
                address: endpoint.address,
            });
        }

        if endpoint.kind() != TransferKind::Interrupt {
            return Err(ProtocolError::WrongTransferKind {
                address: endpoint.address,
                kind: endpoint.kind(),
            });
        }

        Ok(endpoint)
    }
}
