//! Input event and device identity types
//!
//! Key and axis codes use the Linux input-event-codes numbering so that an
//! evdev/uinput-backed sink can forward them without translation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bus type reported for USB-attached devices
pub const BUS_USB: u16 = 0x03;

/// Logitech MediaPlay cordless mouse receiver
pub const MEDIAPLAY_RECEIVER: DeviceMatch = DeviceMatch {
    vendor_id: 0x046d,
    product_id: 0xc50e,
};

/// Key codes the decoder can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    Left,
    Right,
    Middle,
    Side,
    Extra,
    PlayCd,
    Back,
    Forward,
    VolumeUp,
    VolumeDown,
    NextSong,
    PreviousSong,
    PlayPause,
}

impl KeyCode {
    /// Numeric input-event code (`BTN_*` / `KEY_*`)
    pub fn code(self) -> u16 {
        match self {
            KeyCode::Left => 0x110,
            KeyCode::Right => 0x111,
            KeyCode::Middle => 0x112,
            KeyCode::Side => 0x113,
            KeyCode::Extra => 0x114,
            KeyCode::PlayCd => 200,
            KeyCode::Back => 158,
            KeyCode::Forward => 159,
            KeyCode::VolumeUp => 115,
            KeyCode::VolumeDown => 114,
            KeyCode::NextSong => 163,
            KeyCode::PreviousSong => 165,
            KeyCode::PlayPause => 164,
        }
    }

    /// True for pointer buttons, false for keyboard-style media keys
    pub fn is_button(self) -> bool {
        matches!(
            self,
            KeyCode::Left | KeyCode::Right | KeyCode::Middle | KeyCode::Side | KeyCode::Extra
        )
    }
}

/// Relative axes the decoder can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelAxis {
    X,
    Y,
    Wheel,
}

impl RelAxis {
    /// All axes in emission order
    pub const ALL: [RelAxis; 3] = [RelAxis::X, RelAxis::Y, RelAxis::Wheel];

    /// Numeric input-event code (`REL_*`)
    pub fn code(self) -> u16 {
        match self {
            RelAxis::X => 0x00,
            RelAxis::Y => 0x01,
            RelAxis::Wheel => 0x08,
        }
    }
}

/// A single event forwarded to the input layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputEvent {
    /// Key or button state
    Key { code: KeyCode, pressed: bool },
    /// Relative motion on one axis
    Relative { axis: RelAxis, delta: i32 },
    /// End of one report frame
    Sync,
}

/// Identity fields advertised when registering with the input layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Bus type (see [`BUS_USB`])
    pub bus_type: u16,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Device release number (bcdDevice)
    pub version: u16,
}

impl DeviceIdentity {
    /// Identity of a USB-attached device
    pub fn usb(vendor_id: u16, product_id: u16, version: u16) -> Self {
        Self {
            bus_type: BUS_USB,
            vendor_id,
            product_id,
            version,
        }
    }
}

/// One accepted (vendor, product) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceMatch {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceMatch {
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for DeviceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Keys and axes a device can ever emit
///
/// Advertised at registration so the sink can pre-allocate state. Must list
/// exactly what the decoder produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub keys: Vec<KeyCode>,
    pub axes: Vec<RelAxis>,
}

impl Capabilities {
    /// Capability set of the MediaPlay report decoder
    pub fn mediaplay() -> Self {
        let mut keys: Vec<KeyCode> = Vec::new();
        for key in crate::BASIC_KEYS.iter().chain(crate::MEDIA_KEYS.iter()) {
            if !keys.contains(key) {
                keys.push(*key);
            }
        }

        Self {
            keys,
            axes: RelAxis::ALL.to_vec(),
        }
    }

    pub fn supports_key(&self, key: KeyCode) -> bool {
        self.keys.contains(&key)
    }

    pub fn supports_axis(&self, axis: RelAxis) -> bool {
        self.axes.contains(&axis)
    }
}
