//! Interrupt report layout and decoder
//!
//! The receiver delivers a fixed 8-byte report on its interrupt IN endpoint:
//!
//! ```text
//! Byte 0: basic buttons
//!         bit 0 = left, bit 1 = right, bit 2 = middle, bit 3 = side, bit 4 = extra
//!         bit 5 = play (CD), bit 6 = back, bit 7 = forward
//! Byte 1: X displacement (signed)
//! Byte 2: Y displacement (signed)
//! Byte 3: wheel displacement (signed)
//! Byte 4: unused
//! Byte 5: unused
//! Byte 6: media buttons
//!         bit 0 = volume up, bit 1 = volume down, bit 2 = next track,
//!         bit 3 = previous track, bit 4 = play/pause
//! Byte 7: unused
//! ```
//!
//! Bit positions come straight from the vendor's undocumented layout. Byte 0
//! bits 5-7 carry media-style keys even though they sit in the button byte;
//! they are kept where the device puts them.

use crate::types::{InputEvent, KeyCode, RelAxis};

/// Size of one interrupt report in bytes
pub const REPORT_LEN: usize = 8;

/// Number of events (keys, axes and the trailing sync) produced per report
pub const REPORT_EVENT_COUNT: usize = BASIC_KEYS.len() + MEDIA_KEYS.len() + RelAxis::ALL.len() + 1;

const BUTTONS_BYTE: usize = 0;
const X_BYTE: usize = 1;
const Y_BYTE: usize = 2;
const WHEEL_BYTE: usize = 3;
const MEDIA_BYTE: usize = 6;

/// Keys carried by byte 0, indexed by bit position
pub const BASIC_KEYS: [KeyCode; 8] = [
    KeyCode::Left,
    KeyCode::Right,
    KeyCode::Middle,
    KeyCode::Side,
    KeyCode::Extra,
    KeyCode::PlayCd,
    KeyCode::Back,
    KeyCode::Forward,
];

/// Keys carried by byte 6, indexed by bit position
pub const MEDIA_KEYS: [KeyCode; 5] = [
    KeyCode::VolumeUp,
    KeyCode::VolumeDown,
    KeyCode::NextSong,
    KeyCode::PreviousSong,
    KeyCode::PlayPause,
];

/// A set of independent flags extracted from one report byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BitMask(pub u8);

impl BitMask {
    /// Whether the flag at `bit` is set
    pub fn is_set(self, bit: usize) -> bool {
        bit < 8 && (self.0 >> bit) & 0x01 != 0
    }

    /// Number of flags currently set
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }
}

/// One decoded report
///
/// Ephemeral: produced per completion and handed to the event sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DecodedReport {
    /// Byte 0 flags (see [`BASIC_KEYS`])
    pub buttons: BitMask,
    /// Byte 6 flags, upper three bits cleared (see [`MEDIA_KEYS`])
    pub media: BitMask,
    /// Relative X movement
    pub rel_x: i8,
    /// Relative Y movement
    pub rel_y: i8,
    /// Relative wheel movement
    pub rel_wheel: i8,
}

/// Decode an 8-byte interrupt report
///
/// Every byte pattern is valid input; unknown bit combinations simply map to
/// the corresponding flag states.
pub fn decode_report(data: &[u8; REPORT_LEN]) -> DecodedReport {
    DecodedReport {
        buttons: BitMask(data[BUTTONS_BYTE]),
        media: BitMask(data[MEDIA_BYTE] & 0x1f),
        rel_x: data[X_BYTE] as i8,
        rel_y: data[Y_BYTE] as i8,
        rel_wheel: data[WHEEL_BYTE] as i8,
    }
}

impl DecodedReport {
    /// Whether `key` is reported as pressed
    ///
    /// Keys that appear in neither report byte are never pressed.
    pub fn is_pressed(&self, key: KeyCode) -> bool {
        if let Some(bit) = BASIC_KEYS.iter().position(|k| *k == key) {
            return self.buttons.is_set(bit);
        }
        MEDIA_KEYS
            .iter()
            .position(|k| *k == key)
            .is_some_and(|bit| self.media.is_set(bit))
    }

    /// Displacement reported on `axis`
    pub fn delta(&self, axis: RelAxis) -> i8 {
        match axis {
            RelAxis::X => self.rel_x,
            RelAxis::Y => self.rel_y,
            RelAxis::Wheel => self.rel_wheel,
        }
    }

    /// Events for this report in emission order
    ///
    /// All byte 0 keys by bit position, then all byte 6 keys by bit position,
    /// then X, Y and wheel motion (zero deltas included), then one
    /// [`InputEvent::Sync`] closing the frame.
    pub fn events(&self) -> impl Iterator<Item = InputEvent> + '_ {
        let basic = BASIC_KEYS
            .iter()
            .enumerate()
            .map(|(bit, code)| InputEvent::Key {
                code: *code,
                pressed: self.buttons.is_set(bit),
            });
        let media = MEDIA_KEYS
            .iter()
            .enumerate()
            .map(|(bit, code)| InputEvent::Key {
                code: *code,
                pressed: self.media.is_set(bit),
            });
        let motion = RelAxis::ALL.iter().map(|axis| InputEvent::Relative {
            axis: *axis,
            delta: i32::from(self.delta(*axis)),
        });

        basic
            .chain(media)
            .chain(motion)
            .chain(std::iter::once(InputEvent::Sync))
    }
}
