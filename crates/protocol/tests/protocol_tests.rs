//! Integration tests for report decoding and descriptor validation
//!
//! Covers the bit-exact report layout, event emission order, capability
//! coverage and the data-channel shape check.

use proptest::prelude::*;
use protocol::{
    BASIC_KEYS, Capabilities, DecodedReport, EndpointDescriptor, InputEvent, InterfaceDescriptor,
    KeyCode, MEDIA_KEYS, ProtocolError, REPORT_EVENT_COUNT, REPORT_LEN, RelAxis, TransferKind,
    decode_report,
};

fn key_events(report: &DecodedReport) -> Vec<(KeyCode, bool)> {
    report
        .events()
        .filter_map(|event| match event {
            InputEvent::Key { code, pressed } => Some((code, pressed)),
            _ => None,
        })
        .collect()
}

mod decoding {
    use super::*;

    #[test]
    fn test_primary_button_with_motion_and_next_track() {
        let report = decode_report(&[0b0000_0001, 10, (-5i8) as u8, 0, 0, 0, 0b0000_0100, 0]);

        assert!(report.is_pressed(KeyCode::Left));
        for key in BASIC_KEYS.iter().skip(1) {
            assert!(!report.is_pressed(*key), "{:?} should be released", key);
        }
        assert!(report.is_pressed(KeyCode::NextSong));
        for key in MEDIA_KEYS.iter().filter(|k| **k != KeyCode::NextSong) {
            assert!(!report.is_pressed(*key), "{:?} should be released", key);
        }

        assert_eq!(report.rel_x, 10);
        assert_eq!(report.rel_y, -5);
        assert_eq!(report.rel_wheel, 0);
    }

    #[test]
    fn test_each_basic_bit_maps_to_its_key() {
        for (bit, key) in BASIC_KEYS.iter().enumerate() {
            let report = decode_report(&[1 << bit, 0, 0, 0, 0, 0, 0, 0]);
            let pressed: Vec<KeyCode> = key_events(&report)
                .into_iter()
                .filter(|(_, pressed)| *pressed)
                .map(|(code, _)| code)
                .collect();
            assert_eq!(pressed, vec![*key]);
        }
    }

    #[test]
    fn test_each_media_bit_maps_to_its_key() {
        for (bit, key) in MEDIA_KEYS.iter().enumerate() {
            let report = decode_report(&[0, 0, 0, 0, 0, 0, 1 << bit, 0]);
            assert!(report.is_pressed(*key));
            assert_eq!(report.media.count(), 1);
            assert_eq!(report.buttons.count(), 0);
        }
    }

    #[test]
    fn test_signed_extremes() {
        let report = decode_report(&[0, 0x80, 0x7f, 0xff, 0, 0, 0, 0]);
        assert_eq!(report.rel_x, -128);
        assert_eq!(report.rel_y, 127);
        assert_eq!(report.rel_wheel, -1);
    }
}

mod emission_order {
    use super::*;

    #[test]
    fn test_keys_then_motion_then_sync() {
        let report = decode_report(&[0xff, 1, 2, 3, 0, 0, 0x1f, 0]);
        let events: Vec<InputEvent> = report.events().collect();
        assert_eq!(events.len(), REPORT_EVENT_COUNT);

        let expected_keys: Vec<KeyCode> = BASIC_KEYS.iter().chain(MEDIA_KEYS.iter()).copied().collect();
        for (event, key) in events.iter().zip(expected_keys.iter()) {
            assert_eq!(
                *event,
                InputEvent::Key {
                    code: *key,
                    pressed: true
                }
            );
        }

        assert_eq!(
            &events[13..16],
            &[
                InputEvent::Relative {
                    axis: RelAxis::X,
                    delta: 1
                },
                InputEvent::Relative {
                    axis: RelAxis::Y,
                    delta: 2
                },
                InputEvent::Relative {
                    axis: RelAxis::Wheel,
                    delta: 3
                },
            ]
        );
        assert_eq!(events[16], InputEvent::Sync);
    }

    #[test]
    fn test_zero_motion_still_emitted() {
        let report = decode_report(&[0; REPORT_LEN]);
        let motion: Vec<InputEvent> = report
            .events()
            .filter(|e| matches!(e, InputEvent::Relative { .. }))
            .collect();
        assert_eq!(motion.len(), 3);
        assert!(
            motion
                .iter()
                .all(|e| matches!(e, InputEvent::Relative { delta: 0, .. }))
        );
    }

    #[test]
    fn test_released_keys_still_emitted() {
        let report = decode_report(&[0; REPORT_LEN]);
        let keys = key_events(&report);
        assert_eq!(keys.len(), 13);
        assert!(keys.iter().all(|(_, pressed)| !pressed));
    }
}

mod capabilities {
    use super::*;

    #[test]
    fn test_every_emitted_code_is_advertised() {
        let caps = Capabilities::mediaplay();
        let report = decode_report(&[0xff, 1, 1, 1, 0, 0, 0xff, 0]);
        for event in report.events() {
            match event {
                InputEvent::Key { code, .. } => assert!(caps.supports_key(code)),
                InputEvent::Relative { axis, .. } => assert!(caps.supports_axis(axis)),
                InputEvent::Sync => {}
            }
        }
    }

    #[test]
    fn test_nothing_extra_is_advertised() {
        let caps = Capabilities::mediaplay();
        for key in &caps.keys {
            assert!(BASIC_KEYS.contains(key) || MEDIA_KEYS.contains(key));
        }
    }
}

mod descriptors {
    use super::*;

    fn endpoint(address: u8, attributes: u8) -> EndpointDescriptor {
        EndpointDescriptor {
            address,
            attributes,
            max_packet_size: 8,
            interval: 10,
        }
    }

    #[test]
    fn test_single_interrupt_in_accepted() {
        let iface = InterfaceDescriptor {
            number: 0,
            endpoints: vec![endpoint(0x81, 0x03)],
        };
        assert_eq!(iface.single_interrupt_in().unwrap().address, 0x81);
    }

    #[test]
    fn test_two_endpoints_rejected() {
        let iface = InterfaceDescriptor {
            number: 0,
            endpoints: vec![endpoint(0x81, 0x03), endpoint(0x02, 0x03)],
        };
        assert_eq!(
            iface.single_interrupt_in().unwrap_err(),
            ProtocolError::EndpointCount {
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn test_no_endpoints_rejected() {
        let iface = InterfaceDescriptor {
            number: 0,
            endpoints: Vec::new(),
        };
        assert!(matches!(
            iface.single_interrupt_in(),
            Err(ProtocolError::EndpointCount { found: 0, .. })
        ));
    }

    #[test]
    fn test_out_endpoint_rejected() {
        let iface = InterfaceDescriptor {
            number: 0,
            endpoints: vec![endpoint(0x01, 0x03)],
        };
        assert_eq!(
            iface.single_interrupt_in().unwrap_err(),
            ProtocolError::WrongDirection { address: 0x01 }
        );
    }

    #[test]
    fn test_bulk_endpoint_rejected() {
        let iface = InterfaceDescriptor {
            number: 0,
            endpoints: vec![endpoint(0x81, 0x02)],
        };
        assert_eq!(
            iface.single_interrupt_in().unwrap_err(),
            ProtocolError::WrongTransferKind {
                address: 0x81,
                kind: TransferKind::Bulk
            }
        );
    }
}

proptest! {
    #[test]
    fn prop_decode_is_deterministic(bytes in proptest::array::uniform8(any::<u8>())) {
        let first = decode_report(&bytes);
        let second = decode_report(&bytes);
        prop_assert_eq!(first, second);
        prop_assert_eq!(first.events().collect::<Vec<_>>(), second.events().collect::<Vec<_>>());
    }

    #[test]
    fn prop_fields_follow_layout(bytes in proptest::array::uniform8(any::<u8>())) {
        let report = decode_report(&bytes);
        prop_assert_eq!(report.buttons.0, bytes[0]);
        prop_assert_eq!(report.rel_x, bytes[1] as i8);
        prop_assert_eq!(report.rel_y, bytes[2] as i8);
        prop_assert_eq!(report.rel_wheel, bytes[3] as i8);
        prop_assert_eq!(report.media.0, bytes[6] & 0x1f);
        prop_assert_eq!(report.events().count(), REPORT_EVENT_COUNT);
    }
}
