//! Device lifecycle tests against the mock transport
//!
//! Covers attach validation and unwinding, open/close reference counting,
//! cancellation on close and detach, and the fail-silent completion policy.

use common::test_utils::{DEFAULT_TEST_TIMEOUT, RecordingSink, wait_until};
use common::{EventSink, SinkMessage, create_input_bridge};
use driver::test_utils::{MockTransport, mediaplay_endpoint};
use driver::usb::{
    AllocationError, AttachError, DeviceInstance, GateError, LoopState, MAX_NAME_LEN,
    MAX_PHYS_LEN, OpenError, TransportError,
};
use protocol::{
    Capabilities, EndpointDescriptor, InputEvent, InterfaceDescriptor, KeyCode, REPORT_EVENT_COUNT,
    REPORT_LEN, RelAxis,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const IDLE_REPORT: [u8; REPORT_LEN] = [0; REPORT_LEN];

fn attach(transport: &Arc<MockTransport>, sink: &Arc<RecordingSink>) -> DeviceInstance {
    DeviceInstance::attach(transport.clone(), sink.clone(), "Logitech USB Receiver")
        .expect("attach should succeed")
}

fn setup() -> (Arc<MockTransport>, Arc<RecordingSink>) {
    (
        Arc::new(MockTransport::mediaplay()),
        Arc::new(RecordingSink::new()),
    )
}

mod attach_tests {
    use super::*;

    #[test]
    fn test_attach_registers_device() {
        let (transport, sink) = setup();
        let device = attach(&transport, &sink);

        assert_eq!(device.name(), "Logitech USB Receiver");
        assert_eq!(device.phys(), "usb-1-2/input0");
        assert_eq!(device.identity().vendor_id, 0x046d);
        assert_eq!(device.activation_count(), 0);
        assert_eq!(device.transfer_state(), LoopState::Idle);

        let recorded = sink.recorded();
        assert_eq!(recorded.len(), 1);
        match &recorded[0] {
            SinkMessage::Registered { handle, info } => {
                assert_eq!(Some(*handle), device.sink_handle());
                assert_eq!(info.capabilities, Capabilities::mediaplay());
                assert_eq!(info.phys, "usb-1-2/input0");
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // Attach allocates but never submits
        let counters = transport.counters();
        assert_eq!(counters.buffers_allocated, 1);
        assert_eq!(counters.transfers_allocated, 1);
        assert_eq!(counters.submissions, 0);
    }

    #[test]
    fn test_attach_bounds_name() {
        let (transport, sink) = setup();
        let long_name = "x".repeat(300);
        let device = DeviceInstance::attach(transport.clone(), sink.clone(), &long_name).unwrap();
        assert_eq!(device.name().len(), MAX_NAME_LEN);
        assert!(device.phys().len() <= MAX_PHYS_LEN);
    }

    fn assert_rejected(interface: InterfaceDescriptor) {
        let transport = Arc::new(MockTransport::with_interface(interface));
        let sink = Arc::new(RecordingSink::new());

        let result = DeviceInstance::attach(transport.clone(), sink.clone(), "mouse");
        assert!(
            matches!(result, Err(AttachError::UnsupportedDevice(_))),
            "got {:?}",
            result
        );
        assert_eq!(transport.counters().buffers_allocated, 0);
        assert!(sink.registered().is_empty());
    }

    #[test]
    fn test_attach_rejects_two_endpoints() {
        assert_rejected(InterfaceDescriptor {
            number: 0,
            endpoints: vec![mediaplay_endpoint(), mediaplay_endpoint()],
        });
    }

    #[test]
    fn test_attach_rejects_no_endpoints() {
        assert_rejected(InterfaceDescriptor {
            number: 0,
            endpoints: Vec::new(),
        });
    }

    #[test]
    fn test_attach_rejects_out_endpoint() {
        assert_rejected(InterfaceDescriptor {
            number: 0,
            endpoints: vec![EndpointDescriptor {
                address: 0x01,
                ..mediaplay_endpoint()
            }],
        });
    }

    #[test]
    fn test_attach_rejects_bulk_endpoint() {
        assert_rejected(InterfaceDescriptor {
            number: 0,
            endpoints: vec![EndpointDescriptor {
                attributes: 0x02,
                ..mediaplay_endpoint()
            }],
        });
    }

    #[test]
    fn test_transfer_allocation_failure_unwinds_buffer() {
        let (transport, sink) = setup();
        transport.fail_transfer_alloc(Some(TransportError::NoMemory));

        let result = DeviceInstance::attach(transport.clone(), sink.clone(), "mouse");
        assert!(matches!(
            result,
            Err(AttachError::Allocation(AllocationError::Transfer(
                TransportError::NoMemory
            )))
        ));

        let counters = transport.counters();
        assert_eq!(counters.buffers_allocated, 1);
        assert_eq!(counters.buffers_freed, 1);
        assert_eq!(counters.transfers_allocated, 0);
        assert!(counters.balanced());
        assert!(sink.registered().is_empty());
    }

    #[test]
    fn test_buffer_allocation_failure() {
        let (transport, sink) = setup();
        transport.fail_buffer_alloc(Some(TransportError::NoMemory));

        let result = DeviceInstance::attach(transport.clone(), sink.clone(), "mouse");
        assert!(matches!(
            result,
            Err(AttachError::Allocation(AllocationError::Buffer(_)))
        ));
        assert_eq!(transport.counters().buffers_allocated, 0);
    }

    #[test]
    fn test_registration_failure_releases_resources() {
        let (transport, sink) = setup();
        sink.reject_registrations(true);

        let result = DeviceInstance::attach(transport.clone(), sink.clone(), "mouse");
        assert!(matches!(result, Err(AttachError::Registration(_))));

        let counters = transport.counters();
        assert_eq!(counters.buffers_allocated, 1);
        assert!(counters.balanced());
        assert_eq!(counters.submissions, 0);
    }
}

mod activation_tests {
    use super::*;

    #[test]
    fn test_refcount_keeps_loop_until_last_close() {
        let (transport, sink) = setup();
        let device = attach(&transport, &sink);

        device.open().unwrap();
        device.open().unwrap();
        device.close().unwrap();
        assert_eq!(device.activation_count(), 1);
        assert_eq!(device.transfer_state(), LoopState::Submitted);
        assert_eq!(transport.counters().cancellations, 0);

        device.close().unwrap();
        assert_eq!(device.activation_count(), 0);
        assert_eq!(device.transfer_state(), LoopState::Idle);
        assert_eq!(transport.counters().cancellations, 1);
        assert_eq!(transport.counters().submissions, 1);
    }

    #[test]
    fn test_close_without_open_is_rejected() {
        let (transport, sink) = setup();
        let device = attach(&transport, &sink);

        device.open().unwrap();
        device.close().unwrap();
        assert_eq!(device.close(), Err(GateError::NotOpen));
        assert_eq!(device.activation_count(), 0);

        // Still usable afterwards
        device.open().unwrap();
        assert_eq!(device.activation_count(), 1);
    }

    #[test]
    fn test_open_submission_failure_rolls_back() {
        let (transport, sink) = setup();
        let device = attach(&transport, &sink);
        transport.fail_submit(Some(TransportError::NoDevice));

        assert_eq!(
            device.open(),
            Err(OpenError::Submission(TransportError::NoDevice))
        );
        assert_eq!(device.activation_count(), 0);
        assert_eq!(device.transfer_state(), LoopState::Idle);
        assert_eq!(device.close(), Err(GateError::NotOpen));
    }

    #[test]
    fn test_concurrent_open_close_pairs() {
        let (transport, sink) = setup();
        let device = Arc::new(attach(&transport, &sink));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let device = Arc::clone(&device);
                thread::spawn(move || {
                    for _ in 0..50 {
                        device.open().unwrap();
                        device.close().unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(device.activation_count(), 0);
        assert_eq!(device.transfer_state(), LoopState::Idle);
        assert!(!transport.has_pending());
        let counters = transport.counters();
        assert_eq!(counters.submissions, counters.cancellations);
    }
}

mod completion_tests {
    use super::*;

    #[test]
    fn test_example_report_forwarded_in_order() {
        let (transport, sink) = setup();
        let device = attach(&transport, &sink);
        device.open().unwrap();

        let report = [0b0000_0001, 10, (-5i8) as u8, 0, 0, 0, 0b0000_0100, 0];
        assert!(transport.complete_pending(&report));

        let events = sink.events();
        assert_eq!(events.len(), REPORT_EVENT_COUNT);
        assert_eq!(
            events[0],
            InputEvent::Key {
                code: KeyCode::Left,
                pressed: true
            }
        );
        for event in &events[1..8] {
            assert!(matches!(event, InputEvent::Key { pressed: false, .. }));
        }
        assert_eq!(
            events[10],
            InputEvent::Key {
                code: KeyCode::NextSong,
                pressed: true
            }
        );
        assert_eq!(
            &events[13..],
            &[
                InputEvent::Relative {
                    axis: RelAxis::X,
                    delta: 10
                },
                InputEvent::Relative {
                    axis: RelAxis::Y,
                    delta: -5
                },
                InputEvent::Relative {
                    axis: RelAxis::Wheel,
                    delta: 0
                },
                InputEvent::Sync,
            ]
        );

        // Resubmitted for the next report
        assert_eq!(device.transfer_state(), LoopState::Submitted);
        assert!(transport.has_pending());
    }

    #[test]
    fn test_continuous_reports() {
        let (transport, sink) = setup();
        let device = attach(&transport, &sink);
        device.open().unwrap();

        for _ in 0..5 {
            assert!(transport.complete_pending(&IDLE_REPORT));
        }
        assert_eq!(sink.frame_count(), 5);
        assert_eq!(device.transfer_stats().reports, 5);
        assert_eq!(transport.counters().submissions, 6);
    }

    #[test]
    fn test_completion_error_goes_quiet_until_reopen() {
        let (transport, sink) = setup();
        let device = attach(&transport, &sink);
        device.open().unwrap();

        assert!(transport.fail_pending(TransportError::Pipe));
        assert_eq!(sink.event_count(), 0);
        assert_eq!(device.transfer_state(), LoopState::Idle);
        assert!(!transport.has_pending());

        // A second open only bumps the count; the loop stays quiet
        device.open().unwrap();
        assert!(!transport.has_pending());

        device.close().unwrap();
        device.close().unwrap();
        device.open().unwrap();
        assert!(transport.has_pending());
        assert!(transport.complete_pending(&IDLE_REPORT));
        assert_eq!(sink.frame_count(), 1);
    }

    #[test]
    fn test_no_events_after_close() {
        let (transport, sink) = setup();
        let device = attach(&transport, &sink);
        device.open().unwrap();
        device.close().unwrap();

        assert!(!transport.complete_pending(&[0xff; REPORT_LEN]));
        assert_eq!(transport.replay_cancelled(&[0xff; REPORT_LEN]), 1);
        assert_eq!(sink.event_count(), 0);
        assert_eq!(device.transfer_stats().stale, 1);
    }

    #[test]
    fn test_no_events_after_detach() {
        let (transport, sink) = setup();
        let device = attach(&transport, &sink);
        device.open().unwrap();
        device.open().unwrap();
        device.detach();

        assert_eq!(transport.counters().cancellations, 1);
        assert_eq!(transport.replay_cancelled(&[0xff; REPORT_LEN]), 1);
        assert_eq!(sink.event_count(), 0);
    }

    #[test]
    fn test_completion_from_another_thread() {
        let (transport, sink) = setup();
        let device = attach(&transport, &sink);
        device.open().unwrap();

        let remote = Arc::clone(&transport);
        thread::spawn(move || {
            for _ in 0..3 {
                assert!(remote.complete_pending(&[0x02, 1, 1, 1, 0, 0, 0, 0]));
            }
        })
        .join()
        .unwrap();

        assert_eq!(sink.frame_count(), 3);
        assert_eq!(device.transfer_state(), LoopState::Submitted);
        device.close().unwrap();
        assert_eq!(device.transfer_state(), LoopState::Idle);
    }

    #[test]
    fn test_events_through_channel_bridge() {
        let transport = Arc::new(MockTransport::mediaplay());
        let (sink, receiver) = create_input_bridge(64);
        let sink: Arc<dyn EventSink> = Arc::new(sink);

        let device = DeviceInstance::attach(transport.clone(), sink, "mouse").unwrap();
        let handle = device.sink_handle().unwrap();
        device.open().unwrap();
        assert!(transport.complete_pending(&[0, 0, 0, 0, 0, 0, 0b0001_0000, 0]));

        assert!(matches!(
            receiver.try_recv(),
            Some(SinkMessage::Registered { .. })
        ));
        let events: Vec<InputEvent> = std::iter::from_fn(|| receiver.try_recv())
            .map(|m| match m {
                SinkMessage::Event { handle: h, event } => {
                    assert_eq!(h, handle);
                    event
                }
                other => panic!("unexpected message: {:?}", other),
            })
            .collect();
        assert_eq!(events.len(), REPORT_EVENT_COUNT);
        assert!(events.contains(&InputEvent::Key {
            code: KeyCode::PlayPause,
            pressed: true
        }));

        device.detach();
        assert!(matches!(
            receiver.try_recv(),
            Some(SinkMessage::Unregistered { .. })
        ));
    }
}

mod detach_tests {
    use super::*;

    #[test]
    fn test_detach_returns_with_undrained_bridge() {
        let transport = Arc::new(MockTransport::mediaplay());
        let capacity = REPORT_EVENT_COUNT * 2;
        let (sink, receiver) = create_input_bridge(capacity);
        let sink: Arc<dyn EventSink> =
            Arc::new(sink.with_control_timeout(Duration::from_millis(50)));

        let device = DeviceInstance::attach(transport.clone(), sink, "mouse").unwrap();
        device.open().unwrap();
        for _ in 0..3 {
            assert!(transport.complete_pending(&IDLE_REPORT));
        }
        device.close().unwrap();
        assert_eq!(receiver.len(), capacity);

        // Nobody reads the bridge while the device goes away
        let detached = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&detached);
        let worker = thread::spawn(move || {
            device.detach();
            flag.store(true, Ordering::SeqCst);
        });

        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || detached
            .load(Ordering::SeqCst)));
        worker.join().unwrap();
        assert!(transport.counters().balanced());

        let messages: Vec<SinkMessage> = std::iter::from_fn(|| receiver.try_recv()).collect();
        assert_eq!(messages.len(), capacity);
        assert!(
            !messages
                .iter()
                .any(|m| matches!(m, SinkMessage::Unregistered { .. }))
        );
    }

    #[test]
    fn test_detach_releases_everything() {
        let (transport, sink) = setup();
        let device = attach(&transport, &sink);
        device.open().unwrap();
        device.detach();

        let counters = transport.counters();
        assert!(counters.balanced());
        assert_eq!(counters.buffers_freed, 1);
        assert_eq!(counters.transfers_freed, 1);
        assert!(sink.registered().is_empty());
        assert!(matches!(
            sink.recorded().last(),
            Some(SinkMessage::Unregistered { .. })
        ));
    }

    #[test]
    fn test_detach_idle_device() {
        let (transport, sink) = setup();
        let device = attach(&transport, &sink);
        device.detach();

        assert_eq!(transport.counters().cancellations, 0);
        assert!(transport.counters().balanced());
    }

    #[test]
    fn test_drop_tears_down() {
        let (transport, sink) = setup();
        {
            let device = attach(&transport, &sink);
            device.open().unwrap();
        }
        assert!(transport.counters().balanced());
        assert!(sink.registered().is_empty());
    }

    #[test]
    fn test_detach_tolerates_unregister_failure() {
        let (transport, sink) = setup();
        let device = attach(&transport, &sink);
        // Unregister behind the device's back so its own unregister fails
        if let Some(handle) = device.sink_handle() {
            sink.unregister_device(handle).unwrap();
        }
        device.detach();
        assert!(transport.counters().balanced());
    }
}
