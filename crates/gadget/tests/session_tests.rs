//! Integration tests for the gadget session
//!
//! Drives a [`Session`] over [`MockDevice`] with the host-side traffic of a
//! typical enumeration: probe/commit negotiation, control requests and
//! stream on/off.

use common::test_utils::{
    brightness_controls, catalog_from, disabled_brightness_controls, sample_catalog,
};
use common::{ControlTable, Error, FrameFormat, PixelFormat, StreamingParams, UsbSpeed};
use gadget::event_loop::FrameClock;
use gadget::image::ImageSource;
use gadget::negotiator::Negotiator;
use gadget::test_utils::{DeviceCall, MockDevice};
use gadget::uvc::{BufferPipeline, MemoryMode, Session, VideoFormat};
use proptest::prelude::*;
use protocol::{
    CtrlRequest, INTERFACE_CONTROL, INTERFACE_STREAMING, RequestCode, RequestData,
    RequestErrorCode, StreamingControl, UvcEvent, VC_REQUEST_ERROR_CODE_CONTROL, processing,
};
use std::time::{Duration, Instant};

const PROBE: u8 = 0x01;
const COMMIT: u8 = 0x02;
const PROCESSING_UNIT: u8 = 2;

fn image() -> ImageSource {
    ImageSource::from_l8_bytes(vec![0x80; 64], 8, 8).unwrap()
}

fn session_with(controls: ControlTable, memory: MemoryMode, buffers: u32) -> Session<MockDevice> {
    let negotiator = Negotiator::new(sample_catalog(), StreamingParams::default(), 640 * 480);
    Session::new(MockDevice::new(), negotiator, controls, image(), memory, buffers)
}

fn session() -> Session<MockDevice> {
    session_with(brightness_controls(), MemoryMode::Mmap, 3)
}

fn setup(code: RequestCode, selector: u8, entity: u8, interface: u8, length: u16) -> UvcEvent {
    UvcEvent::Setup(CtrlRequest {
        request_type: 0xa1,
        request: code as u8,
        value: u16::from(selector) << 8,
        index: (u16::from(entity) << 8) | u16::from(interface),
        length,
    })
}

fn streaming(code: RequestCode, selector: u8) -> UvcEvent {
    setup(code, selector, 0, INTERFACE_STREAMING, StreamingControl::SIZE as u16)
}

fn brightness(code: RequestCode) -> UvcEvent {
    setup(code, processing::BRIGHTNESS, PROCESSING_UNIT, INTERFACE_CONTROL, 4)
}

fn last_response(session: &Session<MockDevice>) -> RequestData {
    *session.device().last_response().unwrap()
}

fn last_record(session: &Session<MockDevice>) -> StreamingControl {
    StreamingControl::decode(last_response(session).payload()).unwrap()
}

/// SET_CUR on a streaming selector followed by its data stage
fn set_streaming(session: &mut Session<MockDevice>, selector: u8, format: u8, frame: u8) {
    session.handle_event(streaming(RequestCode::SetCur, selector));
    let proposal = StreamingControl {
        format_index: format,
        frame_index: frame,
        ..Default::default()
    };
    session.handle_event(UvcEvent::Data(RequestData::with_payload(&proposal.encode())));
}

mod negotiation {
    use super::*;

    #[test]
    fn test_get_max_and_min() {
        let mut session = session();

        session.handle_event(streaming(RequestCode::GetMax, PROBE));
        let max = last_record(&session);
        assert_eq!((max.format_index, max.frame_index), (1, 2));

        session.handle_event(streaming(RequestCode::GetMin, PROBE));
        let min = last_record(&session);
        assert_eq!((min.format_index, min.frame_index), (1, 1));

        session.handle_event(streaming(RequestCode::GetDef, COMMIT));
        assert_eq!(last_record(&session), min);
    }

    #[test]
    fn test_probe_set_out_of_range_clamps() {
        let mut session = session();
        set_streaming(&mut session, PROBE, 5, 9);

        session.handle_event(streaming(RequestCode::GetCur, PROBE));
        let probe = last_record(&session);
        assert_eq!((probe.format_index, probe.frame_index), (1, 2));
        assert_eq!(probe.frame_interval, 333_333);
        assert!(session.device().formats().is_empty());
    }

    #[test]
    fn test_commit_applies_format() {
        let mut session = session();
        set_streaming(&mut session, COMMIT, 1, 2);

        assert_eq!(
            session.device().formats(),
            &[VideoFormat {
                fourcc: PixelFormat::Yuyv.fourcc(),
                width: 1280,
                height: 720,
                size_image: 1280 * 720 * 2,
            }]
        );
    }

    #[test]
    fn test_commit_applies_entry_pixel_format() {
        let mjpeg = FrameFormat {
            format_index: 1,
            frame_index: 1,
            width: 640,
            height: 480,
            default_frame_interval: 333_333,
            ..FrameFormat::new(UsbSpeed::High, PixelFormat::Mjpeg)
        };
        let negotiator = Negotiator::new(catalog_from(vec![mjpeg]), StreamingParams::default(), 64);
        let mut session = Session::new(
            MockDevice::new(),
            negotiator,
            brightness_controls(),
            image(),
            MemoryMode::Mmap,
            2,
        );

        set_streaming(&mut session, COMMIT, 1, 1);

        let applied = session.device().formats()[0];
        assert_eq!(applied.fourcc, PixelFormat::Mjpeg.fourcc());
        assert_ne!(applied.fourcc, PixelFormat::Grey.fourcc());
        assert_eq!(applied.size_image, 640 * 480);
    }

    #[test]
    fn test_commit_round_trip_is_identical() {
        let mut session = session();
        set_streaming(&mut session, COMMIT, 1, 2);

        session.handle_event(streaming(RequestCode::GetCur, COMMIT));
        let first = last_response(&session);
        let record = StreamingControl::decode(first.payload()).unwrap();

        set_streaming(&mut session, COMMIT, record.format_index, record.frame_index);
        session.handle_event(streaming(RequestCode::GetCur, COMMIT));
        assert_eq!(last_response(&session).payload(), first.payload());
        assert_eq!(session.requests().commit(), &record);
    }

    #[test]
    fn test_commit_while_streaming_is_skipped() {
        let mut session = session();
        session.handle_event(UvcEvent::StreamOn);
        assert!(session.is_streaming());

        session.handle_event(streaming(RequestCode::SetCur, COMMIT));
        assert_eq!(last_response(&session).length, 34);
        let proposal = StreamingControl {
            format_index: 1,
            frame_index: 2,
            ..Default::default()
        };
        session.handle_event(UvcEvent::Data(RequestData::with_payload(&proposal.encode())));

        assert!(session.device().formats().is_empty());
        assert_eq!(session.requests().commit().frame_index, 2);
    }
}

mod controls {
    use super::*;

    #[test]
    fn test_brightness_get_min_set_get_cur() {
        let mut session = session();

        session.handle_event(brightness(RequestCode::GetMin));
        assert_eq!(last_response(&session).payload(), &[0x00, 0x00, 0x00, 0x00]);

        session.handle_event(brightness(RequestCode::SetCur));
        assert_eq!(last_response(&session).length, 4);
        session.handle_event(UvcEvent::Data(RequestData::with_payload(&[75])));

        session.handle_event(brightness(RequestCode::GetCur));
        assert_eq!(last_response(&session).payload(), &[0x4b, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_disabled_control_stalls() {
        let mut session = session_with(disabled_brightness_controls(), MemoryMode::Mmap, 2);

        session.handle_event(brightness(RequestCode::SetCur));
        assert!(last_response(&session).length < 0);
        session.handle_event(UvcEvent::Data(RequestData::with_payload(&[75])));
        assert_eq!(session.controls().entries()[0].current_value, 50);

        session.handle_event(setup(
            RequestCode::GetCur,
            VC_REQUEST_ERROR_CODE_CONTROL,
            0,
            INTERFACE_CONTROL,
            1,
        ));
        assert_eq!(
            last_response(&session).payload(),
            &[RequestErrorCode::InvalidControl as u8]
        );
    }

    #[test]
    fn test_every_setup_gets_a_response() {
        let mut session = session();
        session.handle_event(brightness(RequestCode::GetInfo));
        session.handle_event(streaming(RequestCode::GetLen, PROBE));
        session.handle_event(setup(RequestCode::GetCur, 0x10, 7, INTERFACE_CONTROL, 4));
        assert_eq!(session.device().responses().len(), 3);
        assert!(last_response(&session).is_stall());
    }

    #[test]
    fn test_send_failure_is_not_fatal() {
        let mut session = session();
        session.device_mut().fail_send_response = true;
        session.handle_event(brightness(RequestCode::GetCur));
        assert!(session.device().responses().is_empty());
        assert!(!session.shutdown_requested());
    }
}

mod streaming {
    use super::*;

    #[test]
    fn test_stream_on_queues_every_buffer() {
        let mut session = session();
        session.handle_event(UvcEvent::StreamOn);

        assert!(session.is_streaming());
        assert_eq!(
            session.device().calls(),
            &[
                DeviceCall::RequestBuffers(3, MemoryMode::Mmap),
                DeviceCall::MapBuffer(0),
                DeviceCall::MapBuffer(1),
                DeviceCall::MapBuffer(2),
                DeviceCall::Queue(0),
                DeviceCall::Queue(1),
                DeviceCall::Queue(2),
                DeviceCall::StreamOn,
            ]
        );
        assert_eq!(session.pipeline().in_flight(), 3);
        assert_eq!(session.device().queued_requests()[0].bytes_used, 64);
    }

    #[test]
    fn test_stream_on_with_one_buffer_allocates_nothing() {
        let mut session = session_with(brightness_controls(), MemoryMode::Mmap, 1);

        let err = session.stream_on().unwrap_err();
        assert!(matches!(err, Error::InsufficientBuffers { requested: 1, .. }));
        assert!(!session.is_streaming());
        assert!(session.device().calls().is_empty());
        assert!(session.pipeline().is_empty());
    }

    #[test]
    fn test_failed_stream_on_releases_buffers() {
        let mut session = session();
        session.device_mut().fail_stream_on = true;

        assert!(session.stream_on().is_err());
        assert!(!session.is_streaming());
        assert!(session.pipeline().is_empty());
        assert_eq!(
            session.device().calls().last(),
            Some(&DeviceCall::RequestBuffers(0, MemoryMode::Mmap))
        );
    }

    #[test]
    fn test_userptr_buffers_are_not_refilled() {
        let mut session = session_with(brightness_controls(), MemoryMode::UserPtr, 2);
        session.stream_on().unwrap();
        assert!(!session.device().calls().iter().any(|call| matches!(call, DeviceCall::MapBuffer(_))));

        assert!(session.deliver_frame().unwrap());
        let request = session.device().queued_requests().last().copied().unwrap();
        assert_eq!(request.memory, MemoryMode::UserPtr);
        assert_eq!(request.length, 64);
        assert_ne!(request.user_ptr, 0);
    }

    #[test]
    fn test_deliver_frame_recycles_in_order() {
        let mut session = session();
        assert!(!session.deliver_frame().unwrap());

        session.stream_on().unwrap();
        session.device_mut().clear_calls();

        for expected in [0, 1, 2, 0] {
            assert!(session.deliver_frame().unwrap());
            assert_eq!(
                session.device().calls().last(),
                Some(&DeviceCall::Queue(expected))
            );
        }
        assert_eq!(session.frames_delivered(), 4);
        assert_eq!(session.pipeline().in_flight(), 3);
    }

    #[test]
    fn test_stream_off_is_idempotent() {
        let mut session = session();
        session.handle_event(UvcEvent::StreamOn);
        session.handle_event(UvcEvent::StreamOff);
        session.handle_event(UvcEvent::StreamOff);

        let stream_offs = session
            .device()
            .calls()
            .iter()
            .filter(|call| **call == DeviceCall::StreamOff)
            .count();
        assert_eq!(stream_offs, 1);
        assert!(!session.is_streaming());
        assert!(session.pipeline().is_empty());
    }

    #[test]
    fn test_restart_after_stream_off() {
        let mut session = session();
        session.handle_event(UvcEvent::StreamOn);
        session.handle_event(UvcEvent::StreamOff);
        session.handle_event(UvcEvent::StreamOn);
        assert!(session.is_streaming());
        assert_eq!(session.pipeline().len(), 3);
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn test_disconnect_requests_shutdown() {
        let mut session = session();
        session.handle_event(UvcEvent::Connect { speed: 3 });
        assert!(!session.shutdown_requested());
        session.handle_event(UvcEvent::Disconnect);
        assert!(session.shutdown_requested());
    }

    #[test]
    fn test_process_event_drains_queue() {
        let mut session = session();
        session.device_mut().push_event(brightness(RequestCode::GetDef));

        assert!(session.process_event().unwrap());
        assert_eq!(last_response(&session).payload(), &50i32.to_le_bytes());
        assert!(!session.process_event().unwrap());
    }

    #[test]
    fn test_start_and_shutdown() {
        let mut session = session();
        session.start().unwrap();
        session.handle_event(UvcEvent::StreamOn);
        session.shutdown();

        let calls = session.device().calls();
        assert_eq!(calls.first(), Some(&DeviceCall::Subscribe));
        assert!(calls.contains(&DeviceCall::Unsubscribe));
        assert!(calls.contains(&DeviceCall::StreamOff));
        assert!(!session.is_streaming());
    }
}

mod properties {
    use super::*;

    proptest! {
        #[test]
        fn set_negotiation_stays_in_bounds(format in any::<u8>(), frame in any::<u8>()) {
            let mut session = session();
            set_streaming(&mut session, PROBE, format, frame);
            let probe = *session.requests().probe();

            prop_assert_eq!(probe.format_index, 1);
            prop_assert!((1..=2).contains(&probe.frame_index));
        }

        #[test]
        fn buffer_counters_stay_bounded(ops in proptest::collection::vec(any::<bool>(), 0..64)) {
            let mut device = MockDevice::new();
            let mut pipeline = BufferPipeline::new(MemoryMode::Mmap);
            pipeline.allocate(&mut device, 4, &[1; 16]).unwrap();

            for queue in ops {
                if queue {
                    let free = (0..4).find(|&i| pipeline.is_queued(i) == Some(false));
                    if let Some(index) = free {
                        pipeline.fill(index, &[1; 16]).unwrap();
                        pipeline.queue(&mut device, index).unwrap();
                    }
                } else {
                    pipeline.dequeue(&mut device).unwrap();
                }
                prop_assert!(pipeline.queue_count() >= pipeline.dequeue_count());
                prop_assert!(pipeline.in_flight() <= 4);
            }
        }

        #[test]
        fn frame_deliveries_respect_interval(
            framerate in 1u32..=30,
            steps in proptest::collection::vec(0u64..50, 1..200),
        ) {
            let mut clock = FrameClock::new(framerate);
            let minimum = Duration::from_millis(1000 / u64::from(framerate));
            let mut now = Instant::now();
            let mut last: Option<Instant> = None;

            for step in steps {
                now += Duration::from_millis(step);
                if clock.due(now) {
                    if let Some(previous) = last {
                        prop_assert!(now.duration_since(previous) >= minimum);
                    }
                    clock.mark(now);
                    last = Some(now);
                }
            }
        }
    }
}
