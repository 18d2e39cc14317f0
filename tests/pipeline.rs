use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use graycam_lib::{
    frame_channel, CameraError, CameraSession, Frame, FrameReceiver, MockSensor, RenderLoop,
    SensorHandle, SessionState,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn open_session(
    width: u32,
    height: u32,
) -> (Arc<MockSensor>, CameraSession<MockSensor>, FrameReceiver) {
    let mock = Arc::new(MockSensor::new().with_sensor(width, height));
    let (publisher, receiver) = frame_channel();
    let session = CameraSession::new(Arc::clone(&mock), publisher);
    (mock, session, receiver)
}

/// Renderer forwarding each frame to a channel.
fn forwarding_renderer() -> (impl FnMut(&Frame) + Send + 'static, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel();
    let renderer = move |frame: &Frame| {
        let _ = tx.send(frame.clone());
    };
    (renderer, rx)
}

#[test]
fn single_event_reaches_renderer_with_sensor_geometry() {
    let (mock, mut session, receiver) = open_session(640, 480);
    session.initialize(0).unwrap();

    let geometry = session.geometry().unwrap();
    assert_eq!(geometry.frame_len(), 307_200);

    session.allocate_and_register_buffers().unwrap();
    assert_eq!(session.buffer_ids().len(), 3);
    assert_eq!(mock.live_buffers(), 3);

    let (renderer, frames) = forwarding_renderer();
    let mut render = RenderLoop::spawn(receiver, renderer).unwrap();
    session.start_capture().unwrap();
    assert_eq!(session.state(), SessionState::Capturing);

    mock.fire_frame(SensorHandle(0)).unwrap();

    let frame = frames.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!((frame.width, frame.height), (640, 480));
    assert_eq!(frame.stride, 640);
    assert_eq!(frame.bits_per_pixel, 8);
    assert_eq!(frame.data.len(), 307_200);
    assert!(frames.recv_timeout(Duration::from_millis(100)).is_err());

    session.close();
    render.stop();
    assert_eq!(mock.live_buffers(), 0);
}

#[test]
fn overtaken_frame_is_dropped_and_latest_is_rendered() {
    let (mock, mut session, receiver) = open_session(32, 16);
    session.initialize(0).unwrap();
    session.allocate_and_register_buffers().unwrap();
    session.start_capture().unwrap();

    // Nothing consumes frames yet, so the second event overtakes the first.
    let first = mock.fire_frame(SensorHandle(0)).unwrap();
    let second = mock.fire_frame(SensorHandle(0)).unwrap();
    assert_ne!(first, second);

    let (renderer, frames) = forwarding_renderer();
    let mut render = RenderLoop::spawn(receiver, renderer).unwrap();

    let frame = frames.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(frame.buffer, second);
    assert!(frame.data.iter().all(|&p| p == 2));
    assert!(frames.recv_timeout(Duration::from_millis(100)).is_err());
    render.stop();

    let diagnostics = session.diagnostics();
    assert_eq!(diagnostics.drop_count, 1);
    assert_eq!(diagnostics.overtaken, 1);
    assert_eq!(diagnostics.frame_count, 1);
    session.stop_capture().unwrap();
}

#[test]
fn close_after_failed_initialize_is_noop() {
    let (mock, mut session, _receiver) = open_session(640, 480);
    let err = session.initialize(3).unwrap_err();
    assert!(matches!(err, CameraError::DeviceOpen(_)));

    session.close();
    assert!(!session.is_open());
    assert!(!mock.is_claimed(0));
}

#[test]
fn close_without_initialize_is_noop() {
    let (_mock, mut session, _receiver) = open_session(640, 480);
    session.close();
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[test]
fn no_frame_is_rendered_after_stop_returns() {
    let (mock, mut session, receiver) = open_session(64, 48);
    session.initialize(0).unwrap();
    session.allocate_and_register_buffers().unwrap();

    let rendered = Arc::new(AtomicU64::new(0));
    let mut render = {
        let rendered = Arc::clone(&rendered);
        RenderLoop::spawn(receiver, move |_: &Frame| {
            thread::sleep(Duration::from_millis(1));
            rendered.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
    };
    session.start_capture().unwrap();

    let running = Arc::new(AtomicBool::new(true));
    let driver = {
        let mock = Arc::clone(&mock);
        let running = Arc::clone(&running);
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                mock.fire_frame(SensorHandle(0));
            }
        })
    };

    thread::sleep(Duration::from_millis(50));
    session.stop_capture().unwrap();
    let at_stop = rendered.load(Ordering::SeqCst);

    thread::sleep(Duration::from_millis(50));
    running.store(false, Ordering::SeqCst);
    driver.join().unwrap();

    assert_eq!(rendered.load(Ordering::SeqCst), at_stop);
    assert!(mock.fire_frame(SensorHandle(0)).is_none());
    assert!(at_stop > 0);

    render.stop();
    session.close();
    assert_eq!(mock.live_buffers(), 0);
}

#[test]
fn session_restarts_after_stop() {
    let (mock, mut session, receiver) = open_session(16, 16);
    session.initialize(0).unwrap();
    session.allocate_and_register_buffers().unwrap();
    let (renderer, frames) = forwarding_renderer();
    let mut render = RenderLoop::spawn(receiver, renderer).unwrap();

    session.start_capture().unwrap();
    mock.fire_frame(SensorHandle(0)).unwrap();
    frames.recv_timeout(RECV_TIMEOUT).unwrap();
    session.stop_capture().unwrap();

    session.start_capture().unwrap();
    mock.fire_frame(SensorHandle(0)).unwrap();
    let frame = frames.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(frame.sequence, 2);

    render.stop();
}

#[test]
fn second_session_cannot_claim_open_device() {
    let mock = Arc::new(MockSensor::new().with_sensor(16, 16));
    let (first_pub, _first_rx) = frame_channel();
    let (second_pub, _second_rx) = frame_channel();
    let mut first = CameraSession::new(Arc::clone(&mock), first_pub);
    let mut second = CameraSession::new(Arc::clone(&mock), second_pub);

    first.initialize(0).unwrap();
    let err = second.initialize(0).unwrap_err();
    assert_eq!(err.kind(), graycam_lib::ErrorKind::DeviceOpen);

    drop(first);
    second.initialize(0).unwrap();
}
