pub mod camera;
pub mod diagnostics;
pub mod preview;
pub mod settings;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub use camera::api::{FrameHandler, SensorApi};
pub use camera::error::{CameraError, ErrorKind, Result};
pub use camera::mock::MockSensor;
pub use camera::session::CameraSession;
pub use camera::types::{BufferId, PixelFormat, SensorGeometry, SensorHandle, SessionState};
pub use diagnostics::stats::DiagnosticSnapshot;
pub use preview::publish::{
    frame_channel, Frame, FramePublisher, FrameReceiver, RenderLoop, Renderer,
};
pub use settings::store::SettingsStore;
pub use settings::types::PipelineSettings;

/// Geometry of the simulated sensor used when no hardware backend is built.
#[cfg(not(feature = "ueye"))]
const DEMO_SENSOR: (u32, u32) = (640, 480);

/// Renderer that logs a one-line summary of every frame.
#[derive(Default)]
struct FrameLogger;

impl Renderer for FrameLogger {
    fn render(&mut self, frame: &Frame) {
        let sum: u64 = frame.data.iter().map(|&p| u64::from(p)).sum();
        let mean = if frame.data.is_empty() {
            0.0
        } else {
            sum as f64 / frame.data.len() as f64
        };
        info!(
            "frame {} from buffer {}: {}x{} mean {mean:.1}",
            frame.sequence, frame.buffer, frame.width, frame.height
        );
    }
}

/// Open a session on `sdk`, acquire frames while `drive` runs, then tear down.
fn acquire<S: SensorApi + 'static>(
    sdk: Arc<S>,
    settings: &PipelineSettings,
    drive: impl FnOnce(SensorHandle),
) -> Result<DiagnosticSnapshot> {
    let (publisher, receiver) = frame_channel();
    let mut session = CameraSession::new(sdk, publisher);

    session.initialize(settings.device_id)?;
    session.allocate_and_register_buffers()?;
    let mut render = RenderLoop::spawn(receiver, FrameLogger)?;
    session.start_capture()?;

    if let Some(sensor) = session.sensor() {
        drive(sensor);
    }

    session.stop_capture()?;
    render.stop();
    let snapshot = session.diagnostics();
    session.close();
    Ok(snapshot)
}

#[cfg(not(feature = "ueye"))]
fn run_pipeline(settings: &PipelineSettings) -> Result<DiagnosticSnapshot> {
    let (width, height) = DEMO_SENSOR;
    let sdk = Arc::new(MockSensor::new().with_sensor(width, height));
    let driver = Arc::clone(&sdk);
    let interval = Duration::from_millis(settings.render_interval_ms);
    let frames = settings.frames;

    acquire(sdk, settings, move |sensor| {
        for _ in 0..frames {
            driver.fire_frame(sensor);
            std::thread::sleep(interval);
        }
    })
}

#[cfg(feature = "ueye")]
fn run_pipeline(settings: &PipelineSettings) -> Result<DiagnosticSnapshot> {
    let sdk = Arc::new(camera::ueye::UeyeSdk::new());
    let runtime =
        Duration::from_millis(settings.render_interval_ms.saturating_mul(settings.frames));
    acquire(sdk, settings, move |_| std::thread::sleep(runtime))
}

/// Load settings, initialise logging, and run the acquisition pipeline.
pub fn run() -> Result<()> {
    let store = SettingsStore::from_env()?;
    let settings = store.settings().clone();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.log_level.as_str()),
    )
    .init();
    info!(
        "settings from {}: device {}, {} frames",
        store.path().display(),
        settings.device_id,
        settings.frames
    );

    let snapshot = run_pipeline(&settings)?;
    match serde_json::to_string(&snapshot) {
        Ok(json) => info!("diagnostics: {json}"),
        Err(e) => tracing::warn!("failed to serialise diagnostics: {e}"),
    }
    Ok(())
}

#[cfg(all(test, not(feature = "ueye")))]
mod tests {
    use super::*;

    #[test]
    fn demo_pipeline_renders_and_releases() {
        let settings = PipelineSettings {
            frames: 5,
            render_interval_ms: 20,
            ..PipelineSettings::default()
        };
        let snapshot = run_pipeline(&settings).unwrap();
        assert!(snapshot.frame_count >= 1);
        assert_eq!(snapshot.frame_count + snapshot.drop_count, 5);
    }

    #[test]
    fn demo_pipeline_reports_missing_device() {
        let sdk = Arc::new(MockSensor::new().with_sensor(8, 8));
        let settings = PipelineSettings {
            device_id: 9,
            ..PipelineSettings::default()
        };
        let err = acquire(sdk, &settings, |_| {}).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceOpen);
    }

    #[test]
    fn frame_logger_handles_empty_frames() {
        let frame = Frame {
            data: Vec::new(),
            width: 0,
            height: 0,
            stride: 0,
            bits_per_pixel: 8,
            buffer: BufferId(1),
            sequence: 1,
        };
        FrameLogger.render(&frame);
    }
}
