//! `CameraSession<S>`: lifecycle of one opened sensor.
//!
//! Generic over `S: SensorApi` so tests use `MockSensor` while production
//! uses the uEye SDK wrapper. The session walks
//! `Uninitialized -> Configured -> Capturing -> Stopped -> Closed` and always
//! releases the hardware claim on `close`, which `Drop` also calls.

use std::sync::Arc;

use tracing::{info, warn};

use crate::camera::api::SensorApi;
use crate::camera::error::{CameraError, Result};
use crate::camera::pool::BufferPool;
use crate::camera::types::{
    BufferId, PixelFormat, SensorGeometry, SensorHandle, SessionState, BUFFER_COUNT,
};
use crate::diagnostics::stats::DiagnosticSnapshot;
use crate::preview::capture::CaptureLoop;
use crate::preview::publish::FramePublisher;

/// One sensor, its buffer pool, and its capture callback.
pub struct CameraSession<S: SensorApi + 'static> {
    sdk: Arc<S>,
    publisher: Arc<FramePublisher>,
    state: SessionState,
    sensor: Option<SensorHandle>,
    geometry: Option<SensorGeometry>,
    pool: Option<Arc<BufferPool<S>>>,
    capture: Option<Arc<CaptureLoop<S>>>,
}

impl<S: SensorApi + 'static> CameraSession<S> {
    /// Create an uninitialised session that publishes frames to `publisher`.
    pub fn new(sdk: Arc<S>, publisher: FramePublisher) -> Self {
        Self {
            sdk,
            publisher: Arc::new(publisher),
            state: SessionState::Uninitialized,
            sensor: None,
            geometry: None,
            pool: None,
            capture: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session currently holds the device.
    pub fn is_open(&self) -> bool {
        self.sensor.is_some()
    }

    /// Geometry read back from the device during `initialize`.
    pub fn geometry(&self) -> Option<SensorGeometry> {
        self.geometry
    }

    /// Ids of the registered capture ring, empty before registration.
    pub fn buffer_ids(&self) -> Vec<BufferId> {
        self.pool.as_ref().map(|p| p.ids()).unwrap_or_default()
    }

    pub fn sensor(&self) -> Option<SensorHandle> {
        self.sensor
    }

    pub fn diagnostics(&self) -> DiagnosticSnapshot {
        self.publisher.diagnostics()
    }

    /// Open the device, fix the pixel format, and read its geometry back.
    ///
    /// # Errors
    ///
    /// Returns `CameraError::DeviceOpen` if the device is missing, claimed,
    /// or cannot be configured for 8-bit grayscale, and
    /// `CameraError::NotReady` if the session was already initialised or
    /// closed. After a failure the session must still be closed.
    pub fn initialize(&mut self, device_id: u32) -> Result<()> {
        if self.state != SessionState::Uninitialized || self.sensor.is_some() {
            return Err(CameraError::NotReady(format!(
                "cannot initialize a {} session",
                self.state
            )));
        }

        let sensor = self.sdk.open(device_id)?;
        self.sensor = Some(sensor);

        let geometry = self.configure(sensor).map_err(|e| match e {
            CameraError::DeviceOpen(_) => e,
            other => CameraError::DeviceOpen(format!("device {device_id}: {other}")),
        })?;
        self.geometry = Some(geometry);
        self.state = SessionState::Configured;
        info!(
            "sensor {device_id} configured: {}x{} {:?}",
            geometry.width, geometry.height, geometry.pixel_format
        );
        Ok(())
    }

    fn configure(&self, sensor: SensorHandle) -> Result<SensorGeometry> {
        self.sdk.set_pixel_format(sensor, PixelFormat::Mono8)?;
        let pixel_format = self.sdk.pixel_format(sensor)?;
        if pixel_format != PixelFormat::Mono8 {
            return Err(CameraError::DeviceOpen(format!(
                "sensor reports {pixel_format:?} after selecting Mono8"
            )));
        }

        let aoi = self.sdk.query_aoi(sensor)?;
        if aoi.width == 0 || aoi.height == 0 {
            return Err(CameraError::DeviceOpen(format!(
                "sensor reports an empty area of interest ({}x{})",
                aoi.width, aoi.height
            )));
        }
        Ok(SensorGeometry {
            width: aoi.width,
            height: aoi.height,
            pixel_format,
        })
    }

    /// Allocate the buffer pool and register it as the capture ring.
    ///
    /// # Errors
    ///
    /// Returns `CameraError::NotReady` before `initialize`,
    /// `CameraError::Registration` on a second call, and the pool's
    /// allocation or registration error otherwise.
    pub fn allocate_and_register_buffers(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Err(CameraError::Registration(
                "buffers already registered for this session".to_string(),
            ));
        }
        let (Some(sensor), Some(geometry), SessionState::Configured) =
            (self.sensor, self.geometry, self.state)
        else {
            return Err(CameraError::NotReady(format!(
                "cannot allocate buffers for a {} session",
                self.state
            )));
        };

        let pool = BufferPool::allocate(Arc::clone(&self.sdk), sensor, geometry, BUFFER_COUNT)?;
        pool.register()?;
        info!(
            "registered {} buffers of {} bytes: {:?}",
            pool.len(),
            geometry.frame_len(),
            pool.ids()
        );

        let pool = Arc::new(pool);
        self.capture = Some(CaptureLoop::new(
            Arc::clone(&pool),
            Arc::clone(&self.publisher),
        ));
        self.pool = Some(pool);
        Ok(())
    }

    /// Install the frame callback and start acquisition.
    ///
    /// # Errors
    ///
    /// Returns `CameraError::NotReady` if the buffers are not registered or
    /// the session is not open, and `CameraError::CaptureStart` if the
    /// device refuses to start.
    pub fn start_capture(&mut self) -> Result<()> {
        if !matches!(self.state, SessionState::Configured | SessionState::Stopped) {
            return Err(CameraError::NotReady(format!(
                "cannot start capture on a {} session",
                self.state
            )));
        }
        let (Some(sensor), Some(capture)) = (self.sensor, self.capture.as_ref()) else {
            return Err(CameraError::NotReady(
                "buffers are not registered".to_string(),
            ));
        };

        capture.arm();
        let started = self
            .sdk
            .set_frame_handler(sensor, Some(capture.handler()))
            .and_then(|()| self.sdk.start_capture(sensor));
        if let Err(e) = started {
            capture.disarm();
            if let Err(e) = self.sdk.set_frame_handler(sensor, None) {
                warn!("failed to remove frame handler: {e}");
            }
            return Err(match e {
                CameraError::CaptureStart(_) => e,
                other => CameraError::CaptureStart(other.to_string()),
            });
        }

        self.state = SessionState::Capturing;
        info!("capture started");
        Ok(())
    }

    /// Stop acquisition and remove the frame callback.
    ///
    /// Idempotent. Waits for a callback already in flight; no frame reaches
    /// the renderer after this returns.
    pub fn stop_capture(&mut self) -> Result<()> {
        if self.state != SessionState::Capturing {
            return Ok(());
        }
        if let Some(sensor) = self.sensor {
            if let Err(e) = self.sdk.stop_capture(sensor) {
                warn!("failed to stop acquisition: {e}");
            }
            if let Err(e) = self.sdk.set_frame_handler(sensor, None) {
                warn!("failed to remove frame handler: {e}");
            }
        }
        if let Some(capture) = &self.capture {
            capture.disarm();
        }

        self.state = SessionState::Stopped;
        info!("capture stopped");
        Ok(())
    }

    /// Release buffers and the device claim.
    ///
    /// Safe to call in any state; a session that never opened a device is
    /// left untouched.
    pub fn close(&mut self) {
        let Some(sensor) = self.sensor else {
            return;
        };

        if let Err(e) = self.stop_capture() {
            warn!("failed to stop capture during close: {e}");
        }
        self.capture = None;
        if let Some(pool) = self.pool.take() {
            pool.release_all();
        }
        if let Err(e) = self.sdk.close(sensor) {
            warn!("failed to release sensor {}: {e}", sensor.0);
        }

        self.sensor = None;
        self.state = SessionState::Closed;
        info!("session closed");
    }
}

impl<S: SensorApi + 'static> Drop for CameraSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}
