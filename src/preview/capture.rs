use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::camera::api::{FrameHandler, SensorApi};
use crate::camera::error::{CameraError, Result};
use crate::camera::pool::BufferPool;
use crate::preview::publish::{FrameDescriptor, FramePublisher};

/// Per-frame callback of an active capture.
///
/// The driver calls [`CaptureLoop::on_frame`] on its own thread once per
/// completed frame. Each call resolves the most recently filled buffer, locks
/// it, publishes a copy of its pixels and unlocks it again. Anything that
/// goes wrong along the way drops the frame; nothing is retried or queued.
pub struct CaptureLoop<S: SensorApi> {
    pool: Arc<BufferPool<S>>,
    publisher: Arc<FramePublisher>,
    /// Whether callbacks may run. Callbacks hold the read side for their
    /// whole duration, so taking the write side waits for them to finish.
    dispatch: RwLock<bool>,
}

impl<S: SensorApi + 'static> CaptureLoop<S> {
    pub fn new(pool: Arc<BufferPool<S>>, publisher: Arc<FramePublisher>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            publisher,
            dispatch: RwLock::new(false),
        })
    }

    /// Build the handler to install on the driver.
    ///
    /// The handler holds a weak reference, so a driver that keeps it past
    /// teardown does not keep the pool alive.
    pub fn handler(self: &Arc<Self>) -> FrameHandler {
        let weak = Arc::downgrade(self);
        Arc::new(move || {
            if let Some(capture) = weak.upgrade() {
                capture.on_frame();
            }
        })
    }

    /// Allow callbacks to process frames.
    pub fn arm(&self) {
        *self.dispatch.write() = true;
    }

    /// Stop processing frames.
    ///
    /// Waits for a callback already in flight to finish, then discards any
    /// frame the renderer has not picked up. Once this returns no further
    /// frame reaches the renderer.
    pub fn disarm(&self) {
        *self.dispatch.write() = false;
        self.publisher.discard_pending();
    }

    pub fn is_armed(&self) -> bool {
        *self.dispatch.read()
    }

    /// Process one completion event.
    pub fn on_frame(&self) {
        let armed = self.dispatch.read();
        if !*armed {
            return;
        }

        if let Err(e) = self.capture_latest() {
            debug!("frame dropped: {e}");
            self.publisher.record_drop();
        }
    }

    fn capture_latest(&self) -> Result<()> {
        // The event does not say which buffer completed; the device may
        // already have moved on, so always ask for the latest one.
        let id = self.pool.sdk().last_filled(self.pool.sensor())?;
        let guard = self.pool.lock_guard(id)?;

        let info = guard.info()?;
        let format = self.pool.geometry().pixel_format;
        if info.stride < format.stride(info.width) {
            return Err(CameraError::InvalidState(format!(
                "buffer {id} rows are {} bytes, narrower than {} pixels",
                info.stride, info.width
            )));
        }
        let mut published = Ok(());
        guard.read(&mut |pixels: &[u8]| {
            let descriptor = FrameDescriptor {
                buffer: id,
                pixels,
                width: info.width,
                height: info.height,
                stride: info.stride,
                bits_per_pixel: format.bits_per_pixel(),
            };
            published = self.publisher.publish(&descriptor);
        })?;
        published
    }
}
