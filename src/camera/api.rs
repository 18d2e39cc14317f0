//! `SensorApi` trait: abstracts the sensor SDK for testability.
//!
//! The real `UeyeSdk` and the `MockSensor` both implement this trait,
//! allowing `CameraSession<S>` to be generic over the SDK implementation.

use std::sync::Arc;

use crate::camera::error::Result;

use super::types::{Aoi, BufferId, ImageInfo, PixelFormat, SensorHandle};

/// Per-frame completion callback.
///
/// Invoked on a driver-owned thread, once per completed frame. Carries no
/// payload: the receiver must query the driver for the filled buffer.
pub type FrameHandler = Arc<dyn Fn() + Send + Sync>;

/// Abstraction over sensor SDK operations.
///
/// All methods take `&self`; the implementation manages interior
/// mutability (e.g. via `Mutex` for the mock's state).
pub trait SensorApi: Send + Sync {
    /// Claim the device with the given id.
    ///
    /// Fails with `CameraError::DeviceOpen` when the id is unknown or the
    /// device is already claimed.
    fn open(&self, device_id: u32) -> Result<SensorHandle>;

    /// Release the device claim. Frees nothing else.
    fn close(&self, sensor: SensorHandle) -> Result<()>;

    /// Select the pixel format.
    fn set_pixel_format(&self, sensor: SensorHandle, format: PixelFormat) -> Result<()>;

    /// Read the active pixel format back from the device.
    fn pixel_format(&self, sensor: SensorHandle) -> Result<PixelFormat>;

    /// Read the active area of interest from the device.
    fn query_aoi(&self, sensor: SensorHandle) -> Result<Aoi>;

    /// Allocate one device-writable image buffer.
    fn alloc_buffer(
        &self,
        sensor: SensorHandle,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
    ) -> Result<BufferId>;

    /// Free an image buffer previously returned by `alloc_buffer`.
    fn free_buffer(&self, sensor: SensorHandle, buffer: BufferId) -> Result<()>;

    /// Register the capture ring, in order.
    fn set_sequence(&self, sensor: SensorHandle, buffers: &[BufferId]) -> Result<()>;

    /// Remove every buffer from the capture ring.
    fn clear_sequence(&self, sensor: SensorHandle) -> Result<()>;

    /// The most recently completed buffer.
    fn last_filled(&self, sensor: SensorHandle) -> Result<BufferId>;

    /// Take a buffer out of the device's write rotation.
    ///
    /// Fails when the device has already reclaimed the buffer.
    fn lock_buffer(&self, sensor: SensorHandle, buffer: BufferId) -> Result<()>;

    /// Return a buffer to the device's write rotation.
    fn unlock_buffer(&self, sensor: SensorHandle, buffer: BufferId) -> Result<()>;

    /// Borrow a buffer's pixel memory for the duration of `read`.
    fn read_buffer(
        &self,
        sensor: SensorHandle,
        buffer: BufferId,
        read: &mut dyn FnMut(&[u8]),
    ) -> Result<()>;

    /// Capture geometry recorded for a buffer.
    fn image_info(&self, sensor: SensorHandle, buffer: BufferId) -> Result<ImageInfo>;

    /// Install or remove the per-frame completion callback.
    fn set_frame_handler(&self, sensor: SensorHandle, handler: Option<FrameHandler>)
        -> Result<()>;

    /// Begin free-running acquisition.
    fn start_capture(&self, sensor: SensorHandle) -> Result<()>;

    /// End acquisition.
    fn stop_capture(&self, sensor: SensorHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_handle_equality() {
        let a = SensorHandle(0);
        let b = SensorHandle(0);
        let c = SensorHandle(1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    /// Verify the trait is object-safe (can be used as `dyn SensorApi`).
    #[test]
    fn trait_is_object_safe() {
        fn _accepts_dyn(_sdk: &dyn SensorApi) {}
    }

    #[test]
    fn trait_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Box<dyn SensorApi>>();
        assert_send_sync::<FrameHandler>();
    }
}
