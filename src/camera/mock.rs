//! Mock sensor SDK for testing without a physical camera.
//!
//! Uses a builder pattern to configure sensors, their area of interest, and
//! error injection. `fire_frame` plays the part of the driver's event thread.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::camera::error::{CameraError, Result};

use super::api::{FrameHandler, SensorApi};
use super::types::{Aoi, BufferId, ImageInfo, PixelFormat, SensorHandle};

/// A simulated sensor in the mock.
struct MockDevice {
    aoi: Aoi,
    claimed: bool,
    format: Option<PixelFormat>,
    handler: Option<FrameHandler>,
    capturing: bool,
    sequence: Vec<BufferId>,
    write_cursor: usize,
    last_filled: Option<BufferId>,
    locked: HashSet<BufferId>,
}

/// Device memory backing one allocated buffer.
struct MockBuffer {
    sensor: SensorHandle,
    width: u32,
    height: u32,
    /// Bytes of pixel data per row.
    packed: usize,
    /// Bytes per row including padding.
    pitch: usize,
    data: Vec<u8>,
}

/// Configurable error injection for a specific operation.
///
/// The injection lets `skip` matching calls succeed, then fails the next one
/// and is consumed.
#[derive(Debug, Clone)]
struct ErrorInjection {
    operation: &'static str,
    skip: usize,
    error: CameraError,
}

/// Mock sensor SDK implementation.
///
/// All state is behind a `Mutex` so the mock satisfies `Send + Sync`.
pub struct MockSensor {
    state: Mutex<MockState>,
}

struct MockState {
    devices: Vec<MockDevice>,
    buffers: HashMap<BufferId, MockBuffer>,
    next_buffer_id: i32,
    error_injections: Vec<ErrorInjection>,
    frames_fired: u64,
    row_padding: u32,
}

impl Default for MockSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSensor {
    /// Create a new empty mock (no sensors).
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                devices: Vec::new(),
                buffers: HashMap::new(),
                next_buffer_id: 1,
                error_injections: Vec::new(),
                frames_fired: 0,
                row_padding: 0,
            }),
        }
    }

    /// Add a sensor reporting the given area of interest. Device ids are
    /// assigned in insertion order starting at 0.
    pub fn with_sensor(self, width: u32, height: u32) -> Self {
        self.state.lock().devices.push(MockDevice {
            aoi: Aoi {
                x: 0,
                y: 0,
                width,
                height,
            },
            claimed: false,
            format: None,
            handler: None,
            capturing: false,
            sequence: Vec::new(),
            write_cursor: 0,
            last_filled: None,
            locked: HashSet::new(),
        });
        self
    }

    /// Pad every row of subsequently allocated buffers by `bytes`, the way
    /// drivers align image memory. Padding bytes stay zero.
    pub fn with_row_padding(self, bytes: u32) -> Self {
        self.state.lock().row_padding = bytes;
        self
    }

    /// Inject an error for the next call of `operation`.
    ///
    /// Operation names match the `SensorApi` method names, e.g. `"open"`,
    /// `"alloc_buffer"`, `"set_sequence"`, `"lock_buffer"`, `"start_capture"`.
    pub fn with_error(self, operation: &'static str, error: CameraError) -> Self {
        self.with_error_after(operation, 0, error)
    }

    /// Inject an error for `operation` that fires after `skip` successful
    /// calls, e.g. `skip = 1` fails the second buffer allocation.
    pub fn with_error_after(
        self,
        operation: &'static str,
        skip: usize,
        error: CameraError,
    ) -> Self {
        self.inject_error(operation, skip, error);
        self
    }

    /// Inject an error into a mock that is already shared.
    pub fn inject_error(&self, operation: &'static str, skip: usize, error: CameraError) {
        self.state.lock().error_injections.push(ErrorInjection {
            operation,
            skip,
            error,
        });
    }

    /// Number of buffers currently allocated across all sensors.
    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Whether the device with the given id is currently claimed.
    pub fn is_claimed(&self, device_id: u32) -> bool {
        self.state
            .lock()
            .devices
            .get(device_id as usize)
            .is_some_and(|d| d.claimed)
    }

    /// Whether a frame handler is installed on the sensor.
    pub fn has_frame_handler(&self, sensor: SensorHandle) -> bool {
        self.state
            .lock()
            .devices
            .get(sensor.0 as usize)
            .is_some_and(|d| d.handler.is_some())
    }

    /// Whether the sensor is acquiring.
    pub fn is_capturing(&self, sensor: SensorHandle) -> bool {
        self.state
            .lock()
            .devices
            .get(sensor.0 as usize)
            .is_some_and(|d| d.capturing)
    }

    /// The registered capture ring of a sensor.
    pub fn sequence(&self, sensor: SensorHandle) -> Vec<BufferId> {
        self.state
            .lock()
            .devices
            .get(sensor.0 as usize)
            .map(|d| d.sequence.clone())
            .unwrap_or_default()
    }

    /// Total number of frames written by `fire_frame`.
    pub fn frames_fired(&self) -> u64 {
        self.state.lock().frames_fired
    }

    /// Simulate the device completing a frame.
    ///
    /// Writes the next unlocked buffer of the capture ring, filling every
    /// pixel with the low byte of the frame number (1 for the first frame),
    /// then invokes the frame handler on the calling thread. Returns the
    /// written buffer, or `None` if the sensor is not acquiring or every
    /// buffer is locked.
    pub fn fire_frame(&self, sensor: SensorHandle) -> Option<BufferId> {
        let (written, handler) = {
            let mut state = self.state.lock();
            let value = (state.frames_fired + 1) as u8;
            let device = state.devices.get_mut(sensor.0 as usize)?;
            if !device.capturing || device.sequence.is_empty() {
                return None;
            }

            let len = device.sequence.len();
            let slot = (0..len)
                .map(|offset| (device.write_cursor + offset) % len)
                .find(|&i| !device.locked.contains(&device.sequence[i]))?;
            let written = device.sequence[slot];
            device.write_cursor = (slot + 1) % len;
            device.last_filled = Some(written);
            let handler = device.handler.clone();

            if let Some(buffer) = state.buffers.get_mut(&written) {
                let (packed, pitch) = (buffer.packed, buffer.pitch.max(1));
                for row in buffer.data.chunks_mut(pitch) {
                    row[..packed].fill(value);
                }
            }
            state.frames_fired += 1;
            (written, handler)
        };

        if let Some(handler) = handler {
            handler();
        }
        Some(written)
    }
}

impl MockState {
    /// Check for injected errors for the given operation.
    fn check_error(&mut self, operation: &str) -> Result<()> {
        if let Some(pos) = self
            .error_injections
            .iter()
            .position(|e| e.operation == operation)
        {
            let injection = &mut self.error_injections[pos];
            if injection.skip > 0 {
                injection.skip -= 1;
                return Ok(());
            }
            let injection = self.error_injections.remove(pos);
            return Err(injection.error);
        }
        Ok(())
    }

    fn claimed_device(&mut self, sensor: SensorHandle) -> Result<&mut MockDevice> {
        match self.devices.get_mut(sensor.0 as usize) {
            Some(device) if device.claimed => Ok(device),
            Some(_) => Err(CameraError::Driver(format!(
                "mock sensor {} is not open",
                sensor.0
            ))),
            None => Err(CameraError::Driver(format!(
                "mock sensor {} does not exist",
                sensor.0
            ))),
        }
    }

    fn owned_buffer(&mut self, sensor: SensorHandle, buffer: BufferId) -> Result<&mut MockBuffer> {
        self.buffers
            .get_mut(&buffer)
            .filter(|b| b.sensor == sensor)
            .ok_or_else(|| CameraError::Driver(format!("unknown buffer {buffer}")))
    }
}

impl SensorApi for MockSensor {
    fn open(&self, device_id: u32) -> Result<SensorHandle> {
        let mut state = self.state.lock();
        state.check_error("open")?;
        let device = state
            .devices
            .get_mut(device_id as usize)
            .ok_or_else(|| CameraError::DeviceOpen(format!("no sensor with id {device_id}")))?;
        if device.claimed {
            return Err(CameraError::DeviceOpen(format!(
                "sensor {device_id} is already claimed"
            )));
        }
        device.claimed = true;
        Ok(SensorHandle(device_id))
    }

    fn close(&self, sensor: SensorHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.check_error("close")?;
        let device = state.claimed_device(sensor)?;
        device.claimed = false;
        device.capturing = false;
        device.handler = None;
        device.format = None;
        Ok(())
    }

    fn set_pixel_format(&self, sensor: SensorHandle, format: PixelFormat) -> Result<()> {
        let mut state = self.state.lock();
        state.check_error("set_pixel_format")?;
        state.claimed_device(sensor)?.format = Some(format);
        Ok(())
    }

    fn pixel_format(&self, sensor: SensorHandle) -> Result<PixelFormat> {
        let mut state = self.state.lock();
        state.check_error("pixel_format")?;
        state
            .claimed_device(sensor)?
            .format
            .ok_or_else(|| CameraError::Driver("pixel format not set".to_string()))
    }

    fn query_aoi(&self, sensor: SensorHandle) -> Result<Aoi> {
        let mut state = self.state.lock();
        state.check_error("query_aoi")?;
        Ok(state.claimed_device(sensor)?.aoi)
    }

    fn alloc_buffer(
        &self,
        sensor: SensorHandle,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
    ) -> Result<BufferId> {
        let mut state = self.state.lock();
        state.check_error("alloc_buffer")?;
        state.claimed_device(sensor)?;

        let packed = (width * bits_per_pixel).div_ceil(8) as usize;
        let pitch = packed + state.row_padding as usize;
        let id = BufferId(state.next_buffer_id);
        state.next_buffer_id += 1;
        state.buffers.insert(
            id,
            MockBuffer {
                sensor,
                width,
                height,
                packed,
                pitch,
                data: vec![0u8; pitch * height as usize],
            },
        );
        Ok(id)
    }

    fn free_buffer(&self, sensor: SensorHandle, buffer: BufferId) -> Result<()> {
        let mut state = self.state.lock();
        state.check_error("free_buffer")?;
        state.owned_buffer(sensor, buffer)?;
        let device = state.claimed_device(sensor)?;
        if device.sequence.contains(&buffer) {
            return Err(CameraError::Driver(format!(
                "buffer {buffer} is still in the capture sequence"
            )));
        }
        state.buffers.remove(&buffer);
        Ok(())
    }

    fn set_sequence(&self, sensor: SensorHandle, buffers: &[BufferId]) -> Result<()> {
        let mut state = self.state.lock();
        state.check_error("set_sequence")?;
        for &buffer in buffers {
            state.owned_buffer(sensor, buffer)?;
        }
        let device = state.claimed_device(sensor)?;
        device.sequence = buffers.to_vec();
        device.write_cursor = 0;
        device.last_filled = None;
        Ok(())
    }

    fn clear_sequence(&self, sensor: SensorHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.check_error("clear_sequence")?;
        let device = state.claimed_device(sensor)?;
        device.sequence.clear();
        device.locked.clear();
        device.last_filled = None;
        Ok(())
    }

    fn last_filled(&self, sensor: SensorHandle) -> Result<BufferId> {
        let mut state = self.state.lock();
        state.check_error("last_filled")?;
        state
            .claimed_device(sensor)?
            .last_filled
            .ok_or_else(|| CameraError::Driver("no frame captured yet".to_string()))
    }

    fn lock_buffer(&self, sensor: SensorHandle, buffer: BufferId) -> Result<()> {
        let mut state = self.state.lock();
        state.check_error("lock_buffer")?;
        let device = state.claimed_device(sensor)?;
        if !device.sequence.contains(&buffer) {
            return Err(CameraError::Driver(format!(
                "buffer {buffer} is not in the capture sequence"
            )));
        }
        if !device.locked.insert(buffer) {
            return Err(CameraError::Driver(format!("buffer {buffer} already locked")));
        }
        Ok(())
    }

    fn unlock_buffer(&self, sensor: SensorHandle, buffer: BufferId) -> Result<()> {
        let mut state = self.state.lock();
        state.check_error("unlock_buffer")?;
        if !state.claimed_device(sensor)?.locked.remove(&buffer) {
            return Err(CameraError::Driver(format!("buffer {buffer} is not locked")));
        }
        Ok(())
    }

    fn read_buffer(
        &self,
        sensor: SensorHandle,
        buffer: BufferId,
        read: &mut dyn FnMut(&[u8]),
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check_error("read_buffer")?;
        let data = &state.owned_buffer(sensor, buffer)?.data;
        read(data.as_slice());
        Ok(())
    }

    fn image_info(&self, sensor: SensorHandle, buffer: BufferId) -> Result<ImageInfo> {
        let mut state = self.state.lock();
        state.check_error("image_info")?;
        let buffer = state.owned_buffer(sensor, buffer)?;
        Ok(ImageInfo {
            width: buffer.width,
            height: buffer.height,
            stride: buffer.pitch as u32,
        })
    }

    fn set_frame_handler(
        &self,
        sensor: SensorHandle,
        handler: Option<FrameHandler>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check_error("set_frame_handler")?;
        state.claimed_device(sensor)?.handler = handler;
        Ok(())
    }

    fn start_capture(&self, sensor: SensorHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.check_error("start_capture")?;
        let device = state.claimed_device(sensor)?;
        if device.sequence.is_empty() {
            return Err(CameraError::CaptureStart(
                "no image memory registered".to_string(),
            ));
        }
        device.capturing = true;
        Ok(())
    }

    fn stop_capture(&self, sensor: SensorHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.check_error("stop_capture")?;
        state.claimed_device(sensor)?.capturing = false;
        Ok(())
    }
}
