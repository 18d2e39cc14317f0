//! Safe uEye wrapper.
//!
//! Production code uses this; tests use `MockSensor` instead. Frame
//! completion is delivered by one event thread per capturing sensor, which
//! waits on `IS_SET_EVENT_FRAME` and calls the installed handler.

use std::collections::HashMap;
use std::ffi::c_char;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::camera::api::{FrameHandler, SensorApi};
use crate::camera::error::{CameraError, Result};
use crate::camera::types::{Aoi, BufferId, ImageInfo, PixelFormat, SensorHandle};

use super::ffi;

/// How long the event thread blocks before re-checking its stop flag.
const EVENT_TIMEOUT_MS: ffi::INT = 100;

/// Image memory owned by the driver.
struct ImageMem {
    ptr: *mut c_char,
    height: u32,
    pitch: u32,
}

// The pointer is only dereferenced while the buffer map lock is held and the
// driver keeps the memory alive until `is_FreeImageMem`.
unsafe impl Send for ImageMem {}

struct EventThread {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EventThread {
    fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("uEye event thread panicked");
            }
        }
    }
}

type HandlerMap = Arc<Mutex<HashMap<ffi::HIDS, FrameHandler>>>;

/// Safe wrapper around the IDS uEye API.
pub struct UeyeSdk {
    buffers: Mutex<HashMap<(ffi::HIDS, i32), ImageMem>>,
    handlers: HandlerMap,
    events: Mutex<HashMap<ffi::HIDS, EventThread>>,
}

impl UeyeSdk {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            events: Mutex::new(HashMap::new()),
        }
    }

    fn with_buffer<T>(
        &self,
        sensor: SensorHandle,
        buffer: BufferId,
        f: impl FnOnce(&ImageMem) -> Result<T>,
    ) -> Result<T> {
        let buffers = self.buffers.lock();
        let mem = buffers
            .get(&(sensor.0, buffer.0))
            .ok_or_else(|| CameraError::InvalidState(format!("unknown buffer {buffer}")))?;
        f(mem)
    }

    /// Ask the driver for the current geometry of an image memory.
    fn inquire(sensor: SensorHandle, ptr: *mut c_char, id: ffi::INT) -> Result<ImageInfo> {
        let (mut width, mut height, mut bits, mut pitch) = (0, 0, 0, 0);
        let rc = unsafe {
            ffi::is_InquireImageMem(
                sensor.0,
                ptr,
                id,
                &mut width,
                &mut height,
                &mut bits,
                &mut pitch,
            )
        };
        check(rc, "is_InquireImageMem")?;

        let positive = |name: &str, v: ffi::INT| {
            u32::try_from(v)
                .ok()
                .filter(|&v| v > 0)
                .ok_or_else(|| {
                    CameraError::Driver(format!("image memory {id} reports {name} {v}"))
                })
        };
        let info = ImageInfo {
            width: positive("width", width)?,
            height: positive("height", height)?,
            stride: positive("pitch", pitch)?,
        };
        let bits = positive("bit depth", bits)?;
        if u64::from(info.stride) * 8 < u64::from(info.width) * u64::from(bits) {
            return Err(CameraError::Driver(format!(
                "image memory {id} pitch {} is narrower than {} pixels at {bits} bpp",
                info.stride, info.width
            )));
        }
        Ok(info)
    }

    fn stop_event_thread(&self, hcam: ffi::HIDS) {
        let event = self.events.lock().remove(&hcam);
        if let Some(event) = event {
            event.stop();
            unsafe {
                ffi::is_DisableEvent(hcam, ffi::IS_SET_EVENT_FRAME);
            }
        }
    }
}

impl Default for UeyeSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UeyeSdk {
    fn drop(&mut self) {
        let sensors: Vec<ffi::HIDS> = self.events.lock().keys().copied().collect();
        for hcam in sensors {
            self.stop_event_thread(hcam);
        }
    }
}

fn check(rc: ffi::INT, call: &str) -> Result<()> {
    if rc == ffi::IS_SUCCESS {
        Ok(())
    } else {
        Err(CameraError::Driver(format!("{call} failed: status {rc}")))
    }
}

impl SensorApi for UeyeSdk {
    fn open(&self, device_id: u32) -> Result<SensorHandle> {
        let mut hcam: ffi::HIDS = device_id | ffi::IS_USE_DEVICE_ID;
        let rc = unsafe { ffi::is_InitCamera(&mut hcam, std::ptr::null_mut()) };
        if rc != ffi::IS_SUCCESS {
            return Err(CameraError::DeviceOpen(format!(
                "is_InitCamera({device_id}) failed: status {rc}"
            )));
        }
        debug!("uEye device {device_id} opened as handle {hcam}");
        Ok(SensorHandle(hcam))
    }

    fn close(&self, sensor: SensorHandle) -> Result<()> {
        self.stop_event_thread(sensor.0);
        self.handlers.lock().remove(&sensor.0);
        // is_ExitCamera frees any image memory still allocated on the camera.
        self.buffers.lock().retain(|(hcam, _), _| *hcam != sensor.0);
        check(unsafe { ffi::is_ExitCamera(sensor.0) }, "is_ExitCamera")
    }

    fn set_pixel_format(&self, sensor: SensorHandle, format: PixelFormat) -> Result<()> {
        let mode = match format {
            PixelFormat::Mono8 => ffi::IS_CM_MONO8,
        };
        check(
            unsafe { ffi::is_SetColorMode(sensor.0, mode) },
            "is_SetColorMode",
        )
    }

    fn pixel_format(&self, sensor: SensorHandle) -> Result<PixelFormat> {
        let mode = unsafe { ffi::is_SetColorMode(sensor.0, ffi::IS_GET_COLOR_MODE) };
        match mode {
            ffi::IS_CM_MONO8 => Ok(PixelFormat::Mono8),
            other => Err(CameraError::Driver(format!(
                "unsupported colour mode {other}"
            ))),
        }
    }

    fn query_aoi(&self, sensor: SensorHandle) -> Result<Aoi> {
        let mut rect = ffi::IS_RECT::default();
        let rc = unsafe {
            ffi::is_AOI(
                sensor.0,
                ffi::IS_AOI_IMAGE_GET_AOI,
                (&mut rect as *mut ffi::IS_RECT).cast(),
                std::mem::size_of::<ffi::IS_RECT>() as ffi::UINT,
            )
        };
        check(rc, "is_AOI")?;
        let dimension = |v: ffi::INT| {
            u32::try_from(v).map_err(|_| CameraError::Driver(format!("negative AOI value {v}")))
        };
        Ok(Aoi {
            x: rect.s32X,
            y: rect.s32Y,
            width: dimension(rect.s32Width)?,
            height: dimension(rect.s32Height)?,
        })
    }

    fn alloc_buffer(
        &self,
        sensor: SensorHandle,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
    ) -> Result<BufferId> {
        let mut ptr: *mut c_char = std::ptr::null_mut();
        let mut id: ffi::INT = 0;
        let rc = unsafe {
            ffi::is_AllocImageMem(
                sensor.0,
                width as ffi::INT,
                height as ffi::INT,
                bits_per_pixel as ffi::INT,
                &mut ptr,
                &mut id,
            )
        };
        check(rc, "is_AllocImageMem")?;

        let info = match Self::inquire(sensor, ptr, id) {
            Ok(info) => info,
            Err(e) => {
                unsafe {
                    ffi::is_FreeImageMem(sensor.0, ptr, id);
                }
                return Err(e);
            }
        };

        self.buffers.lock().insert(
            (sensor.0, id),
            ImageMem {
                ptr,
                height: info.height,
                pitch: info.stride,
            },
        );
        Ok(BufferId(id))
    }

    fn free_buffer(&self, sensor: SensorHandle, buffer: BufferId) -> Result<()> {
        let mem = self
            .buffers
            .lock()
            .remove(&(sensor.0, buffer.0))
            .ok_or_else(|| CameraError::InvalidState(format!("unknown buffer {buffer}")))?;
        check(
            unsafe { ffi::is_FreeImageMem(sensor.0, mem.ptr, buffer.0) },
            "is_FreeImageMem",
        )
    }

    fn set_sequence(&self, sensor: SensorHandle, buffers: &[BufferId]) -> Result<()> {
        for &buffer in buffers {
            let added = self.with_buffer(sensor, buffer, |mem| {
                check(
                    unsafe { ffi::is_AddToSequence(sensor.0, mem.ptr, buffer.0) },
                    "is_AddToSequence",
                )
            });
            if let Err(e) = added {
                if let Err(clear) = self.clear_sequence(sensor) {
                    warn!("failed to clear partial sequence: {clear}");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn clear_sequence(&self, sensor: SensorHandle) -> Result<()> {
        check(
            unsafe { ffi::is_ClearSequence(sensor.0) },
            "is_ClearSequence",
        )
    }

    fn last_filled(&self, sensor: SensorHandle) -> Result<BufferId> {
        let mut num: ffi::INT = 0;
        let mut current: *mut c_char = std::ptr::null_mut();
        let mut last: *mut c_char = std::ptr::null_mut();
        let rc = unsafe { ffi::is_GetActSeqBuf(sensor.0, &mut num, &mut current, &mut last) };
        check(rc, "is_GetActSeqBuf")?;

        self.buffers
            .lock()
            .iter()
            .find(|((hcam, _), mem)| *hcam == sensor.0 && mem.ptr == last)
            .map(|((_, id), _)| BufferId(*id))
            .ok_or_else(|| CameraError::Driver("no completed buffer yet".to_string()))
    }

    fn lock_buffer(&self, sensor: SensorHandle, buffer: BufferId) -> Result<()> {
        self.with_buffer(sensor, buffer, |mem| {
            check(
                unsafe { ffi::is_LockSeqBuf(sensor.0, ffi::IS_IGNORE_PARAMETER, mem.ptr) },
                "is_LockSeqBuf",
            )
        })
    }

    fn unlock_buffer(&self, sensor: SensorHandle, buffer: BufferId) -> Result<()> {
        self.with_buffer(sensor, buffer, |mem| {
            check(
                unsafe { ffi::is_UnlockSeqBuf(sensor.0, ffi::IS_IGNORE_PARAMETER, mem.ptr) },
                "is_UnlockSeqBuf",
            )
        })
    }

    fn read_buffer(
        &self,
        sensor: SensorHandle,
        buffer: BufferId,
        read: &mut dyn FnMut(&[u8]),
    ) -> Result<()> {
        self.with_buffer(sensor, buffer, |mem| {
            if mem.ptr.is_null() {
                return Err(CameraError::InvalidState(format!(
                    "buffer {buffer} has no memory"
                )));
            }
            let len = mem.pitch as usize * mem.height as usize;
            let pixels = unsafe { std::slice::from_raw_parts(mem.ptr.cast::<u8>(), len) };
            read(pixels);
            Ok(())
        })
    }

    fn image_info(&self, sensor: SensorHandle, buffer: BufferId) -> Result<ImageInfo> {
        self.with_buffer(sensor, buffer, |mem| Self::inquire(sensor, mem.ptr, buffer.0))
    }

    fn set_frame_handler(
        &self,
        sensor: SensorHandle,
        handler: Option<FrameHandler>,
    ) -> Result<()> {
        let mut handlers = self.handlers.lock();
        match handler {
            Some(handler) => handlers.insert(sensor.0, handler),
            None => handlers.remove(&sensor.0),
        };
        Ok(())
    }

    fn start_capture(&self, sensor: SensorHandle) -> Result<()> {
        let hcam = sensor.0;
        check(
            unsafe { ffi::is_EnableEvent(hcam, ffi::IS_SET_EVENT_FRAME) },
            "is_EnableEvent",
        )?;

        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let running = Arc::clone(&running);
            let handlers = Arc::clone(&self.handlers);
            std::thread::Builder::new()
                .name(format!("ueye-events-{hcam}"))
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        let rc = unsafe {
                            ffi::is_WaitEvent(hcam, ffi::IS_SET_EVENT_FRAME, EVENT_TIMEOUT_MS)
                        };
                        match rc {
                            ffi::IS_SUCCESS => {
                                let handler = handlers.lock().get(&hcam).cloned();
                                if let Some(handler) = handler {
                                    handler();
                                }
                            }
                            ffi::IS_TIMED_OUT => {}
                            other => debug!("is_WaitEvent returned {other}"),
                        }
                    }
                })
                .map_err(|e| CameraError::Driver(format!("failed to spawn event thread: {e}")))
        };
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                unsafe {
                    ffi::is_DisableEvent(hcam, ffi::IS_SET_EVENT_FRAME);
                }
                return Err(e);
            }
        };
        self.events.lock().insert(
            hcam,
            EventThread {
                running,
                thread: Some(thread),
            },
        );

        let rc = unsafe { ffi::is_CaptureVideo(hcam, ffi::IS_DONT_WAIT) };
        if rc != ffi::IS_SUCCESS {
            self.stop_event_thread(hcam);
            return Err(CameraError::CaptureStart(format!(
                "is_CaptureVideo failed: status {rc}"
            )));
        }
        Ok(())
    }

    fn stop_capture(&self, sensor: SensorHandle) -> Result<()> {
        let rc = unsafe { ffi::is_StopLiveVideo(sensor.0, ffi::IS_WAIT) };
        // No handler may run after this returns, even if the driver refused.
        self.stop_event_thread(sensor.0);
        check(rc, "is_StopLiveVideo")
    }
}
