//! Fixed pool of device-writable image buffers.
//!
//! The pool owns every buffer it allocates and tracks each one's lock state
//! with an atomic flag, so the capture thread never blocks on it. Buffers
//! are recycled through the device's capture ring for the lifetime of the
//! session and freed only after the ring is cleared.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::camera::api::SensorApi;
use crate::camera::error::{CameraError, Result};
use crate::camera::types::{BufferId, ImageInfo, SensorGeometry, SensorHandle};

/// Pool-side state of one image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Allocated but not part of the capture ring.
    Free = 0,
    /// In the device's write rotation (empty or filled).
    Queued = 1,
    /// Held by a reader; the device will not write it.
    Locked = 2,
    /// Memory returned to the device.
    Released = 3,
    /// Done with by the reader, but the device refused the unlock. Retried
    /// before the next lock and at teardown.
    PendingUnlock = 4,
}

impl BufferState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Free,
            1 => Self::Queued,
            2 => Self::Locked,
            4 => Self::PendingUnlock,
            _ => Self::Released,
        }
    }
}

struct ImageBuffer {
    id: BufferId,
    state: AtomicU8,
}

impl ImageBuffer {
    fn state(&self) -> BufferState {
        BufferState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(
        &self,
        from: BufferState,
        to: BufferState,
    ) -> std::result::Result<(), BufferState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(BufferState::from_u8)
    }
}

/// Ordered set of image buffers registered with one sensor.
pub struct BufferPool<S: SensorApi> {
    sdk: Arc<S>,
    sensor: SensorHandle,
    geometry: SensorGeometry,
    buffers: Vec<ImageBuffer>,
    registered: AtomicBool,
}

impl<S: SensorApi> BufferPool<S> {
    /// Allocate `count` buffers sized for `geometry`.
    ///
    /// # Errors
    ///
    /// Returns `CameraError::Allocation` if any allocation fails. Buffers
    /// allocated before the failure are freed before returning.
    pub fn allocate(
        sdk: Arc<S>,
        sensor: SensorHandle,
        geometry: SensorGeometry,
        count: usize,
    ) -> Result<Self> {
        let mut pool = Self {
            sdk,
            sensor,
            geometry,
            buffers: Vec::with_capacity(count),
            registered: AtomicBool::new(false),
        };

        for index in 0..count {
            // On early return the partially built pool frees its buffers on drop.
            let id = pool
                .sdk
                .alloc_buffer(
                    sensor,
                    geometry.width,
                    geometry.height,
                    geometry.bits_per_pixel(),
                )
                .map_err(|e| {
                    CameraError::Allocation(format!("buffer {} of {count}: {e}", index + 1))
                })?;
            pool.buffers.push(ImageBuffer {
                id,
                state: AtomicU8::new(BufferState::Free as u8),
            });
        }

        tracing::debug!(
            "allocated {count} buffers of {} bytes",
            geometry.frame_len()
        );
        Ok(pool)
    }

    /// Buffer ids in allocation order.
    pub fn ids(&self) -> Vec<BufferId> {
        self.buffers.iter().map(|b| b.id).collect()
    }

    pub fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Current state of a buffer, or `None` for an unknown id.
    pub fn state(&self, id: BufferId) -> Option<BufferState> {
        self.find(id).ok().map(ImageBuffer::state)
    }

    /// Hand the buffers to the device as its circular capture sequence.
    ///
    /// # Errors
    ///
    /// Returns `CameraError::Registration` when called a second time, when
    /// the pool is empty, or when the device rejects the sequence.
    pub fn register(&self) -> Result<()> {
        if self.buffers.is_empty() {
            return Err(CameraError::Registration(
                "no buffers allocated".to_string(),
            ));
        }
        if self.registered.swap(true, Ordering::AcqRel) {
            return Err(CameraError::Registration(
                "capture sequence already registered".to_string(),
            ));
        }

        if let Err(e) = self.sdk.set_sequence(self.sensor, &self.ids()) {
            self.registered.store(false, Ordering::Release);
            return Err(CameraError::Registration(e.to_string()));
        }
        for buffer in &self.buffers {
            buffer
                .state
                .store(BufferState::Queued as u8, Ordering::Release);
        }
        Ok(())
    }

    /// Take a buffer out of the device's write rotation so it can be read.
    ///
    /// # Errors
    ///
    /// Returns `CameraError::InvalidState` if the buffer is already locked,
    /// is not in the capture ring, or was reclaimed by the device.
    pub fn lock(&self, id: BufferId) -> Result<()> {
        self.retry_pending_unlocks();
        let buffer = self.find(id)?;
        buffer
            .transition(BufferState::Queued, BufferState::Locked)
            .map_err(|actual| match actual {
                BufferState::Locked => {
                    CameraError::InvalidState(format!("buffer {id} is already locked"))
                }
                other => CameraError::InvalidState(format!(
                    "buffer {id} cannot be locked while {other:?}"
                )),
            })?;

        if let Err(e) = self.sdk.lock_buffer(self.sensor, id) {
            buffer.state.store(BufferState::Queued as u8, Ordering::Release);
            return Err(CameraError::InvalidState(format!(
                "buffer {id} reclaimed by device: {e}"
            )));
        }
        Ok(())
    }

    /// Return a locked buffer to the device's write rotation.
    ///
    /// The buffer leaves the `Locked` state either way. If the device
    /// refuses, it becomes `PendingUnlock` and the device unlock is retried
    /// before the next `lock` and during `release_all`.
    ///
    /// # Errors
    ///
    /// Returns `CameraError::InvalidState` if the buffer is not locked, and
    /// the driver error if the device refused the unlock.
    pub fn unlock(&self, id: BufferId) -> Result<()> {
        let buffer = self.find(id)?;
        let state = buffer.state();
        if state != BufferState::Locked {
            return Err(CameraError::InvalidState(format!(
                "buffer {id} is not locked ({state:?})"
            )));
        }

        let (unlocked, next) = match self.sdk.unlock_buffer(self.sensor, id) {
            Ok(()) => (Ok(()), BufferState::Queued),
            Err(e) => (Err(e), BufferState::PendingUnlock),
        };
        buffer
            .transition(BufferState::Locked, next)
            .map_err(|actual| {
                CameraError::InvalidState(format!("buffer {id} changed state to {actual:?}"))
            })?;
        unlocked
    }

    /// Retry the device unlock of every `PendingUnlock` buffer.
    fn retry_pending_unlocks(&self) {
        for buffer in &self.buffers {
            if buffer
                .transition(BufferState::PendingUnlock, BufferState::Locked)
                .is_err()
            {
                continue;
            }
            match self.sdk.unlock_buffer(self.sensor, buffer.id) {
                Ok(()) => {
                    tracing::debug!("buffer {} returned to rotation on retry", buffer.id);
                    buffer.state.store(BufferState::Queued as u8, Ordering::Release);
                }
                Err(e) => {
                    tracing::debug!("unlock retry for buffer {} failed: {e}", buffer.id);
                    buffer
                        .state
                        .store(BufferState::PendingUnlock as u8, Ordering::Release);
                }
            }
        }
    }

    /// Lock a buffer and unlock it again when the guard is dropped.
    pub fn lock_guard(&self, id: BufferId) -> Result<BufferGuard<'_, S>> {
        self.lock(id)?;
        Ok(BufferGuard { pool: self, id })
    }

    /// Free one buffer's device memory.
    ///
    /// # Errors
    ///
    /// Returns `CameraError::InvalidState` unless the buffer is out of the
    /// capture ring and unlocked.
    pub fn release(&self, id: BufferId) -> Result<()> {
        let buffer = self.find(id)?;
        let state = buffer.state();
        if state != BufferState::Free {
            return Err(CameraError::InvalidState(format!(
                "buffer {id} cannot be released while {state:?}"
            )));
        }
        self.sdk.free_buffer(self.sensor, id)?;
        buffer
            .state
            .store(BufferState::Released as u8, Ordering::Release);
        Ok(())
    }

    /// Clear the capture ring and free every buffer. Idempotent.
    ///
    /// Failures are logged and skipped so teardown always runs to the end.
    pub fn release_all(&self) {
        if self.registered.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.sdk.clear_sequence(self.sensor) {
                tracing::warn!("failed to clear capture sequence: {e}");
            }
            for buffer in &self.buffers {
                let state = buffer.state();
                if matches!(state, BufferState::Locked | BufferState::PendingUnlock) {
                    tracing::warn!("buffer {} still {state:?} at teardown", buffer.id);
                    if let Err(e) = self.sdk.unlock_buffer(self.sensor, buffer.id) {
                        tracing::warn!("failed to unlock buffer {}: {e}", buffer.id);
                    }
                }
                buffer.state.store(BufferState::Free as u8, Ordering::Release);
            }
        }

        for buffer in &self.buffers {
            if buffer.state() == BufferState::Free {
                if let Err(e) = self.release(buffer.id) {
                    tracing::warn!("failed to free buffer {}: {e}", buffer.id);
                }
            }
        }
    }

    fn find(&self, id: BufferId) -> Result<&ImageBuffer> {
        self.buffers
            .iter()
            .find(|b| b.id == id)
            .ok_or_else(|| CameraError::InvalidState(format!("unknown buffer {id}")))
    }

    pub(crate) fn sdk(&self) -> &S {
        &self.sdk
    }

    pub(crate) fn sensor(&self) -> SensorHandle {
        self.sensor
    }
}

impl<S: SensorApi> Drop for BufferPool<S> {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// A locked buffer. Unlocks on drop, whatever happened while it was held.
pub struct BufferGuard<'a, S: SensorApi> {
    pool: &'a BufferPool<S>,
    id: BufferId,
}

impl<S: SensorApi> BufferGuard<'_, S> {
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Capture geometry the driver recorded for this buffer.
    pub fn info(&self) -> Result<ImageInfo> {
        self.pool.sdk().image_info(self.pool.sensor(), self.id)
    }

    /// Borrow the buffer's pixels for the duration of `read`.
    pub fn read(&self, read: &mut dyn FnMut(&[u8])) -> Result<()> {
        self.pool.sdk().read_buffer(self.pool.sensor(), self.id, read)
    }
}

impl<S: SensorApi> Drop for BufferGuard<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.pool.unlock(self.id) {
            tracing::warn!("failed to unlock buffer {}: {e}", self.id);
        }
    }
}
