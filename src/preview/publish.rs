//! Hand-off of captured frames to the render context.
//!
//! The publisher copies the locked pixels into an owned [`Frame`] and drops
//! it into a single-slot mailbox; a frame that has not been rendered yet is
//! replaced, never queued. The render loop runs on its own thread and is
//! woken through a `tokio::sync::Notify`, so publishing never waits for a
//! render.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::camera::error::{CameraError, Result};
use crate::camera::types::BufferId;
use crate::diagnostics::stats::{DiagnosticSnapshot, DiagnosticStats, DropReason};

/// Borrowed view of one completed capture.
///
/// `pixels` points into a locked device buffer and is only valid while that
/// buffer stays locked.
#[derive(Debug, Clone, Copy)]
pub struct FrameDescriptor<'a> {
    pub buffer: BufferId,
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
    pub bits_per_pixel: u32,
}

impl FrameDescriptor<'_> {
    /// Bytes covered by `height` rows of `stride`.
    pub fn frame_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }
}

/// An owned copy of a captured frame, ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw pixel data (8-bit grayscale, `stride * height` bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub bits_per_pixel: u32,
    /// Buffer the pixels were copied from.
    pub buffer: BufferId,
    /// Publish order, starting at 1.
    pub sequence: u64,
}

impl Frame {
    /// One image row, or `None` past the last row.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride as usize;
        self.data.get(start..start + self.width as usize)
    }

    /// Grey level at the given coordinates.
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width {
            return None;
        }
        self.row(y)?.get(x as usize).copied()
    }
}

/// Consumer of rendered frames, called on the render context.
///
/// The frame reference is only valid for the duration of the call.
pub trait Renderer {
    fn render(&mut self, frame: &Frame);
}

impl<F> Renderer for F
where
    F: FnMut(&Frame),
{
    fn render(&mut self, frame: &Frame) {
        self(frame)
    }
}

/// Single-slot latest-wins mailbox shared by publisher and receiver.
struct Mailbox {
    slot: Mutex<Option<Arc<Frame>>>,
    notify: Notify,
    closed: AtomicBool,
    /// Held while a frame is taken and rendered.
    render_gate: Mutex<()>,
    stats: Arc<Mutex<DiagnosticStats>>,
}

/// Create a connected publisher/receiver pair.
pub fn frame_channel() -> (FramePublisher, FrameReceiver) {
    let mailbox = Arc::new(Mailbox {
        slot: Mutex::new(None),
        notify: Notify::new(),
        closed: AtomicBool::new(false),
        render_gate: Mutex::new(()),
        stats: Arc::new(Mutex::new(DiagnosticStats::new())),
    });
    (
        FramePublisher {
            mailbox: Arc::clone(&mailbox),
            sequence: AtomicU64::new(0),
        },
        FrameReceiver { mailbox },
    )
}

/// Capture-side end of the frame channel.
pub struct FramePublisher {
    mailbox: Arc<Mailbox>,
    sequence: AtomicU64,
}

impl FramePublisher {
    /// Copy the described pixels and schedule them for rendering.
    ///
    /// Returns once the copy is made; the source buffer may be unlocked
    /// immediately afterwards. A frame still waiting for the renderer is
    /// replaced and counted as dropped.
    ///
    /// # Errors
    ///
    /// Returns `CameraError::InvalidState` if the descriptor covers more
    /// bytes than it carries, and `CameraError::NotReady` once the render
    /// context has shut down.
    pub fn publish(&self, descriptor: &FrameDescriptor<'_>) -> Result<()> {
        if self.mailbox.closed.load(Ordering::Acquire) {
            return Err(CameraError::NotReady("render context closed".to_string()));
        }

        let len = descriptor.frame_len();
        let pixels = descriptor.pixels.get(..len).ok_or_else(|| {
            CameraError::InvalidState(format!(
                "buffer {} holds {} bytes, descriptor needs {len}",
                descriptor.buffer,
                descriptor.pixels.len()
            ))
        })?;

        let frame = Frame {
            data: pixels.to_vec(),
            width: descriptor.width,
            height: descriptor.height,
            stride: descriptor.stride,
            bits_per_pixel: descriptor.bits_per_pixel,
            buffer: descriptor.buffer,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
        };

        let replaced = self.mailbox.slot.lock().replace(Arc::new(frame));
        if let Some(stale) = replaced {
            tracing::debug!("frame {} overtaken before render", stale.sequence);
            self.mailbox.stats.lock().record_drop(DropReason::Overtaken);
        }
        self.mailbox.notify.notify_one();
        Ok(())
    }

    /// Drop any frame the renderer has not taken yet, waiting for a render
    /// in progress to finish. No notification is emitted for frames
    /// published before this call once it returns.
    pub fn discard_pending(&self) {
        let _gate = self.mailbox.render_gate.lock();
        if self.mailbox.slot.lock().take().is_some() {
            self.mailbox.stats.lock().record_drop(DropReason::Discarded);
        }
    }

    /// Count a frame that never reached `publish`.
    pub fn record_drop(&self) {
        self.mailbox.stats.lock().record_drop(DropReason::CaptureFailed);
    }

    /// Snapshot of the channel's frame and drop counters.
    pub fn diagnostics(&self) -> DiagnosticSnapshot {
        self.mailbox.stats.lock().snapshot()
    }

    /// Number of frames published so far.
    pub fn published(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

/// Render-side end of the frame channel.
pub struct FrameReceiver {
    mailbox: Arc<Mailbox>,
}

impl FrameReceiver {
    /// Wait for the next frame and hand it to `renderer`.
    ///
    /// Returns `false` once the channel is closed.
    pub async fn render_next<R: Renderer + ?Sized>(&self, renderer: &mut R) -> bool {
        loop {
            if self.mailbox.closed.load(Ordering::Acquire) {
                return false;
            }
            {
                let _gate = self.mailbox.render_gate.lock();
                let frame = self.mailbox.slot.lock().take();
                if let Some(frame) = frame {
                    renderer.render(&frame);
                    self.mailbox.stats.lock().record_frame(frame.data.len());
                    return true;
                }
            }
            self.mailbox.notify.notified().await;
        }
    }

    /// Whether a frame is waiting to be rendered.
    pub fn has_pending(&self) -> bool {
        self.mailbox.slot.lock().is_some()
    }

    /// Stop accepting frames and wake the render loop so it can exit.
    pub fn close(&self) {
        self.mailbox.closed.store(true, Ordering::Release);
        self.mailbox.notify.notify_one();
    }
}

/// Drive `renderer` from `receiver` until the channel is closed.
pub async fn run_render_loop<R: Renderer>(receiver: FrameReceiver, mut renderer: R) {
    while receiver.render_next(&mut renderer).await {}
    tracing::debug!("render loop exiting");
}

/// Render context running on a dedicated thread.
pub struct RenderLoop {
    mailbox: Arc<Mailbox>,
    thread: Option<JoinHandle<()>>,
}

impl RenderLoop {
    /// Spawn the render thread.
    ///
    /// The thread drives a current-thread tokio runtime that waits for
    /// frames from `receiver` and renders each one with `renderer`.
    pub fn spawn<R: Renderer + Send + 'static>(
        receiver: FrameReceiver,
        renderer: R,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| CameraError::Driver(format!("failed to build render runtime: {e}")))?;
        let mailbox = Arc::clone(&receiver.mailbox);

        let thread = std::thread::Builder::new()
            .name("render".to_string())
            .spawn(move || {
                runtime.block_on(run_render_loop(receiver, renderer));
            })
            .map_err(|e| CameraError::Driver(format!("failed to spawn render thread: {e}")))?;

        Ok(Self {
            mailbox,
            thread: Some(thread),
        })
    }

    /// Check if the render thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Close the channel and join the render thread. Idempotent.
    pub fn stop(&mut self) {
        self.mailbox.closed.store(true, Ordering::Release);
        self.mailbox.notify.notify_one();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::warn!("render thread panicked");
            }
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn descriptor(pixels: &[u8], width: u32, height: u32) -> FrameDescriptor<'_> {
        FrameDescriptor {
            buffer: BufferId(1),
            pixels,
            width,
            height,
            stride: width,
            bits_per_pixel: 8,
        }
    }

    #[test]
    fn frame_row_and_pixel_access() {
        let frame = Frame {
            data: (0..12).collect(),
            width: 4,
            height: 3,
            stride: 4,
            bits_per_pixel: 8,
            buffer: BufferId(1),
            sequence: 1,
        };
        assert_eq!(frame.row(1), Some(&[4, 5, 6, 7][..]));
        assert_eq!(frame.row(3), None);
        assert_eq!(frame.pixel_at(3, 2), Some(11));
        assert_eq!(frame.pixel_at(4, 0), None);
    }

    #[test]
    fn publish_copies_pixels() {
        let (publisher, receiver) = frame_channel();
        let mut pixels = vec![7u8; 16];
        publisher.publish(&descriptor(&pixels, 4, 4)).unwrap();
        pixels.fill(0);

        let frame = receiver.mailbox.slot.lock().take().unwrap();
        assert_eq!(frame.data, vec![7u8; 16]);
        assert_eq!(frame.sequence, 1);
    }

    #[test]
    fn publish_replaces_pending_frame() {
        let (publisher, receiver) = frame_channel();
        publisher.publish(&descriptor(&[1u8; 4], 2, 2)).unwrap();
        publisher.publish(&descriptor(&[2u8; 4], 2, 2)).unwrap();

        let frame = receiver.mailbox.slot.lock().take().unwrap();
        assert_eq!(frame.data[0], 2);
        assert_eq!(frame.sequence, 2);
        assert_eq!(publisher.diagnostics().overtaken, 1);
    }

    #[test]
    fn publish_rejects_short_buffer() {
        let (publisher, _receiver) = frame_channel();
        let err = publisher.publish(&descriptor(&[0u8; 3], 2, 2)).unwrap_err();
        assert!(matches!(err, CameraError::InvalidState(_)));
        assert_eq!(publisher.published(), 0);
    }

    #[test]
    fn publish_after_close_fails() {
        let (publisher, receiver) = frame_channel();
        receiver.close();
        let err = publisher.publish(&descriptor(&[0u8; 4], 2, 2)).unwrap_err();
        assert!(matches!(err, CameraError::NotReady(_)));
    }

    #[test]
    fn discard_pending_counts_drop() {
        let (publisher, receiver) = frame_channel();
        publisher.publish(&descriptor(&[1u8; 4], 2, 2)).unwrap();
        publisher.discard_pending();
        assert!(receiver.mailbox.slot.lock().is_none());
        assert_eq!(publisher.diagnostics().discarded, 1);
    }

    #[tokio::test]
    async fn render_next_delivers_pending_frame() {
        let (publisher, receiver) = frame_channel();
        publisher.publish(&descriptor(&[9u8; 4], 2, 2)).unwrap();

        let mut seen = Vec::new();
        let mut renderer = |frame: &Frame| seen.push(frame.data[0]);
        assert!(receiver.render_next(&mut renderer).await);
        assert_eq!(seen, vec![9]);
        assert_eq!(publisher.diagnostics().frame_count, 1);
    }

    #[tokio::test]
    async fn render_next_returns_false_when_closed() {
        let (_publisher, receiver) = frame_channel();
        receiver.close();
        let mut renderer = |_: &Frame| {};
        assert!(!receiver.render_next(&mut renderer).await);
    }

    #[test]
    fn render_loop_renders_on_its_own_thread() {
        let (publisher, receiver) = frame_channel();
        let (tx, rx) = mpsc::channel();
        let mut render_loop = RenderLoop::spawn(receiver, move |frame: &Frame| {
            let name = std::thread::current().name().map(str::to_string);
            let _ = tx.send((frame.data[0], name));
        })
        .unwrap();

        publisher.publish(&descriptor(&[5u8; 4], 2, 2)).unwrap();
        let (value, thread) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(value, 5);
        assert_eq!(thread.as_deref(), Some("render"));

        render_loop.stop();
        assert!(!render_loop.is_running());
    }

    #[test]
    fn render_loop_stop_is_idempotent() {
        let (_publisher, receiver) = frame_channel();
        let mut render_loop = RenderLoop::spawn(receiver, |_: &Frame| {}).unwrap();
        render_loop.stop();
        render_loop.stop();
    }

    #[test]
    fn publisher_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FramePublisher>();
        assert_send_sync::<FrameReceiver>();
    }
}
