use serde::Serialize;
use std::time::Instant;

/// Why a captured frame never reached the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Replaced in the mailbox by a newer frame before it was rendered.
    Overtaken,
    /// Lost inside the frame callback: lock miss, read or publish failure.
    CaptureFailed,
    /// Still waiting for the renderer when capture stopped.
    Discarded,
}

/// Frame and drop counters for one frame channel.
pub struct DiagnosticStats {
    rendered: u64,
    overtaken: u64,
    capture_failed: u64,
    discarded: u64,
    bytes_rendered: u64,
    started: Instant,
    last_render: Option<Instant>,
}

/// Serialisable view of [`DiagnosticStats`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSnapshot {
    pub fps: f64,
    pub frame_count: u64,
    pub drop_count: u64,
    pub overtaken: u64,
    pub capture_failed: u64,
    pub discarded: u64,
    /// Dropped frames as a percentage of all captured frames.
    pub drop_rate: f64,
    pub bandwidth_bps: u64,
    pub ms_since_last_frame: Option<u64>,
}

impl DiagnosticStats {
    pub fn new() -> Self {
        Self {
            rendered: 0,
            overtaken: 0,
            capture_failed: 0,
            discarded: 0,
            bytes_rendered: 0,
            started: Instant::now(),
            last_render: None,
        }
    }

    /// Count a frame handed to the renderer.
    pub fn record_frame(&mut self, bytes: usize) {
        self.rendered += 1;
        self.bytes_rendered += bytes as u64;
        self.last_render = Some(Instant::now());
    }

    pub fn record_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::Overtaken => self.overtaken += 1,
            DropReason::CaptureFailed => self.capture_failed += 1,
            DropReason::Discarded => self.discarded += 1,
        }
    }

    fn dropped(&self) -> u64 {
        self.overtaken + self.capture_failed + self.discarded
    }

    /// Rate over the lifetime of the channel; zero within the first
    /// millisecond.
    fn per_second(&self, count: u64) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            0.0
        } else {
            count as f64 / elapsed
        }
    }

    pub fn snapshot(&self) -> DiagnosticSnapshot {
        let dropped = self.dropped();
        let captured = self.rendered + dropped;
        DiagnosticSnapshot {
            fps: self.per_second(self.rendered),
            frame_count: self.rendered,
            drop_count: dropped,
            overtaken: self.overtaken,
            capture_failed: self.capture_failed,
            discarded: self.discarded,
            drop_rate: if captured == 0 {
                0.0
            } else {
                dropped as f64 * 100.0 / captured as f64
            },
            bandwidth_bps: self.per_second(self.bytes_rendered) as u64,
            ms_since_last_frame: self.last_render.map(|t| t.elapsed().as_millis() as u64),
        }
    }
}

impl Default for DiagnosticStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn starts_empty() {
        let snapshot = DiagnosticStats::new().snapshot();
        assert_eq!(snapshot.frame_count, 0);
        assert_eq!(snapshot.drop_count, 0);
        assert_eq!(snapshot.drop_rate, 0.0);
        assert!(snapshot.ms_since_last_frame.is_none());
    }

    #[test]
    fn drops_are_counted_by_reason() {
        let mut stats = DiagnosticStats::new();
        stats.record_drop(DropReason::Overtaken);
        stats.record_drop(DropReason::Overtaken);
        stats.record_drop(DropReason::CaptureFailed);
        stats.record_drop(DropReason::Discarded);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.drop_count, 4);
        assert_eq!(snapshot.overtaken, 2);
        assert_eq!(snapshot.capture_failed, 1);
        assert_eq!(snapshot.discarded, 1);
    }

    #[test]
    fn drop_rate_covers_all_captured_frames() {
        let mut stats = DiagnosticStats::new();
        stats.record_frame(1000);
        stats.record_frame(1000);
        stats.record_frame(1000);
        stats.record_drop(DropReason::Overtaken);

        let rate = stats.snapshot().drop_rate;
        assert!((rate - 25.0).abs() < 1e-9, "drop rate should be 25%, got {rate}");
    }

    #[test]
    fn rates_are_positive_after_rendering() {
        let mut stats = DiagnosticStats::new();
        for _ in 0..30 {
            stats.record_frame(307_200);
        }
        thread::sleep(Duration::from_millis(20));

        let snapshot = stats.snapshot();
        assert!(snapshot.fps > 0.0, "fps should be positive, got {}", snapshot.fps);
        assert!(snapshot.bandwidth_bps > 0);
        assert!(snapshot.ms_since_last_frame.is_some());
    }

    #[test]
    fn snapshot_serialises_to_camelcase() {
        let mut stats = DiagnosticStats::new();
        stats.record_frame(5000);
        stats.record_drop(DropReason::CaptureFailed);

        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["frameCount"], 1);
        assert_eq!(json["captureFailed"], 1);
        assert!(json["msSinceLastFrame"].is_number());
    }
}
