use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-session counters, shared between the pipeline thread, the detection
/// worker and the host.
#[derive(Debug, Default)]
pub struct Diagnostics {
    frames_received: AtomicU64,
    frames_presented: AtomicU64,
    stale_frames_dropped: AtomicU64,
    compositing_failures: AtomicU64,
    geometry_failures: AtomicU64,
    detector_failures: AtomicU64,
    sink_failures: AtomicU64,
    detection_nanos: AtomicU64,
    detection_runs: AtomicU64,
    compositing_nanos: AtomicU64,
    compositing_runs: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiagnosticsSnapshot {
    pub frames_received: u64,
    pub frames_presented: u64,
    pub stale_frames_dropped: u64,
    pub compositing_failures: u64,
    pub geometry_failures: u64,
    pub detector_failures: u64,
    pub sink_failures: u64,
    pub mean_detection_time: Option<Duration>,
    pub mean_compositing_time: Option<Duration>,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn mean(nanos: &AtomicU64, runs: &AtomicU64) -> Option<Duration> {
    let runs = runs.load(Ordering::Relaxed);
    (runs > 0).then(|| Duration::from_nanos(nanos.load(Ordering::Relaxed) / runs))
}

fn saturating_nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_received(&self) {
        bump(&self.frames_received);
    }

    pub fn frame_presented(&self) {
        bump(&self.frames_presented);
    }

    pub fn stale_frame_dropped(&self) {
        bump(&self.stale_frames_dropped);
    }

    pub fn stale_frames_dropped_by(&self, count: u64) {
        self.stale_frames_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn compositing_failed(&self) {
        bump(&self.compositing_failures);
    }

    pub fn geometry_failed(&self) {
        bump(&self.geometry_failures);
    }

    pub fn detector_failed(&self) {
        bump(&self.detector_failures);
    }

    pub fn sink_failed(&self) {
        bump(&self.sink_failures);
    }

    pub fn detection_timed(&self, elapsed: Duration) {
        self.detection_nanos
            .fetch_add(saturating_nanos(elapsed), Ordering::Relaxed);
        bump(&self.detection_runs);
    }

    pub fn compositing_timed(&self, elapsed: Duration) {
        self.compositing_nanos
            .fetch_add(saturating_nanos(elapsed), Ordering::Relaxed);
        bump(&self.compositing_runs);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_presented: self.frames_presented.load(Ordering::Relaxed),
            stale_frames_dropped: self.stale_frames_dropped.load(Ordering::Relaxed),
            compositing_failures: self.compositing_failures.load(Ordering::Relaxed),
            geometry_failures: self.geometry_failures.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            mean_detection_time: mean(&self.detection_nanos, &self.detection_runs),
            mean_compositing_time: mean(&self.compositing_nanos, &self.compositing_runs),
        }
    }
}

impl DiagnosticsSnapshot {
    /// One-line summary for the end-of-session log.
    pub fn summary(&self) -> String {
        let ms = |d: Option<Duration>| {
            d.map_or_else(|| "-".to_string(), |d| format!("{:.1}ms", d.as_secs_f64() * 1000.0))
        };
        format!(
            "{} frames received, {} presented, {} stale, {} compositing / {} geometry / {} detector / {} sink failures, detect {} composite {}",
            self.frames_received,
            self.frames_presented,
            self.stale_frames_dropped,
            self.compositing_failures,
            self.geometry_failures,
            self.detector_failures,
            self.sink_failures,
            ms(self.mean_detection_time),
            ms(self.mean_compositing_time),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let diag = Diagnostics::new();
        diag.frame_received();
        diag.frame_received();
        diag.frame_presented();
        diag.stale_frame_dropped();
        diag.stale_frames_dropped_by(3);
        diag.compositing_failed();
        diag.geometry_failed();
        diag.detector_failed();

        let snap = diag.snapshot();
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.frames_presented, 1);
        assert_eq!(snap.stale_frames_dropped, 4);
        assert_eq!(snap.compositing_failures, 1);
        assert_eq!(snap.geometry_failures, 1);
        assert_eq!(snap.detector_failures, 1);
        assert_eq!(snap.sink_failures, 0);
    }

    #[test]
    fn test_mean_timings() {
        let diag = Diagnostics::new();
        assert_eq!(diag.snapshot().mean_detection_time, None);

        diag.detection_timed(Duration::from_millis(10));
        diag.detection_timed(Duration::from_millis(30));
        assert_eq!(
            diag.snapshot().mean_detection_time,
            Some(Duration::from_millis(20))
        );
    }

    #[test]
    fn test_summary_mentions_counts() {
        let diag = Diagnostics::new();
        diag.frame_received();
        diag.compositing_timed(Duration::from_millis(4));
        let summary = diag.snapshot().summary();
        assert!(summary.starts_with("1 frames received, 0 presented"));
        assert!(summary.ends_with("detect - composite 4.0ms"));
    }
}
