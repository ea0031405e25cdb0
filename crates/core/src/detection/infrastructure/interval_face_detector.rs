use std::time::Duration;

use crate::detection::domain::face_descriptor::FaceDetection;
use crate::detection::domain::face_detector::FaceDetector;
use crate::shared::errors::DetectorUnavailable;
use crate::shared::frame::Frame;

/// Decorator that runs the inner detector at most once per `interval` of
/// frame time, reusing the last result for frames in between.
///
/// Frame timestamps going backwards (a restarted or looping source) force a
/// fresh detection.
pub struct IntervalFaceDetector {
    inner: Box<dyn FaceDetector>,
    interval: Duration,
    last_run: Option<Duration>,
    last_result: Option<FaceDetection>,
}

impl IntervalFaceDetector {
    pub fn new(inner: Box<dyn FaceDetector>, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_run: None,
            last_result: None,
        }
    }

    fn is_due(&self, now: Duration) -> bool {
        match self.last_run {
            None => true,
            Some(last) => now < last || now - last >= self.interval,
        }
    }
}

impl FaceDetector for IntervalFaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Option<FaceDetection>, DetectorUnavailable> {
        let now = frame.timestamp();
        if !self.is_due(now) {
            return Ok(self.last_result.clone());
        }
        match self.inner.detect(frame) {
            Ok(result) => {
                self.last_run = Some(now);
                self.last_result = result.clone();
                Ok(result)
            }
            Err(e) => {
                self.last_run = None;
                self.last_result = None;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_descriptor::FaceDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingDetector {
        calls: Arc<AtomicUsize>,
    }

    impl FaceDetector for CountingDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Option<FaceDetection>, DetectorUnavailable> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(FaceDetection::new(
                FaceDescriptor::bounding_box(0.1 * (n % 5) as f64, 0.1, 0.3, 0.3),
                0.9,
                frame.timestamp(),
            )))
        }
    }

    struct FailingDetector;

    impl FaceDetector for FailingDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Option<FaceDetection>, DetectorUnavailable> {
            Err(DetectorUnavailable::new("boom"))
        }
    }

    fn frame_at(ms: u64) -> Frame {
        Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, 3, ms as usize)
            .with_timestamp(Duration::from_millis(ms))
    }

    fn counting() -> (IntervalFaceDetector, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = CountingDetector {
            calls: calls.clone(),
        };
        (
            IntervalFaceDetector::new(Box::new(inner), Duration::from_millis(100)),
            calls,
        )
    }

    #[test]
    fn test_reuses_result_within_interval() {
        let (mut detector, calls) = counting();
        let first = detector.detect(&frame_at(0)).unwrap();
        let second = detector.detect(&frame_at(33)).unwrap();
        let third = detector.detect(&frame_at(66)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_runs_again_after_interval() {
        let (mut detector, calls) = counting();
        detector.detect(&frame_at(0)).unwrap();
        detector.detect(&frame_at(99)).unwrap();
        detector.detect(&frame_at(100)).unwrap();
        detector.detect(&frame_at(150)).unwrap();
        detector.detect(&frame_at(200)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_interval_runs_every_frame() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = CountingDetector {
            calls: calls.clone(),
        };
        let mut detector = IntervalFaceDetector::new(Box::new(inner), Duration::ZERO);
        for ms in [0, 0, 10, 20] {
            detector.detect(&frame_at(ms)).unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_backwards_timestamp_forces_detection() {
        let (mut detector, calls) = counting();
        detector.detect(&frame_at(500)).unwrap();
        detector.detect(&frame_at(10)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_error_is_propagated_and_not_cached() {
        let mut detector =
            IntervalFaceDetector::new(Box::new(FailingDetector), Duration::from_millis(100));
        assert!(detector.detect(&frame_at(0)).is_err());
        assert!(detector.detect(&frame_at(10)).is_err());
    }
}
