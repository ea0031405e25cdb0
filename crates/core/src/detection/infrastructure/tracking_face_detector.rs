use crate::detection::domain::descriptor_smoother::DescriptorSmoother;
use crate::detection::domain::face_descriptor::FaceDetection;
use crate::detection::domain::face_detector::FaceDetector;
use crate::shared::errors::DetectorUnavailable;
use crate::shared::frame::Frame;

/// Decorator that carries the previous face forward as smoothing state,
/// reducing frame-to-frame jitter of the cutout.
///
/// Losing the face (or a detector failure) drops the history so a face that
/// reappears elsewhere is not dragged from its old position.
pub struct TrackingFaceDetector {
    inner: Box<dyn FaceDetector>,
    smoother: DescriptorSmoother,
}

impl TrackingFaceDetector {
    pub fn new(inner: Box<dyn FaceDetector>, smoother: DescriptorSmoother) -> Self {
        Self { inner, smoother }
    }
}

impl FaceDetector for TrackingFaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Option<FaceDetection>, DetectorUnavailable> {
        let result = match self.inner.detect(frame) {
            Ok(result) => result,
            Err(e) => {
                self.smoother.reset();
                return Err(e);
            }
        };
        match result {
            Some(mut detection) => {
                detection.descriptor = self.smoother.smooth(&detection.descriptor);
                Ok(Some(detection))
            }
            None => {
                self.smoother.reset();
                Ok(None)
            }
        }
    }
}
