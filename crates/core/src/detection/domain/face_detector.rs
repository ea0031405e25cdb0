use crate::detection::domain::face_descriptor::FaceDetection;
use crate::shared::errors::DetectorUnavailable;
use crate::shared::frame::Frame;

/// Domain interface for face detection.
///
/// Yields at most one face per frame: the most confident candidate.
/// Implementations may be stateful (e.g., smoothing across frames),
/// hence `&mut self`.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Option<FaceDetection>, DetectorUnavailable>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Option<FaceDetection>, DetectorUnavailable> {
        (**self).detect(frame)
    }
}
