use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::detection::domain::face_descriptor::{FaceDescriptor, FaceDetection};
use crate::detection::domain::face_detector::FaceDetector;
use crate::shared::errors::DetectorUnavailable;
use crate::shared::frame::Frame;

/// Replays pre-recorded detections by frame index.
///
/// Frames without an entry report no face. Returned detections carry the
/// timestamp of the frame they are replayed onto.
pub struct ReplayFaceDetector {
    recorded: Arc<HashMap<usize, (FaceDescriptor, f32)>>,
}

#[derive(Deserialize)]
struct RecordedFace {
    frame: usize,
    face: FaceDescriptor,
    confidence: f32,
}

impl ReplayFaceDetector {
    pub fn new(recorded: Arc<HashMap<usize, (FaceDescriptor, f32)>>) -> Self {
        Self { recorded }
    }

    /// Parses a JSON array of `{"frame", "face", "confidence"}` records,
    /// e.g. `{"frame": 3, "face": {"boundingBox": {"x": 0.4, "y": 0.3,
    /// "width": 0.2, "height": 0.3}}, "confidence": 0.9}`. A later record for
    /// the same frame replaces an earlier one.
    pub fn from_json(json: &str) -> Result<Self, DetectorUnavailable> {
        let records: Vec<RecordedFace> = serde_json::from_str(json)
            .map_err(|e| DetectorUnavailable::new(format!("invalid recorded detections: {e}")))?;
        let recorded = records
            .into_iter()
            .map(|r| (r.frame, (r.face, r.confidence)))
            .collect();
        Ok(Self::new(Arc::new(recorded)))
    }
}

impl FaceDetector for ReplayFaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Option<FaceDetection>, DetectorUnavailable> {
        Ok(self
            .recorded
            .get(&frame.index())
            .map(|(descriptor, confidence)| {
                FaceDetection::new(descriptor.clone(), *confidence, frame.timestamp())
            }))
    }
}
