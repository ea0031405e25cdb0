use std::collections::BTreeMap;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::Deserialize;

use crate::detection::domain::face_descriptor::{FaceDescriptor, FaceDetection};
use crate::detection::domain::face_detector::FaceDetector;
use crate::shared::errors::DetectorUnavailable;
use crate::shared::frame::Frame;

/// Start index of each edge of the face-mesh oval contour, in drawing order.
pub const FACE_OVAL: [usize; 36] = [
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152,
    148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109,
];

/// Smallest landmark set that is treated as a full face mesh.
const FACE_MESH_POINTS: usize = 468;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Region assumed for a `hasFace: true` report when the renderer has not
/// sent any geometry yet: a centred portrait box, so presence still flips
/// and the background stays blurred.
pub fn assumed_face() -> FaceDescriptor {
    FaceDescriptor::bounding_box(0.3, 0.2, 0.4, 0.6)
}

#[derive(Debug, Deserialize)]
struct Landmark {
    x: f64,
    y: f64,
}

/// JSON messages posted by the embedded renderer, tagged by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum RendererMessage {
    FaceResults {
        #[serde(default)]
        frame: Option<usize>,
        #[serde(rename = "multiFaceLandmarks", default)]
        multi_face_landmarks: Vec<Vec<Landmark>>,
        #[serde(default)]
        score: Option<f32>,
    },
    FaceDetected {
        #[serde(default)]
        frame: Option<usize>,
        #[serde(rename = "hasFace")]
        has_face: bool,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

/// Outcome for one frame as reported by the renderer.
#[derive(Debug, Clone)]
enum RendererResult {
    Face(FaceDescriptor, f32),
    NoFace,
}

/// Host-side handle used to post raw renderer messages.
#[derive(Clone)]
pub struct RendererBridge {
    tx: Sender<String>,
}

impl RendererBridge {
    /// Returns `false` once the detector has been dropped.
    pub fn post(&self, message: impl Into<String>) -> bool {
        self.tx.send(message.into()).is_ok()
    }
}

/// Detector for the embedded-renderer backend.
///
/// The renderer runs its own landmark model and posts results as JSON; this
/// detector matches them to frames by frame index. Results for frames older
/// than the one being processed are discarded. Messages without a frame
/// index apply to whichever frame is current, unless an indexed result for
/// that frame or a later one has already arrived.
///
/// A bare `{"type":"faceDetected","hasFace":true}` carries no geometry; it
/// reuses the outline from the most recent `faceResults` that found a face,
/// or [`assumed_face`] when there is none.
pub struct RendererMessageDetector {
    rx: Receiver<String>,
    pending: BTreeMap<usize, RendererResult>,
    unindexed: Option<RendererResult>,
    last_outline: Option<(FaceDescriptor, f32)>,
    response_timeout: Duration,
    failure: Option<String>,
}

impl RendererMessageDetector {
    pub fn new(response_timeout: Duration) -> (Self, RendererBridge) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let detector = Self {
            rx,
            pending: BTreeMap::new(),
            unindexed: None,
            last_outline: None,
            response_timeout,
            failure: None,
        };
        (detector, RendererBridge { tx })
    }

    fn ingest(&mut self, raw: &str) {
        let message = match serde_json::from_str::<RendererMessage>(raw) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Ignoring malformed renderer message: {e}");
                return;
            }
        };
        match message {
            RendererMessage::FaceResults {
                frame,
                multi_face_landmarks,
                score,
            } => {
                let result = multi_face_landmarks
                    .first()
                    .and_then(|landmarks| face_outline(landmarks))
                    .map(|d| RendererResult::Face(d, score.unwrap_or(1.0)))
                    .unwrap_or(RendererResult::NoFace);
                self.last_outline = match &result {
                    RendererResult::Face(descriptor, confidence) => {
                        Some((descriptor.clone(), *confidence))
                    }
                    RendererResult::NoFace => None,
                };
                self.store(frame, result);
            }
            RendererMessage::FaceDetected {
                frame,
                has_face: false,
            } => self.store(frame, RendererResult::NoFace),
            RendererMessage::FaceDetected {
                frame,
                has_face: true,
            } => {
                let (descriptor, confidence) = self.last_outline.clone().unwrap_or_else(|| {
                    log::debug!("Renderer reported a face before any geometry");
                    (assumed_face(), 1.0)
                });
                self.store(frame, RendererResult::Face(descriptor, confidence));
            }
            RendererMessage::Error { message } => {
                log::warn!("Renderer reported an error: {message}");
                self.failure = Some(message);
            }
            RendererMessage::Unknown => log::debug!("Ignoring unknown renderer message type"),
        }
    }

    fn store(&mut self, frame: Option<usize>, result: RendererResult) {
        match frame {
            Some(index) => {
                self.pending.insert(index, result);
            }
            None => self.unindexed = Some(result),
        }
    }

    /// Drops results for frames before `index`.
    fn discard_stale(&mut self, index: usize) {
        let stale = self.pending.len();
        self.pending = self.pending.split_off(&index);
        let dropped = stale - self.pending.len();
        if dropped > 0 {
            log::debug!("Discarded {dropped} stale renderer result(s) before frame {index}");
        }
    }

    /// Call after `discard_stale`, so every pending entry is for `index` or
    /// later. Any such entry supersedes the unindexed result.
    fn take_result(&mut self, index: usize) -> Option<RendererResult> {
        let unindexed = self.unindexed.take();
        match self.pending.remove(&index) {
            Some(result) => Some(result),
            None if self.pending.is_empty() => unindexed,
            None => None,
        }
    }
}

impl FaceDetector for RendererMessageDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Option<FaceDetection>, DetectorUnavailable> {
        let index = frame.index();
        let mut disconnected = false;

        loop {
            match self.rx.try_recv() {
                Ok(raw) => self.ingest(&raw),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        if !disconnected && !self.pending.contains_key(&index) && self.unindexed.is_none() {
            match self.rx.recv_timeout(self.response_timeout) {
                Ok(raw) => self.ingest(&raw),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => disconnected = true,
            }
        }

        if let Some(reason) = self.failure.take() {
            return Err(DetectorUnavailable::new(format!("renderer error: {reason}")));
        }

        self.discard_stale(index);
        let result = self.take_result(index);

        if result.is_none() && disconnected && self.pending.is_empty() {
            return Err(DetectorUnavailable::new("renderer disconnected"));
        }

        Ok(match result {
            Some(RendererResult::Face(descriptor, confidence)) => Some(FaceDetection::new(
                descriptor,
                confidence,
                frame.timestamp(),
            )),
            Some(RendererResult::NoFace) | None => None,
        })
    }
}

/// Reduces a full face mesh to its oval contour; shorter point lists are
/// taken as an outline already. Coordinates are clamped into `[0, 1]`.
fn face_outline(landmarks: &[Landmark]) -> Option<FaceDescriptor> {
    let clamp = |l: &Landmark| (l.x.clamp(0.0, 1.0), l.y.clamp(0.0, 1.0));
    let points: Vec<(f64, f64)> = if landmarks.len() >= FACE_MESH_POINTS {
        FACE_OVAL.iter().map(|&i| clamp(&landmarks[i])).collect()
    } else {
        landmarks.iter().map(clamp).collect()
    };
    let descriptor = FaceDescriptor::Landmarks(points);
    match descriptor.validate() {
        Ok(()) => Some(descriptor),
        Err(e) => {
            log::debug!("Renderer outline rejected: {e}");
            None
        }
    }
}
