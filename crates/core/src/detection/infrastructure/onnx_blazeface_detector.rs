//! BlazeFace (short-range) face detection on ONNX Runtime.
//!
//! Reports at most one face as a normalized bounding box: the highest
//! scoring candidate that survives suppression and whose width falls inside
//! the configured share of the frame width.
use std::cmp::Ordering;
use std::path::Path;

use ndarray::{s, Array4, Zip};

use crate::detection::domain::face_descriptor::{FaceDescriptor, FaceDetection};
use crate::detection::domain::face_detector::FaceDetector;
use crate::shared::constants::{MAX_FACE_SIZE, MIN_FACE_SIZE};
use crate::shared::errors::DetectorUnavailable;
use crate::shared::frame::Frame;

/// Side of the square network input, in pixels.
const INPUT_SIZE: usize = 128;

/// Values per anchor in the regressor output (box + six keypoints).
const REGRESSOR_STRIDE: usize = 16;

/// Candidates overlapping a better one by more than this are dropped.
const SUPPRESSION_IOU: f64 = 0.3;

/// Feature map stride and anchors per cell for each detection head.
const ANCHOR_LAYOUT: [(usize, usize); 2] = [(8, 2), (16, 6)];

type BoxedError = Box<dyn std::error::Error>;

pub struct OnnxBlazefaceDetector {
    session: ort::session::Session,
    threshold: f32,
    width_bounds: (f64, f64),
    anchors: Vec<(f32, f32)>,
}

impl OnnxBlazefaceDetector {
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, BoxedError> {
        let session = ort::session::Session::builder()?
            .with_execution_providers(execution_providers())?
            .commit_from_file(model_path)?;
        log::info!("BlazeFace ready ({})", model_path.display());
        Ok(Self {
            session,
            threshold: confidence as f32,
            width_bounds: (MIN_FACE_SIZE, MAX_FACE_SIZE),
            anchors: anchor_centres(),
        })
    }

    /// Accepted face width, as fractions of the frame width.
    pub fn with_face_size_bounds(mut self, min: f64, max: f64) -> Self {
        self.width_bounds = (min, max);
        self
    }

    fn candidates(&mut self, frame: &Frame) -> Result<Vec<Candidate>, BoxedError> {
        let input = ort::value::Tensor::from_array(to_input_tensor(frame)?)?;
        let outputs = self.session.run(ort::inputs![input])?;
        if outputs.len() < 2 {
            return Err(format!("BlazeFace produced {} outputs, need 2", outputs.len()).into());
        }

        let boxes = outputs[0].try_extract_array::<f32>()?;
        let logits = outputs[1].try_extract_array::<f32>()?;
        let boxes = boxes.as_slice().ok_or("regressor output is not contiguous")?;
        let logits = logits.as_slice().ok_or("score output is not contiguous")?;
        Ok(decode(&self.anchors, boxes, logits, self.threshold))
    }
}

#[allow(unused_mut)]
fn execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    let mut providers = Vec::new();
    #[cfg(target_os = "macos")]
    providers.push(ort::execution_providers::CoreMLExecutionProvider::default().build());
    #[cfg(target_os = "windows")]
    providers.push(ort::execution_providers::DirectMLExecutionProvider::default().build());
    providers
}

impl FaceDetector for OnnxBlazefaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Option<FaceDetection>, DetectorUnavailable> {
        let survivors = suppress(self.candidates(frame)?, SUPPRESSION_IOU);
        let (min, max) = self.width_bounds;
        Ok(survivors
            .into_iter()
            .find(|c| c.fits_width(min, max))
            .map(|c| c.into_detection(frame)))
    }
}

/// One decoded box in normalized `[x1, y1, x2, y2]` corners.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Candidate {
    corners: [f64; 4],
    score: f64,
}

impl Candidate {
    fn width(&self) -> f64 {
        self.corners[2] - self.corners[0]
    }

    fn height(&self) -> f64 {
        self.corners[3] - self.corners[1]
    }

    fn fits_width(&self, min: f64, max: f64) -> bool {
        (min..=max).contains(&self.width()) && self.height() > 0.0
    }

    fn iou(&self, other: &Candidate) -> f64 {
        let [ax1, ay1, ax2, ay2] = self.corners;
        let [bx1, by1, bx2, by2] = other.corners;
        let inter = (ax2.min(bx2) - ax1.max(bx1)).max(0.0) * (ay2.min(by2) - ay1.max(by1)).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.width() * self.height() + other.width() * other.height() - inter)
    }

    fn into_detection(self, frame: &Frame) -> FaceDetection {
        let [x1, y1, ..] = self.corners;
        FaceDetection::new(
            FaceDescriptor::bounding_box(x1, y1, self.width(), self.height()),
            self.score as f32,
            frame.timestamp(),
        )
    }
}

/// Turns per-anchor regressions and logits into candidates scoring at
/// least `threshold`, clamped to the unit square.
fn decode(anchors: &[(f32, f32)], boxes: &[f32], logits: &[f32], threshold: f32) -> Vec<Candidate> {
    let scale = INPUT_SIZE as f32;
    anchors
        .iter()
        .zip(logits)
        .zip(boxes.chunks_exact(REGRESSOR_STRIDE))
        .filter_map(|((&(ax, ay), &logit), reg)| {
            let score = 1.0 / (1.0 + (-logit).exp());
            if score < threshold {
                return None;
            }
            let (cx, cy) = (ax + reg[0] / scale, ay + reg[1] / scale);
            let (hw, hh) = (reg[2] / scale / 2.0, reg[3] / scale / 2.0);
            let corners = [cx - hw, cy - hh, cx + hw, cy + hh].map(|v| (v as f64).clamp(0.0, 1.0));
            Some(Candidate {
                corners,
                score: score as f64,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; survivors come back best first.
fn suppress(mut candidates: Vec<Candidate>, max_iou: f64) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    let mut survivors: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if survivors.iter().all(|kept| kept.iou(&candidate) <= max_iou) {
            survivors.push(candidate);
        }
    }
    survivors
}

/// Nearest-neighbour resample to `1×3×128×128` floats in `[0, 1]`.
/// Channels past the third are ignored.
fn to_input_tensor(frame: &Frame) -> Result<Array4<f32>, BoxedError> {
    if frame.channels() < 3 {
        return Err(format!("need RGB input, frame has {} channels", frame.channels()).into());
    }
    let pixels = frame
        .as_ndarray()
        .ok_or("frame buffer does not match its dimensions")?;
    let (h, w, _) = pixels.dim();
    if h == 0 || w == 0 {
        return Err("empty frame".into());
    }
    let sample = |i: usize, len: usize| ((2 * i + 1) * len / (2 * INPUT_SIZE)).min(len - 1);
    let rows: Vec<usize> = (0..INPUT_SIZE).map(|y| sample(y, h)).collect();
    let cols: Vec<usize> = (0..INPUT_SIZE).map(|x| sample(x, w)).collect();

    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for c in 0..3 {
        Zip::indexed(tensor.slice_mut(s![0, c, .., ..]))
            .for_each(|(y, x), v| *v = pixels[[rows[y], cols[x], c]] as f32 / 255.0);
    }
    Ok(tensor)
}

/// Cell centres of both heads, repeated once per anchor in the cell.
fn anchor_centres() -> Vec<(f32, f32)> {
    ANCHOR_LAYOUT
        .iter()
        .flat_map(|&(stride, per_cell)| {
            let grid = INPUT_SIZE / stride;
            (0..grid * grid).flat_map(move |cell| {
                let centre = |i: usize| (i as f32 + 0.5) / grid as f32;
                std::iter::repeat((centre(cell % grid), centre(cell / grid))).take(per_cell)
            })
        })
        .collect()
}
