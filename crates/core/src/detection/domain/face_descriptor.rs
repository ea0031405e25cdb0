use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::errors::GeometryError;

/// Face bounding box in normalized frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Shape of a detected face, normalized to `[0, 1]` in both axes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaceDescriptor {
    BoundingBox(NormalizedBox),
    /// Ordered outline points (e.g. a face-oval contour).
    Landmarks(Vec<(f64, f64)>),
}

impl FaceDescriptor {
    pub fn bounding_box(x: f64, y: f64, width: f64, height: f64) -> Self {
        FaceDescriptor::BoundingBox(NormalizedBox {
            x,
            y,
            width,
            height,
        })
    }

    /// Checks the normalized-range and non-zero-area invariants.
    ///
    /// Callers treat an invalid descriptor as "no face" for the frame.
    pub fn validate(&self) -> Result<(), GeometryError> {
        match self {
            FaceDescriptor::BoundingBox(b) => {
                for v in [b.x, b.y, b.width, b.height] {
                    check_unit(v)?;
                }
                if b.width <= 0.0 || b.height <= 0.0 {
                    return Err(GeometryError::ZeroArea);
                }
                Ok(())
            }
            FaceDescriptor::Landmarks(points) => {
                if points.len() < 3 {
                    return Err(GeometryError::TooFewPoints(points.len()));
                }
                for &(x, y) in points {
                    check_unit(x)?;
                    check_unit(y)?;
                }
                if outline_area(points) <= f64::EPSILON {
                    return Err(GeometryError::ZeroArea);
                }
                Ok(())
            }
        }
    }

    /// Horizontal extent as a fraction of frame width.
    pub fn normalized_width(&self) -> f64 {
        match self {
            FaceDescriptor::BoundingBox(b) => b.width,
            FaceDescriptor::Landmarks(points) => {
                let (min, max) = points
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(x, _)| {
                        (lo.min(x), hi.max(x))
                    });
                if points.is_empty() {
                    0.0
                } else {
                    max - min
                }
            }
        }
    }
}

fn check_unit(v: f64) -> Result<(), GeometryError> {
    if v.is_finite() && (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(GeometryError::OutOfRange(v))
    }
}

fn outline_area(points: &[(f64, f64)]) -> f64 {
    let mut twice = 0.0;
    for i in 0..points.len() {
        let (x0, y0) = points[i];
        let (x1, y1) = points[(i + 1) % points.len()];
        twice += x0 * y1 - x1 * y0;
    }
    (twice / 2.0).abs()
}

/// A single detector result.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceDetection {
    pub descriptor: FaceDescriptor,
    pub confidence: f32,
    /// Timestamp of the frame the detection was computed on.
    pub timestamp: Duration,
}

impl FaceDetection {
    pub fn new(descriptor: FaceDescriptor, confidence: f32, timestamp: Duration) -> Self {
        Self {
            descriptor,
            confidence,
            timestamp,
        }
    }
}
