use crate::detection::domain::face_descriptor::{FaceDescriptor, NormalizedBox};

pub const DEFAULT_ALPHA: f64 = 0.6;

/// EMA (Exponential Moving Average) smoother for a single face.
///
/// Formula: `ema[t] = alpha * current + (1 - alpha) * ema[t-1]`
///
/// Boxes are smoothed as `[cx, cy, half_w, half_h]`; landmark outlines
/// point by point. A change of descriptor kind or point count restarts the
/// average from the new observation.
pub struct DescriptorSmoother {
    alpha: f64,
    state: Option<FaceDescriptor>,
}

impl DescriptorSmoother {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, state: None }
    }

    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn smooth(&mut self, current: &FaceDescriptor) -> FaceDescriptor {
        let smoothed = match (&self.state, current) {
            (Some(FaceDescriptor::BoundingBox(prev)), FaceDescriptor::BoundingBox(cur)) => {
                FaceDescriptor::BoundingBox(self.smooth_box(prev, cur))
            }
            (Some(FaceDescriptor::Landmarks(prev)), FaceDescriptor::Landmarks(cur))
                if prev.len() == cur.len() =>
            {
                FaceDescriptor::Landmarks(
                    prev.iter()
                        .zip(cur)
                        .map(|(&(px, py), &(cx, cy))| (self.ema(cx, px), self.ema(cy, py)))
                        .collect(),
                )
            }
            _ => current.clone(),
        };
        self.state = Some(smoothed.clone());
        smoothed
    }

    fn smooth_box(&self, prev: &NormalizedBox, cur: &NormalizedBox) -> NormalizedBox {
        let p = box_params(prev);
        let c = box_params(cur);
        let mut s = [0.0; 4];
        for i in 0..4 {
            s[i] = self.ema(c[i], p[i]);
        }
        NormalizedBox {
            x: s[0] - s[2],
            y: s[1] - s[3],
            width: s[2] * 2.0,
            height: s[3] * 2.0,
        }
    }

    fn ema(&self, current: f64, prev: f64) -> f64 {
        self.alpha * current + (1.0 - self.alpha) * prev
    }
}

impl Default for DescriptorSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

fn box_params(b: &NormalizedBox) -> [f64; 4] {
    let half_w = b.width / 2.0;
    let half_h = b.height / 2.0;
    [b.x + half_w, b.y + half_h, half_w, half_h]
}
