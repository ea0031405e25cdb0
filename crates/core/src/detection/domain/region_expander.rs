use crate::detection::domain::face_descriptor::FaceDescriptor;
use crate::shared::errors::GeometryError;
use crate::shared::region::{vertex_mean, Region};

/// Turns a normalized face descriptor into a pixel-space region grown
/// outward by `scale` around its centre.
///
/// Boxes grow symmetrically: `newW = w * s`, `newX = x - (newW - w) / 2`
/// (likewise for height), then scale to pixels. Polygons are mapped to
/// pixels first and each point moves to `c + (p - c) * s`, where `c` is the
/// vertex mean. The result is not clipped to the frame.
pub fn expand(
    descriptor: &FaceDescriptor,
    scale: f64,
    frame_width: u32,
    frame_height: u32,
) -> Result<Region, GeometryError> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(GeometryError::InvalidScale(scale));
    }
    if frame_width == 0 || frame_height == 0 {
        return Err(GeometryError::EmptyFrame);
    }
    descriptor.validate()?;

    let fw = frame_width as f64;
    let fh = frame_height as f64;

    match descriptor {
        FaceDescriptor::BoundingBox(b) => {
            let new_w = b.width * scale;
            let new_h = b.height * scale;
            let new_x = b.x - (new_w - b.width) / 2.0;
            let new_y = b.y - (new_h - b.height) / 2.0;
            Ok(Region::rect(new_x * fw, new_y * fh, new_w * fw, new_h * fh))
        }
        FaceDescriptor::Landmarks(points) => {
            let pixels: Vec<(f64, f64)> = points.iter().map(|&(x, y)| (x * fw, y * fh)).collect();
            let (cx, cy) = vertex_mean(&pixels);
            Ok(Region::Polygon(
                pixels
                    .into_iter()
                    .map(|(x, y)| (cx + (x - cx) * scale, cy + (y - cy) * scale))
                    .collect(),
            ))
        }
    }
}
