use std::cell::RefCell;

use crate::blurring::domain::frame_compositor::FrameCompositor;
use crate::shared::constants::{DEFAULT_BLUR_RADIUS, DEFAULT_BRIGHTNESS};
use crate::shared::errors::CompositingError;
use crate::shared::frame::{Frame, PixelLayout};
use crate::shared::region::Region;

use super::clip_mask::ClipMask;
use super::gaussian;

/// CPU compositor: blurred, dimmed background with a sharp cutout.
///
/// Two independent passes. The whole frame is blurred (sigma = blur radius)
/// and its colour channels scaled by `brightness` into a new buffer; then
/// the region is rasterised and original pixels are copied back inside it.
/// Alpha is carried through from the source unchanged.
pub struct CutoutCompositor {
    brightness: f32,
    kernel: Vec<f32>,
    scale: usize,
    small_kernel: Vec<f32>,
    blur_temp: RefCell<Vec<f32>>,
}

impl CutoutCompositor {
    pub fn new(blur_radius: f32, brightness: f32) -> Self {
        let scale = gaussian::downscale_factor(blur_radius);
        Self {
            brightness,
            kernel: gaussian::gaussian_kernel_1d(blur_radius),
            scale,
            small_kernel: gaussian::gaussian_kernel_1d(blur_radius / scale as f32),
            blur_temp: RefCell::new(Vec::new()),
        }
    }

    fn filter_background(&self, data: &mut [u8], width: usize, height: usize, layout: PixelLayout) {
        let channels = layout.channels() as usize;
        let mut temp = self.blur_temp.borrow_mut();
        gaussian::blur_in_place(
            data,
            width,
            height,
            channels,
            &self.kernel,
            &self.small_kernel,
            self.scale,
            &mut temp,
        );
        if (self.brightness - 1.0).abs() > f32::EPSILON {
            for px in data.chunks_exact_mut(channels) {
                for v in &mut px[..3] {
                    *v = (*v as f32 * self.brightness).round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
}

impl Default for CutoutCompositor {
    fn default() -> Self {
        Self::new(DEFAULT_BLUR_RADIUS, DEFAULT_BRIGHTNESS)
    }
}

impl FrameCompositor for CutoutCompositor {
    fn composite(&self, frame: &Frame, region: Option<&Region>) -> Result<Frame, CompositingError> {
        let layout = frame
            .layout()
            .ok_or(CompositingError::UnsupportedLayout(frame.channels()))?;
        let expected = frame.expected_len();
        if frame.data().len() != expected {
            return Err(CompositingError::BufferMismatch {
                expected,
                actual: frame.data().len(),
            });
        }

        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let channels = layout.channels() as usize;
        let source = frame.data();

        let mask = region.map(|r| ClipMask::rasterize(r, width, height));
        if mask.as_ref().is_some_and(ClipMask::covers_everything) {
            return Ok(frame.with_data(source.to_vec()));
        }

        let mut out = source.to_vec();
        self.filter_background(&mut out, width, height, layout);

        if layout == PixelLayout::Rgba8 {
            for (dst, src) in out.chunks_exact_mut(4).zip(source.chunks_exact(4)) {
                dst[3] = src[3];
            }
        }

        if let Some(mask) = &mask {
            let stride = width * channels;
            for y in 0..height {
                for (x0, x1) in mask.runs(y) {
                    let span = y * stride + x0 * channels..y * stride + x1 * channels;
                    out[span.clone()].copy_from_slice(&source[span]);
                }
            }
        }

        Ok(frame.with_data(out))
    }
}
