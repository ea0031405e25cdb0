use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};

use crate::shared::errors::CaptureError;
use crate::shared::frame::{Frame, PixelLayout};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StillFormat {
    /// Lossy, quality 1-100.
    Jpeg(u8),
    Png,
}

impl StillFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            StillFormat::Jpeg(_) => "image/jpeg",
            StillFormat::Png => "image/png",
        }
    }
}

/// An encoded still image, ready to hand to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StillImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Encodes a frame with the `image` crate. JPEG drops any alpha channel.
pub fn encode_still(frame: &Frame, format: StillFormat) -> Result<StillImage, CaptureError> {
    let layout = frame.layout().ok_or_else(|| {
        CaptureError::Encode(format!("unsupported channel count {}", frame.channels()))
    })?;
    if frame.data().len() != frame.expected_len() {
        return Err(CaptureError::Encode(
            "frame buffer does not match its dimensions".into(),
        ));
    }

    let mut bytes = Vec::new();
    match format {
        StillFormat::Jpeg(quality) => {
            let rgb = match layout {
                PixelLayout::Rgb8 => frame.data().to_vec(),
                PixelLayout::Rgba8 => frame
                    .data()
                    .chunks_exact(4)
                    .flat_map(|px| [px[0], px[1], px[2]])
                    .collect(),
            };
            JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
                .write_image(&rgb, frame.width(), frame.height(), ExtendedColorType::Rgb8)
                .map_err(|e| CaptureError::Encode(e.to_string()))?;
        }
        StillFormat::Png => {
            let color = match layout {
                PixelLayout::Rgb8 => ExtendedColorType::Rgb8,
                PixelLayout::Rgba8 => ExtendedColorType::Rgba8,
            };
            image::write_buffer_with_format(
                &mut Cursor::new(&mut bytes),
                frame.data(),
                frame.width(),
                frame.height(),
                color,
                ImageFormat::Png,
            )
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
        }
    }

    Ok(StillImage {
        bytes,
        mime_type: format.mime_type(),
        width: frame.width(),
        height: frame.height(),
    })
}
