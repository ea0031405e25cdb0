use std::path::{Path, PathBuf};

use crate::shared::frame::{Frame, PixelLayout};
use crate::video::domain::frame_sink::FrameSink;

/// Writes each presented frame to `<dir>/frame_<index>.<ext>` using the
/// `image` crate. The format follows the extension (png by default).
pub struct ImageFileSink {
    dir: PathBuf,
    extension: String,
    written: usize,
}

impl ImageFileSink {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            extension: "png".into(),
            written: 0,
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn path_for(&self, frame: &Frame) -> PathBuf {
        self.dir
            .join(format!("frame_{:06}.{}", frame.index(), self.extension))
    }
}

impl FrameSink for ImageFileSink {
    fn present(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(frame);
        let data = frame.data().to_vec();

        match frame.layout() {
            Some(PixelLayout::Rgb8) => image::RgbImage::from_raw(frame.width(), frame.height(), data)
                .ok_or("Failed to create image from frame data")?
                .save(&path)?,
            Some(PixelLayout::Rgba8) => {
                image::RgbaImage::from_raw(frame.width(), frame.height(), data)
                    .ok_or("Failed to create image from frame data")?
                    .save(&path)?
            }
            None => return Err(format!("unsupported channel count {}", frame.channels()).into()),
        }
        self.written += 1;
        Ok(())
    }
}
