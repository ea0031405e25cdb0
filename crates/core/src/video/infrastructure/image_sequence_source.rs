use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::errors::{CaptureError, DeviceError};
use crate::shared::frame::Frame;
use crate::video::domain::frame_source::{FrameSource, SourceEvent};

/// Replays a list of image files as a frame stream.
///
/// With a fixed `frame_interval` frames are released on that cadence and
/// stamped `index * interval`; otherwise they are released as fast as they
/// decode and stamped with the elapsed time since `start`. Files that fail to
/// decode are skipped with a warning.
pub struct ImageSequenceSource {
    device_id: String,
    paths: Vec<PathBuf>,
    frame_interval: Option<Duration>,
    looping: bool,
    preview_width: Option<u32>,
    cursor: usize,
    emitted: usize,
    started_at: Option<Instant>,
    current: Option<PathBuf>,
}

impl ImageSequenceSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        let device_id = match paths.first().and_then(|p| p.parent()) {
            Some(dir) => format!("images:{}", dir.display()),
            None => "images:".to_string(),
        };
        Self {
            device_id,
            paths,
            frame_interval: None,
            looping: false,
            preview_width: None,
            cursor: 0,
            emitted: 0,
            started_at: None,
            current: None,
        }
    }

    /// All images in `dir` with a known extension, in file-name order.
    pub fn from_dir(dir: &Path) -> Result<Self, DeviceError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| DeviceError::Unavailable(format!("{}: {e}", dir.display())))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_image(p))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(DeviceError::Unavailable(format!(
                "no images found in {}",
                dir.display()
            )));
        }
        let mut source = Self::new(paths);
        source.device_id = format!("images:{}", dir.display());
        Ok(source)
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Downscale streamed frames to this width; stills stay full size.
    pub fn with_preview_width(mut self, width: u32) -> Self {
        self.preview_width = Some(width);
        self
    }

    fn next_path(&mut self) -> Option<PathBuf> {
        if self.cursor >= self.paths.len() {
            if !self.looping || self.paths.is_empty() {
                return None;
            }
            self.cursor = 0;
        }
        let path = self.paths[self.cursor].clone();
        self.cursor += 1;
        Some(path)
    }

    fn timestamp(&self, started_at: Instant) -> Duration {
        match self.frame_interval {
            Some(interval) => interval * self.emitted as u32,
            None => started_at.elapsed(),
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn decode(path: &Path, index: usize) -> Result<Frame, image::ImageError> {
    let img = image::open(path)?.to_rgb8();
    let (width, height) = img.dimensions();
    Ok(Frame::new(img.into_raw(), width, height, 3, index))
}

/// Resize to `target_width`, keeping aspect ratio. Never upscales.
pub(crate) fn downscale_to_width(frame: Frame, target_width: u32) -> Frame {
    if target_width == 0 || frame.width() <= target_width || frame.channels() != 3 {
        return frame;
    }
    let target_height =
        ((frame.height() as u64 * target_width as u64) / frame.width() as u64).max(1) as u32;
    let Some(img) = image::RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
    else {
        return frame;
    };
    let resized = image::imageops::resize(
        &img,
        target_width,
        target_height,
        image::imageops::FilterType::Triangle,
    );
    Frame::new(resized.into_raw(), target_width, target_height, 3, frame.index())
        .with_timestamp(frame.timestamp())
}

impl FrameSource for ImageSequenceSource {
    fn device_id(&self) -> String {
        self.device_id.clone()
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if self.paths.is_empty() {
            return Err(DeviceError::Unavailable("image sequence is empty".into()));
        }
        self.cursor = 0;
        self.emitted = 0;
        self.current = None;
        self.started_at = Some(Instant::now());
        log::info!(
            "Image sequence started: {} file(s), device {}",
            self.paths.len(),
            self.device_id
        );
        Ok(())
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<SourceEvent, DeviceError> {
        let Some(started_at) = self.started_at else {
            return Err(DeviceError::Unavailable("source not started".into()));
        };

        if let Some(interval) = self.frame_interval {
            let due = started_at + interval * self.emitted as u32;
            let now = Instant::now();
            if due > now {
                let wait = due - now;
                if wait > timeout {
                    std::thread::sleep(timeout);
                    return Ok(SourceEvent::Idle);
                }
                std::thread::sleep(wait);
            }
        }

        // Skip undecodable files, but give up after one full pass.
        for _ in 0..self.paths.len().max(1) {
            let Some(path) = self.next_path() else {
                return Ok(SourceEvent::EndOfStream);
            };
            match decode(&path, self.emitted) {
                Ok(frame) => {
                    let frame = frame.with_timestamp(self.timestamp(started_at));
                    self.emitted += 1;
                    self.current = Some(path);
                    let frame = match self.preview_width {
                        Some(w) => downscale_to_width(frame, w),
                        None => frame,
                    };
                    return Ok(SourceEvent::Frame(frame));
                }
                Err(e) => log::warn!("Skipping {}: {e}", path.display()),
            }
        }
        Err(DeviceError::Unavailable(
            "no image in the sequence could be decoded".into(),
        ))
    }

    fn capture_still(&mut self) -> Result<Frame, CaptureError> {
        let Some(started_at) = self.started_at else {
            return Err(CaptureError::NotStarted);
        };
        let path = self
            .current
            .clone()
            .or_else(|| self.paths.first().cloned())
            .ok_or(CaptureError::NotStarted)?;
        let index = self.emitted.saturating_sub(1);
        decode(&path, index)
            .map(|f| f.with_timestamp(started_at.elapsed()))
            .map_err(|e| CaptureError::Denied(format!("{}: {e}", path.display())))
    }

    fn stop(&mut self) {
        if self.started_at.take().is_some() {
            log::info!("Image sequence stopped after {} frame(s)", self.emitted);
        }
        self.current = None;
    }
}
