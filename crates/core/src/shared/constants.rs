pub const BLAZEFACE_MODEL_NAME: &str = "blazeface_128.onnx";

/// Outward growth applied to the detected face before cutting it out.
pub const DEFAULT_EXPANSION_SCALE: f64 = 1.2;
/// Gaussian sigma, in pixels, of the background blur.
pub const DEFAULT_BLUR_RADIUS: f32 = 12.0;
/// Multiplier applied to blurred background colour channels.
pub const DEFAULT_BRIGHTNESS: f32 = 0.8;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_MIN_DETECTION_CONFIDENCE: f32 = 0.6;
pub const MAX_FACES: usize = 1;
pub const DEFAULT_PRESENCE_DEBOUNCE: u32 = 1;
pub const DEFAULT_CAPTURE_QUALITY: u8 = 90;
pub const DEFAULT_FRAME_TIMEOUT_MS: u64 = 500;

/// Faces narrower than this fraction of the frame width are ignored.
pub const MIN_FACE_SIZE: f64 = 0.1;
/// Faces wider than this fraction of the frame width are ignored.
pub const MAX_FACE_SIZE: f64 = 0.8;

pub const PREVIEW_WIDTH: u32 = 640;
pub const PREVIEW_HEIGHT: u32 = 480;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
