use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::RecvTimeoutError;

use sharpface_core::detection::domain::face_detector::FaceDetector;
use sharpface_core::detection::infrastructure::model_resolver::{self, ModelLocation};
use sharpface_core::detection::infrastructure::onnx_blazeface_detector::OnnxBlazefaceDetector;
use sharpface_core::detection::infrastructure::renderer_message_detector::{
    RendererMessageDetector, DEFAULT_RESPONSE_TIMEOUT,
};
use sharpface_core::detection::infrastructure::replay_face_detector::ReplayFaceDetector;
use sharpface_core::pipeline::backend::Backend;
use sharpface_core::pipeline::session::Session;
use sharpface_core::pipeline::session_config::SessionConfig;
use sharpface_core::pipeline::session_observer::{ChannelObserver, SessionEvent};
use sharpface_core::shared::constants::{BLAZEFACE_MODEL_NAME, MAX_FACE_SIZE, MIN_FACE_SIZE};
use sharpface_core::shared::errors::DetectorUnavailable;
use sharpface_core::video::domain::frame_source::FrameSource;
use sharpface_core::video::infrastructure::image_file_sink::ImageFileSink;
use sharpface_core::video::infrastructure::image_sequence_source::ImageSequenceSource;

const EVENT_POLL: Duration = Duration::from_millis(100);

/// Blurs everything but the face in a camera feed or image sequence.
#[derive(Parser)]
#[command(name = "sharpface")]
struct Cli {
    /// Directory of images to replay as the frame stream.
    input: Option<PathBuf>,

    /// Capture from this camera index instead of an image directory.
    #[cfg(feature = "camera-nokhwa")]
    #[arg(long)]
    camera: Option<u32>,

    /// Directory that receives the composited frames.
    #[arg(long, short)]
    output: PathBuf,

    /// JSON session config (camelCase keys). Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// native-detector, embedded-renderer or direct-media-stream.
    #[arg(long)]
    backend: Option<Backend>,

    /// Outward growth of the sharp face region (e.g. 1.2).
    #[arg(long)]
    expansion_scale: Option<f64>,

    /// Gaussian sigma of the background blur, in pixels.
    #[arg(long)]
    blur_radius: Option<f32>,

    /// Background brightness multiplier (0.0-1.0).
    #[arg(long)]
    brightness: Option<f32>,

    /// Minimum detection confidence (0.0-1.0).
    #[arg(long)]
    min_confidence: Option<f32>,

    /// Confirmations needed to flip face presence; 1 flips on the first
    /// contradicting frame, N > 1 on frame N + 1 of an unbroken run.
    #[arg(long)]
    debounce: Option<u32>,

    /// Frame polling interval for the native-detector backend.
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Run the detector at most once per interval.
    #[arg(long)]
    detection_interval_ms: Option<u64>,

    /// Smooth the face region across frames.
    #[arg(long)]
    tracking: bool,

    /// Replay the image directory at this cadence instead of as fast as possible.
    #[arg(long)]
    frame_interval_ms: Option<u64>,

    /// Restart the image sequence when it runs out.
    #[arg(long = "loop")]
    looping: bool,

    /// Stop after this many seconds.
    #[arg(long)]
    duration: Option<f64>,

    /// BlazeFace ONNX model. Resolved from the cache or ./models when omitted.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Download URL used when the model is not cached.
    #[arg(long)]
    model_url: Option<String>,

    /// Replay recorded detections (JSON) instead of running the model.
    #[arg(long, conflicts_with_all = ["model", "model_url"])]
    detections: Option<PathBuf>,

    /// JSON-lines file of renderer result messages (embedded-renderer backend).
    #[arg(long)]
    renderer_messages: Option<PathBuf>,

    /// Write a JPEG still here when a face is first detected.
    #[arg(long)]
    capture: Option<PathBuf>,

    /// Capture the composited output instead of the raw still.
    #[arg(long, requires = "capture")]
    capture_composited: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    validate(&cli, &config)?;

    let source = build_source(&cli)?;
    let detector = build_detector(&cli, &config);
    let sink = Box::new(ImageFileSink::new(&cli.output));
    let (event_tx, events) = crossbeam_channel::unbounded();

    let mut session = Session::new(
        config,
        source,
        detector,
        sink,
        Box::new(ChannelObserver::new(event_tx)),
    )?;
    session.start()?;

    let deadline = cli
        .duration
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs));
    let mut captured = false;
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match events.recv_timeout(EVENT_POLL) {
            Ok(SessionEvent::FaceDetected(descriptor)) => {
                log::info!("Face detected: {descriptor:?}");
                if !captured {
                    if let Some(path) = &cli.capture {
                        captured = true;
                        write_capture(&session, path, cli.capture_composited);
                    }
                }
            }
            Ok(SessionEvent::FaceLost) => log::info!("Face lost"),
            Ok(SessionEvent::Error(err)) => log::warn!("{err}"),
            Err(RecvTimeoutError::Timeout) => {
                if !session.is_running() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    session.stop();

    let diagnostics = session.diagnostics();
    log::info!(
        "Wrote {} frames to {}",
        diagnostics.frames_presented,
        cli.output.display()
    );
    Ok(())
}

fn write_capture(session: &Session, path: &Path, composited: bool) {
    let still = if composited {
        session.capture_composited()
    } else {
        session.capture()
    };
    match still.map(|image| (fs::write(path, &image.bytes), image)) {
        Ok((Ok(()), image)) => log::info!(
            "Captured {}x{} {} to {}",
            image.width,
            image.height,
            image.mime_type,
            path.display()
        ),
        Ok((Err(err), _)) => log::warn!("Failed to write {}: {err}", path.display()),
        Err(err) => log::warn!("Capture failed: {err}"),
    }
}

fn build_config(cli: &Cli) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(scale) = cli.expansion_scale {
        config.expansion_scale = scale;
    }
    if let Some(radius) = cli.blur_radius {
        config.blur_radius = radius;
    }
    if let Some(brightness) = cli.brightness {
        config.brightness = brightness;
    }
    if let Some(confidence) = cli.min_confidence {
        config.min_detection_confidence = confidence;
    }
    if let Some(debounce) = cli.debounce {
        config.presence_debounce = debounce;
    }
    if let Some(ms) = cli.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(ms) = cli.detection_interval_ms {
        config.detection_interval_ms = ms;
    }
    config.tracking_enabled |= cli.tracking;
    Ok(config)
}

fn validate(cli: &Cli, config: &SessionConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    #[cfg(feature = "camera-nokhwa")]
    let has_camera = cli.camera.is_some();
    #[cfg(not(feature = "camera-nokhwa"))]
    let has_camera = false;

    match (&cli.input, has_camera) {
        (Some(_), true) => return Err("Pass either an input directory or --camera, not both".into()),
        (None, false) => return Err("An input directory is required".into()),
        (Some(dir), false) if !dir.is_dir() => {
            return Err(format!("Input directory not found: {}", dir.display()).into())
        }
        _ => {}
    }
    if config.backend == Backend::EmbeddedRenderer && cli.renderer_messages.is_none() {
        return Err("--renderer-messages is required for the embedded-renderer backend".into());
    }
    if let Some(path) = &cli.renderer_messages {
        if !path.is_file() {
            return Err(format!("Renderer messages not found: {}", path.display()).into());
        }
    }
    for (what, path) in [("Model file", &cli.model), ("Detections file", &cli.detections)] {
        if let Some(path) = path {
            if !path.is_file() {
                return Err(format!("{what} not found: {}", path.display()).into());
            }
        }
    }
    if let Some(secs) = cli.duration {
        if !(secs.is_finite() && secs > 0.0) {
            return Err(format!("Duration must be positive, got {secs}").into());
        }
    }
    Ok(())
}

fn build_source(cli: &Cli) -> Result<Box<dyn FrameSource>, Box<dyn std::error::Error>> {
    #[cfg(feature = "camera-nokhwa")]
    if let Some(index) = cli.camera {
        use sharpface_core::video::infrastructure::nokhwa_camera_source::NokhwaCameraSource;
        return Ok(Box::new(NokhwaCameraSource::new(index)));
    }

    let dir = cli.input.as_deref().ok_or("An input directory is required")?;
    let mut source = ImageSequenceSource::from_dir(dir)?.with_looping(cli.looping);
    if let Some(ms) = cli.frame_interval_ms {
        source = source.with_frame_interval(Duration::from_millis(ms));
    }
    Ok(Box::new(source))
}

/// Detector load failures are not fatal; the session runs fully blurred.
fn build_detector(
    cli: &Cli,
    config: &SessionConfig,
) -> Result<Box<dyn FaceDetector>, DetectorUnavailable> {
    match config.backend {
        Backend::EmbeddedRenderer => {
            let (detector, bridge) = RendererMessageDetector::new(DEFAULT_RESPONSE_TIMEOUT);
            let path = cli
                .renderer_messages
                .clone()
                .ok_or_else(|| DetectorUnavailable::new("no renderer messages"))?;
            let file = fs::File::open(&path).map_err(|e| {
                DetectorUnavailable::new(format!("{}: {e}", path.display()))
            })?;
            thread::Builder::new()
                .name("renderer-feed".into())
                .spawn(move || {
                    for line in BufReader::new(file).lines().map_while(Result::ok) {
                        if !line.trim().is_empty() && !bridge.post(line) {
                            break;
                        }
                    }
                })
                .map_err(|e| DetectorUnavailable::new(e.to_string()))?;
            Ok(Box::new(detector))
        }
        Backend::NativeDetector | Backend::DirectMediaStream => {
            if let Some(path) = &cli.detections {
                let json = fs::read_to_string(path).map_err(|e| {
                    DetectorUnavailable::new(format!("{}: {e}", path.display()))
                })?;
                return Ok(Box::new(ReplayFaceDetector::from_json(&json)?));
            }
            let model_path = match &cli.model {
                Some(path) => path.clone(),
                None => {
                    log::info!("Resolving model: {BLAZEFACE_MODEL_NAME}");
                    let location = ModelLocation {
                        name: BLAZEFACE_MODEL_NAME,
                        cache_dir: None,
                        bundled_dir: Some(Path::new("models")),
                        url: cli.model_url.as_deref(),
                    };
                    let path = model_resolver::resolve(&location, Some(Box::new(download_progress)))
                        .map_err(|e| DetectorUnavailable::new(e.to_string()))?;
                    eprintln!();
                    path
                }
            };
            let detector =
                OnnxBlazefaceDetector::new(&model_path, config.min_detection_confidence as f64)?
                    .with_face_size_bounds(MIN_FACE_SIZE, MAX_FACE_SIZE);
            Ok(Box::new(detector))
        }
    }
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face detection model... {pct}%");
    } else {
        eprint!("\rDownloading face detection model... {downloaded} bytes");
    }
}
