use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

use crate::shared::constants::PREVIEW_WIDTH;
use crate::shared::errors::{CaptureError, DeviceError};
use crate::shared::frame::Frame;
use crate::video::domain::frame_source::{FrameSource, SourceEvent};
use crate::video::infrastructure::image_sequence_source::downscale_to_width;

const STILL_TIMEOUT: Duration = Duration::from_secs(3);

/// Consecutive failed reads after which the camera is given up on.
const MAX_READ_FAILURES: u32 = 10;

/// Pause between attempts after a failed read.
const READ_RETRY_DELAY: Duration = Duration::from_millis(50);

type StillReply = Sender<Result<Frame, String>>;

/// Physical camera via `nokhwa`.
///
/// A capture thread owns the camera, opened at its highest resolution.
/// Streamed frames are downscaled to the preview width and handed over
/// newest-frame-wins; stills are taken from the next full-resolution frame.
pub struct NokhwaCameraSource {
    index: u32,
    preview_width: u32,
    stream: Option<CameraStream>,
}

struct CameraStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    frames: Receiver<Frame>,
    stills: Sender<StillReply>,
    fault: Receiver<String>,
}

impl CameraStream {
    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl NokhwaCameraSource {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            preview_width: PREVIEW_WIDTH,
            stream: None,
        }
    }

    pub fn with_preview_width(mut self, width: u32) -> Self {
        self.preview_width = width;
        self
    }
}

fn requested_formats() -> [RequestedFormat<'static>; 2] {
    [
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

fn build_camera(index: u32) -> Result<Camera, String> {
    let mut last_err = None;
    for requested in requested_formats() {
        match Camera::new(CameraIndex::Index(index), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.to_string()),
            },
            Err(err) => last_err = Some(err.to_string()),
        }
    }
    Err(last_err.unwrap_or_else(|| "failed to open camera with any supported format".into()))
}

fn classify_open_error(message: String) -> DeviceError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("authoriz") {
        DeviceError::PermissionDenied
    } else if lower.contains("busy") || lower.contains("in use") {
        DeviceError::DeviceBusy(message)
    } else {
        DeviceError::Unavailable(message)
    }
}

fn read_frame(camera: &mut Camera, index: usize, started: Instant) -> Result<Frame, String> {
    let buffer = camera.frame().map_err(|e| e.to_string())?;
    let img = buffer
        .decode_image::<RgbFormat>()
        .map_err(|e| e.to_string())?;
    let (width, height) = img.dimensions();
    Ok(Frame::new(img.into_raw(), width, height, 3, index).with_timestamp(started.elapsed()))
}

#[derive(Debug, PartialEq, Eq)]
enum ReadVerdict {
    Retry(Duration),
    GiveUp,
}

/// Tolerates sporadic read errors but not a camera that stopped working.
#[derive(Debug)]
struct ReadRetry {
    consecutive: u32,
    limit: u32,
    delay: Duration,
}

impl ReadRetry {
    fn new(limit: u32, delay: Duration) -> Self {
        Self {
            consecutive: 0,
            limit,
            delay,
        }
    }

    fn succeeded(&mut self) {
        self.consecutive = 0;
    }

    fn failed(&mut self) -> ReadVerdict {
        self.consecutive += 1;
        if self.consecutive >= self.limit {
            ReadVerdict::GiveUp
        } else {
            ReadVerdict::Retry(self.delay)
        }
    }
}

/// Channels between the capture thread and the source.
struct CaptureLinks {
    ready: Sender<Result<(), String>>,
    frame_tx: Sender<Frame>,
    frame_rx: Receiver<Frame>,
    stills: Receiver<StillReply>,
    fault: Sender<String>,
}

/// Returning drops `frame_tx`, which `next_frame` sees as a disconnect.
fn capture_loop(index: u32, preview_width: u32, stop: Arc<AtomicBool>, links: CaptureLinks) {
    let CaptureLinks {
        ready,
        frame_tx,
        frame_rx,
        stills,
        fault,
    } = links;
    let mut camera = match build_camera(index) {
        Ok(camera) => {
            let _ = ready.send(Ok(()));
            camera
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    let started = Instant::now();
    let mut frame_index = 0usize;
    let mut retry = ReadRetry::new(MAX_READ_FAILURES, READ_RETRY_DELAY);
    while !stop.load(Ordering::Relaxed) {
        let frame = match read_frame(&mut camera, frame_index, started) {
            Ok(frame) => frame,
            Err(err) => match retry.failed() {
                ReadVerdict::Retry(delay) => {
                    log::debug!("camera {index} read failed: {err}");
                    thread::sleep(delay);
                    continue;
                }
                ReadVerdict::GiveUp => {
                    log::warn!("camera {index} stopped delivering frames: {err}");
                    let _ = fault.send(err);
                    break;
                }
            },
        };
        retry.succeeded();
        frame_index += 1;

        while let Ok(reply) = stills.try_recv() {
            let _ = reply.send(Ok(frame.clone()));
        }

        // Newest frame wins: evict the queued frame if the consumer is behind.
        let preview = downscale_to_width(frame, preview_width);
        if let Err(TrySendError::Full(preview)) = frame_tx.try_send(preview) {
            let _ = frame_rx.try_recv();
            let _ = frame_tx.try_send(preview);
        }
    }

    if let Err(err) = camera.stop_stream() {
        log::warn!("failed to stop camera stream: {err}");
    }
    while let Ok(reply) = stills.try_recv() {
        let _ = reply.send(Err("camera stopped".into()));
    }
}

impl FrameSource for NokhwaCameraSource {
    fn device_id(&self) -> String {
        format!("camera:{}", self.index)
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(1);
        let (still_tx, still_rx) = crossbeam_channel::unbounded();
        let (fault_tx, fault_rx) = crossbeam_channel::bounded(1);

        let stop_flag = stop.clone();
        let links = CaptureLinks {
            ready: ready_tx,
            frame_tx,
            frame_rx: frame_rx.clone(),
            stills: still_rx,
            fault: fault_tx,
        };
        let (index, preview_width) = (self.index, self.preview_width);
        let handle = thread::Builder::new()
            .name(format!("camera-{index}"))
            .spawn(move || capture_loop(index, preview_width, stop_flag, links))
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;

        let mut stream = CameraStream {
            stop,
            handle: Some(handle),
            frames: frame_rx,
            stills: still_tx,
            fault: fault_rx,
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Camera {index} opened");
                self.stream = Some(stream);
                Ok(())
            }
            Ok(Err(err)) => {
                stream.shutdown();
                Err(classify_open_error(err))
            }
            Err(_) => {
                stream.shutdown();
                Err(DeviceError::Unavailable("camera thread exited".into()))
            }
        }
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<SourceEvent, DeviceError> {
        let Some(stream) = &self.stream else {
            return Err(DeviceError::Unavailable("camera not started".into()));
        };
        match stream.frames.recv_timeout(timeout) {
            Ok(frame) => Ok(SourceEvent::Frame(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(SourceEvent::Idle),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Unavailable(
                stream
                    .fault
                    .try_recv()
                    .unwrap_or_else(|_| "camera stream ended".into()),
            )),
        }
    }

    fn capture_still(&mut self) -> Result<Frame, CaptureError> {
        let stream = self.stream.as_ref().ok_or(CaptureError::NotStarted)?;
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        stream
            .stills
            .send(reply_tx)
            .map_err(|_| CaptureError::NotStarted)?;
        match reply_rx.recv_timeout(STILL_TIMEOUT) {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(reason)) => Err(CaptureError::Denied(reason)),
            Err(_) => Err(CaptureError::Denied("camera did not deliver a still".into())),
        }
    }

    fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown();
            log::info!("Camera {} closed", self.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_errors_are_classified() {
        assert_eq!(
            classify_open_error("Permission denied by user".into()),
            DeviceError::PermissionDenied
        );
        assert!(matches!(
            classify_open_error("device is busy".into()),
            DeviceError::DeviceBusy(_)
        ));
        assert!(matches!(
            classify_open_error("no such device".into()),
            DeviceError::Unavailable(_)
        ));
    }

    #[test]
    fn test_read_retry_gives_up_after_consecutive_failures() {
        let delay = Duration::from_millis(5);
        let mut retry = ReadRetry::new(3, delay);
        assert_eq!(retry.failed(), ReadVerdict::Retry(delay));
        assert_eq!(retry.failed(), ReadVerdict::Retry(delay));
        assert_eq!(retry.failed(), ReadVerdict::GiveUp);
    }

    #[test]
    fn test_successful_read_resets_retry_budget() {
        let delay = Duration::from_millis(5);
        let mut retry = ReadRetry::new(2, delay);
        assert_eq!(retry.failed(), ReadVerdict::Retry(delay));
        retry.succeeded();
        assert_eq!(retry.failed(), ReadVerdict::Retry(delay));
        assert_eq!(retry.failed(), ReadVerdict::GiveUp);
    }

    #[test]
    fn test_default_retry_policy_backs_off() {
        let mut retry = ReadRetry::new(MAX_READ_FAILURES, READ_RETRY_DELAY);
        let verdicts: Vec<_> = (0..MAX_READ_FAILURES).map(|_| retry.failed()).collect();
        assert!(verdicts[..verdicts.len() - 1]
            .iter()
            .all(|v| matches!(v, ReadVerdict::Retry(d) if !d.is_zero())));
        assert_eq!(verdicts.last(), Some(&ReadVerdict::GiveUp));
    }

    #[test]
    fn test_abandoned_capture_surfaces_device_error() {
        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<Frame>(1);
        let (still_tx, _still_rx) = crossbeam_channel::unbounded();
        let (fault_tx, fault_rx) = crossbeam_channel::bounded(1);
        let mut camera = NokhwaCameraSource::new(3);
        camera.stream = Some(CameraStream {
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
            frames: frame_rx,
            stills: still_tx,
            fault: fault_rx,
        });

        assert!(matches!(
            camera.next_frame(Duration::from_millis(1)),
            Ok(SourceEvent::Idle)
        ));
        fault_tx.send("device unplugged".to_string()).unwrap();
        drop(frame_tx);
        assert_eq!(
            camera.next_frame(Duration::from_millis(1)).unwrap_err(),
            DeviceError::Unavailable("device unplugged".into())
        );
    }

    #[test]
    fn test_unstarted_camera() {
        let mut camera = NokhwaCameraSource::new(7);
        assert_eq!(camera.device_id(), "camera:7");
        assert_eq!(camera.capture_still().unwrap_err(), CaptureError::NotStarted);
        assert!(camera.next_frame(Duration::from_millis(1)).is_err());
        camera.stop();
    }
}
