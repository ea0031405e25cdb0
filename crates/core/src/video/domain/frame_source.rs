use std::time::Duration;

use crate::shared::errors::{CaptureError, DeviceError};
use crate::shared::frame::Frame;

/// Result of polling a source for its next frame.
#[derive(Debug)]
pub enum SourceEvent {
    Frame(Frame),
    /// No frame arrived within the timeout; the source is still live.
    Idle,
    /// The source has no more frames (e.g. a finite image sequence).
    EndOfStream,
}

/// Supplies frames from a capture device or a recorded sequence.
///
/// Cadence is decided by the source; callers pull with `next_frame`.
/// `device_id` names the physical device for exclusivity; the session holds
/// a lease on it for as long as the source runs.
pub trait FrameSource: Send {
    fn device_id(&self) -> String;

    /// Acquires the device and begins producing frames.
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Waits up to `timeout` for the next frame.
    fn next_frame(&mut self, timeout: Duration) -> Result<SourceEvent, DeviceError>;

    /// Captures a single full-resolution frame without interrupting the
    /// continuous stream.
    fn capture_still(&mut self) -> Result<Frame, CaptureError>;

    /// Frames produced since `start` but discarded before delivery.
    fn skipped_frames(&self) -> u64 {
        0
    }

    /// Stops producing frames and releases the device. Idempotent, and safe
    /// to call on a source that was never started.
    fn stop(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn device_id(&self) -> String {
        (**self).device_id()
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        (**self).start()
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<SourceEvent, DeviceError> {
        (**self).next_frame(timeout)
    }

    fn capture_still(&mut self) -> Result<Frame, CaptureError> {
        (**self).capture_still()
    }

    fn skipped_frames(&self) -> u64 {
        (**self).skipped_frames()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}
