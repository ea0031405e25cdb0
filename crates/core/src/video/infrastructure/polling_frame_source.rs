use std::time::{Duration, Instant};

use crate::shared::errors::{CaptureError, DeviceError};
use crate::shared::frame::Frame;
use crate::video::domain::frame_source::{FrameSource, SourceEvent};

/// Decorator that delivers at most one frame per `interval`.
///
/// Frames arriving between deliveries replace each other; only the newest is
/// handed on when the interval elapses. Still capture passes straight through.
pub struct PollingFrameSource<S: FrameSource> {
    inner: S,
    interval: Duration,
    newest: Option<Frame>,
    last_delivery: Option<Instant>,
    ended: bool,
    replaced: u64,
}

impl<S: FrameSource> PollingFrameSource<S> {
    pub fn new(inner: S, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            newest: None,
            last_delivery: None,
            ended: false,
            replaced: 0,
        }
    }

    fn hold(&mut self, frame: Frame) {
        if let Some(old) = self.newest.replace(frame) {
            self.replaced += 1;
            log::debug!("Polling source skipped frame {}", old.index());
        }
    }

    fn deliver(&mut self, now: Instant) -> Option<SourceEvent> {
        let frame = self.newest.take()?;
        self.last_delivery = Some(now);
        Some(SourceEvent::Frame(frame))
    }
}

impl<S: FrameSource> FrameSource for PollingFrameSource<S> {
    fn device_id(&self) -> String {
        self.inner.device_id()
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.newest = None;
        self.last_delivery = None;
        self.ended = false;
        self.replaced = 0;
        self.inner.start()
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<SourceEvent, DeviceError> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            let due = self.last_delivery.map_or(now, |t| t + self.interval);

            if self.newest.is_some() && now >= due {
                if let Some(event) = self.deliver(now) {
                    return Ok(event);
                }
            }
            if self.ended {
                if self.newest.is_none() {
                    return Ok(SourceEvent::EndOfStream);
                }
                // Nothing more will arrive; hold the last frame until it is due.
                let wake = due.min(deadline);
                std::thread::sleep(wake.saturating_duration_since(now));
                if wake < due {
                    return Ok(SourceEvent::Idle);
                }
                continue;
            }
            if now >= deadline {
                return Ok(SourceEvent::Idle);
            }

            let wait_until = if self.newest.is_some() {
                due.min(deadline)
            } else {
                deadline
            };
            match self
                .inner
                .next_frame(wait_until.saturating_duration_since(now))?
            {
                SourceEvent::Frame(frame) => self.hold(frame),
                SourceEvent::Idle => {}
                SourceEvent::EndOfStream => self.ended = true,
            }
        }
    }

    fn capture_still(&mut self) -> Result<Frame, CaptureError> {
        self.inner.capture_still()
    }

    /// Frames superseded by a newer one before they were due, plus any the
    /// inner source skipped itself.
    fn skipped_frames(&self) -> u64 {
        self.replaced + self.inner.skipped_frames()
    }

    fn stop(&mut self) {
        self.newest = None;
        self.inner.stop();
    }
}
