use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::detection::domain::face_descriptor::FaceDetection;
use crate::detection::domain::face_detector::FaceDetector;
use crate::pipeline::diagnostics::Diagnostics;
use crate::shared::errors::DetectorUnavailable;
use crate::shared::frame::Frame;

/// Detector outcome paired with the frame it was computed on.
#[derive(Debug)]
pub struct DetectionResult {
    pub frame: Frame,
    pub outcome: Result<Option<FaceDetection>, DetectorUnavailable>,
}

/// Runs a detector on its own thread behind a depth-1 queue.
///
/// Submitting while a frame is still queued evicts the queued frame, so the
/// detector always works on the newest frame it can get. Evicted frames are
/// counted as stale drops and never come back out.
pub struct DetectionWorker {
    jobs: Option<Sender<Frame>>,
    evict: Receiver<Frame>,
    results: Receiver<DetectionResult>,
    handle: Option<thread::JoinHandle<Box<dyn FaceDetector>>>,
    diagnostics: Arc<Diagnostics>,
}

impl DetectionWorker {
    pub fn spawn(
        mut detector: Box<dyn FaceDetector>,
        diagnostics: Arc<Diagnostics>,
    ) -> std::io::Result<Self> {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<Frame>(1);
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let evict = job_rx.clone();
        let timings = diagnostics.clone();

        let handle = thread::Builder::new()
            .name("detection".into())
            .spawn(move || {
                for frame in job_rx {
                    let started = Instant::now();
                    let outcome = detector.detect(&frame);
                    timings.detection_timed(started.elapsed());
                    if result_tx.send(DetectionResult { frame, outcome }).is_err() {
                        break;
                    }
                }
                detector
            })?;

        Ok(Self {
            jobs: Some(job_tx),
            evict,
            results: result_rx,
            handle: Some(handle),
            diagnostics,
        })
    }

    /// Queues `frame`, replacing any frame still waiting. Hands the frame
    /// back if the worker thread has gone away.
    pub fn submit(&self, frame: Frame) -> Result<(), Frame> {
        let Some(jobs) = &self.jobs else {
            return Err(frame);
        };
        match jobs.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                if let Ok(stale) = self.evict.try_recv() {
                    log::debug!("Detection skipped stale frame {}", stale.index());
                    self.diagnostics.stale_frame_dropped();
                }
                match jobs.try_send(frame) {
                    Ok(()) => Ok(()),
                    Err(TrySendError::Full(frame) | TrySendError::Disconnected(frame)) => Err(frame),
                }
            }
            Err(TrySendError::Disconnected(frame)) => Err(frame),
        }
    }

    pub fn try_result(&self) -> Option<DetectionResult> {
        self.results.try_recv().ok()
    }


    /// Stops accepting frames, lets the queued frame finish and joins the
    /// thread. Results stay available through `try_result`. Returns the
    /// detector unless the thread panicked.
    pub fn close(&mut self) -> Option<Box<dyn FaceDetector>> {
        self.jobs = None;
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(detector) => Some(detector),
            Err(_) => {
                log::warn!("Detection thread panicked");
                None
            }
        }
    }

    /// Like [`close`](Self::close), but the queued frame is discarded.
    pub fn shutdown(&mut self) -> Option<Box<dyn FaceDetector>> {
        while self.evict.try_recv().is_ok() {}
        self.close()
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
