use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::blurring::domain::frame_compositor::FrameCompositor;
use crate::blurring::infrastructure::cutout_compositor::CutoutCompositor;
use crate::detection::domain::descriptor_smoother::DescriptorSmoother;
use crate::detection::domain::face_descriptor::{FaceDescriptor, FaceDetection};
use crate::detection::domain::face_detector::FaceDetector;
use crate::detection::domain::presence_tracker::{PresenceEvent, PresenceTracker};
use crate::detection::domain::region_expander;
use crate::detection::infrastructure::interval_face_detector::IntervalFaceDetector;
use crate::detection::infrastructure::tracking_face_detector::TrackingFaceDetector;
use crate::pipeline::backend::{Cadence, DetectionScheduling};
use crate::pipeline::detection_worker::DetectionWorker;
use crate::pipeline::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::pipeline::session_config::SessionConfig;
use crate::pipeline::session_observer::SessionObserver;
use crate::shared::errors::{
    CaptureError, ConfigError, DetectorUnavailable, DeviceError, SessionError,
};
use crate::shared::frame::Frame;
use crate::shared::region::Region;
use crate::video::domain::device_registry::{DeviceLease, DeviceRegistry};
use crate::video::domain::frame_sink::FrameSink;
use crate::video::domain::frame_source::{FrameSource, SourceEvent};
use crate::video::infrastructure::polling_frame_source::PollingFrameSource;
use crate::video::infrastructure::still_encoder::{encode_still, StillFormat, StillImage};

/// Upper bound on how long the pipeline thread blocks on the source before
/// it checks for cancellation and capture requests.
const REQUEST_POLL_INTERVAL: Duration = Duration::from_millis(50);

type CaptureReply = Sender<Result<StillImage, CaptureError>>;

enum Request {
    Still(CaptureReply),
    Composited(CaptureReply),
}

/// Everything the pipeline thread owns while running. Handed back on join so
/// the session can be started again.
struct SessionParts {
    source: Box<dyn FrameSource>,
    detector: Option<Box<dyn FaceDetector>>,
    load_error: Option<DetectorUnavailable>,
    compositor: Box<dyn FrameCompositor>,
    sink: Box<dyn FrameSink>,
    observer: Box<dyn SessionObserver>,
}

/// Body of the pipeline thread; `None` only if the pipeline never reached it.
type PipelineBody = Box<dyn FnOnce() -> Option<SessionParts> + Send>;

struct Running {
    cancel: Arc<AtomicBool>,
    requests: Sender<Request>,
    handle: thread::JoinHandle<Option<SessionParts>>,
}

/// One camera (or recorded) stream composited with a sharp face cutout.
///
/// `start` claims the source's device and spawns the pipeline thread, which
/// runs `source -> detector -> expand -> composite -> sink` per frame and
/// reports presence transitions to the observer. `stop` cancels and joins
/// it; the source is stopped and the device released before `stop` returns.
pub struct Session {
    config: SessionConfig,
    registry: DeviceRegistry,
    diagnostics: Arc<Diagnostics>,
    parts: Option<SessionParts>,
    running: Option<Running>,
}

fn decorate(mut detector: Box<dyn FaceDetector>, config: &SessionConfig) -> Box<dyn FaceDetector> {
    if let Some(interval) = config.detection_interval() {
        detector = Box::new(IntervalFaceDetector::new(detector, interval));
    }
    if config.tracking_enabled {
        detector = Box::new(TrackingFaceDetector::new(
            detector,
            DescriptorSmoother::default(),
        ));
    }
    detector
}

impl Session {
    /// Builds a session. A detector that failed to load is not fatal: the
    /// session runs fully blurred and reports the failure once started.
    pub fn new(
        config: SessionConfig,
        source: Box<dyn FrameSource>,
        detector: Result<Box<dyn FaceDetector>, DetectorUnavailable>,
        sink: Box<dyn FrameSink>,
        observer: Box<dyn SessionObserver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let source: Box<dyn FrameSource> = match config.backend.cadence() {
            Cadence::Polled => Box::new(PollingFrameSource::new(source, config.poll_interval())),
            Cadence::Native => source,
        };
        let (detector, load_error) = match detector {
            Ok(detector) => (Some(decorate(detector, &config)), None),
            Err(err) => (None, Some(err)),
        };
        let compositor = Box::new(CutoutCompositor::new(config.blur_radius, config.brightness));

        Ok(Self {
            config,
            registry: DeviceRegistry::global().clone(),
            diagnostics: Arc::new(Diagnostics::new()),
            parts: Some(SessionParts {
                source,
                detector,
                load_error,
                compositor,
                sink,
                observer,
            }),
            running: None,
        })
    }

    /// Uses `registry` instead of the process-wide one for device leases.
    pub fn with_registry(mut self, registry: DeviceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_compositor(mut self, compositor: Box<dyn FrameCompositor>) -> Self {
        if let Some(parts) = &mut self.parts {
            parts.compositor = compositor;
        }
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        self.launch(|name, body| thread::Builder::new().name(name).spawn(body))
    }

    /// `start` with the thread spawn supplied by the caller. The pipeline
    /// reaches the thread through a handoff channel, so a failed spawn gives
    /// it back intact.
    fn launch<F>(&mut self, spawn: F) -> Result<(), SessionError>
    where
        F: FnOnce(String, PipelineBody) -> io::Result<thread::JoinHandle<Option<SessionParts>>>,
    {
        if let Some(running) = &self.running {
            if !running.handle.is_finished() {
                return Err(SessionError::AlreadyStarted);
            }
            // Ended on its own (end of stream or device error); reap it first.
            self.stop();
        }
        let mut parts = self.parts.take().ok_or_else(|| {
            DeviceError::Unavailable("session pipeline was lost to a panic".into())
        })?;

        let device_id = parts.source.device_id();
        let lease = match self.registry.acquire(&device_id) {
            Ok(lease) => lease,
            Err(err) => {
                self.parts = Some(parts);
                return Err(err.into());
            }
        };
        if let Err(err) = parts.source.start() {
            parts.source.stop();
            self.parts = Some(parts);
            return Err(err.into());
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let pipeline = Pipeline {
            tracker: PresenceTracker::new(self.config.presence_debounce),
            config: self.config.clone(),
            diagnostics: self.diagnostics.clone(),
            cancel: cancel.clone(),
            requests: request_rx,
            lease,
            last_output: None,
            reported_skips: 0,
            parts,
        };
        let (handoff_tx, handoff_rx) = crossbeam_channel::bounded(1);
        let _ = handoff_tx.send(pipeline);
        let thread_rx = handoff_rx.clone();
        let body: PipelineBody = Box::new(move || thread_rx.recv().ok().map(Pipeline::run));

        let handle = match spawn(format!("session-{device_id}"), body) {
            Ok(handle) => handle,
            Err(err) => {
                if let Ok(Pipeline {
                    mut parts, lease, ..
                }) = handoff_rx.try_recv()
                {
                    parts.source.stop();
                    drop(lease);
                    self.parts = Some(parts);
                }
                return Err(
                    DeviceError::Unavailable(format!("failed to spawn pipeline: {err}")).into(),
                );
            }
        };

        log::info!(
            "Session started on {device_id} with {} backend",
            self.config.backend
        );
        self.running = Some(Running {
            cancel,
            requests: request_tx,
            handle,
        });
        Ok(())
    }

    /// Cancels the pipeline and waits for it. Idempotent; a no-op on a
    /// session that never started.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.store(true, Ordering::SeqCst);
            self.join(running);
        }
    }

    /// Waits for the pipeline to end on its own, e.g. when a finite source
    /// runs out of frames.
    pub fn wait(&mut self) {
        if let Some(running) = self.running.take() {
            self.join(running);
        }
    }

    fn join(&mut self, running: Running) {
        drop(running.requests);
        match running.handle.join() {
            Ok(Some(parts)) => self.parts = Some(parts),
            Ok(None) | Err(_) => log::warn!("Session pipeline panicked"),
        }
        log::info!("Session stopped: {}", self.diagnostics().summary());
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Full-resolution still from the source, encoded as JPEG. Detection and
    /// compositing carry on undisturbed.
    pub fn capture(&self) -> Result<StillImage, CaptureError> {
        self.request(Request::Still)
    }

    /// The most recent composited output, encoded as JPEG.
    pub fn capture_composited(&self) -> Result<StillImage, CaptureError> {
        self.request(Request::Composited)
    }

    fn request(&self, make: fn(CaptureReply) -> Request) -> Result<StillImage, CaptureError> {
        let running = self.running.as_ref().ok_or(CaptureError::NotStarted)?;
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        running
            .requests
            .send(make(reply_tx))
            .map_err(|_| CaptureError::NotStarted)?;
        reply_rx.recv().map_err(|_| CaptureError::NotStarted)?
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State of the pipeline thread for one run.
struct Pipeline {
    parts: SessionParts,
    config: SessionConfig,
    tracker: PresenceTracker,
    diagnostics: Arc<Diagnostics>,
    cancel: Arc<AtomicBool>,
    requests: Receiver<Request>,
    lease: DeviceLease,
    last_output: Option<Frame>,
    reported_skips: u64,
}

impl Pipeline {
    fn run(mut self) -> SessionParts {
        if let Some(err) = self.parts.load_error.clone() {
            self.detector_lost(err);
        }

        let mut worker = match self.config.backend.scheduling() {
            DetectionScheduling::Worker => self.spawn_worker(),
            DetectionScheduling::Inline => None,
        };

        let device_id = self.lease.device_id().to_string();
        let timeout = self.config.frame_timeout();
        let mut last_frame_at = Instant::now();
        let mut stalled = false;
        let mut reached_end = false;

        while !self.cancel.load(Ordering::Relaxed) {
            match self
                .parts
                .source
                .next_frame(timeout.min(REQUEST_POLL_INTERVAL))
            {
                Ok(SourceEvent::Frame(frame)) => {
                    self.diagnostics.frame_received();
                    last_frame_at = Instant::now();
                    stalled = false;
                    self.handle_frame(frame, &mut worker);
                }
                Ok(SourceEvent::Idle) => {
                    if !stalled && last_frame_at.elapsed() >= timeout {
                        log::warn!("No frame from {device_id} for {}ms", timeout.as_millis());
                        stalled = true;
                    }
                }
                Ok(SourceEvent::EndOfStream) => {
                    log::info!("{device_id} reached end of stream");
                    reached_end = true;
                    break;
                }
                Err(err) => {
                    log::warn!("{device_id} failed: {err}");
                    self.parts.observer.on_error(&err.into());
                    break;
                }
            }
            self.record_skipped();
            self.drain_results(&worker);
            self.serve_requests();
        }

        if let Some(mut worker) = worker.take() {
            let detector = if reached_end {
                worker.close()
            } else {
                worker.shutdown()
            };
            if reached_end {
                self.drain_results(&Some(worker));
            }
            self.parts.detector = detector;
        }
        self.serve_requests();
        self.record_skipped();

        self.parts.source.stop();
        drop(self.lease);
        self.parts
    }

    /// Moves frames the source discarded into the stale counter.
    fn record_skipped(&mut self) {
        let skipped = self.parts.source.skipped_frames();
        if skipped > self.reported_skips {
            self.diagnostics
                .stale_frames_dropped_by(skipped - self.reported_skips);
            self.reported_skips = skipped;
        }
    }

    fn spawn_worker(&mut self) -> Option<DetectionWorker> {
        if self.tracker.is_degraded() {
            return None;
        }
        let detector = self.parts.detector.take()?;
        match DetectionWorker::spawn(detector, self.diagnostics.clone()) {
            Ok(worker) => Some(worker),
            Err(err) => {
                self.detector_lost(DetectorUnavailable::new(format!(
                    "failed to spawn detection thread: {err}"
                )));
                None
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame, worker: &mut Option<DetectionWorker>) {
        if self.tracker.is_degraded() {
            self.apply(frame, Ok(None));
            return;
        }
        if let Some(active) = worker {
            if let Err(frame) = active.submit(frame) {
                *worker = None;
                self.apply(
                    frame,
                    Err(DetectorUnavailable::new("detection thread exited")),
                );
            }
            return;
        }
        let outcome = match self.parts.detector.as_mut() {
            Some(detector) => {
                let started = Instant::now();
                let outcome = detector.detect(&frame);
                self.diagnostics.detection_timed(started.elapsed());
                outcome
            }
            None => Ok(None),
        };
        self.apply(frame, outcome);
    }

    fn drain_results(&mut self, worker: &Option<DetectionWorker>) {
        let Some(worker) = worker else {
            return;
        };
        while let Some(result) = worker.try_result() {
            self.apply(result.frame, result.outcome);
        }
    }

    /// Presence, expansion and compositing for one frame and the detector
    /// outcome computed on that same frame.
    fn apply(&mut self, frame: Frame, outcome: Result<Option<FaceDetection>, DetectorUnavailable>) {
        let face = self.resolve(&frame, outcome);
        if let Some(event) = self.tracker.observe(face.as_ref()) {
            self.emit(event, &frame);
        }

        let region = face.and_then(|descriptor| {
            match region_expander::expand(
                &descriptor,
                self.config.expansion_scale,
                frame.width(),
                frame.height(),
            ) {
                Ok(region) => Some(region),
                Err(err) => {
                    log::debug!("Frame {}: {err}", frame.index());
                    self.diagnostics.geometry_failed();
                    None
                }
            }
        });
        self.present(&frame, region.as_ref());
    }

    /// Confidence filter and descriptor validation. Anything that fails
    /// either counts as "no face".
    fn resolve(
        &mut self,
        frame: &Frame,
        outcome: Result<Option<FaceDetection>, DetectorUnavailable>,
    ) -> Option<FaceDescriptor> {
        let detection = match outcome {
            Ok(Some(detection)) => detection,
            Ok(None) => return None,
            Err(err) => {
                self.detector_lost(err);
                return None;
            }
        };
        if detection.confidence < self.config.min_detection_confidence {
            return None;
        }
        match detection.descriptor.validate() {
            Ok(()) => Some(detection.descriptor),
            Err(err) => {
                log::debug!("Frame {}: invalid descriptor: {err}", frame.index());
                self.diagnostics.geometry_failed();
                None
            }
        }
    }

    fn detector_lost(&mut self, err: DetectorUnavailable) {
        log::warn!("{err}; continuing fully blurred");
        self.diagnostics.detector_failed();
        if let Some(PresenceEvent::FaceLost) = self.tracker.degrade() {
            self.parts.observer.on_face_lost();
        }
        self.parts.observer.on_error(&err.into());
    }

    fn emit(&mut self, event: PresenceEvent, frame: &Frame) {
        match event {
            PresenceEvent::FaceDetected(descriptor) => {
                log::info!("Face detected at frame {}", frame.index());
                self.parts.observer.on_face_detected(&descriptor);
            }
            PresenceEvent::FaceLost => {
                log::info!("Face lost at frame {}", frame.index());
                self.parts.observer.on_face_lost();
            }
        }
    }

    fn present(&mut self, frame: &Frame, region: Option<&Region>) {
        let started = Instant::now();
        let result = self.parts.compositor.composite(frame, region);
        self.diagnostics.compositing_timed(started.elapsed());

        match result {
            Ok(output) => {
                self.write(&output);
                self.diagnostics.frame_presented();
                self.last_output = Some(output);
            }
            Err(err) => {
                log::warn!("Frame {} dropped: {err}", frame.index());
                self.diagnostics.compositing_failed();
                self.parts.observer.on_error(&err.into());
                if let Some(previous) = self.last_output.take() {
                    self.write(&previous);
                    self.last_output = Some(previous);
                }
            }
        }
    }

    fn write(&mut self, output: &Frame) {
        if let Err(err) = self.parts.sink.present(output) {
            log::warn!("Failed to present frame {}: {err}", output.index());
            self.diagnostics.sink_failed();
        }
    }

    fn serve_requests(&mut self) {
        let format = StillFormat::Jpeg(self.config.capture_quality);
        while let Ok(request) = self.requests.try_recv() {
            match request {
                Request::Still(reply) => {
                    let still = self
                        .parts
                        .source
                        .capture_still()
                        .and_then(|frame| encode_still(&frame, format));
                    if let Ok(image) = &still {
                        log::info!("Captured {}x{} still", image.width, image.height);
                    }
                    let _ = reply.send(still);
                }
                Request::Composited(reply) => {
                    let still = match &self.last_output {
                        Some(frame) => encode_still(frame, format),
                        None => Err(CaptureError::Denied("no frame composited yet".into())),
                    };
                    let _ = reply.send(still);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_descriptor::NormalizedBox;
    use crate::detection::infrastructure::renderer_message_detector::{
        assumed_face, RendererMessageDetector,
    };
    use crate::pipeline::backend::Backend;
    use crate::pipeline::session_observer::{ChannelObserver, SessionEvent};
    use crate::shared::errors::CompositingError;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    const SIZE: u32 = 16;

    fn uniform_frame(index: usize, value: u8) -> Frame {
        Frame::new(vec![value; (SIZE * SIZE * 3) as usize], SIZE, SIZE, 3, index)
    }

    fn centre_face() -> FaceDescriptor {
        FaceDescriptor::BoundingBox(NormalizedBox {
            x: 0.25,
            y: 0.25,
            width: 0.5,
            height: 0.5,
        })
    }

    /// Finite source: yields its frames back to back, then ends.
    struct ScriptedSource {
        id: String,
        frames: VecDeque<Frame>,
    }

    impl ScriptedSource {
        fn new(id: &str, frames: Vec<Frame>) -> Self {
            Self {
                id: id.into(),
                frames: frames.into(),
            }
        }

        fn uniform(id: &str, count: usize) -> Self {
            Self::new(id, (0..count).map(|i| uniform_frame(i, 200)).collect())
        }
    }

    impl FrameSource for ScriptedSource {
        fn device_id(&self) -> String {
            self.id.clone()
        }

        fn start(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn next_frame(&mut self, _timeout: Duration) -> Result<SourceEvent, DeviceError> {
            Ok(match self.frames.pop_front() {
                Some(frame) => SourceEvent::Frame(frame),
                None => SourceEvent::EndOfStream,
            })
        }

        fn capture_still(&mut self) -> Result<Frame, CaptureError> {
            Err(CaptureError::Denied("scripted".into()))
        }

        fn stop(&mut self) {}
    }

    /// Endless source producing a frame every few milliseconds.
    struct LiveSource {
        id: String,
        next: usize,
        started: bool,
        stops: Arc<Mutex<usize>>,
    }

    impl LiveSource {
        fn new(id: &str) -> Self {
            Self {
                id: id.into(),
                next: 0,
                started: false,
                stops: Arc::default(),
            }
        }
    }

    impl FrameSource for LiveSource {
        fn device_id(&self) -> String {
            self.id.clone()
        }

        fn start(&mut self) -> Result<(), DeviceError> {
            self.started = true;
            Ok(())
        }

        fn next_frame(&mut self, timeout: Duration) -> Result<SourceEvent, DeviceError> {
            thread::sleep(timeout.min(Duration::from_millis(5)));
            self.next += 1;
            Ok(SourceEvent::Frame(uniform_frame(self.next - 1, 200)))
        }

        fn capture_still(&mut self) -> Result<Frame, CaptureError> {
            if !self.started {
                return Err(CaptureError::NotStarted);
            }
            Ok(Frame::new(vec![90u8; 64 * 48 * 3], 64, 48, 3, self.next))
        }

        fn stop(&mut self) {
            self.started = false;
            *self.stops.lock().unwrap() += 1;
        }
    }

    /// Delivers a couple of frames, then loses the device.
    struct FailingSource {
        delivered: usize,
    }

    impl FrameSource for FailingSource {
        fn device_id(&self) -> String {
            "camera:flaky".into()
        }

        fn start(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn next_frame(&mut self, _timeout: Duration) -> Result<SourceEvent, DeviceError> {
            if self.delivered == 2 {
                return Err(DeviceError::Unavailable("device unplugged".into()));
            }
            self.delivered += 1;
            Ok(SourceEvent::Frame(uniform_frame(self.delivered - 1, 200)))
        }

        fn capture_still(&mut self) -> Result<Frame, CaptureError> {
            Err(CaptureError::NotStarted)
        }

        fn stop(&mut self) {}
    }

    struct DeniedSource;

    impl FrameSource for DeniedSource {
        fn device_id(&self) -> String {
            "camera:denied".into()
        }

        fn start(&mut self) -> Result<(), DeviceError> {
            Err(DeviceError::PermissionDenied)
        }

        fn next_frame(&mut self, _timeout: Duration) -> Result<SourceEvent, DeviceError> {
            Ok(SourceEvent::EndOfStream)
        }

        fn capture_still(&mut self) -> Result<Frame, CaptureError> {
            Err(CaptureError::NotStarted)
        }

        fn stop(&mut self) {}
    }

    /// Returns a scripted outcome per frame index; missing indices are "no face".
    struct ScriptedDetector {
        outcomes: HashMap<usize, Result<Option<(FaceDescriptor, f32)>, DetectorUnavailable>>,
        calls: Arc<Mutex<Vec<usize>>>,
    }

    impl ScriptedDetector {
        fn new(
            outcomes: Vec<(usize, Result<Option<(FaceDescriptor, f32)>, DetectorUnavailable>)>,
        ) -> (Self, Arc<Mutex<Vec<usize>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    outcomes: outcomes.into_iter().collect(),
                    calls: calls.clone(),
                },
                calls,
            )
        }

        fn faces_at(indices: &[usize]) -> Self {
            Self::new(
                indices
                    .iter()
                    .map(|&i| (i, Ok(Some((centre_face(), 0.9)))))
                    .collect(),
            )
            .0
        }
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Option<FaceDetection>, DetectorUnavailable> {
            self.calls.lock().unwrap().push(frame.index());
            match self.outcomes.get(&frame.index()) {
                Some(Ok(Some((descriptor, confidence)))) => Ok(Some(FaceDetection::new(
                    descriptor.clone(),
                    *confidence,
                    frame.timestamp(),
                ))),
                Some(Ok(None)) | None => Ok(None),
                Some(Err(err)) => Err(err.clone()),
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<Frame>>>,
    }

    impl RecordingSink {
        fn indices(&self) -> Vec<usize> {
            self.frames.lock().unwrap().iter().map(Frame::index).collect()
        }
    }

    impl FrameSink for RecordingSink {
        fn present(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
            self.frames.lock().unwrap().push(frame.clone());
            Ok(())
        }
    }

    /// Fails on frames whose first byte is zero.
    struct PickyCompositor;

    impl FrameCompositor for PickyCompositor {
        fn composite(&self, frame: &Frame, _region: Option<&Region>) -> Result<Frame, CompositingError> {
            if frame.data()[0] == 0 {
                return Err(CompositingError::UnsupportedLayout(frame.channels()));
            }
            Ok(frame.clone())
        }
    }

    fn config(backend: Backend) -> SessionConfig {
        SessionConfig {
            backend,
            blur_radius: 2.0,
            ..SessionConfig::default()
        }
    }

    struct Harness {
        session: Session,
        sink: RecordingSink,
        events: Receiver<SessionEvent>,
    }

    impl Harness {
        fn new(
            config: SessionConfig,
            source: impl FrameSource + 'static,
            detector: Result<Box<dyn FaceDetector>, DetectorUnavailable>,
        ) -> Self {
            let sink = RecordingSink::default();
            let (tx, events) = crossbeam_channel::unbounded();
            let session = Session::new(
                config,
                Box::new(source),
                detector,
                Box::new(sink.clone()),
                Box::new(ChannelObserver::new(tx)),
            )
            .unwrap()
            .with_registry(DeviceRegistry::new());
            Self {
                session,
                sink,
                events,
            }
        }

        fn run_to_end(&mut self) -> Vec<SessionEvent> {
            self.session.start().unwrap();
            self.session.wait();
            self.events.try_iter().collect()
        }
    }

    #[test]
    fn test_presence_events_and_cutout() {
        let mut harness = Harness::new(
            config(Backend::DirectMediaStream),
            ScriptedSource::uniform("seq", 4),
            Ok(Box::new(ScriptedDetector::faces_at(&[1, 2]))),
        );

        let events = harness.run_to_end();
        assert_eq!(
            events,
            vec![SessionEvent::FaceDetected(centre_face()), SessionEvent::FaceLost]
        );
        assert_eq!(harness.sink.indices(), vec![0, 1, 2, 3]);

        let frames = harness.sink.frames.lock().unwrap();
        let pixel = |frame: &Frame, x: u32, y: u32| frame.data()[((y * SIZE + x) * 3) as usize];
        // Face frames keep the centre sharp; everything else is dimmed.
        assert_eq!(pixel(&frames[1], 8, 8), 200);
        assert_eq!(pixel(&frames[1], 0, 0), 160);
        assert_eq!(pixel(&frames[0], 8, 8), 160);
        assert_eq!(pixel(&frames[3], 8, 8), 160);
    }

    #[test]
    fn test_low_confidence_counts_as_no_face() {
        let (detector, _) = ScriptedDetector::new(vec![(0, Ok(Some((centre_face(), 0.3))))]);
        let mut harness = Harness::new(
            config(Backend::DirectMediaStream),
            ScriptedSource::uniform("seq", 2),
            Ok(Box::new(detector)),
        );
        assert!(harness.run_to_end().is_empty());
    }

    #[test]
    fn test_invalid_descriptor_is_counted_and_ignored() {
        let degenerate = FaceDescriptor::BoundingBox(NormalizedBox {
            x: 0.5,
            y: 0.5,
            width: 0.0,
            height: 0.2,
        });
        let (detector, _) = ScriptedDetector::new(vec![(0, Ok(Some((degenerate, 0.9))))]);
        let mut harness = Harness::new(
            config(Backend::DirectMediaStream),
            ScriptedSource::uniform("seq", 1),
            Ok(Box::new(detector)),
        );
        assert!(harness.run_to_end().is_empty());
        assert_eq!(harness.session.diagnostics().geometry_failures, 1);
        assert_eq!(harness.session.diagnostics().frames_presented, 1);
    }

    #[test]
    fn test_detector_failure_degrades_until_restart() {
        let unavailable = DetectorUnavailable::new("inference failed");
        let (detector, calls) = ScriptedDetector::new(vec![
            (0, Ok(Some((centre_face(), 0.9)))),
            (1, Err(unavailable.clone())),
            (2, Ok(Some((centre_face(), 0.9)))),
        ]);
        let mut harness = Harness::new(
            config(Backend::DirectMediaStream),
            ScriptedSource::uniform("seq", 4),
            Ok(Box::new(detector)),
        );

        let events = harness.run_to_end();
        assert_eq!(
            events,
            vec![
                SessionEvent::FaceDetected(centre_face()),
                SessionEvent::FaceLost,
                SessionEvent::Error(SessionError::Detector(unavailable)),
            ]
        );
        assert_eq!(*calls.lock().unwrap(), vec![0, 1]);
        assert_eq!(harness.sink.indices(), vec![0, 1, 2, 3]);
        assert_eq!(harness.session.diagnostics().detector_failures, 1);
    }

    #[test]
    fn test_detector_load_failure_runs_fully_blurred() {
        let mut harness = Harness::new(
            config(Backend::NativeDetector),
            ScriptedSource::uniform("seq", 2),
            Err(DetectorUnavailable::new("model missing")),
        );

        let events = harness.run_to_end();
        assert_eq!(
            events,
            vec![SessionEvent::Error(SessionError::Detector(
                DetectorUnavailable::new("model missing")
            ))]
        );
        assert_eq!(harness.sink.indices(), vec![0, 1]);
        let frames = harness.sink.frames.lock().unwrap();
        assert!(frames.iter().all(|f| f.data().iter().all(|&v| v == 160)));
    }

    #[test]
    fn test_compositing_failure_represents_previous_output() {
        let frames = vec![
            uniform_frame(0, 200),
            uniform_frame(1, 0),
            uniform_frame(2, 200),
        ];
        let harness = Harness::new(
            config(Backend::DirectMediaStream),
            ScriptedSource::new("seq", frames),
            Ok(Box::new(ScriptedDetector::faces_at(&[]))),
        );
        let Harness {
            session,
            sink,
            events,
        } = harness;
        let mut session = session.with_compositor(Box::new(PickyCompositor));
        session.start().unwrap();
        session.wait();

        assert_eq!(sink.indices(), vec![0, 0, 2]);
        let snapshot = session.diagnostics();
        assert_eq!(snapshot.compositing_failures, 1);
        assert_eq!(snapshot.frames_presented, 2);
        assert!(matches!(
            events.try_iter().collect::<Vec<_>>().as_slice(),
            [SessionEvent::Error(SessionError::Compositing(_))]
        ));
    }

    #[test]
    fn test_second_session_on_same_device_is_busy() {
        let registry = DeviceRegistry::new();
        let make = || {
            Session::new(
                config(Backend::DirectMediaStream),
                Box::new(LiveSource::new("camera:0")),
                Ok(Box::new(ScriptedDetector::faces_at(&[])) as Box<dyn FaceDetector>),
                Box::new(RecordingSink::default()),
                Box::new(crate::pipeline::session_observer::NullObserver),
            )
            .unwrap()
            .with_registry(registry.clone())
        };

        let mut first = make();
        let mut second = make();
        first.start().unwrap();
        assert_eq!(
            second.start().unwrap_err(),
            SessionError::Device(DeviceError::DeviceBusy("camera:0".into()))
        );

        first.stop();
        assert!(!registry.is_held("camera:0"));
        second.start().unwrap();
        second.stop();
    }

    #[test]
    fn test_start_failure_releases_device() {
        let registry = DeviceRegistry::new();
        let mut session = Session::new(
            config(Backend::DirectMediaStream),
            Box::new(DeniedSource),
            Err(DetectorUnavailable::new("unused")),
            Box::new(RecordingSink::default()),
            Box::new(crate::pipeline::session_observer::NullObserver),
        )
        .unwrap()
        .with_registry(registry.clone());

        assert_eq!(
            session.start().unwrap_err(),
            SessionError::Device(DeviceError::PermissionDenied)
        );
        assert!(!registry.is_held("camera:denied"));
        assert!(!session.is_running());
    }

    #[test]
    fn test_start_twice_and_stop_idempotent() {
        let mut harness = Harness::new(
            config(Backend::DirectMediaStream),
            LiveSource::new("camera:1"),
            Ok(Box::new(ScriptedDetector::faces_at(&[]))),
        );
        harness.session.stop();
        harness.session.start().unwrap();
        assert_eq!(
            harness.session.start().unwrap_err(),
            SessionError::AlreadyStarted
        );
        harness.session.stop();
        harness.session.stop();
        assert!(!harness.session.is_running());

        // Restart after stop reuses the same source and detector.
        harness.session.start().unwrap();
        assert!(harness.session.is_running());
        harness.session.stop();
    }

    #[test]
    fn test_capture_while_running_without_face() {
        let harness = Harness::new(
            config(Backend::DirectMediaStream),
            LiveSource::new("camera:2"),
            Ok(Box::new(ScriptedDetector::faces_at(&[]))),
        );
        let Harness {
            mut session,
            events,
            ..
        } = harness;
        assert_eq!(session.capture().unwrap_err(), CaptureError::NotStarted);

        session.start().unwrap();
        let still = session.capture().unwrap();
        assert_eq!(still.mime_type, "image/jpeg");
        assert_eq!((still.width, still.height), (64, 48));

        // Wait for at least one composited frame.
        let deadline = Instant::now() + Duration::from_secs(2);
        while session.diagnostics().frames_presented == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let composited = session.capture_composited().unwrap();
        assert_eq!((composited.width, composited.height), (SIZE, SIZE));
        assert!(session.is_running());

        session.stop();
        assert_eq!(session.capture().unwrap_err(), CaptureError::NotStarted);
        // No face was ever seen, so presence stayed absent throughout.
        assert!(events.try_iter().next().is_none());
    }

    #[test]
    fn test_stop_before_start_leaves_device_free() {
        let registry = DeviceRegistry::new();
        let mut harness = Harness::new(
            config(Backend::DirectMediaStream),
            LiveSource::new("camera:3"),
            Ok(Box::new(ScriptedDetector::faces_at(&[]))),
        );
        harness.session = harness.session.with_registry(registry.clone());

        harness.session.stop();
        assert!(!registry.is_held("camera:3"));
        assert!(!harness.session.is_running());

        harness.session.start().unwrap();
        assert!(registry.is_held("camera:3"));
        harness.session.stop();
        assert!(!registry.is_held("camera:3"));
    }

    #[test]
    fn test_failed_thread_spawn_keeps_session_usable() {
        let registry = DeviceRegistry::new();
        let source = LiveSource::new("camera:4");
        let stops = source.stops.clone();
        let mut harness = Harness::new(
            config(Backend::DirectMediaStream),
            source,
            Ok(Box::new(ScriptedDetector::faces_at(&[]))),
        );
        harness.session = harness.session.with_registry(registry.clone());

        let err = harness
            .session
            .launch(|_, _| Err(io::Error::new(io::ErrorKind::WouldBlock, "no threads left")))
            .unwrap_err();
        assert!(matches!(err, SessionError::Device(DeviceError::Unavailable(_))));
        assert!(!registry.is_held("camera:4"));
        assert_eq!(*stops.lock().unwrap(), 1);
        assert!(!harness.session.is_running());

        harness.session.start().unwrap();
        assert!(harness.session.is_running());
        harness.session.stop();
    }

    #[test]
    fn test_device_failure_is_surfaced() {
        let mut harness = Harness::new(
            config(Backend::DirectMediaStream),
            FailingSource { delivered: 0 },
            Ok(Box::new(ScriptedDetector::faces_at(&[]))),
        );

        let events = harness.run_to_end();
        assert_eq!(
            events,
            vec![SessionEvent::Error(SessionError::Device(
                DeviceError::Unavailable("device unplugged".into())
            ))]
        );
        assert_eq!(harness.sink.indices(), vec![0, 1]);
        assert!(!harness.session.is_running());
    }

    #[test]
    fn test_polled_backend_counts_skipped_frames() {
        let mut harness = Harness::new(
            SessionConfig {
                poll_interval_ms: 30,
                ..config(Backend::NativeDetector)
            },
            ScriptedSource::uniform("seq", 5),
            Ok(Box::new(ScriptedDetector::faces_at(&[]))),
        );

        harness.run_to_end();
        assert_eq!(harness.sink.indices(), vec![0, 4]);
        let snapshot = harness.session.diagnostics();
        assert_eq!(snapshot.frames_received, 2);
        assert_eq!(snapshot.stale_frames_dropped, 3);
    }

    #[test]
    fn test_renderer_face_report_drives_presence() {
        let (detector, bridge) = RendererMessageDetector::new(Duration::from_millis(20));
        assert!(bridge.post(r#"{"type":"faceDetected","hasFace":true}"#));
        let mut harness = Harness::new(
            config(Backend::EmbeddedRenderer),
            ScriptedSource::uniform("renderer", 1),
            Ok(Box::new(detector)),
        );

        let events = harness.run_to_end();
        assert_eq!(events, vec![SessionEvent::FaceDetected(assumed_face())]);

        let frames = harness.sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        // Centre stays sharp, corner is dimmed.
        assert_eq!(frames[0].data()[((8 * SIZE + 8) * 3) as usize], 200);
        assert_eq!(frames[0].data()[0], 160);
        drop(bridge);
    }

    #[test]
    fn test_worker_backend_presents_in_order_and_counts_stale() {
        let mut harness = Harness::new(
            config(Backend::EmbeddedRenderer),
            ScriptedSource::uniform("renderer", 20),
            Ok(Box::new(ScriptedDetector::faces_at(&(0..20).collect::<Vec<_>>()))),
        );

        let events = harness.run_to_end();
        assert_eq!(events, vec![SessionEvent::FaceDetected(centre_face())]);

        let presented = harness.sink.indices();
        assert!(presented.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(presented.last(), Some(&19));
        let snapshot = harness.session.diagnostics();
        assert_eq!(snapshot.frames_received, 20);
        assert_eq!(
            snapshot.frames_presented + snapshot.stale_frames_dropped,
            snapshot.frames_received
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = Session::new(
            SessionConfig {
                expansion_scale: 0.0,
                ..SessionConfig::default()
            },
            Box::new(ScriptedSource::uniform("seq", 1)),
            Err(DetectorUnavailable::new("unused")),
            Box::new(RecordingSink::default()),
            Box::new(crate::pipeline::session_observer::NullObserver),
        );
        assert!(matches!(result, Err(ConfigError::Invalid { field: "expansionScale", .. })));
    }
}
