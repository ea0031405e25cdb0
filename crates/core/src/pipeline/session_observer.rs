use crossbeam_channel::Sender;

use crate::detection::domain::face_descriptor::FaceDescriptor;
use crate::shared::errors::SessionError;

/// Host callbacks, invoked sequentially from the session's pipeline thread
/// in frame order.
pub trait SessionObserver: Send {
    fn on_face_detected(&mut self, descriptor: &FaceDescriptor);

    fn on_face_lost(&mut self);

    /// Non-fatal failures. Default: log and carry on.
    fn on_error(&mut self, error: &SessionError) {
        log::warn!("Session error: {error}");
    }
}

/// Silent observer for hosts that only want the composited output.
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_face_detected(&mut self, _descriptor: &FaceDescriptor) {}
    fn on_face_lost(&mut self) {}
    fn on_error(&mut self, _error: &SessionError) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    FaceDetected(FaceDescriptor),
    FaceLost,
    Error(SessionError),
}

/// Forwards every callback as a [`SessionEvent`]. A dropped receiver is
/// ignored.
pub struct ChannelObserver {
    tx: Sender<SessionEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<SessionEvent>) -> Self {
        Self { tx }
    }
}

impl SessionObserver for ChannelObserver {
    fn on_face_detected(&mut self, descriptor: &FaceDescriptor) {
        let _ = self.tx.send(SessionEvent::FaceDetected(descriptor.clone()));
    }

    fn on_face_lost(&mut self) {
        let _ = self.tx.send(SessionEvent::FaceLost);
    }

    fn on_error(&mut self, error: &SessionError) {
        let _ = self.tx.send(SessionEvent::Error(error.clone()));
    }
}
