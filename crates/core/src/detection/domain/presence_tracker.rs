use crate::detection::domain::face_descriptor::FaceDescriptor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceState {
    Absent,
    Present,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PresenceEvent {
    FaceDetected(FaceDescriptor),
    FaceLost,
}

/// Edge-triggered face presence state machine.
///
/// With a `debounce` of 1 the state flips on the first observation that
/// contradicts it. A larger `debounce` counts confirmations after that first
/// sighting, so the flip lands on observation `debounce + 1` of an unbroken
/// contradicting run. Any agreeing observation starts the count over. Events
/// are emitted only on transitions, never while a state persists.
#[derive(Debug)]
pub struct PresenceTracker {
    state: PresenceState,
    run_needed: u32,
    contradicting: u32,
    degraded: bool,
}

impl PresenceTracker {
    /// `debounce` below 1 is treated as 1.
    pub fn new(debounce: u32) -> Self {
        let debounce = debounce.max(1);
        Self {
            state: PresenceState::Absent,
            run_needed: if debounce == 1 { 1 } else { debounce + 1 },
            contradicting: 0,
            degraded: false,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Feeds one per-frame detector outcome.
    pub fn observe(&mut self, face: Option<&FaceDescriptor>) -> Option<PresenceEvent> {
        if self.degraded {
            return None;
        }
        let contradicts = match self.state {
            PresenceState::Absent => face.is_some(),
            PresenceState::Present => face.is_none(),
        };
        if !contradicts {
            self.contradicting = 0;
            return None;
        }
        self.contradicting += 1;
        if self.contradicting < self.run_needed {
            return None;
        }
        self.contradicting = 0;
        match face {
            Some(descriptor) => {
                self.state = PresenceState::Present;
                Some(PresenceEvent::FaceDetected(descriptor.clone()))
            }
            None => {
                self.state = PresenceState::Absent;
                Some(PresenceEvent::FaceLost)
            }
        }
    }

    /// Detector became unavailable: force `Absent` and ignore observations
    /// until `reset`.
    pub fn degrade(&mut self) -> Option<PresenceEvent> {
        self.degraded = true;
        self.contradicting = 0;
        if self.state == PresenceState::Present {
            self.state = PresenceState::Absent;
            return Some(PresenceEvent::FaceLost);
        }
        None
    }

    pub fn reset(&mut self) {
        self.state = PresenceState::Absent;
        self.contradicting = 0;
        self.degraded = false;
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(crate::shared::constants::DEFAULT_PRESENCE_DEBOUNCE)
    }
}
