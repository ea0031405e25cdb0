use thiserror::Error;

/// Failures acquiring or reading a frame source. Fatal to `start`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("device {0} is already in use by another session")]
    DeviceBusy(String),
    #[error("device unavailable: {0}")]
    Unavailable(String),
}

/// The detector cannot produce results (model failed to load, inference
/// failed, renderer disconnected). Non-fatal to the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("face detector unavailable: {reason}")]
pub struct DetectorUnavailable {
    pub reason: String,
}

impl DetectorUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<Box<dyn std::error::Error>> for DetectorUnavailable {
    fn from(e: Box<dyn std::error::Error>) -> Self {
        Self::new(e.to_string())
    }
}

/// Failures of a single still capture. The running pipeline is unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no active session")]
    NotStarted,
    #[error("capture denied by device: {0}")]
    Denied(String),
    #[error("failed to encode still image: {0}")]
    Encode(String),
}

/// The frame could not be composited. The frame is dropped and the previous
/// good output is presented again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompositingError {
    #[error("frame buffer is {actual} bytes, expected {expected}")]
    BufferMismatch { expected: usize, actual: usize },
    #[error("unsupported pixel layout with {0} channels")]
    UnsupportedLayout(u8),
}

/// A descriptor could not be turned into a region. Swallowed per frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("descriptor has zero area")]
    ZeroArea,
    #[error("coordinate {0} outside the normalized range [0, 1]")]
    OutOfRange(f64),
    #[error("polygon needs at least 3 points, got {0}")]
    TooFewPoints(usize),
    #[error("expansion scale must be finite and positive, got {0}")]
    InvalidScale(f64),
    #[error("frame has zero size")]
    EmptyFrame,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be {requirement}, got {value}")]
    Invalid {
        field: &'static str,
        requirement: &'static str,
        value: String,
    },
    #[error("failed to read config: {0}")]
    Read(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Errors surfaced to the host through `SessionObserver::on_error` and the
/// session's fallible methods.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Detector(#[from] DetectorUnavailable),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Compositing(#[from] CompositingError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("session already started")]
    AlreadyStarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_cause() {
        assert_eq!(
            DeviceError::DeviceBusy("camera:0".into()).to_string(),
            "device camera:0 is already in use by another session"
        );
        assert_eq!(
            CompositingError::BufferMismatch {
                expected: 12,
                actual: 10
            }
            .to_string(),
            "frame buffer is 10 bytes, expected 12"
        );
    }

    #[test]
    fn test_session_error_is_transparent() {
        let err: SessionError = DetectorUnavailable::new("model missing").into();
        assert_eq!(err.to_string(), "face detector unavailable: model missing");
    }

    #[test]
    fn test_boxed_error_converts_to_detector_unavailable() {
        let boxed: Box<dyn std::error::Error> = "inference failed".into();
        let err = DetectorUnavailable::from(boxed);
        assert_eq!(err.reason, "inference failed");
    }
}
