use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::backend::Backend;
use crate::shared::constants::{
    DEFAULT_BLUR_RADIUS, DEFAULT_BRIGHTNESS, DEFAULT_CAPTURE_QUALITY, DEFAULT_EXPANSION_SCALE,
    DEFAULT_FRAME_TIMEOUT_MS, DEFAULT_MIN_DETECTION_CONFIDENCE, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_PRESENCE_DEBOUNCE, MAX_FACES,
};
use crate::shared::errors::ConfigError;

/// Session tuning, loaded from camelCase JSON. Missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub backend: Backend,
    pub expansion_scale: f64,
    pub blur_radius: f32,
    pub brightness: f32,
    /// Only used by polled backends.
    pub poll_interval_ms: u64,
    pub max_faces: usize,
    pub min_detection_confidence: f32,
    pub presence_debounce: u32,
    pub tracking_enabled: bool,
    /// 0 runs the detector on every frame.
    pub detection_interval_ms: u64,
    pub capture_quality: u8,
    pub frame_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            expansion_scale: DEFAULT_EXPANSION_SCALE,
            blur_radius: DEFAULT_BLUR_RADIUS,
            brightness: DEFAULT_BRIGHTNESS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_faces: MAX_FACES,
            min_detection_confidence: DEFAULT_MIN_DETECTION_CONFIDENCE,
            presence_debounce: DEFAULT_PRESENCE_DEBOUNCE,
            tracking_enabled: false,
            detection_interval_ms: 0,
            capture_quality: DEFAULT_CAPTURE_QUALITY,
            frame_timeout_ms: DEFAULT_FRAME_TIMEOUT_MS,
        }
    }
}

fn invalid(field: &'static str, requirement: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        field,
        requirement,
        value: value.to_string(),
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.expansion_scale.is_finite() && self.expansion_scale > 0.0) {
            return Err(invalid(
                "expansionScale",
                "finite and positive",
                self.expansion_scale,
            ));
        }
        if !(self.blur_radius.is_finite() && self.blur_radius >= 0.0) {
            return Err(invalid("blurRadius", "finite and >= 0", self.blur_radius));
        }
        if !(0.0..=1.0).contains(&self.brightness) {
            return Err(invalid("brightness", "between 0 and 1", self.brightness));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("pollIntervalMs", "at least 1", self.poll_interval_ms));
        }
        if self.max_faces != MAX_FACES {
            return Err(invalid("maxFaces", "exactly 1", self.max_faces));
        }
        if !(0.0..=1.0).contains(&self.min_detection_confidence) {
            return Err(invalid(
                "minDetectionConfidence",
                "between 0 and 1",
                self.min_detection_confidence,
            ));
        }
        if self.presence_debounce == 0 {
            return Err(invalid("presenceDebounce", "at least 1", self.presence_debounce));
        }
        if !(1..=100).contains(&self.capture_quality) {
            return Err(invalid("captureQuality", "between 1 and 100", self.capture_quality));
        }
        if self.frame_timeout_ms == 0 {
            return Err(invalid("frameTimeoutMs", "at least 1", self.frame_timeout_ms));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn detection_interval(&self) -> Option<Duration> {
        (self.detection_interval_ms > 0).then(|| Duration::from_millis(self.detection_interval_ms))
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}
