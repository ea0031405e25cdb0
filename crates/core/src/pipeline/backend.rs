use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How frames and faces are obtained. Chosen at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Backend {
    /// On-device detector over a polled camera.
    #[default]
    NativeDetector,
    /// Detection runs in an embedded renderer that posts results back.
    EmbeddedRenderer,
    /// Frames straight from the media stream, detected on the pipeline thread.
    DirectMediaStream,
}

/// Frame delivery cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Newest frame once per poll interval.
    Polled,
    /// Every frame the device produces.
    Native,
}

/// Where the detector runs relative to the pipeline tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionScheduling {
    Inline,
    /// On a detection thread fed newest-frame-wins.
    Worker,
}

impl Backend {
    pub const ALL: &[Backend] = &[
        Backend::NativeDetector,
        Backend::EmbeddedRenderer,
        Backend::DirectMediaStream,
    ];

    pub fn cadence(self) -> Cadence {
        match self {
            Backend::NativeDetector => Cadence::Polled,
            Backend::EmbeddedRenderer | Backend::DirectMediaStream => Cadence::Native,
        }
    }

    pub fn scheduling(self) -> DetectionScheduling {
        match self {
            Backend::EmbeddedRenderer => DetectionScheduling::Worker,
            Backend::NativeDetector | Backend::DirectMediaStream => DetectionScheduling::Inline,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Backend::NativeDetector => "nativeDetector",
            Backend::EmbeddedRenderer => "embeddedRenderer",
            Backend::DirectMediaStream => "directMediaStream",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = String;

    /// Accepts the camelCase config names and kebab-case CLI spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        Backend::ALL
            .iter()
            .copied()
            .find(|b| b.name().to_ascii_lowercase() == folded)
            .ok_or_else(|| {
                format!("unknown backend '{s}' (expected native-detector, embedded-renderer or direct-media-stream)")
            })
    }
}
