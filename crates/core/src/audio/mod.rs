pub mod capture;
pub mod vad;

pub use capture::AudioCapture;
pub use vad::{VoiceActivityDetector, VoiceEvent};

#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    #[error("no default input device")]
    NoDefaultInput,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("unsupported stream config: {0}")]
    UnsupportedConfig(String),

    #[error("failed to build stream: {0}")]
    StreamBuild(String),

    #[error("capture stream disconnected")]
    Disconnected,
}
