use serde::{Deserialize, Serialize};
use std::{
    fmt,
    time::{Duration, SystemTime},
};
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 100;
pub const DEFAULT_SPEECH_LANG: &str = "en-US";
pub const ENV_BACKEND_URL: &str = "COACH_BACKEND_URL";
pub const ENV_SPEECH_LANG: &str = "COACH_SPEECH_LANG";
pub const ENV_WHISPER_MODEL: &str = "COACH_WHISPER_MODEL";

/// Frames are captured and streamed in this fixed source space.
pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;
/// JPEG quality for streamed frames (0-100).
pub const JPEG_QUALITY: u8 = 80;

pub const DEFAULT_SPEECH_THRESHOLD: f32 = 0.02;
pub const DEFAULT_SILENCE_DURATION_MS: u64 = 2500;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

pub const FEEDBACK_CAPACITY: usize = 5;
pub const COORDINATE_LOG_CAPACITY: usize = 30;

/// Where video frames come from. The synthetic source is a stand-in for
/// environments without a camera; the two are never mixed in one session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FrameInput {
    Camera(i32),
    Synthetic,
}

/// Join an existing meeting or have the backend create a fresh one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionIntent {
    Create,
    Join(SessionId),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(ConfigError::EmptySessionId);
        }
        Ok(Self(v))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated backend base URL. Derives both the REST endpoints and the
/// per-session WebSocket endpoint from one origin.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendUrl(Url);

impl BackendUrl {
    pub fn new(value: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(value).map_err(ConfigError::InvalidBackendUrl)?;
        match url.scheme() {
            "http" | "https" => Ok(Self(url)),
            other => Err(ConfigError::UnsupportedScheme(other.to_owned())),
        }
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn api_url(&self, path: &str) -> Result<Url, ConfigError> {
        self.0
            .join(path)
            .map_err(ConfigError::InvalidBackendUrl)
    }

    /// `{ws_base}/ws/meet/{session_id}`, with the scheme switched to ws/wss.
    pub fn ws_meet_url(&self, session: &SessionId) -> Result<Url, ConfigError> {
        let mut url = self
            .0
            .join(&format!("ws/meet/{}", session.as_str()))
            .map_err(ConfigError::InvalidBackendUrl)?;
        let scheme = match self.0.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::UnsupportedScheme(scheme.to_owned()))?;
        Ok(url)
    }
}

/// Fixed frame-capture cadence, 10 fps by default.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameCadence {
    pub interval_ms: u64,
}

impl FrameCadence {
    pub fn new(interval_ms: u64) -> Result<Self, ConfigError> {
        if interval_ms == 0 {
            return Err(ConfigError::ZeroFrameInterval);
        }
        Ok(Self { interval_ms })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn frames_per_second(&self) -> f64 {
        1000.0 / self.interval_ms as f64
    }
}

impl Default for FrameCadence {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_FRAME_INTERVAL_MS,
        }
    }
}

/// Voice-activity detection tuning.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct VadTuning {
    /// Normalized energy above which speech is assumed (0-1).
    pub speech_threshold: f32,
    /// Continuous silence required before a speech segment ends.
    pub silence_duration_ms: u64,
}

impl VadTuning {
    pub fn new(speech_threshold: f32, silence_duration_ms: u64) -> Result<Self, ConfigError> {
        if !(0.0..1.0).contains(&speech_threshold) || speech_threshold <= 0.0 {
            return Err(ConfigError::ThresholdOutOfRange(speech_threshold));
        }
        if silence_duration_ms == 0 {
            return Err(ConfigError::ZeroSilenceDuration);
        }
        Ok(Self {
            speech_threshold,
            silence_duration_ms,
        })
    }

    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_duration_ms)
    }
}

impl Default for VadTuning {
    fn default() -> Self {
        Self {
            speech_threshold: DEFAULT_SPEECH_THRESHOLD,
            silence_duration_ms: DEFAULT_SILENCE_DURATION_MS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub backend: BackendUrl,
    pub session: SessionIntent,
    pub input: FrameInput,
    pub cadence: FrameCadence,
    pub vad: VadTuning,
    pub speech_language: String,
    /// Speak coaching feedback aloud.
    pub voice_enabled: bool,
    /// Run the microphone pipeline (VAD + speech-to-text).
    pub listen_enabled: bool,
    /// Path to a local Whisper model, when speech-to-text is wanted.
    pub whisper_model: Option<String>,
    pub reconnect_delay_ms: u64,
    pub start_time: SystemTime,
}

impl AppConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("session id must not be empty")]
    EmptySessionId,
    #[error("invalid backend url: {0}")]
    InvalidBackendUrl(#[from] url::ParseError),
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("frame interval must be > 0 ms")]
    ZeroFrameInterval,
    #[error("speech threshold {0} outside (0, 1)")]
    ThresholdOutOfRange(f32),
    #[error("silence duration must be > 0 ms")]
    ZeroSilenceDuration,
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match cli_value {
        Some(v) => Some(v),
        None => env.var(env_key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_url_cli_takes_precedence_over_env() {
        let env = MapEnv::default().with_var(ENV_BACKEND_URL, "http://env:8000");
        let v = resolve_string_with_default(
            Some("http://cli:8000".to_owned()),
            ENV_BACKEND_URL,
            &env,
            DEFAULT_BACKEND_URL,
        );
        assert_eq!(v, "http://cli:8000");
    }

    #[test]
    fn backend_url_env_used_when_cli_missing() {
        let env = MapEnv::default().with_var(ENV_BACKEND_URL, "http://env:8000");
        let v = resolve_string_with_default(None, ENV_BACKEND_URL, &env, DEFAULT_BACKEND_URL);
        assert_eq!(v, "http://env:8000");
    }

    #[test]
    fn backend_url_default_used_when_both_missing() {
        let env = MapEnv::default();
        let v = resolve_string_with_default(None, ENV_BACKEND_URL, &env, DEFAULT_BACKEND_URL);
        assert_eq!(v, DEFAULT_BACKEND_URL);
    }

    #[test]
    fn ws_meet_url_switches_scheme_and_appends_session() {
        let backend = BackendUrl::new("https://coach.example.com").expect("valid");
        let session = SessionId::new("abc-123").expect("valid");
        let ws = backend.ws_meet_url(&session).expect("derivable");
        assert_eq!(ws.as_str(), "wss://coach.example.com/ws/meet/abc-123");
    }

    #[test]
    fn ws_meet_url_plain_http_becomes_ws() {
        let backend = BackendUrl::new("http://localhost:8000").expect("valid");
        let session = SessionId::new("s1").expect("valid");
        let ws = backend.ws_meet_url(&session).expect("derivable");
        assert_eq!(ws.as_str(), "ws://localhost:8000/ws/meet/s1");
    }

    #[test]
    fn session_id_rejects_blank() {
        assert_eq!(SessionId::new("   "), Err(ConfigError::EmptySessionId));
    }

    #[test]
    fn frame_cadence_default_is_ten_fps() {
        let c = FrameCadence::default();
        assert_eq!(c.interval(), Duration::from_millis(100));
        assert!((c.frames_per_second() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn vad_tuning_rejects_bad_threshold() {
        assert!(VadTuning::new(0.0, 2500).is_err());
        assert!(VadTuning::new(1.5, 2500).is_err());
        assert!(VadTuning::new(0.02, 0).is_err());
        assert!(VadTuning::new(0.02, 2500).is_ok());
    }
}
