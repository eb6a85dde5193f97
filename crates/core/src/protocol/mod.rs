//! Wire types for the coaching backend WebSocket.
//!
//! Inbound payloads are produced by an external analysis server; every
//! nested section is optional on the wire and falls back to its
//! "Unknown"/zero form so a sparse payload never fails to parse.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of pose keypoints in one analysis result (COCO body-18 layout).
pub const KEYPOINT_COUNT: usize = 18;

/// Messages sent to the backend.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One captured frame as a base64 JPEG data URL plus epoch seconds.
    Frame { frame: String, timestamp: f64 },
    Ping,
    End,
}

/// Messages received from the backend, discriminated by `type`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        #[serde(default)]
        message: String,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        participant_id: Option<String>,
    },
    Pong,
    Analysis {
        data: AnalysisData,
        #[serde(default)]
        coaching: Option<CoachingFeedback>,
        #[serde(default)]
        gemini: Option<AiFeedback>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    /// Message types this client does not know about are tolerated.
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Balance {
    #[serde(default)]
    pub cog: [f32; 2],
    #[serde(default)]
    pub balance_score: f32,
}

impl Default for Balance {
    fn default() -> Self {
        Self {
            cog: [0.0, 0.0],
            balance_score: 0.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Posture {
    #[serde(default = "unknown")]
    pub status: String,
    #[serde(default)]
    pub angle: f32,
    #[serde(default)]
    pub shoulder_aligned: Option<bool>,
}

impl Default for Posture {
    fn default() -> Self {
        Self {
            status: unknown(),
            angle: 0.0,
            shoulder_aligned: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Movement {
    #[serde(default = "unknown")]
    pub energy: String,
    #[serde(default = "unknown")]
    pub sentiment: String,
    #[serde(default)]
    pub movement_score: f32,
    #[serde(default)]
    pub velocity: f32,
}

impl Default for Movement {
    fn default() -> Self {
        Self {
            energy: unknown(),
            sentiment: unknown(),
            movement_score: 0.0,
            velocity: 0.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EmotionReport {
    #[serde(default = "unknown")]
    pub emotion: String,
    #[serde(default = "unknown")]
    pub sentiment: String,
    /// Detector confidence in percent.
    #[serde(default)]
    pub confidence: u32,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub all_emotions: BTreeMap<String, f32>,
}

impl Default for EmotionReport {
    fn default() -> Self {
        Self {
            emotion: unknown(),
            sentiment: unknown(),
            confidence: 0,
            details: String::new(),
            all_emotions: BTreeMap::new(),
        }
    }
}

/// One pose-analysis result for a streamed frame.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisData {
    #[serde(default)]
    pub frame_num: u64,
    #[serde(default)]
    pub timestamp: f64,
    /// Slot per keypoint index; `None` where the detector saw nothing.
    #[serde(default)]
    pub keypoints: Vec<Option<Keypoint>>,
    /// Joint name to angle in degrees.
    #[serde(default)]
    pub joints: BTreeMap<String, f32>,
    /// Symmetry metric name to percent difference.
    #[serde(default)]
    pub symmetry: BTreeMap<String, f32>,
    #[serde(default)]
    pub balance: Balance,
    #[serde(default)]
    pub posture: Posture,
    #[serde(default)]
    pub movement: Movement,
    #[serde(default)]
    pub emotion: EmotionReport,
    #[serde(default)]
    pub activities: Vec<String>,
}

impl AnalysisData {
    pub fn valid_keypoints(&self) -> usize {
        self.keypoints.iter().filter(|k| k.is_some()).count()
    }
}

/// Coaching decision attached to an analysis message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CoachingFeedback {
    #[serde(default)]
    pub triggered: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub feedback: String,
}

/// Extended AI-generated feedback, present when the backend polishes the
/// coaching text with its language model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AiFeedback {
    #[serde(default)]
    pub triggered: bool,
    #[serde(default)]
    pub frame_num: u64,
    #[serde(default)]
    pub feedback: String,
}

fn unknown() -> String {
    "Unknown".to_owned()
}

/// Seconds since the Unix epoch, as the backend expects on frame messages.
pub fn epoch_seconds(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_message_carries_type_tag() {
        let msg = ClientMessage::Frame {
            frame: "data:image/jpeg;base64,AAAA".to_owned(),
            timestamp: 1700000000.5,
        };
        let json = serde_json::to_string(&msg).expect("serializes");
        assert!(json.contains("\"type\":\"frame\""));
        assert!(json.contains("\"frame\":\"data:image/jpeg;base64,AAAA\""));
    }

    #[test]
    fn analysis_parses_with_all_sections() {
        let json = r#"{
            "type": "analysis",
            "data": {
                "frame_num": 42,
                "timestamp": 12.5,
                "keypoints": [
                    {"x": 320.0, "y": 104.5, "confidence": 0.91},
                    null
                ],
                "joints": {"left_elbow": 87.5},
                "symmetry": {"arm_symmetry": 4.2},
                "balance": {"cog": [312.0, 400.0], "balance_score": 72.5},
                "posture": {"status": "Upright", "angle": 2.1, "shoulder_aligned": true},
                "movement": {"energy": "Calm", "sentiment": "Positive", "movement_score": 11.0, "velocity": 0.4},
                "emotion": {"emotion": "Happy", "sentiment": "Positive", "confidence": 88, "details": "", "all_emotions": {"happy": 0.88}},
                "activities": ["standing"]
            },
            "coaching": {"triggered": true, "reason": "posture", "feedback": "Lift your chin a little."}
        }"#;

        let msg: ServerMessage = serde_json::from_str(json).expect("parses");
        let ServerMessage::Analysis {
            data, coaching, gemini,
        } = msg
        else {
            panic!("expected analysis");
        };
        assert_eq!(data.frame_num, 42);
        assert_eq!(data.valid_keypoints(), 1);
        assert_eq!(data.balance.balance_score, 72.5);
        assert_eq!(data.posture.status, "Upright");
        assert_eq!(coaching.expect("coaching").reason, "posture");
        assert!(gemini.is_none());
    }

    #[test]
    fn sparse_analysis_falls_back_to_unknown_defaults() {
        let json = r#"{"type":"analysis","data":{"frame_num":7,"balance":{"balance_score":72.5}}}"#;
        let msg: ServerMessage = serde_json::from_str(json).expect("parses");
        let ServerMessage::Analysis { data, .. } = msg else {
            panic!("expected analysis");
        };
        assert_eq!(data.emotion.emotion, "Unknown");
        assert_eq!(data.posture.status, "Unknown");
        assert_eq!(data.movement.energy, "Unknown");
        assert_eq!(data.balance.balance_score, 72.5);
        assert!(data.keypoints.is_empty());
    }

    #[test]
    fn unknown_message_type_is_tolerated() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"asana_set","asana":"tree"}"#).expect("parses");
        assert_eq!(msg, ServerMessage::Unknown);
    }

    #[test]
    fn welcome_defaults_missing_fields() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"welcome"}"#).expect("parses");
        let ServerMessage::Welcome { message, .. } = msg else {
            panic!("expected welcome");
        };
        assert_eq!(message, "");
    }

    #[test]
    fn epoch_seconds_is_monotonic_enough() {
        let a = epoch_seconds(SystemTime::now());
        assert!(a > 1_000_000_000.0);
    }
}
