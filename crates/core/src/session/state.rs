//! Client-side session state derived from backend analysis messages.

use crate::config::{COORDINATE_LOG_CAPACITY, FEEDBACK_CAPACITY};
use crate::overlay::DrawOp;
use crate::protocol::AnalysisData;
use crate::stream::ConnectionStatus;
use crate::util::RingBuffer;
use std::time::SystemTime;

/// Latest headline numbers for display. Recomputed wholesale from each
/// analysis message; there is no partial merge, so fields a payload omits
/// show their defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionStats {
    pub frame_num: u64,
    pub balance_score: f32,
    pub posture_status: String,
    pub movement_energy: String,
    pub emotion: String,
    pub activities: Vec<String>,
    pub valid_keypoints: usize,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            frame_num: 0,
            balance_score: 0.0,
            posture_status: "Unknown".to_owned(),
            movement_energy: "Unknown".to_owned(),
            emotion: "Unknown".to_owned(),
            activities: Vec::new(),
            valid_keypoints: 0,
        }
    }
}

impl SessionStats {
    pub fn from_analysis(data: &AnalysisData) -> Self {
        Self {
            frame_num: data.frame_num,
            balance_score: data.balance.balance_score,
            posture_status: data.posture.status.clone(),
            movement_energy: data.movement.energy.clone(),
            emotion: data.emotion.emotion.clone(),
            activities: data.activities.clone(),
            valid_keypoints: data.valid_keypoints(),
        }
    }

    /// "73/100" for a balance score of 72.5.
    pub fn balance_display(&self) -> String {
        format!("{}/100", self.balance_score.round() as i64)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FeedbackItem {
    pub reason: String,
    pub text: String,
    pub received_at: SystemTime,
}

/// The five most recent coaching items.
#[derive(Clone, Debug)]
pub struct FeedbackLog {
    ring: RingBuffer<FeedbackItem>,
}

impl Default for FeedbackLog {
    fn default() -> Self {
        Self {
            ring: RingBuffer::new(FEEDBACK_CAPACITY),
        }
    }
}

impl FeedbackLog {
    pub fn push(&mut self, reason: String, text: String) {
        self.ring.push(FeedbackItem {
            reason,
            text,
            received_at: SystemTime::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn latest(&self) -> Option<&FeedbackItem> {
        self.ring.newest()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &FeedbackItem> {
        self.ring.iter()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

/// Rolling log of keypoint summaries, one line per analysis.
#[derive(Clone, Debug)]
pub struct CoordinateLog {
    ring: RingBuffer<String>,
}

impl Default for CoordinateLog {
    fn default() -> Self {
        Self {
            ring: RingBuffer::new(COORDINATE_LOG_CAPACITY),
        }
    }
}

impl CoordinateLog {
    pub fn record(&mut self, line: String) {
        self.ring.push(line);
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.ring.iter()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

/// One log line summarizing the keypoints of an analysis result.
pub fn coordinate_line(data: &AnalysisData) -> String {
    let nose = data
        .keypoints
        .first()
        .and_then(|k| k.as_ref())
        .map(|k| format!("nose=({:.1}, {:.1})", k.x, k.y))
        .unwrap_or_else(|| "nose=--".to_owned());
    format!(
        "frame {:05}: {}/{} keypoints, {}",
        data.frame_num,
        data.valid_keypoints(),
        crate::protocol::KEYPOINT_COUNT,
        nose
    )
}

/// Everything a front end needs to draw the session.
#[derive(Clone, Debug, Default)]
pub struct SessionView {
    pub status: Option<ConnectionStatus>,
    pub stats: SessionStats,
    pub error_banner: Option<String>,
    pub overlay: Vec<DrawOp>,
    pub feedback: FeedbackLog,
    pub coordinates: CoordinateLog,
    pub user_speaking: bool,
    pub frames_sent: u64,
    pub analyses_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Balance, Keypoint};

    fn analysis(balance_score: f32) -> AnalysisData {
        AnalysisData {
            frame_num: 42,
            balance: Balance {
                cog: [320.0, 400.0],
                balance_score,
            },
            keypoints: vec![
                Some(Keypoint {
                    x: 312.0,
                    y: 104.5,
                    confidence: 0.9,
                }),
                None,
            ],
            ..AnalysisData::default()
        }
    }

    #[test]
    fn balance_display_rounds_to_integer() {
        let stats = SessionStats::from_analysis(&analysis(72.5));
        assert_eq!(stats.balance_display(), "73/100");

        let stats = SessionStats::from_analysis(&analysis(72.4));
        assert_eq!(stats.balance_display(), "72/100");
    }

    #[test]
    fn recompute_keeps_unknown_defaults_for_missing_sections() {
        let stats = SessionStats::from_analysis(&analysis(10.0));
        assert_eq!(stats.emotion, "Unknown");
        assert_eq!(stats.posture_status, "Unknown");
        assert_eq!(stats.movement_energy, "Unknown");
        assert_eq!(stats.valid_keypoints, 1);
    }

    #[test]
    fn feedback_log_keeps_only_the_latest_five() {
        let mut log = FeedbackLog::default();
        for i in 0..8 {
            log.push("posture".to_owned(), format!("tip {i}"));
        }
        assert_eq!(log.len(), 5);
        assert_eq!(log.latest().expect("non-empty").text, "tip 7");
        assert_eq!(log.iter().next().expect("non-empty").text, "tip 3");
    }

    #[test]
    fn coordinate_log_keeps_only_thirty_lines() {
        let mut log = CoordinateLog::default();
        for i in 0..45 {
            log.record(format!("line {i}"));
        }
        assert_eq!(log.len(), 30);
        assert_eq!(log.iter().next().expect("non-empty"), "line 15");
    }

    #[test]
    fn coordinate_line_reports_nose_and_count() {
        let line = coordinate_line(&analysis(0.0));
        assert_eq!(line, "frame 00042: 1/18 keypoints, nose=(312.0, 104.5)");

        let empty = AnalysisData::default();
        assert_eq!(
            coordinate_line(&empty),
            "frame 00000: 0/18 keypoints, nose=--"
        );
    }
}
