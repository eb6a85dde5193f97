//! Meeting session orchestration.
//!
//! A [`MeetingRuntime`] owns exactly one frame source, one WebSocket stream,
//! one microphone pipeline, and one voice per session, and tears all of them
//! down together on stop. Dropping the runtime tears down silently; an
//! explicit stop is allowed to finish speaking.

pub mod state;

pub use state::{
    coordinate_line, CoordinateLog, FeedbackItem, FeedbackLog, SessionStats, SessionView,
};

use crate::audio::{AudioError, VoiceActivityDetector, VoiceEvent};
use crate::capture::encode::{EncodeError, FrameEncoder};
use crate::capture::{CaptureError, FrameSource};
use crate::config::FrameCadence;
use crate::meet::MeetError;
use crate::overlay::SkeletonRenderer;
use crate::protocol::{epoch_seconds, AiFeedback, ClientMessage, CoachingFeedback};
use crate::speech::{SpeechConfig, SpeechToText};
use crate::stream::{ConnectionStatus, MeetStream, StreamError, StreamEvent};
use crate::voice::CoachVoice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Meet(#[from] MeetError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    pub cadence: FrameCadence,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cadence: FrameCadence::default(),
        }
    }
}

pub struct MeetingRuntime {
    options: SessionOptions,
    stream: MeetStream,
    events: Option<mpsc::Receiver<StreamEvent>>,
    frames: Option<Box<dyn FrameSource>>,
    encoder: FrameEncoder,
    renderer: SkeletonRenderer,
    voice: Arc<CoachVoice>,
    vad: Option<VoiceActivityDetector>,
    vad_events: Option<mpsc::Receiver<VoiceEvent>>,
    speech: Option<(SpeechToText, SpeechConfig)>,
    view: Arc<Mutex<SessionView>>,
    running: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MeetingRuntime {
    pub fn new(
        options: SessionOptions,
        stream: MeetStream,
        events: mpsc::Receiver<StreamEvent>,
        frames: Box<dyn FrameSource>,
        voice: Arc<CoachVoice>,
    ) -> Self {
        Self {
            options,
            stream,
            events: Some(events),
            frames: Some(frames),
            encoder: FrameEncoder::default(),
            renderer: SkeletonRenderer::new(
                crate::config::FRAME_WIDTH,
                crate::config::FRAME_HEIGHT,
            ),
            voice,
            vad: None,
            vad_events: None,
            speech: None,
            view: Arc::new(Mutex::new(SessionView::default())),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
        }
    }

    pub fn with_vad(
        mut self,
        vad: VoiceActivityDetector,
        events: mpsc::Receiver<VoiceEvent>,
    ) -> Self {
        self.vad = Some(vad);
        self.vad_events = Some(events);
        self
    }

    pub fn with_speech(mut self, speech: SpeechToText, config: SpeechConfig) -> Self {
        self.speech = Some((speech, config));
        self
    }

    pub fn snapshot(&self) -> SessionView {
        self.view
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.stream.status()
    }

    /// Brings the session up: socket, frame cadence, microphone. A denied
    /// microphone is a permission error and fails the start; a failed
    /// connect is a network error and is left to the reconnect policy.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.stream.start().await {
            tracing::warn!(error = %e, "initial connect failed; reconnect pending");
        }

        if let Some(vad) = &mut self.vad {
            vad.start_listening()?;
        }
        if let Some((speech, config)) = &mut self.speech {
            // A missing engine degrades through the error callback.
            let _ = speech.start(config.clone());
        }

        self.spawn_frame_task();
        self.spawn_event_task();
        self.spawn_vad_task();
        Ok(())
    }

    fn spawn_frame_task(&mut self) {
        let Some(mut frames) = self.frames.take() else {
            return;
        };
        let stream = self.stream.clone();
        let encoder = self.encoder;
        let running = Arc::clone(&self.running);
        let view = Arc::clone(&self.view);
        let interval = self.options.cadence.interval();

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let frame = match frames.next_frame().await {
                    Ok(Some(f)) => f,
                    // Source not ready yet; expected, skip the tick.
                    Ok(None) => continue,
                    Err(e) => {
                        // Device errors abort frame streaming; no retry.
                        tracing::error!(error = %e, "frame capture failed");
                        let mut v = view.lock().unwrap_or_else(|p| p.into_inner());
                        v.error_banner = Some(e.to_string());
                        break;
                    }
                };
                match encoder.encode(&frame) {
                    Ok(data_url) => {
                        stream.send_frame(ClientMessage::Frame {
                            frame: data_url,
                            timestamp: epoch_seconds(frame.captured_at),
                        });
                        view.lock().unwrap_or_else(|p| p.into_inner()).frames_sent += 1;
                    }
                    Err(e) => tracing::warn!(error = %e, "frame encode failed"),
                }
            }
        }));
    }

    fn spawn_event_task(&mut self) {
        let Some(mut events) = self.events.take() else {
            return;
        };
        let view = Arc::clone(&self.view);
        let voice = Arc::clone(&self.voice);
        let renderer = self.renderer;
        let running = Arc::clone(&self.running);

        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                match event {
                    StreamEvent::Status(status) => {
                        view.lock().unwrap_or_else(|p| p.into_inner()).status = Some(status);
                    }
                    StreamEvent::Welcome { message } => {
                        voice.speak(&message);
                    }
                    StreamEvent::Analysis { data, coaching, ai } => {
                        let spoken = spoken_feedback(&coaching, &ai);
                        {
                            let mut v = view.lock().unwrap_or_else(|p| p.into_inner());
                            v.analyses_received += 1;
                            v.stats = SessionStats::from_analysis(&data);
                            v.overlay = renderer.render(&data.keypoints);
                            v.coordinates.record(coordinate_line(&data));
                            if let Some(c) = &coaching {
                                if c.triggered {
                                    v.feedback.push(c.reason.clone(), c.feedback.clone());
                                }
                            }
                            if data.frame_num % 30 == 0 {
                                tracing::info!(
                                    frame = data.frame_num,
                                    energy = %v.stats.movement_energy,
                                    emotion = %v.stats.emotion,
                                    balance = %v.stats.balance_display(),
                                    posture = %v.stats.posture_status,
                                    "analysis summary"
                                );
                            }
                        }
                        if let Some(text) = spoken {
                            voice.speak(&text);
                        }
                    }
                    StreamEvent::BackendError { message } => {
                        view.lock().unwrap_or_else(|p| p.into_inner()).error_banner =
                            Some(message);
                    }
                }
            }
        }));
    }

    fn spawn_vad_task(&mut self) {
        let Some(mut events) = self.vad_events.take() else {
            return;
        };
        let view = Arc::clone(&self.view);
        let running = Arc::clone(&self.running);

        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                match event {
                    VoiceEvent::SpeechStart => {
                        tracing::debug!("speech started");
                        view.lock().unwrap_or_else(|p| p.into_inner()).user_speaking = true;
                    }
                    VoiceEvent::SpeechEnd { duration } => {
                        tracing::info!(
                            duration_ms = duration.as_millis() as u64,
                            "speech segment ended"
                        );
                        view.lock().unwrap_or_else(|p| p.into_inner()).user_speaking = false;
                    }
                }
            }
        }));
    }

    /// Tears the session down: frame tick, pending reconnect, microphone,
    /// socket (with a clean `end`), in-flight speech, overlay state.
    /// Idempotent.
    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }

        self.stream.stop().await;

        if let Some(vad) = &mut self.vad {
            vad.stop_listening();
        }
        if let Some((speech, _)) = &mut self.speech {
            speech.stop();
        }

        self.voice.cancel();

        let mut v = self.view.lock().unwrap_or_else(|p| p.into_inner());
        v.overlay.clear();
        v.user_speaking = false;
        v.status = Some(ConnectionStatus::Disconnected);
        tracing::info!(
            frames_sent = v.frames_sent,
            analyses_received = v.analyses_received,
            "session stopped"
        );
    }
}

impl Drop for MeetingRuntime {
    fn drop(&mut self) {
        // Unmount-style teardown: release everything, make no sound.
        self.running.store(false, Ordering::SeqCst);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(vad) = &mut self.vad {
            vad.stop_listening();
        }
        if let Some((speech, _)) = &mut self.speech {
            speech.stop();
        }
        self.voice.cancel();
    }
}

/// Which text, if any, an analysis message should speak: the AI-polished
/// feedback wins over the plain coaching text.
fn spoken_feedback(
    coaching: &Option<CoachingFeedback>,
    ai: &Option<AiFeedback>,
) -> Option<String> {
    if let Some(ai) = ai {
        if ai.triggered && !ai.feedback.trim().is_empty() {
            return Some(ai.feedback.clone());
        }
    }
    if let Some(c) = coaching {
        if c.triggered && !c.feedback.trim().is_empty() {
            return Some(c.feedback.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticFrameSource;
    use crate::playback::DummyPlaybackSink;
    use crate::stream::ReconnectPolicy;
    use crate::tts::BasicTtsClient;
    use std::time::Duration;
    use url::Url;

    fn coaching(triggered: bool, text: &str) -> Option<CoachingFeedback> {
        Some(CoachingFeedback {
            triggered,
            reason: "posture".to_owned(),
            feedback: text.to_owned(),
        })
    }

    fn ai(triggered: bool, text: &str) -> Option<AiFeedback> {
        Some(AiFeedback {
            triggered,
            frame_num: 1,
            feedback: text.to_owned(),
        })
    }

    #[test]
    fn ai_feedback_outranks_plain_coaching() {
        assert_eq!(
            spoken_feedback(&coaching(true, "plain"), &ai(true, "polished")),
            Some("polished".to_owned())
        );
        assert_eq!(
            spoken_feedback(&coaching(true, "plain"), &ai(false, "polished")),
            Some("plain".to_owned())
        );
        assert_eq!(spoken_feedback(&coaching(false, "plain"), &None), None);
        assert_eq!(spoken_feedback(&None, &None), None);
    }

    fn test_runtime() -> MeetingRuntime {
        let url = Url::parse("ws://127.0.0.1:9/ws/meet/test").expect("valid url");
        let (stream, events) = MeetStream::new(url, ReconnectPolicy::default());
        let voice = Arc::new(CoachVoice::new(
            Arc::new(BasicTtsClient::new()),
            Arc::new(DummyPlaybackSink::new()),
            false,
        ));
        MeetingRuntime::new(
            SessionOptions {
                cadence: FrameCadence { interval_ms: 10 },
            },
            stream,
            events,
            Box::new(SyntheticFrameSource::new(64, 48)),
            voice,
        )
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let mut runtime = test_runtime();
        runtime.stop().await;
        runtime.stop().await;
        assert_eq!(runtime.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn repeated_start_stop_cycles_leave_no_live_resources() {
        for _ in 0..5 {
            let mut runtime = test_runtime();
            runtime.start().await.expect("starts");
            tokio::time::sleep(Duration::from_millis(30)).await;
            runtime.stop().await;

            assert_eq!(runtime.status(), ConnectionStatus::Disconnected);
            assert!(runtime.tasks.is_empty());
            let view = runtime.snapshot();
            assert!(view.overlay.is_empty());
            assert!(!view.user_speaking);

            // A second stop stays a no-op.
            runtime.stop().await;
        }
    }

    #[tokio::test]
    async fn frames_count_even_while_disconnected() {
        let mut runtime = test_runtime();
        runtime.start().await.expect("starts");
        tokio::time::sleep(Duration::from_millis(80)).await;
        let sent = runtime.snapshot().frames_sent;
        runtime.stop().await;
        // Capture keeps ticking; sends are silently skipped without a socket.
        assert!(sent > 0);
    }
}
