//! Speech-to-text adapter.
//!
//! Mirrors a host speech-recognition facility: the adapter itself is always
//! constructible, but whether an engine is actually available depends on the
//! build and environment. With no engine, `start` reports the problem
//! through the error callback and returns false instead of failing hard.

#[cfg(feature = "whisper-rs")]
pub mod whisper;
#[cfg(feature = "whisper-rs")]
pub use whisper::WhisperSpeechEngine;

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeechConfig {
    /// BCP-47 language tag, e.g. "en-US".
    pub language: String,
    /// Keep recognizing after the first final transcript.
    pub continuous: bool,
    /// Deliver partial transcripts when the engine supports them.
    pub interim_results: bool,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            language: crate::config::DEFAULT_SPEECH_LANG.to_owned(),
            continuous: true,
            interim_results: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpeechEvent {
    Transcript { text: String, is_final: bool },
    Error { message: String },
}

#[derive(thiserror::Error, Debug)]
pub enum SpeechError {
    #[error("speech engine failed: {0}")]
    Engine(String),
}

/// A recognition engine. Runs until the stop flag flips, the event receiver
/// goes away, or (non-continuous mode) one final transcript is out.
pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(
        &self,
        config: SpeechConfig,
        events: mpsc::Sender<SpeechEvent>,
        stop: Arc<AtomicBool>,
    ) -> BoxFuture<'static, Result<(), SpeechError>>;
}

pub type TranscriptCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;
pub type SpeechErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub struct SpeechToText {
    engine: Option<Arc<dyn SpeechEngine>>,
    on_transcript: TranscriptCallback,
    on_error: SpeechErrorCallback,
    listening: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SpeechToText {
    pub fn new(
        engine: Option<Arc<dyn SpeechEngine>>,
        on_transcript: TranscriptCallback,
        on_error: SpeechErrorCallback,
    ) -> Self {
        Self {
            engine,
            on_transcript,
            on_error,
            listening: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Starts recognition. Returns whether an engine was available and
    /// successfully started; a missing engine reports through the error
    /// callback and returns false without panicking.
    pub fn start(&mut self, config: SpeechConfig) -> bool {
        if self.listening.load(Ordering::SeqCst) {
            return true;
        }

        let Some(engine) = self.engine.clone() else {
            (self.on_error)("speech recognition is not available in this environment");
            return false;
        };

        let stop = Arc::new(AtomicBool::new(false));
        self.stop_flag = Arc::clone(&stop);
        self.listening.store(true, Ordering::SeqCst);

        let (tx, mut rx) = mpsc::channel(16);
        let continuous = config.continuous;
        let mut run = engine.run(config, tx, stop);
        tracing::info!(engine = engine.name(), "speech recognition started");

        let listening = Arc::clone(&self.listening);
        let on_transcript = Arc::clone(&self.on_transcript);
        let on_error = Arc::clone(&self.on_error);

        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    done = &mut run => {
                        if let Err(e) = done {
                            (on_error)(&e.to_string());
                        }
                        break;
                    }
                    event = rx.recv() => match event {
                        Some(SpeechEvent::Transcript { text, is_final }) => {
                            (on_transcript)(&text, is_final);
                            if is_final && !continuous {
                                break;
                            }
                        }
                        // Engine runtime errors forward to the error
                        // callback and end the listening state.
                        Some(SpeechEvent::Error { message }) => {
                            (on_error)(&message);
                            break;
                        }
                        None => break,
                    }
                }
            }
            listening.store(false, Ordering::SeqCst);
        }));

        true
    }

    /// Idempotent; only acts while listening.
    pub fn stop(&mut self) {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        tracing::info!("speech recognition stopped");
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

impl Drop for SpeechToText {
    fn drop(&mut self) {
        self.stop();
    }
}
