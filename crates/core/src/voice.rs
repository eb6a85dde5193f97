//! Spoken coaching feedback.
//!
//! Wraps a TTS client and a playback sink behind one switchable voice. Only
//! one utterance sounds at a time; a new one, or a cancellation on session
//! stop, cuts the current one short.

use crate::playback::PlaybackSink;
use crate::tts::{TtsClient, TtsRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

pub struct CoachVoice {
    tts: Arc<dyn TtsClient>,
    sink: Arc<dyn PlaybackSink>,
    enabled: AtomicBool,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl CoachVoice {
    pub fn new(tts: Arc<dyn TtsClient>, sink: Arc<dyn PlaybackSink>, enabled: bool) -> Self {
        Self {
            tts,
            sink,
            enabled: AtomicBool::new(enabled),
            current: Mutex::new(None),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.cancel();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Speaks `text`, cancelling any in-flight utterance first. A no-op
    /// while the voice is disabled; synthesis/playback failures are logged
    /// and never fatal.
    pub fn speak(&self, text: &str) {
        if !self.is_enabled() || text.trim().is_empty() {
            return;
        }
        self.cancel();

        let tts = Arc::clone(&self.tts);
        let sink = Arc::clone(&self.sink);
        let text = text.to_owned();
        let handle = tokio::spawn(async move {
            let request = TtsRequest { text, voice: None };
            match tts.synthesize(request).await {
                Ok(audio) => {
                    if let Err(e) = sink.play(audio).await {
                        tracing::warn!(error = %e, "speech playback failed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "speech synthesis failed"),
            }
        });

        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        *current = Some(handle);
    }

    /// Silences and forgets any in-flight utterance.
    pub fn cancel(&self) {
        let handle = {
            let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
            current.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        self.sink.cancel();
    }
}

impl Drop for CoachVoice {
    fn drop(&mut self) {
        self.cancel();
    }
}
