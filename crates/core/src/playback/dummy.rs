use crate::playback::{PlaybackError, PlaybackSink};
use crate::tts::TtsAudio;
use futures::future::BoxFuture;
use futures::FutureExt;

/// Discards audio; stands in for a real output device in tests and on
/// machines without one.
#[derive(Clone, Default)]
pub struct DummyPlaybackSink;

impl DummyPlaybackSink {
    pub fn new() -> Self {
        Self
    }
}

impl PlaybackSink for DummyPlaybackSink {
    fn play(&self, _audio: TtsAudio) -> BoxFuture<'_, Result<(), PlaybackError>> {
        async move { Ok(()) }.boxed()
    }

    fn cancel(&self) {}
}
