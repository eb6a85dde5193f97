use crate::tts::{TtsAudio, TtsClient, TtsError, TtsRequest};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::f32::consts::PI;

const SAMPLE_RATE_HZ: u32 = 22_050;
const TONE_HZ: f32 = 440.0;

/// Locally synthesized placeholder voice: an enveloped tone whose length
/// tracks the text, so coaching cues are audible without an external TTS
/// service.
#[derive(Clone)]
pub struct BasicTtsClient;

impl BasicTtsClient {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BasicTtsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TtsClient for BasicTtsClient {
    fn synthesize(&self, request: TtsRequest) -> BoxFuture<'_, Result<TtsAudio, TtsError>> {
        async move {
            let words = request.text.split_whitespace().count();
            let duration_ms = (words * 220).clamp(400, 4_000);
            let samples = duration_ms * SAMPLE_RATE_HZ as usize / 1000;
            let fade = (SAMPLE_RATE_HZ / 50) as usize; // 20ms ramps against clicks

            let mut pcm_i16 = Vec::with_capacity(samples);
            for i in 0..samples {
                let t = i as f32 / SAMPLE_RATE_HZ as f32;
                let mut amplitude = (2.0 * PI * TONE_HZ * t).sin() * 0.4;
                if i < fade {
                    amplitude *= i as f32 / fade as f32;
                }
                if samples - i < fade {
                    amplitude *= (samples - i) as f32 / fade as f32;
                }
                pcm_i16.push((amplitude * i16::MAX as f32) as i16);
            }

            Ok(TtsAudio {
                sample_rate_hz: SAMPLE_RATE_HZ,
                channels: 1,
                pcm_i16,
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn longer_text_produces_longer_audio() {
        let tts = BasicTtsClient::new();
        let short = tts
            .synthesize(TtsRequest {
                text: "Breathe".to_owned(),
                voice: None,
            })
            .await
            .expect("synthesizes");
        let long = tts
            .synthesize(TtsRequest {
                text: "Straighten your back and relax both shoulders".to_owned(),
                voice: None,
            })
            .await
            .expect("synthesizes");
        assert!(long.pcm_i16.len() > short.pcm_i16.len());
        assert_eq!(short.channels, 1);
        assert_eq!(short.sample_rate_hz, SAMPLE_RATE_HZ);
    }
}
