use crate::audio::AudioCapture;
use crate::speech::{SpeechConfig, SpeechEngine, SpeechError, SpeechEvent};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Whisper expects 16 kHz mono f32 PCM.
const WHISPER_SAMPLE_RATE: u32 = 16_000;
/// Utterance window transcribed at a time.
const WINDOW_SECONDS: usize = 3;

/// Local speech recognition backed by whisper.cpp. Emits final transcripts
/// only; interim results are not supported by this engine.
pub struct WhisperSpeechEngine {
    context: Arc<Mutex<WhisperContext>>,
}

impl WhisperSpeechEngine {
    pub fn new(model_path: &str) -> Result<Self, SpeechError> {
        tracing::info!(model = %model_path, "loading whisper model");
        let context =
            WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
                .map_err(|e| SpeechError::Engine(format!("failed to load model: {e}")))?;
        Ok(Self {
            context: Arc::new(Mutex::new(context)),
        })
    }
}

impl SpeechEngine for WhisperSpeechEngine {
    fn name(&self) -> &'static str {
        "whisper"
    }

    fn run(
        &self,
        config: SpeechConfig,
        events: mpsc::Sender<SpeechEvent>,
        stop: Arc<AtomicBool>,
    ) -> BoxFuture<'static, Result<(), SpeechError>> {
        let context = Arc::clone(&self.context);
        async move {
            let capture = AudioCapture::open(None)
                .map_err(|e| SpeechError::Engine(format!("microphone unavailable: {e}")))?;
            let sample_rate = capture.sample_rate();
            let channels = capture.channels();
            // Whisper language codes are the bare primary subtag.
            let language = config
                .language
                .split('-')
                .next()
                .unwrap_or("en")
                .to_owned();

            let window_len = sample_rate as usize * WINDOW_SECONDS;
            let mut window: Vec<f32> = Vec::with_capacity(window_len);

            while !stop.load(Ordering::SeqCst) {
                let batch = capture
                    .next_samples()
                    .await
                    .map_err(|e| SpeechError::Engine(e.to_string()))?;
                if batch.is_empty() {
                    continue;
                }
                window.extend(downmix(&batch, channels));
                if window.len() < window_len {
                    continue;
                }

                let chunk = std::mem::take(&mut window);
                let pcm = resample(&chunk, sample_rate, WHISPER_SAMPLE_RATE);
                let ctx = Arc::clone(&context);
                let lang = language.clone();
                let text = tokio::task::spawn_blocking(move || transcribe(&ctx, &pcm, &lang))
                    .await
                    .map_err(|e| SpeechError::Engine(e.to_string()))??;

                let text = text.trim().to_owned();
                if text.is_empty() {
                    continue;
                }
                if events
                    .send(SpeechEvent::Transcript {
                        text,
                        is_final: true,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                if !config.continuous {
                    break;
                }
            }
            Ok(())
        }
        .boxed()
    }
}

fn transcribe(
    context: &Arc<Mutex<WhisperContext>>,
    pcm: &[f32],
    language: &str,
) -> Result<String, SpeechError> {
    let guard = context
        .lock()
        .map_err(|_| SpeechError::Engine("whisper context poisoned".to_owned()))?;
    let mut state = guard
        .create_state()
        .map_err(|e| SpeechError::Engine(e.to_string()))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);
    params.set_language(Some(language));
    let threads = std::thread::available_parallelism()
        .map(|n| n.get() as i32 - 1)
        .unwrap_or(1)
        .max(1);
    params.set_n_threads(threads);

    state
        .full(params, pcm)
        .map_err(|e| SpeechError::Engine(e.to_string()))?;

    let count = state
        .full_n_segments()
        .map_err(|e| SpeechError::Engine(e.to_string()))?;
    let mut out = String::new();
    for i in 0..count {
        let segment = state
            .full_get_segment_text(i)
            .map_err(|e| SpeechError::Engine(e.to_string()))?;
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(segment.trim());
    }
    Ok(out)
}

fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let step = from_rate as f64 / to_rate as f64;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_stereo_frames() {
        let stereo = [0.2, 0.4, -0.2, -0.4];
        assert_eq!(downmix(&stereo, 2), vec![0.3, -0.3]);
    }

    #[test]
    fn resample_halves_length_for_double_rate() {
        let input: Vec<f32> = (0..32_000).map(|i| i as f32).collect();
        let out = resample(&input, 32_000, 16_000);
        assert_eq!(out.len(), 16_000);
        // Endpoints map linearly.
        assert_eq!(out[0], 0.0);
        assert!((out[8_000] - 16_000.0).abs() < 2.0);
    }

    #[test]
    fn resample_is_identity_at_equal_rates() {
        let input = vec![0.1f32, 0.2, 0.3];
        assert_eq!(resample(&input, 16_000, 16_000), input);
    }
}
