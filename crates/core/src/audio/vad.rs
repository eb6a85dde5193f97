//! Voice activity detection.
//!
//! Energy thresholding with a silence-timeout debounce: a speech segment
//! starts on the first batch whose normalized energy exceeds the threshold
//! and ends only after energy has stayed at or below it for the full
//! silence duration. Brief pauses therefore never split a segment.

use crate::audio::{AudioCapture, AudioError};
use crate::config::VadTuning;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceEvent {
    SpeechStart,
    SpeechEnd { duration: Duration },
}

/// Normalized 0-1 average amplitude of a sample batch.
pub fn normalized_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s.abs()).sum();
    (sum / samples.len() as f32).clamp(0.0, 1.0)
}

/// Deterministic speech-segment state machine, separated from device I/O
/// so the debounce behavior is testable with synthetic clocks.
struct SpeechTracker {
    tuning: VadTuning,
    speaking: bool,
    speech_started: Option<Instant>,
    silence_deadline: Option<Instant>,
}

impl SpeechTracker {
    fn new(tuning: VadTuning) -> Self {
        Self {
            tuning,
            speaking: false,
            speech_started: None,
            silence_deadline: None,
        }
    }

    fn update(&mut self, energy: f32, now: Instant) -> Option<VoiceEvent> {
        if energy > self.tuning.speech_threshold {
            // Renewed speech cancels any pending end-of-segment.
            self.silence_deadline = None;
            if !self.speaking {
                self.speaking = true;
                self.speech_started = Some(now);
                return Some(VoiceEvent::SpeechStart);
            }
        } else if self.speaking {
            match self.silence_deadline {
                None => {
                    self.silence_deadline = Some(now + self.tuning.silence_duration());
                }
                Some(deadline) if now >= deadline => {
                    self.speaking = false;
                    self.silence_deadline = None;
                    let duration = self
                        .speech_started
                        .take()
                        .map(|started| now.duration_since(started))
                        .unwrap_or_default();
                    return Some(VoiceEvent::SpeechEnd { duration });
                }
                Some(_) => {}
            }
        }
        None
    }

    #[cfg(test)]
    fn reset(&mut self) {
        self.speaking = false;
        self.speech_started = None;
        self.silence_deadline = None;
    }
}

/// Anything that yields microphone sample batches. The production source is
/// [`AudioCapture`]; tests substitute scripted batches.
pub trait SampleSource: Send {
    fn next_batch(&mut self) -> BoxFuture<'_, Result<Vec<f32>, AudioError>>;
}

impl SampleSource for AudioCapture {
    fn next_batch(&mut self) -> BoxFuture<'_, Result<Vec<f32>, AudioError>> {
        async move { self.next_samples().await }.boxed()
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Readout {
    speaking: bool,
    energy: f32,
}

pub struct VoiceActivityDetector {
    tuning: VadTuning,
    events: mpsc::Sender<VoiceEvent>,
    listening: Arc<AtomicBool>,
    readout: Arc<Mutex<Readout>>,
    task: Option<JoinHandle<()>>,
}

impl VoiceActivityDetector {
    pub fn new(tuning: VadTuning, events: mpsc::Sender<VoiceEvent>) -> Self {
        Self {
            tuning,
            events,
            listening: Arc::new(AtomicBool::new(false)),
            readout: Arc::new(Mutex::new(Readout::default())),
            task: None,
        }
    }

    /// Acquires the microphone and starts the analysis loop. Device denial
    /// or absence errs here and must be surfaced by the caller.
    pub fn start_listening(&mut self) -> Result<(), AudioError> {
        if self.listening.load(Ordering::SeqCst) {
            return Ok(());
        }
        let capture = AudioCapture::open(None)?;
        self.start_with_source(Box::new(capture));
        Ok(())
    }

    /// Starts the loop on an arbitrary sample source.
    pub fn start_with_source(&mut self, mut source: Box<dyn SampleSource>) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }

        let tuning = self.tuning;
        let events = self.events.clone();
        let listening = Arc::clone(&self.listening);
        let readout = Arc::clone(&self.readout);

        self.task = Some(tokio::spawn(async move {
            let mut tracker = SpeechTracker::new(tuning);
            while listening.load(Ordering::SeqCst) {
                let batch = match source.next_batch().await {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!(error = %e, "microphone loop ended");
                        break;
                    }
                };
                if batch.is_empty() {
                    // Timers still advance during device silence.
                    if let Some(event) = tracker.update(0.0, Instant::now()) {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    continue;
                }

                let energy = normalized_energy(&batch);
                let event = tracker.update(energy, Instant::now());
                {
                    let mut r = readout.lock().unwrap_or_else(|p| p.into_inner());
                    r.energy = energy;
                    r.speaking = tracker.speaking;
                }
                if let Some(event) = event {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
            }
            listening.store(false, Ordering::SeqCst);
            *readout.lock().unwrap_or_else(|p| p.into_inner()) = Readout::default();
        }));
    }

    /// Idempotent: releases the device, halts the loop, and resets the
    /// energy/speaking readout to baseline.
    pub fn stop_listening(&mut self) {
        self.listening.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            // Aborting drops the sample source, which releases the device.
            task.abort();
        }
        *self.readout.lock().unwrap_or_else(|p| p.into_inner()) = Readout::default();
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn is_speaking(&self) -> bool {
        self.readout
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .speaking
    }

    pub fn energy(&self) -> f32 {
        self.readout
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .energy
    }
}

impl Drop for VoiceActivityDetector {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning() -> VadTuning {
        VadTuning::default()
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn normalized_energy_averages_amplitude() {
        assert_eq!(normalized_energy(&[]), 0.0);
        assert_eq!(normalized_energy(&[0.5, -0.5]), 0.5);
        assert_eq!(normalized_energy(&[2.0, 2.0]), 1.0);
    }

    #[test]
    fn speech_starts_on_rising_edge_only() {
        let mut tracker = SpeechTracker::new(tuning());
        let t0 = Instant::now();

        assert_eq!(tracker.update(0.01, t0), None);
        assert_eq!(tracker.update(0.05, t0 + ms(10)), Some(VoiceEvent::SpeechStart));
        // Staying loud emits nothing further.
        assert_eq!(tracker.update(0.08, t0 + ms(20)), None);
    }

    #[test]
    fn speech_end_waits_for_full_silence_duration() {
        let mut tracker = SpeechTracker::new(tuning());
        let t0 = Instant::now();

        tracker.update(0.05, t0);
        // Silence begins; the deadline arms but has not expired.
        assert_eq!(tracker.update(0.01, t0 + ms(1000)), None);
        assert_eq!(tracker.update(0.01, t0 + ms(2000)), None);
        assert_eq!(tracker.update(0.01, t0 + ms(3400)), None);
        // 1000 + 2500 = 3500ms is the earliest possible end.
        let event = tracker.update(0.01, t0 + ms(3600));
        assert_eq!(
            event,
            Some(VoiceEvent::SpeechEnd {
                duration: ms(3600)
            })
        );
    }

    #[test]
    fn energy_spike_cancels_pending_end() {
        let mut tracker = SpeechTracker::new(tuning());
        let t0 = Instant::now();

        tracker.update(0.05, t0);
        assert_eq!(tracker.update(0.01, t0 + ms(500)), None);
        // A spike inside the silence window resets the debounce.
        assert_eq!(tracker.update(0.09, t0 + ms(1500)), None);
        assert_eq!(tracker.update(0.01, t0 + ms(2000)), None);
        // The original deadline (500 + 2500 = 3000ms) must not fire.
        assert_eq!(tracker.update(0.01, t0 + ms(3100)), None);
        // The new one (2000 + 2500 = 4500ms) does.
        let event = tracker.update(0.01, t0 + ms(4600));
        assert_eq!(
            event,
            Some(VoiceEvent::SpeechEnd {
                duration: ms(4600)
            })
        );
    }

    #[test]
    fn reset_returns_to_baseline() {
        let mut tracker = SpeechTracker::new(tuning());
        let t0 = Instant::now();
        tracker.update(0.05, t0);
        tracker.reset();
        assert!(!tracker.speaking);
        // A fresh rising edge starts a new segment.
        assert_eq!(
            tracker.update(0.05, t0 + ms(10)),
            Some(VoiceEvent::SpeechStart)
        );
    }

    struct ScriptedSource {
        batches: std::collections::VecDeque<Vec<f32>>,
    }

    impl SampleSource for ScriptedSource {
        fn next_batch(&mut self) -> BoxFuture<'_, Result<Vec<f32>, AudioError>> {
            async move {
                tokio::time::sleep(ms(2)).await;
                Ok(self.batches.pop_front().unwrap_or_default())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn listening_is_true_exactly_between_start_and_stop() {
        let (tx, mut rx) = mpsc::channel(8);
        let tuning = VadTuning::new(0.02, 20).expect("valid");
        let mut detector = VoiceActivityDetector::new(tuning, tx);
        assert!(!detector.is_listening());

        let loud = vec![0.5f32; 64];
        let source = ScriptedSource {
            batches: [loud.clone(), loud].into_iter().collect(),
        };
        detector.start_with_source(Box::new(source));
        assert!(detector.is_listening());

        assert_eq!(rx.recv().await, Some(VoiceEvent::SpeechStart));

        detector.stop_listening();
        assert!(!detector.is_listening());
        assert!(!detector.is_speaking());
        assert_eq!(detector.energy(), 0.0);

        // Stop is idempotent.
        detector.stop_listening();
        assert!(!detector.is_listening());
    }

    #[tokio::test]
    async fn silence_after_speech_emits_end_event() {
        let (tx, mut rx) = mpsc::channel(8);
        let tuning = VadTuning::new(0.02, 10).expect("valid");
        let mut detector = VoiceActivityDetector::new(tuning, tx);

        let mut batches = std::collections::VecDeque::new();
        batches.push_back(vec![0.5f32; 64]);
        for _ in 0..40 {
            batches.push_back(vec![0.0f32; 64]);
        }
        detector.start_with_source(Box::new(ScriptedSource { batches }));

        assert_eq!(rx.recv().await, Some(VoiceEvent::SpeechStart));
        let Some(VoiceEvent::SpeechEnd { duration }) = rx.recv().await else {
            panic!("expected speech end");
        };
        assert!(duration >= ms(10));
        detector.stop_listening();
    }
}
