//! Microphone capture using cpal.

use crate::audio::AudioError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread;

/// Audio capture from an input device.
///
/// cpal streams are not `Send`, so the stream lives on a dedicated thread
/// and samples cross over a bounded channel as f32 batches.
pub struct AudioCapture {
    sample_rx: Receiver<Vec<f32>>,
    stop_tx: Sender<()>,
    sample_rate: u32,
    channels: u16,
    thread: Option<thread::JoinHandle<()>>,
}

impl AudioCapture {
    /// Opens the default input device, or a named one.
    pub fn open(device_name: Option<&str>) -> Result<Self, AudioError> {
        let host = cpal::default_host();

        let device = match device_name {
            None => host
                .default_input_device()
                .ok_or(AudioError::NoDefaultInput)?,
            Some(wanted) => find_input_device(&host, wanted)?,
        };

        let name = device.name().unwrap_or_else(|_| "<unnamed>".to_owned());
        tracing::info!(device = %name, "microphone opened");

        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let sample_rate = config.sample_rate.0;
        let channels = config.channels;

        let (sample_tx, sample_rx) = bounded::<Vec<f32>>(32);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("mic-capture".to_owned())
            .spawn(move || run_capture_thread(device, config, sample_format, sample_tx, stop_rx))
            .map_err(|e| AudioError::StreamBuild(format!("failed to spawn audio thread: {e}")))?;

        Ok(Self {
            sample_rx,
            stop_tx,
            sample_rate,
            channels,
            thread: Some(thread),
        })
    }

    /// Next batch of interleaved f32 samples. Returns an empty batch when
    /// nothing is ready yet; errs once the stream is gone.
    pub async fn next_samples(&self) -> Result<Vec<f32>, AudioError> {
        match self.sample_rx.try_recv() {
            Ok(samples) => Ok(samples),
            Err(crossbeam_channel::TryRecvError::Empty) => {
                tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
                Ok(Vec::new())
            }
            Err(crossbeam_channel::TryRecvError::Disconnected) => Err(AudioError::Disconnected),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        tracing::debug!("microphone released");
    }
}

fn find_input_device(host: &cpal::Host, wanted: &str) -> Result<Device, AudioError> {
    let wanted_norm = wanted.trim().to_ascii_lowercase();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

    for device in devices {
        let name = device.name().unwrap_or_else(|_| "<unnamed>".to_owned());
        if name.trim().to_ascii_lowercase() == wanted_norm {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(wanted.to_owned()))
}

fn run_capture_thread(
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    sample_tx: Sender<Vec<f32>>,
    stop_rx: Receiver<()>,
) {
    let err_fn = |e| tracing::warn!(error = %e, "input stream error");

    let stream = match sample_format {
        SampleFormat::F32 => {
            let tx = sample_tx.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    // A full channel means the consumer is behind; dropping
                    // a batch is preferable to blocking the audio callback.
                    let _ = tx.try_send(data.to_vec());
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let tx = sample_tx.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    let scaled = data
                        .iter()
                        .map(|&s| f32::from(s) / 32768.0)
                        .collect::<Vec<_>>();
                    let _ = tx.try_send(scaled);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let tx = sample_tx.clone();
            device.build_input_stream(
                &config,
                move |data: &[u16], _| {
                    let scaled = data
                        .iter()
                        .map(|&s| (f32::from(s) - 32768.0) / 32768.0)
                        .collect::<Vec<_>>();
                    let _ = tx.try_send(scaled);
                },
                err_fn,
                None,
            )
        }
        other => {
            tracing::error!(format = ?other, "unsupported input sample format");
            return;
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to build input stream");
            return;
        }
    };

    if let Err(e) = stream.play() {
        tracing::error!(error = %e, "failed to start input stream");
        return;
    }

    // Hold the stream alive until asked to stop.
    let _ = stop_rx.recv();
    drop(stream);
}
