//! Video frame acquisition.
//!
//! The camera source is the production path; the synthetic source exists so
//! the client can run end-to-end on machines without a capture device. They
//! are deliberately separate implementations of the same seam.

pub mod encode;

#[cfg(feature = "camera")]
pub mod camera;
#[cfg(feature = "camera")]
pub use camera::CameraFrameSource;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::SystemTime;

/// One captured frame, tightly packed RGB8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoFrame {
    pub sequence: u64,
    pub captured_at: SystemTime,
    pub width: u32,
    pub height: u32,
    pub rgb: Bytes,
}

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("frame read failed: {0}")]
    ReadFailed(String),
}

pub trait FrameSource: Send {
    /// `Ok(None)` means no frame is ready this tick (device warming up),
    /// which is expected and not an error.
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<VideoFrame>, CaptureError>>;
}

/// Deterministic moving test pattern, no camera required.
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    sequence: u64,
    phase: f32,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            sequence: 0,
            // Random starting phase so concurrent sessions do not produce
            // byte-identical streams.
            phase: rand::random::<f32>() * std::f32::consts::TAU,
        }
    }

    fn render(&self) -> Bytes {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut rgb = vec![0u8; w * h * 3];

        // Horizontal gradient with a bright disc orbiting the center.
        let t = self.phase + self.sequence as f32 * 0.1;
        let cx = w as f32 / 2.0 + t.cos() * w as f32 / 4.0;
        let cy = h as f32 / 2.0 + t.sin() * h as f32 / 4.0;
        let radius = h as f32 / 10.0;

        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) * 3;
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                if dx * dx + dy * dy < radius * radius {
                    rgb[i] = 240;
                    rgb[i + 1] = 240;
                    rgb[i + 2] = 240;
                } else {
                    rgb[i] = (x * 255 / w) as u8;
                    rgb[i + 1] = 40;
                    rgb[i + 2] = (y * 255 / h) as u8;
                }
            }
        }
        Bytes::from(rgb)
    }
}

impl FrameSource for SyntheticFrameSource {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<VideoFrame>, CaptureError>> {
        async move {
            let frame = VideoFrame {
                sequence: self.sequence,
                captured_at: SystemTime::now(),
                width: self.width,
                height: self.height,
                rgb: self.render(),
            };
            self.sequence += 1;
            Ok(Some(frame))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_source_produces_sequential_frames() {
        let mut source = SyntheticFrameSource::new(64, 48);
        let a = source.next_frame().await.expect("frame").expect("ready");
        let b = source.next_frame().await.expect("frame").expect("ready");
        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
        assert_eq!(a.rgb.len(), 64 * 48 * 3);
        // The disc moves between ticks.
        assert_ne!(a.rgb, b.rgb);
    }
}
