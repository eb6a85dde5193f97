use crate::capture::{CaptureError, FrameSource, VideoFrame};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use opencv::core::AlgorithmHint;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use opencv::imgproc;
use std::time::SystemTime;

/// Webcam frame source backed by OpenCV.
pub struct CameraFrameSource {
    capture: VideoCapture,
    sequence: u64,
}

impl CameraFrameSource {
    /// Opens the capture device at `index`. Failure here is the native
    /// equivalent of a denied camera permission: the caller surfaces it and
    /// aborts the session, no retry.
    pub fn open(index: i32) -> Result<Self, CaptureError> {
        let capture = VideoCapture::new(index, videoio::CAP_ANY)
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        let opened = capture
            .is_opened()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        if !opened {
            return Err(CaptureError::DeviceUnavailable(format!(
                "camera {index} could not be opened"
            )));
        }

        tracing::info!(camera = index, "camera opened");
        Ok(Self {
            capture,
            sequence: 0,
        })
    }

    fn read_rgb(&mut self) -> Result<Option<(u32, u32, Bytes)>, CaptureError> {
        let mut frame = Mat::default();
        self.capture
            .read(&mut frame)
            .map_err(|e| CaptureError::ReadFailed(e.to_string()))?;

        // Cameras commonly deliver a few empty frames while warming up.
        if frame.empty() {
            return Ok(None);
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(
            &frame,
            &mut rgb,
            imgproc::COLOR_BGR2RGB,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )
        .map_err(|e| CaptureError::ReadFailed(e.to_string()))?;

        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let data = rgb
            .data_bytes()
            .map_err(|e| CaptureError::ReadFailed(e.to_string()))?
            .to_vec();

        Ok(Some((width, height, Bytes::from(data))))
    }
}

impl FrameSource for CameraFrameSource {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<VideoFrame>, CaptureError>> {
        async move {
            let Some((width, height, rgb)) = self.read_rgb()? else {
                return Ok(None);
            };
            let frame = VideoFrame {
                sequence: self.sequence,
                captured_at: SystemTime::now(),
                width,
                height,
                rgb,
            };
            self.sequence += 1;
            Ok(Some(frame))
        }
        .boxed()
    }
}
