use crate::capture::VideoFrame;
use crate::config::{FRAME_HEIGHT, FRAME_WIDTH, JPEG_QUALITY};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;

pub const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("invalid frame buffer: {0}")]
    InvalidFrame(String),

    #[error("jpeg encode failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// Scales frames to the fixed streaming resolution and produces the
/// base64 JPEG data URL the backend expects.
#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    pub target_width: u32,
    pub target_height: u32,
    pub quality: u8,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self {
            target_width: FRAME_WIDTH,
            target_height: FRAME_HEIGHT,
            quality: JPEG_QUALITY,
        }
    }
}

impl FrameEncoder {
    pub fn encode(&self, frame: &VideoFrame) -> Result<String, EncodeError> {
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.rgb.len() != expected {
            return Err(EncodeError::InvalidFrame(format!(
                "{}x{} frame carries {} bytes, expected {expected}",
                frame.width,
                frame.height,
                frame.rgb.len()
            )));
        }

        let img = RgbImage::from_raw(frame.width, frame.height, frame.rgb.to_vec())
            .ok_or_else(|| EncodeError::InvalidFrame("buffer/dimension mismatch".to_owned()))?;

        let scaled = if frame.width == self.target_width && frame.height == self.target_height {
            img
        } else {
            imageops::resize(
                &img,
                self.target_width,
                self.target_height,
                FilterType::Triangle,
            )
        };

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(&scaled)?;

        let mut data_url = String::with_capacity(DATA_URL_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
        data_url.push_str(DATA_URL_PREFIX);
        data_url.push_str(&BASE64_STANDARD.encode(&jpeg));
        Ok(data_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::SystemTime;

    fn frame(width: u32, height: u32) -> VideoFrame {
        VideoFrame {
            sequence: 0,
            captured_at: SystemTime::now(),
            width,
            height,
            rgb: Bytes::from(vec![128u8; (width * height * 3) as usize]),
        }
    }

    #[test]
    fn encodes_to_data_url() {
        let encoder = FrameEncoder::default();
        let url = encoder.encode(&frame(640, 480)).expect("encodes");
        assert!(url.starts_with(DATA_URL_PREFIX));

        let jpeg = BASE64_STANDARD
            .decode(&url[DATA_URL_PREFIX.len()..])
            .expect("valid base64");
        // JPEG SOI marker.
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn oversized_input_is_scaled_down() {
        let encoder = FrameEncoder::default();
        let url = encoder.encode(&frame(1280, 720)).expect("encodes");
        assert!(url.starts_with(DATA_URL_PREFIX));
    }

    #[test]
    fn rejects_short_buffer() {
        let encoder = FrameEncoder::default();
        let mut bad = frame(640, 480);
        bad.rgb = Bytes::from(vec![0u8; 16]);
        assert!(matches!(
            encoder.encode(&bad),
            Err(EncodeError::InvalidFrame(_))
        ));
    }
}
