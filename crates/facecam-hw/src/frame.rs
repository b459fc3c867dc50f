//! Frame type and pixel format conversion to packed RGB8.

use image::{ImageFormat, RgbImage};

/// A captured camera frame in packed RGB8.
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    /// Copy into an `image` buffer. `None` if the data is shorter than the dimensions.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        let len = self.width as usize * self.height as usize * 3;
        if self.data.len() < len {
            return None;
        }
        RgbImage::from_raw(self.width, self.height, self.data[..len].to_vec())
    }
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U and V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for quad in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(c + 1.596 * e),
        clamp(c - 0.392 * d - 0.813 * e),
        clamp(c + 2.017 * d),
    ]
}

/// Replicate an 8-bit grayscale frame into RGB8.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    Ok(grey[..expected].iter().flat_map(|&g| [g, g, g]).collect())
}

/// Decode one Motion-JPEG frame to RGB8, checking it has the negotiated size.
pub fn mjpeg_to_rgb(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let decoded = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_rgb8();
    if decoded.dimensions() != (width, height) {
        return Err(FrameError::DimensionMismatch {
            expected: (width, height),
            actual: decoded.dimensions(),
        });
    }
    Ok(decoded.into_raw())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPG decode failed: {0}")]
    Decode(String),
    #[error("frame is {actual:?}, negotiated {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}
