//! Shared image preparation for the three networks.
//!
//! All models take square inputs. Frames and face crops are padded to a
//! square (anchored top-left, black fill), resized bilinearly, then laid
//! out as NCHW float tensors.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

/// Wrap a packed RGB8 buffer. Returns `None` if the buffer is too short.
pub fn rgb_image(rgb: &[u8], width: u32, height: u32) -> Option<RgbImage> {
    let len = width as usize * height as usize * 3;
    if width == 0 || height == 0 || rgb.len() < len {
        return None;
    }
    RgbImage::from_raw(width, height, rgb[..len].to_vec())
}

/// Pad to a square canvas, keeping the source at the top-left corner.
pub fn pad_to_square(img: &RgbImage) -> RgbImage {
    let side = img.width().max(img.height());
    if img.width() == side && img.height() == side {
        return img.clone();
    }
    let mut canvas = RgbImage::new(side, side);
    imageops::replace(&mut canvas, img, 0, 0);
    canvas
}

/// Pad to square and resize to `size` x `size`.
pub fn square_input(img: &RgbImage, size: u32) -> RgbImage {
    imageops::resize(&pad_to_square(img), size, size, FilterType::Triangle)
}

/// Convert to a `[1, 3, H, W]` tensor computing `(pixel - mean[c]) / scale`.
pub fn to_nchw(img: &RgbImage, mean: [f32; 3], scale: f32) -> Array4<f32> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in img.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - mean[c]) / scale;
        }
    }
    tensor
}

/// A square network input cut from a face box, with the mapping back to frame pixels.
pub struct FaceCrop {
    pub image: RgbImage,
    /// Top-left corner of the crop in frame pixels.
    pub origin: (f32, f32),
    /// Side length of the padded crop in frame pixels.
    pub side: f32,
}

impl FaceCrop {
    /// Map a point normalized to the crop ([0, 1] on both axes) back to frame pixels.
    pub fn to_frame(&self, nx: f32, ny: f32) -> (f32, f32) {
        (self.origin.0 + nx * self.side, self.origin.1 + ny * self.side)
    }
}

/// Cut the face box out of `img` (clamped to the image), pad it to a square
/// and resize to `size`. Returns `None` when the clamped box is empty.
pub fn crop_face(img: &RgbImage, bbox: &BoundingBox, size: u32) -> Option<FaceCrop> {
    let x0 = bbox.x.max(0.0).floor() as u32;
    let y0 = bbox.y.max(0.0).floor() as u32;
    let x1 = ((bbox.x + bbox.width).ceil().max(0.0) as u32).min(img.width());
    let y1 = ((bbox.y + bbox.height).ceil().max(0.0) as u32).min(img.height());
    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    let region = imageops::crop_imm(img, x0, y0, x1 - x0, y1 - y0).to_image();
    let padded = pad_to_square(&region);
    let side = padded.width() as f32;
    let image = imageops::resize(&padded, size, size, FilterType::Triangle);

    Some(FaceCrop {
        image,
        origin: (x0 as f32, y0 as f32),
        side,
    })
}
