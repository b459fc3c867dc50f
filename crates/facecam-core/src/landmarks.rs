//! 68-point facial landmark network via ONNX Runtime.
//!
//! Each face box is cropped, padded to a square and resized to 112x112.
//! The model regresses 136 values: `(x, y)` pairs normalized to the padded
//! crop, which are mapped back to frame pixels.

use crate::preprocess::{self, FaceCrop};
use crate::types::{BoundingBox, Landmarks68, LANDMARK_COUNT};
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: u32 = 112;
/// Per-channel RGB mean of the training set.
pub(crate) const CROP_MEAN_RGB: [f32; 3] = [122.782, 117.001, 104.298];
pub(crate) const CROP_SCALE: f32 = 255.0;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// 68-point landmark regressor.
pub struct FaceLandmarker {
    session: Session,
}

impl FaceLandmarker {
    /// Load the landmark ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, LandmarkError> {
        if !Path::new(model_path).exists() {
            return Err(LandmarkError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded 68-point landmark model"
        );

        Ok(Self { session })
    }

    /// Locate the 68 landmarks of the face inside `bbox`.
    pub fn detect(
        &mut self,
        img: &RgbImage,
        bbox: &BoundingBox,
    ) -> Result<Landmarks68, LandmarkError> {
        let crop = preprocess::crop_face(img, bbox, LANDMARK_INPUT_SIZE)
            .ok_or(LandmarkError::EmptyCrop)?;
        let input = preprocess::to_nchw(&crop.image, CROP_MEAN_RGB, CROP_SCALE);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmarks: {e}")))?;

        decode_landmarks(raw, &crop)
    }
}

/// Map normalized `(x, y)` pairs back to frame pixels.
fn decode_landmarks(raw: &[f32], crop: &FaceCrop) -> Result<Landmarks68, LandmarkError> {
    if raw.len() < LANDMARK_COUNT * 2 {
        return Err(LandmarkError::InferenceFailed(format!(
            "expected {} landmark values, got {}",
            LANDMARK_COUNT * 2,
            raw.len()
        )));
    }

    let points = raw[..LANDMARK_COUNT * 2]
        .chunks_exact(2)
        .map(|xy| crop.to_frame(xy[0], xy[1]))
        .collect();

    Landmarks68::from_points(points)
        .ok_or_else(|| LandmarkError::InferenceFailed("landmark count mismatch".into()))
}
