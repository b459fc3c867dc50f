//! Seven-class facial expression network via ONNX Runtime.
//!
//! Shares the 112x112 face crop preparation with the landmark model.

use crate::landmarks::{CROP_MEAN_RGB, CROP_SCALE};
use crate::preprocess;
use crate::types::{BoundingBox, Expression, Expressions};
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EXPRESSION_INPUT_SIZE: u32 = 112;
const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

#[derive(Error, Debug)]
pub enum ExpressionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Expression classifier.
pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    /// Load the expression ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ExpressionError> {
        if !Path::new(model_path).exists() {
            return Err(ExpressionError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded expression model"
        );

        Ok(Self { session })
    }

    /// Score every expression for the face inside `bbox`.
    pub fn classify(
        &mut self,
        img: &RgbImage,
        bbox: &BoundingBox,
    ) -> Result<Expressions, ExpressionError> {
        let crop = preprocess::crop_face(img, bbox, EXPRESSION_INPUT_SIZE)
            .ok_or(ExpressionError::EmptyCrop)?;
        let input = preprocess::to_nchw(&crop.image, CROP_MEAN_RGB, CROP_SCALE);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExpressionError::InferenceFailed(format!("expressions: {e}")))?;

        if raw.len() < Expression::ALL.len() {
            return Err(ExpressionError::InferenceFailed(format!(
                "expected {} expression scores, got {}",
                Expression::ALL.len(),
                raw.len()
            )));
        }

        Ok(Expressions::from_model_output(&normalize_scores(
            &raw[..Expression::ALL.len()],
        )))
    }
}

/// Return probabilities summing to 1.
///
/// Outputs that already form a distribution pass through; anything else is
/// treated as logits.
pub fn normalize_scores(raw: &[f32]) -> Vec<f32> {
    let sum: f32 = raw.iter().sum();
    let is_distribution = raw.iter().all(|&v| (0.0..=1.0).contains(&v))
        && (sum - 1.0).abs() <= PROBABILITY_SUM_TOLERANCE;
    if is_distribution {
        return raw.to_vec();
    }
    softmax(raw)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    if total > 0.0 {
        exps.iter().map(|v| v / total).collect()
    } else {
        vec![0.0; logits.len()]
    }
}
