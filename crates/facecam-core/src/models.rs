//! The three-model pipeline and its loader.

use crate::detector::{DetectorError, FaceDetector};
use crate::expressions::{ExpressionClassifier, ExpressionError};
use crate::landmarks::{FaceLandmarker, LandmarkError};
use crate::preprocess;
use crate::types::FaceDetection;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "ssd_mobilenetv1.onnx";
pub const LANDMARK_MODEL_FILE: &str = "face_landmark_68.onnx";
pub const EXPRESSION_MODEL_FILE: &str = "face_expression.onnx";

/// Model directory used when nothing else is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("face detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmark model: {0}")]
    Landmarks(#[from] LandmarkError),
    #[error("expression model: {0}")]
    Expressions(#[from] ExpressionError),
}

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("frame buffer does not match {width}x{height} RGB")]
    InvalidFrame { width: u32, height: u32 },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Runs detection, landmarking and expression scoring on one frame.
///
/// Geometry in the result is in the pixels of the analyzed frame.
pub trait FaceAnalyzer: Send {
    fn analyze(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceDetection>, AnalyzeError>;
}

/// File locations of the three model artifacts under one base directory.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub landmarks: PathBuf,
    pub expressions: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            landmarks: dir.join(LANDMARK_MODEL_FILE),
            expressions: dir.join(EXPRESSION_MODEL_FILE),
        }
    }
}

/// All three loaded networks.
pub struct ModelSet {
    detector: FaceDetector,
    landmarker: FaceLandmarker,
    classifier: ExpressionClassifier,
}

impl ModelSet {
    /// Load detector, landmark and expression models, in that order.
    /// Stops at the first failure.
    pub fn load(dir: &Path, min_confidence: f32) -> Result<Self, ModelError> {
        let paths = ModelPaths::in_dir(dir);

        let detector = FaceDetector::load(&paths.detector.to_string_lossy())?
            .with_min_confidence(min_confidence);
        let landmarker = FaceLandmarker::load(&paths.landmarks.to_string_lossy())?;
        let classifier = ExpressionClassifier::load(&paths.expressions.to_string_lossy())?;

        tracing::info!(dir = %dir.display(), "all face models loaded");

        Ok(Self {
            detector,
            landmarker,
            classifier,
        })
    }
}

impl FaceAnalyzer for ModelSet {
    fn analyze(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceDetection>, AnalyzeError> {
        let img = preprocess::rgb_image(rgb, width, height)
            .ok_or(AnalyzeError::InvalidFrame { width, height })?;

        let boxes = self.detector.detect_image(&img).map_err(ModelError::from)?;
        let mut faces = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            let landmarks = match self.landmarker.detect(&img, &bbox) {
                Ok(l) => l,
                Err(LandmarkError::EmptyCrop) => continue,
                Err(e) => return Err(ModelError::from(e).into()),
            };
            let expressions = match self.classifier.classify(&img, &bbox) {
                Ok(e) => e,
                Err(ExpressionError::EmptyCrop) => continue,
                Err(e) => return Err(ModelError::from(e).into()),
            };
            faces.push(FaceDetection {
                bbox,
                landmarks,
                expressions,
            });
        }

        tracing::trace!(faces = faces.len(), "frame analyzed");
        Ok(faces)
    }
}
