//! SSD MobileNet v1 face detector via ONNX Runtime.
//!
//! The frame is padded to a square, resized to 512x512 and normalized to
//! [-1, 1]. The model emits normalized boxes `[ymin, xmin, ymax, xmax]` and
//! one face score per prior; boxes above the confidence threshold go through
//! NMS and are mapped back to frame pixels.

use crate::preprocess;
use crate::types::BoundingBox;
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SSD_INPUT_SIZE: u32 = 512;
const SSD_MEAN: f32 = 127.5;
const SSD_STD: f32 = 127.5;
const SSD_NMS_THRESHOLD: f32 = 0.5;
const SSD_MAX_RESULTS: usize = 100;

/// Minimum face score kept by default.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// SSD-based face detector.
pub struct FaceDetector {
    session: Session,
    min_confidence: f32,
    /// Output indices (boxes, scores), discovered by name at load time.
    output_indices: (usize, usize),
}

impl FaceDetector {
    /// Load the SSD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SSD face detector"
        );

        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "SSD model requires boxes and scores outputs, got {}",
                output_names.len()
            )));
        }

        let output_indices = discover_output_indices(&output_names);
        tracing::debug!(?output_indices, "SSD output tensor mapping");

        Ok(Self {
            session,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            output_indices,
        })
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Detect faces in an RGB image, sorted by confidence.
    pub fn detect_image(&mut self, img: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let input = preprocess::to_nchw(
            &preprocess::square_input(img, SSD_INPUT_SIZE),
            [SSD_MEAN; 3],
            SSD_STD,
        );
        let (boxes_idx, scores_idx) = self.output_indices;
        let min_confidence = self.min_confidence;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, boxes) = outputs[boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;
        let (_, scores) = outputs[scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;

        let side = img.width().max(img.height()) as f32;
        let candidates = decode_boxes(
            boxes,
            scores,
            side,
            img.width() as f32,
            img.height() as f32,
            min_confidence,
        );

        let mut result = nms(candidates, SSD_NMS_THRESHOLD);
        result.truncate(SSD_MAX_RESULTS);
        Ok(result)
    }
}

/// Find the boxes and scores outputs by name, falling back to positions 0 and 1.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let find = |needle: &str| names.iter().position(|n| n.to_lowercase().contains(needle));

    match (find("box"), find("score")) {
        (Some(b), Some(s)) if b != s => (b, s),
        _ => {
            tracing::info!(
                ?names,
                "SSD: output names not recognized, using positional mapping [0]=boxes, [1]=scores"
            );
            (0, 1)
        }
    }
}

/// Turn normalized SSD boxes into frame-pixel boxes above `threshold`.
///
/// `side` is the side of the padded square the model saw; boxes are clamped
/// to the original `width` x `height`.
fn decode_boxes(
    boxes: &[f32],
    scores: &[f32],
    side: f32,
    width: f32,
    height: f32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let mut detections = Vec::new();

    for (idx, &score) in scores.iter().enumerate() {
        if score < threshold {
            continue;
        }
        let off = idx * 4;
        if off + 3 >= boxes.len() {
            break;
        }

        let y1 = (boxes[off] * side).clamp(0.0, height);
        let x1 = (boxes[off + 1] * side).clamp(0.0, width);
        let y2 = (boxes[off + 2] * side).clamp(0.0, height);
        let x2 = (boxes[off + 3] * side).clamp(0.0, width);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, SSD_NMS_THRESHOLD);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], SSD_NMS_THRESHOLD).is_empty());
    }

    #[test]
    fn test_decode_boxes_maps_to_frame_pixels() {
        // 640x480 frame padded to a 640 square.
        let boxes = [0.25, 0.5, 0.5, 0.75, 0.0, 0.0, 0.1, 0.1];
        let scores = [0.9, 0.2];
        let dets = decode_boxes(&boxes, &scores, 640.0, 640.0, 480.0, 0.5);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0], make_bbox(320.0, 160.0, 160.0, 160.0, 0.9));
    }

    #[test]
    fn test_decode_boxes_clamps_to_unpadded_area() {
        // Box reaching into the bottom padding of a 640x480 frame.
        let boxes = [0.625, 0.0, 0.875, 0.25];
        let dets = decode_boxes(&boxes, &[0.8], 640.0, 640.0, 480.0, 0.5);
        assert_eq!(dets[0].y, 400.0);
        assert_eq!(dets[0].height, 80.0);
    }

    #[test]
    fn test_decode_boxes_skips_degenerate_and_short_buffers() {
        let boxes = [0.5, 0.5, 0.5, 0.5];
        assert!(decode_boxes(&boxes, &[0.9, 0.9], 100.0, 100.0, 100.0, 0.5).is_empty());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = ["num_detections", "detection_scores", "detection_boxes"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(discover_output_indices(&names), (2, 1));
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..2).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), (0, 1));
    }
}
