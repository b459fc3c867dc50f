use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of facial reference points returned by the landmark model.
pub const LANDMARK_COUNT: usize = 68;

/// Pixel dimensions of an image or display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDims {
    pub width: u32,
    pub height: u32,
}

impl ImageDims {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Per-axis scale factors that map coordinates in `self` onto `target`.
    pub fn scale_to(&self, target: ImageDims) -> (f32, f32) {
        let sx = if self.width > 0 {
            target.width as f32 / self.width as f32
        } else {
            1.0
        };
        let sy = if self.height > 0 {
            target.height as f32 / self.height as f32
        } else {
            1.0
        };
        (sx, sy)
    }
}

/// Bounding box for a detected face, in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// The 68 facial landmarks of one face, in pixels.
///
/// Index layout follows the iBUG 300-W convention: 0-16 jaw, 17-26 brows,
/// 27-35 nose, 36-47 eyes, 48-67 lips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(f32, f32)>", into = "Vec<(f32, f32)>")]
pub struct Landmarks68 {
    points: Vec<(f32, f32)>,
}

impl Landmarks68 {
    /// Build from exactly [`LANDMARK_COUNT`] points.
    pub fn from_points(points: Vec<(f32, f32)>) -> Option<Self> {
        (points.len() == LANDMARK_COUNT).then_some(Self { points })
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            points: self.points.iter().map(|&(x, y)| (x * sx, y * sy)).collect(),
        }
    }
}

impl TryFrom<Vec<(f32, f32)>> for Landmarks68 {
    type Error = String;

    fn try_from(points: Vec<(f32, f32)>) -> Result<Self, Self::Error> {
        let len = points.len();
        Self::from_points(points)
            .ok_or_else(|| format!("expected {LANDMARK_COUNT} landmarks, got {len}"))
    }
}

impl From<Landmarks68> for Vec<(f32, f32)> {
    fn from(landmarks: Landmarks68) -> Self {
        landmarks.points
    }
}

/// Expression labels in the expression model's output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Expression {
    /// All labels, in model output order. This is also the tie-break order
    /// used by [`Expressions::dominant`].
    pub const ALL: [Expression; 7] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Sad,
        Expression::Angry,
        Expression::Fearful,
        Expression::Disgusted,
        Expression::Surprised,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Fearful => "fearful",
            Expression::Disgusted => "disgusted",
            Expression::Surprised => "surprised",
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-label confidence scores for one face, kept in model output order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Expressions {
    scores: Vec<(Expression, f32)>,
}

impl Expressions {
    /// Pair raw model scores with labels in output order. Extra scores are ignored.
    pub fn from_model_output(scores: &[f32]) -> Self {
        Self {
            scores: Expression::ALL
                .iter()
                .copied()
                .zip(scores.iter().copied())
                .collect(),
        }
    }

    /// Build from explicit pairs. Pairs are re-sorted into model output order
    /// so that tie-breaking never depends on the caller's ordering.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Expression, f32)>) -> Self {
        let mut scores: Vec<(Expression, f32)> = pairs.into_iter().collect();
        scores.sort_by_key(|(e, _)| Expression::ALL.iter().position(|a| a == e));
        scores.dedup_by_key(|(e, _)| *e);
        Self { scores }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Expression, f32)> + '_ {
        self.scores.iter().copied()
    }

    pub fn get(&self, expression: Expression) -> Option<f32> {
        self.scores
            .iter()
            .find(|(e, _)| *e == expression)
            .map(|(_, s)| *s)
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// The label with the strictly highest score.
    ///
    /// On a tie the label that comes first in [`Expression::ALL`] wins.
    /// NaN scores never win.
    pub fn dominant(&self) -> Option<(Expression, f32)> {
        let mut best: Option<(Expression, f32)> = None;
        for (expression, score) in self.iter() {
            if score.is_nan() {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((expression, score)),
            }
        }
        best
    }
}

/// Everything the pipeline knows about one face in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub landmarks: Landmarks68,
    pub expressions: Expressions,
}

impl FaceDetection {
    /// Rescale geometry from `from` (analysis resolution) to `to` (display resolution).
    pub fn resized(&self, from: ImageDims, to: ImageDims) -> Self {
        let (sx, sy) = from.scale_to(to);
        Self {
            bbox: self.bbox.scaled(sx, sy),
            landmarks: self.landmarks.scaled(sx, sy),
            expressions: self.expressions.clone(),
        }
    }
}

/// Rescale a frame's detections onto the display surface.
pub fn resize_results(
    detections: &[FaceDetection],
    from: ImageDims,
    to: ImageDims,
) -> Vec<FaceDetection> {
    detections.iter().map(|d| d.resized(from, to)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_face;

    #[test]
    fn test_dominant_tie_prefers_model_order() {
        let e = Expressions::from_pairs([
            (Expression::Happy, 0.4),
            (Expression::Neutral, 0.4),
            (Expression::Sad, 0.2),
        ]);
        assert_eq!(e.dominant(), Some((Expression::Neutral, 0.4)));
    }

    #[test]
    fn test_dominant_tie_independent_of_input_order() {
        let a = Expressions::from_pairs([(Expression::Sad, 0.5), (Expression::Happy, 0.5)]);
        let b = Expressions::from_pairs([(Expression::Happy, 0.5), (Expression::Sad, 0.5)]);
        assert_eq!(a.dominant(), b.dominant());
        assert_eq!(a.dominant().map(|(e, _)| e), Some(Expression::Happy));
    }

    #[test]
    fn test_dominant_strict_maximum() {
        let e = Expressions::from_model_output(&[0.1, 0.05, 0.05, 0.6, 0.1, 0.05, 0.05]);
        assert_eq!(e.dominant().map(|(e, _)| e), Some(Expression::Angry));
    }

    #[test]
    fn test_dominant_empty_and_nan() {
        assert_eq!(Expressions::default().dominant(), None);
        let e = Expressions::from_pairs([(Expression::Neutral, f32::NAN), (Expression::Sad, 0.1)]);
        assert_eq!(e.dominant().map(|(e, _)| e), Some(Expression::Sad));
    }

    #[test]
    fn test_from_model_output_labels_in_order() {
        let e = Expressions::from_model_output(&[0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(e.get(Expression::Happy), Some(1.0));
        assert_eq!(e.iter().count(), 7);
    }

    #[test]
    fn test_landmarks_require_68_points() {
        assert!(Landmarks68::from_points(vec![(0.0, 0.0); 5]).is_none());
        assert!(Landmarks68::from_points(vec![(0.0, 0.0); LANDMARK_COUNT]).is_some());
    }

    #[test]
    fn test_resize_halves_coordinates() {
        let face = sample_face(100.0, 80.0, 60.0, 70.0);
        let resized = face.resized(ImageDims::new(640, 480), ImageDims::new(320, 240));
        assert_eq!(resized.bbox.x, 50.0);
        assert_eq!(resized.bbox.y, 40.0);
        assert_eq!(resized.bbox.width, 30.0);
        assert_eq!(resized.bbox.height, 35.0);
        for (orig, scaled) in face.landmarks.points().iter().zip(resized.landmarks.points()) {
            assert!((orig.0 / 2.0 - scaled.0).abs() < 1e-4);
            assert!((orig.1 / 2.0 - scaled.1).abs() < 1e-4);
        }
        assert_eq!(resized.expressions, face.expressions);
    }

    #[test]
    fn test_resize_identity() {
        let face = sample_face(10.0, 20.0, 30.0, 40.0);
        let dims = ImageDims::new(640, 480);
        assert_eq!(resize_results(&[face.clone()], dims, dims), vec![face]);
    }

    #[test]
    fn test_detection_json_shape() {
        let face = sample_face(1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_value(&face).unwrap();
        assert_eq!(json["landmarks"].as_array().unwrap().len(), LANDMARK_COUNT);
        assert_eq!(json["expressions"]["scores"][0][0], "neutral");
        let back: FaceDetection = serde_json::from_value(json).unwrap();
        assert_eq!(back.bbox, face.bbox);
        assert_eq!(back.landmarks.points().len(), LANDMARK_COUNT);
    }
}
