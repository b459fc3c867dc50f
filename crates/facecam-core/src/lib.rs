//! facecam-core — Face detection, landmarks and expressions.
//!
//! Runs SSD MobileNet v1 face detection, a 68-point landmark regressor and
//! a seven-class expression classifier via ONNX Runtime, and turns the
//! results into an overlay display list.

pub mod detector;
pub mod expressions;
pub mod landmarks;
pub mod models;
pub mod overlay;
pub mod preprocess;
pub mod types;

pub use models::{default_model_dir, AnalyzeError, FaceAnalyzer, ModelError, ModelSet};
pub use ab_glyph::FontArc;
pub use overlay::{find_label_font, load_label_font, DrawCommand, FontError, Overlay};
pub use types::{
    resize_results, BoundingBox, Expression, Expressions, FaceDetection, ImageDims, Landmarks68,
};
