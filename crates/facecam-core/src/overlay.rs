//! Overlay display list for detection results.
//!
//! The overlay is cleared and rebuilt on every detection tick, so drawing
//! the same detections twice always yields the same list. `render` turns the
//! list into an RGBA layer with `imageproc`; text needs a TrueType font.

use crate::types::{FaceDetection, ImageDims};
use ab_glyph::FontArc;
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

pub const BOX_COLOR: [u8; 4] = [0, 0, 255, 255];
pub const BOX_LINE_WIDTH: f32 = 2.0;
pub const LANDMARK_COLOR: [u8; 4] = [1, 210, 240, 255];
pub const LANDMARK_RADIUS: f32 = 2.0;
pub const LABEL_COLOR: [u8; 4] = [0, 255, 0, 255];
pub const LABEL_FONT_PX: f32 = 16.0;
/// Vertical gap between the expression label baseline and the box top.
pub const LABEL_OFFSET_Y: f32 = 10.0;

/// Fonts tried for labels when none is configured.
pub const DEFAULT_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
];

#[derive(Error, Debug)]
pub enum FontError {
    #[error("font read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a usable font file: {0}")]
    Invalid(String),
}

/// Load a TrueType/OpenType font for label rendering.
pub fn load_label_font(path: &Path) -> Result<FontArc, FontError> {
    let bytes = std::fs::read(path)?;
    FontArc::try_from_vec(bytes).map_err(|e| FontError::Invalid(format!("{}: {e}", path.display())))
}

/// Load `explicit` if given, otherwise the first of [`DEFAULT_FONT_PATHS`] that loads.
pub fn find_label_font(explicit: Option<&Path>) -> Option<FontArc> {
    if let Some(path) = explicit {
        return match load_label_font(path) {
            Ok(font) => Some(font),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "label font unusable");
                None
            }
        };
    }
    let found = DEFAULT_FONT_PATHS
        .iter()
        .map(Path::new)
        .filter(|p| p.exists())
        .find_map(|p| load_label_font(p).ok());
    if found.is_none() {
        tracing::info!("no label font found; expression labels will not be rasterized");
    }
    found
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DrawCommand {
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        line_width: f32,
        color: [u8; 4],
        /// Detection score, two decimals.
        label: String,
    },
    Points {
        points: Vec<(f32, f32)>,
        radius: f32,
        color: [u8; 4],
    },
    Text {
        x: f32,
        y: f32,
        text: String,
        font_px: f32,
        color: [u8; 4],
    },
}

/// Drawing surface sized to the display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    dims: ImageDims,
    commands: Vec<DrawCommand>,
}

impl Overlay {
    pub fn new(dims: ImageDims) -> Self {
        Self {
            dims,
            commands: Vec::new(),
        }
    }

    pub fn dims(&self) -> ImageDims {
        self.dims
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Append boxes, then landmark points, then dominant expression labels.
    pub fn draw_detections(&mut self, faces: &[FaceDetection]) {
        for face in faces {
            let b = &face.bbox;
            self.commands.push(DrawCommand::Rect {
                x: b.x,
                y: b.y,
                width: b.width,
                height: b.height,
                line_width: BOX_LINE_WIDTH,
                color: BOX_COLOR,
                label: format!("{:.2}", b.confidence),
            });
        }

        for face in faces {
            self.commands.push(DrawCommand::Points {
                points: face.landmarks.points().to_vec(),
                radius: LANDMARK_RADIUS,
                color: LANDMARK_COLOR,
            });
        }

        for face in faces {
            if let Some((expression, _)) = face.expressions.dominant() {
                self.commands.push(DrawCommand::Text {
                    x: face.bbox.x,
                    y: face.bbox.y - LABEL_OFFSET_Y,
                    text: expression.label().to_string(),
                    font_px: LABEL_FONT_PX,
                    color: LABEL_COLOR,
                });
            }
        }
    }

    /// Clear, then draw `faces`.
    pub fn redraw(&mut self, faces: &[FaceDetection]) {
        self.clear();
        self.draw_detections(faces);
    }

    /// Labels currently on the overlay, in draw order.
    pub fn labels(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DrawCommand::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Rasterize the list onto a transparent RGBA image. Text is drawn only
    /// when a font is supplied.
    pub fn render(&self, font: Option<&FontArc>) -> RgbaImage {
        let mut img = RgbaImage::new(self.dims.width, self.dims.height);
        for command in &self.commands {
            match command {
                DrawCommand::Rect {
                    x,
                    y,
                    width,
                    height,
                    line_width,
                    color,
                    ..
                } => {
                    let (x0, y0) = (x.round() as i32, y.round() as i32);
                    let x1 = (x + width).round() as i32;
                    let y1 = (y + height).round() as i32;
                    // One hollow rect per pixel of stroke, stepping inwards.
                    for t in 0..line_width.round().max(1.0) as i32 {
                        let (w, h) = (x1 - x0 + 1 - 2 * t, y1 - y0 + 1 - 2 * t);
                        if w <= 0 || h <= 0 {
                            break;
                        }
                        let rect = Rect::at(x0 + t, y0 + t).of_size(w as u32, h as u32);
                        draw_hollow_rect_mut(&mut img, rect, Rgba(*color));
                    }
                }
                DrawCommand::Points {
                    points,
                    radius,
                    color,
                } => {
                    let r = radius.round() as i32;
                    for &(px, py) in points {
                        let center = (px.round() as i32, py.round() as i32);
                        draw_filled_circle_mut(&mut img, center, r, Rgba(*color));
                    }
                }
                DrawCommand::Text {
                    x,
                    y,
                    text,
                    font_px,
                    color,
                } => {
                    if let Some(font) = font {
                        // `y` is the baseline; imageproc anchors at the line top.
                        let (left, top) = (x.round() as i32, (y - font_px).round() as i32);
                        draw_text_mut(&mut img, Rgba(*color), left, top, *font_px, font, text);
                    }
                }
            }
        }
        img
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_face;
    use crate::types::{Expression, Expressions};

    fn dims() -> ImageDims {
        ImageDims::new(320, 240)
    }

    #[test]
    fn test_redraw_is_idempotent() {
        let faces = vec![sample_face(20.0, 30.0, 80.0, 90.0), sample_face(150.0, 40.0, 60.0, 70.0)];
        let mut overlay = Overlay::new(dims());

        overlay.redraw(&faces);
        let first = overlay.clone();
        let first_raster = overlay.render(None);

        overlay.redraw(&faces);
        assert_eq!(overlay, first);
        assert_eq!(overlay.render(None), first_raster);
        // two boxes, two landmark sets, two labels
        assert_eq!(overlay.commands().len(), 6);
    }

    #[test]
    fn test_label_sits_above_box() {
        let mut overlay = Overlay::new(dims());
        overlay.redraw(&[sample_face(20.0, 30.0, 80.0, 90.0)]);
        let text = overlay
            .commands()
            .iter()
            .find_map(|c| match c {
                DrawCommand::Text { x, y, text, .. } => Some((*x, *y, text.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(text, (20.0, 20.0, "happy".to_string()));
    }

    #[test]
    fn test_tie_label_uses_model_order() {
        let mut face = sample_face(0.0, 20.0, 10.0, 10.0);
        face.expressions = Expressions::from_pairs([
            (Expression::Happy, 0.4),
            (Expression::Neutral, 0.4),
            (Expression::Sad, 0.2),
        ]);
        let mut overlay = Overlay::new(dims());
        overlay.redraw(&[face]);
        assert_eq!(overlay.labels(), vec!["neutral"]);
    }

    #[test]
    fn test_no_expressions_no_label() {
        let mut face = sample_face(0.0, 20.0, 10.0, 10.0);
        face.expressions = Expressions::default();
        let mut overlay = Overlay::new(dims());
        overlay.redraw(&[face]);
        assert!(overlay.labels().is_empty());
        assert_eq!(overlay.commands().len(), 2);
    }

    #[test]
    fn test_clear_removes_everything() {
        let mut overlay = Overlay::new(dims());
        overlay.redraw(&[sample_face(0.0, 20.0, 10.0, 10.0)]);
        overlay.redraw(&[]);
        assert!(overlay.is_empty());
        assert!(overlay.render(None).pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_render_strokes_box_edges() {
        let mut face = sample_face(10.0, 10.0, 50.0, 40.0);
        face.landmarks = face.landmarks.scaled(0.0, 0.0);
        let mut overlay = Overlay::new(dims());
        overlay.redraw(&[face]);
        let img = overlay.render(None);
        assert_eq!(img.get_pixel(30, 10).0, BOX_COLOR);
        assert_eq!(img.get_pixel(30, 11).0, BOX_COLOR);
        assert_eq!(img.get_pixel(60, 30).0, BOX_COLOR);
        assert_eq!(img.get_pixel(30, 30).0[3], 0);
    }

    #[test]
    fn test_render_clips_out_of_bounds() {
        let mut overlay = Overlay::new(ImageDims::new(10, 10));
        overlay.redraw(&[sample_face(-20.0, -20.0, 100.0, 100.0)]);
        let img = overlay.render(None);
        assert_eq!(img.dimensions(), (10, 10));
    }

    #[test]
    fn test_render_draws_landmark_discs() {
        let mut overlay = Overlay::new(dims());
        overlay.commands.push(DrawCommand::Points {
            points: vec![(100.0, 100.0)],
            radius: LANDMARK_RADIUS,
            color: LANDMARK_COLOR,
        });
        let img = overlay.render(None);
        assert_eq!(img.get_pixel(100, 100).0, LANDMARK_COLOR);
        assert_eq!(img.get_pixel(102, 100).0, LANDMARK_COLOR);
        assert_eq!(img.get_pixel(105, 100).0[3], 0);
    }

    #[test]
    fn test_text_needs_a_font() {
        let mut overlay = Overlay::new(dims());
        overlay.commands.push(DrawCommand::Text {
            x: 40.0,
            y: 60.0,
            text: "happy".into(),
            font_px: LABEL_FONT_PX,
            color: LABEL_COLOR,
        });
        assert!(overlay.render(None).pixels().all(|p| p.0[3] == 0));

        // Only runs where a system font is installed.
        if let Some(font) = find_label_font(None) {
            let img = overlay.render(Some(&font));
            let inked = img
                .enumerate_pixels()
                .filter(|(_, _, p)| p.0[3] > 0)
                .collect::<Vec<_>>();
            assert!(!inked.is_empty());
            assert!(inked.iter().all(|(x, _, _)| *x >= 38));
        }
    }

    #[test]
    fn test_load_label_font_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        std::fs::write(&path, b"not a font").unwrap();

        assert!(matches!(load_label_font(&path), Err(FontError::Invalid(_))));
        assert!(matches!(
            load_label_font(&dir.path().join("missing.ttf")),
            Err(FontError::Io(_))
        ));
        assert!(find_label_font(Some(&path)).is_none());
    }
}
