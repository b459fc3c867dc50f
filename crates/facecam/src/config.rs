use facecam_core::ImageDims;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Capture resolution requested from the driver.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing the three ONNX model files.
    pub model_dir: PathBuf,
    /// Directory holding the persisted clip slot.
    pub data_dir: PathBuf,
    /// Directory the "download" action writes into.
    pub download_dir: PathBuf,
    /// Detection loop cadence.
    pub detect_interval: Duration,
    /// Overlay size; `None` means "same as the first frame".
    pub display_size: Option<ImageDims>,
    /// Minimum detector score for a face to be kept.
    pub min_confidence: f32,
    /// Where to write a PNG of frame plus overlay on every tick, if anywhere.
    pub overlay_path: Option<PathBuf>,
    /// TrueType font for snapshot labels; system fonts are searched when unset.
    pub label_font: Option<PathBuf>,
    /// Frames per recorder data chunk.
    pub record_timeslice_frames: usize,
    /// JPEG quality (1-100) for recorded frames.
    pub jpeg_quality: u8,
}

impl Config {
    /// Load configuration from `FACECAM_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = var("FACECAM_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                })
                .join("facecam")
        });

        let display_size = match (
            parse::<u32>(&var, "FACECAM_DISPLAY_WIDTH"),
            parse::<u32>(&var, "FACECAM_DISPLAY_HEIGHT"),
        ) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(ImageDims::new(w, h)),
            _ => None,
        };

        Self {
            camera_device: var("FACECAM_CAMERA_DEVICE")
                .unwrap_or_else(|| "/dev/video0".to_string()),
            capture_width: parse(&var, "FACECAM_CAPTURE_WIDTH").unwrap_or(640),
            capture_height: parse(&var, "FACECAM_CAPTURE_HEIGHT").unwrap_or(480),
            model_dir: var("FACECAM_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(facecam_core::default_model_dir),
            data_dir,
            download_dir: var("FACECAM_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            detect_interval: Duration::from_millis(
                parse::<u64>(&var, "FACECAM_DETECT_INTERVAL_MS")
                    .filter(|&ms| ms > 0)
                    .unwrap_or(100),
            ),
            display_size,
            min_confidence: parse(&var, "FACECAM_MIN_CONFIDENCE")
                .unwrap_or(facecam_core::detector::DEFAULT_MIN_CONFIDENCE),
            overlay_path: var("FACECAM_OVERLAY_PATH").map(PathBuf::from),
            label_font: var("FACECAM_LABEL_FONT").map(PathBuf::from),
            record_timeslice_frames: parse::<usize>(&var, "FACECAM_RECORD_TIMESLICE_FRAMES")
                .filter(|&n| n > 0)
                .unwrap_or(30),
            jpeg_quality: parse::<u8>(&var, "FACECAM_JPEG_QUALITY")
                .map(|q| q.clamp(1, 100))
                .unwrap_or(80),
        }
    }
}

fn parse<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}
