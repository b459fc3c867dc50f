use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Container type of recorded clips: concatenated baseline JPEG frames.
pub const CLIP_MIME: &str = "video/x-motion-jpeg";
/// File name offered by the download action.
pub const DOWNLOAD_FILE_NAME: &str = "recorded-video.mjpeg";

/// One recorded video clip held in memory.
///
/// Shared as `Arc<RecordedClip>`; the `Arc` is the handle the shell uses to
/// play or export the clip.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedClip {
    pub id: Uuid,
    pub bytes: Arc<[u8]>,
    pub mime: String,
    pub created_at: DateTime<Utc>,
}

impl RecordedClip {
    pub fn new(bytes: Vec<u8>, mime: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            bytes: bytes.into(),
            mime: mime.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Write `clip` to `<dir>/recorded-video.mjpeg`, creating `dir` if needed.
pub fn export_clip(clip: &RecordedClip, dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(DOWNLOAD_FILE_NAME);
    std::fs::write(&path, &clip.bytes)?;
    tracing::info!(path = %path.display(), bytes = clip.len(), "clip exported");
    Ok(path)
}
