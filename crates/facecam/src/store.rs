//! Single-slot clip persistence.
//!
//! The slot holds the clip bytes themselves plus a small JSON record, so a
//! clip restored after a restart is a fresh, valid handle rather than a
//! reference into a previous process.

use crate::clip::RecordedClip;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Name of the one slot.
pub const CLIP_KEY: &str = "video";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("clip store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("clip metadata: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON record describing the stored clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipRecord {
    pub key: String,
    pub id: Uuid,
    pub mime: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    /// Bytes file, relative to the store directory.
    pub file: String,
}

pub struct ClipStore {
    dir: PathBuf,
}

impl ClipStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self) -> PathBuf {
        self.dir.join(format!("{CLIP_KEY}.json"))
    }

    fn bytes_file_name() -> String {
        format!("{CLIP_KEY}.mjpeg")
    }

    pub fn exists(&self) -> bool {
        self.record_path().exists()
    }

    /// Overwrite the slot with `clip`. Bytes are written before the record,
    /// so a crash in between leaves the previous record pointing at a size
    /// mismatch, which `load` treats as absent.
    pub fn save(&self, clip: &RecordedClip) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;

        let file = Self::bytes_file_name();
        write_atomic(&self.dir.join(&file), &clip.bytes)?;

        let record = ClipRecord {
            key: CLIP_KEY.to_string(),
            id: clip.id,
            mime: clip.mime.clone(),
            size: clip.len() as u64,
            created_at: clip.created_at,
            file,
        };
        write_atomic(&self.record_path(), &serde_json::to_vec_pretty(&record)?)?;

        tracing::debug!(
            id = %clip.id,
            bytes = clip.len(),
            dir = %self.dir.display(),
            "clip persisted"
        );
        Ok(())
    }

    /// Read the stored record, if any.
    pub fn record(&self) -> Result<Option<ClipRecord>, StoreError> {
        match std::fs::read(self.record_path()) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Rebuild the stored clip from its bytes.
    ///
    /// A record whose bytes are missing or of the wrong size is logged and
    /// reported as no clip.
    pub fn load(&self) -> Result<Option<RecordedClip>, StoreError> {
        let Some(record) = self.record()? else {
            return Ok(None);
        };

        let bytes = match std::fs::read(self.dir.join(&record.file)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(file = %record.file, "stored clip record has no bytes; ignoring");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if bytes.len() as u64 != record.size {
            tracing::warn!(
                expected = record.size,
                actual = bytes.len(),
                "stored clip size mismatch; ignoring"
            );
            return Ok(None);
        }

        Ok(Some(RecordedClip {
            id: record.id,
            bytes: bytes.into(),
            mime: record.mime,
            created_at: record.created_at,
        }))
    }

    /// Empty the slot. An already empty slot is not an error.
    pub fn remove(&self) -> Result<(), StoreError> {
        for path in [self.record_path(), self.dir.join(Self::bytes_file_name())] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(dir = %self.dir.display(), "clip slot cleared");
        Ok(())
    }
}

/// Write through a sibling temp file and rename over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::CLIP_MIME;

    #[test]
    fn test_save_then_load_returns_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClipStore::new(dir.path().join("facecam"));
        let clip = RecordedClip::new(vec![7u8; 30], CLIP_MIME);

        store.save(&clip).unwrap();
        assert!(store.exists());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.id, clip.id);
        assert_eq!(&*loaded.bytes, &*clip.bytes);
        assert_eq!(loaded.mime, CLIP_MIME);
        assert!(!std::sync::Arc::ptr_eq(&loaded.bytes, &clip.bytes));
    }

    #[test]
    fn test_save_overwrites_single_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClipStore::new(dir.path());
        store.save(&RecordedClip::new(vec![1; 10], CLIP_MIME)).unwrap();
        let second = RecordedClip::new(vec![2; 20], CLIP_MIME);
        store.save(&second).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.id, second.id);
        assert_eq!(loaded.len(), 20);

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_remove_clears_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClipStore::new(dir.path());
        store.save(&RecordedClip::new(vec![1; 4], CLIP_MIME)).unwrap();

        store.remove().unwrap();
        assert!(!store.exists());
        assert!(store.load().unwrap().is_none());
        store.remove().unwrap();
    }

    #[test]
    fn test_load_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClipStore::new(dir.path().join("missing"));
        assert!(store.load().unwrap().is_none());
        assert!(store.record().unwrap().is_none());
    }

    #[test]
    fn test_size_mismatch_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClipStore::new(dir.path());
        store.save(&RecordedClip::new(vec![1; 8], CLIP_MIME)).unwrap();
        std::fs::write(dir.path().join("video.mjpeg"), [1u8; 3]).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClipStore::new(dir.path());
        std::fs::write(dir.path().join("video.json"), b"{not json").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Json(_))));
    }
}
