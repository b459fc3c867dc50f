//! Clip recording: the Idle/Recording state machine and the Motion-JPEG
//! recorder backend.
//!
//! A backend recorder runs on its own task and reports back through
//! [`RecorderEvent`]s: zero or more `DataAvailable` chunks followed by one
//! `Stopped`. The state machine owns the chunk buffer and assembles the clip
//! when `Stopped` arrives. Every recorder gets a generation number, and events
//! from an older generation are dropped, so a replaced recorder can never
//! touch the current buffer.

use crate::clip::{export_clip, RecordedClip, CLIP_MIME};
use crate::store::ClipStore;
use chrono::{DateTime, Utc};
use facecam_hw::{Frame, LiveStream};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("no live stream bound")]
    NoStream,
    #[error("recorder construction failed: {0}")]
    Construction(String),
    #[error("no clip recorded")]
    NoClip,
    #[error("clip export failed: {0}")]
    Export(#[from] std::io::Error),
}

/// What the shell shows: record button or stop button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording {
        /// Unique session ID for log correlation.
        session_id: Uuid,
        started_at: DateTime<Utc>,
    },
}

/// Whether a backend recorder is still capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderActivity {
    Recording,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEventKind {
    DataAvailable(Vec<u8>),
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderEvent {
    pub generation: u64,
    pub kind: RecorderEventKind,
}

/// Event sink handed to one backend recorder, stamped with its generation.
#[derive(Clone)]
pub struct RecorderEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<RecorderEvent>,
}

impl RecorderEvents {
    pub fn data(&self, chunk: Vec<u8>) -> bool {
        self.send(RecorderEventKind::DataAvailable(chunk))
    }

    pub fn stopped(&self) -> bool {
        self.send(RecorderEventKind::Stopped)
    }

    fn send(&self, kind: RecorderEventKind) -> bool {
        self.tx
            .send(RecorderEvent {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

/// A running backend recorder.
pub trait MediaRecorder: Send {
    fn activity(&self) -> RecorderActivity;
    /// Ask the recorder to flush what it has and emit `Stopped`.
    fn stop(&mut self);
}

/// Builds recorders bound to a live stream.
pub trait RecorderBackend {
    fn create(
        &self,
        stream: &LiveStream,
        events: RecorderEvents,
    ) -> Result<Box<dyn MediaRecorder>, RecorderError>;
}

/// The recording state machine plus the current clip.
pub struct Recorder {
    state: RecordingState,
    active: Option<Box<dyn MediaRecorder>>,
    generation: u64,
    chunks: Vec<Vec<u8>>,
    clip: Option<Arc<RecordedClip>>,
    events_tx: mpsc::UnboundedSender<RecorderEvent>,
}

impl Recorder {
    /// Create a recorder whose backends report into `events_tx`.
    pub fn new(events_tx: mpsc::UnboundedSender<RecorderEvent>) -> Self {
        Self {
            state: RecordingState::Idle,
            active: None,
            generation: 0,
            chunks: Vec::new(),
            clip: None,
            events_tx,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecordingState::Recording { .. })
    }

    /// A backend recorder exists whose `Stopped` event has not arrived yet.
    pub fn is_finalizing(&self) -> bool {
        self.active.is_some()
    }

    pub fn clip(&self) -> Option<&Arc<RecordedClip>> {
        self.clip.as_ref()
    }

    /// Adopt a clip restored from the store as the current clip.
    pub fn restore(&mut self, clip: RecordedClip) {
        tracing::info!(id = %clip.id, bytes = clip.len(), "restored stored clip");
        self.clip = Some(Arc::new(clip));
    }

    /// Start recording `stream`. An active recorder is stopped and detached first.
    pub fn start(
        &mut self,
        stream: Option<&LiveStream>,
        backend: &dyn RecorderBackend,
    ) -> Result<(), RecorderError> {
        let stream = stream.ok_or(RecorderError::NoStream)?;

        if let Some(mut previous) = self.active.take() {
            if previous.activity() != RecorderActivity::Inactive {
                tracing::warn!(
                    generation = self.generation,
                    "start while recording; discarding previous recorder"
                );
                previous.stop();
            }
        }
        self.state = RecordingState::Idle;

        self.generation += 1;
        self.chunks.clear();

        let events = RecorderEvents {
            generation: self.generation,
            tx: self.events_tx.clone(),
        };
        let recorder = backend.create(stream, events)?;

        let session_id = Uuid::new_v4();
        self.active = Some(recorder);
        self.state = RecordingState::Recording {
            session_id,
            started_at: Utc::now(),
        };
        tracing::info!(%session_id, generation = self.generation, "recording started");
        Ok(())
    }

    /// Ask the active recorder to finalize. No effect on an inactive or absent one.
    pub fn stop(&mut self) {
        if let Some(recorder) = self.active.as_mut() {
            if recorder.activity() != RecorderActivity::Inactive {
                recorder.stop();
                tracing::info!(generation = self.generation, "recording stop requested");
            }
        }
        self.state = RecordingState::Idle;
    }

    /// Apply one backend event. Returns the new clip when a recording finishes.
    pub fn handle_event(
        &mut self,
        event: RecorderEvent,
        store: &ClipStore,
    ) -> Option<Arc<RecordedClip>> {
        if event.generation != self.generation {
            tracing::debug!(
                event_generation = event.generation,
                current = self.generation,
                "ignoring event from detached recorder"
            );
            return None;
        }

        match event.kind {
            RecorderEventKind::DataAvailable(chunk) => {
                tracing::trace!(bytes = chunk.len(), "recorder chunk");
                self.chunks.push(chunk);
                None
            }
            RecorderEventKind::Stopped => {
                let bytes = self.chunks.concat();
                let chunk_count = self.chunks.len();
                self.chunks.clear();
                self.active = None;
                self.state = RecordingState::Idle;

                let clip = Arc::new(RecordedClip::new(bytes, CLIP_MIME));
                tracing::info!(
                    id = %clip.id,
                    bytes = clip.len(),
                    chunks = chunk_count,
                    "recording finished"
                );

                if let Err(e) = store.save(&clip) {
                    tracing::warn!(error = %e, "could not persist clip");
                }
                self.clip = Some(clip.clone());
                Some(clip)
            }
        }
    }

    /// Forget the current clip and clear the persisted slot.
    pub fn delete(&mut self, store: &ClipStore) {
        if let Err(e) = store.remove() {
            tracing::warn!(error = %e, "could not clear stored clip");
        }
        if let Some(clip) = self.clip.take() {
            tracing::info!(id = %clip.id, "clip deleted");
        }
    }

    /// Write the current clip into `dir` under the fixed download name.
    pub fn export(&self, dir: &Path) -> Result<PathBuf, RecorderError> {
        let clip = self.clip.as_ref().ok_or(RecorderError::NoClip)?;
        Ok(export_clip(clip, dir)?)
    }
}

/// Records the live stream as Motion-JPEG: each new frame is JPEG-encoded
/// and appended to the pending chunk.
pub struct MjpegBackend {
    pub timeslice_frames: usize,
    pub quality: u8,
}

impl RecorderBackend for MjpegBackend {
    fn create(
        &self,
        stream: &LiveStream,
        events: RecorderEvents,
    ) -> Result<Box<dyn MediaRecorder>, RecorderError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RecorderError::Construction(e.to_string()))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let active = Arc::new(AtomicBool::new(true));
        runtime.spawn(record_mjpeg(
            stream.clone(),
            events,
            stop_rx,
            self.timeslice_frames.max(1),
            self.quality,
            active.clone(),
        ));

        Ok(Box::new(MjpegRecorder {
            stop_tx: Some(stop_tx),
            active,
        }))
    }
}

struct MjpegRecorder {
    stop_tx: Option<oneshot::Sender<()>>,
    active: Arc<AtomicBool>,
}

impl MediaRecorder for MjpegRecorder {
    fn activity(&self) -> RecorderActivity {
        if self.stop_tx.is_some() && self.active.load(Ordering::SeqCst) {
            RecorderActivity::Recording
        } else {
            RecorderActivity::Inactive
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn record_mjpeg(
    mut stream: LiveStream,
    events: RecorderEvents,
    mut stop_rx: oneshot::Receiver<()>,
    timeslice_frames: usize,
    quality: u8,
    active: Arc<AtomicBool>,
) {
    let mut pending = Vec::new();
    let mut frames_in_chunk = 0usize;
    let mut frames_total = 0usize;

    loop {
        tokio::select! {
            // Also fires if the recorder handle is dropped without stop().
            _ = &mut stop_rx => break,
            next = stream.next_frame() => {
                let frame = match next {
                    Ok(frame) => frame,
                    Err(_) => {
                        tracing::warn!("live stream closed while recording");
                        break;
                    }
                };
                match tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality)).await {
                    Ok(Ok(jpeg)) => {
                        pending.extend_from_slice(&jpeg);
                        frames_in_chunk += 1;
                        frames_total += 1;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "dropping frame that failed to encode")
                    }
                    Err(e) => tracing::warn!(error = %e, "frame encode task failed"),
                }
                if frames_in_chunk >= timeslice_frames {
                    events.data(std::mem::take(&mut pending));
                    frames_in_chunk = 0;
                }
            }
        }
    }

    if !pending.is_empty() {
        events.data(pending);
    }
    active.store(false, Ordering::SeqCst);
    tracing::debug!(frames = frames_total, "mjpeg recorder finished");
    events.stopped();
}

fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode(
        &frame.data,
        frame.width,
        frame.height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}
