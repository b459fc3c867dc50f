//! The detection loop: analyze the newest frame on a fixed cadence and
//! rebuild the overlay.

use crate::engine::{EngineError, EngineHandle};
use facecam_core::{resize_results, FontArc, ImageDims, Overlay};
use facecam_hw::{Frame, LiveStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Clone)]
pub struct DetectionSettings {
    pub interval: Duration,
    /// Overlay size; `None` uses the first frame's size.
    pub display: Option<ImageDims>,
    /// PNG written with frame plus overlay after every tick.
    pub overlay_path: Option<PathBuf>,
    /// Font for expression labels in the snapshot.
    pub label_font: Option<FontArc>,
}

/// Handle to a running detection loop. Dropping it stops the loop.
pub struct DetectionLoop {
    task: JoinHandle<()>,
    overlay: watch::Receiver<Overlay>,
}

impl DetectionLoop {
    /// Start the loop. `first` is the frame that made the stream ready; it
    /// fixes the display size when none is configured.
    pub fn attach(
        engine: EngineHandle,
        stream: LiveStream,
        first: &Frame,
        settings: DetectionSettings,
    ) -> Self {
        let display = settings
            .display
            .unwrap_or_else(|| ImageDims::new(first.width, first.height));
        let (tx, rx) = watch::channel(Overlay::new(display));

        tracing::info!(
            width = display.width,
            height = display.height,
            interval_ms = settings.interval.as_millis() as u64,
            "detection loop attached"
        );

        let task = tokio::spawn(run(engine, stream, display, settings, tx));
        Self { task, overlay: rx }
    }

    /// Subscribe to overlay updates.
    pub fn overlay(&self) -> watch::Receiver<Overlay> {
        self.overlay.clone()
    }

    /// Stop the loop and wait for the task to wind down.
    pub async fn shutdown(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    engine: EngineHandle,
    stream: LiveStream,
    display: ImageDims,
    settings: DetectionSettings,
    tx: watch::Sender<Overlay>,
) {
    let mut ticker = tokio::time::interval(settings.interval);
    // Inference is awaited inside the tick, so a slow tick delays the next
    // one instead of overlapping it.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut overlay = Overlay::new(display);
    let mut last_frame: Option<Arc<Frame>> = None;
    let mut last_labels: Vec<String> = Vec::new();

    loop {
        ticker.tick().await;

        let Some(frame) = stream.latest() else {
            continue;
        };
        if last_frame.as_ref().is_some_and(|prev| Arc::ptr_eq(prev, &frame)) {
            tracing::trace!(seq = frame.sequence, "no new frame, skipping tick");
            continue;
        }
        last_frame = Some(frame.clone());

        let faces = match engine.analyze(frame.clone()).await {
            Ok(faces) => faces,
            Err(EngineError::ChannelClosed) => {
                tracing::warn!("engine gone, detection loop stopping");
                break;
            }
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "detection tick failed");
                continue;
            }
        };

        let analysis = ImageDims::new(frame.width, frame.height);
        overlay.redraw(&resize_results(&faces, analysis, display));

        let labels: Vec<String> = overlay.labels().into_iter().map(str::to_string).collect();
        if labels != last_labels {
            tracing::info!(faces = faces.len(), labels = ?labels, "detections changed");
            last_labels = labels;
        }

        if let Some(path) = &settings.overlay_path {
            let font = settings.label_font.clone();
            write_snapshot(path.clone(), frame.clone(), overlay.clone(), font).await;
        }

        if tx.send(overlay.clone()).is_err() {
            tracing::debug!("no overlay subscribers left");
        }
    }
}

/// Composite `overlay` over `frame` (scaled to the display size) and save it.
async fn write_snapshot(path: PathBuf, frame: Arc<Frame>, overlay: Overlay, font: Option<FontArc>) {
    let result = tokio::task::spawn_blocking(move || -> Result<(), String> {
        let rgb = frame.to_rgb_image().ok_or("frame buffer too short")?;
        let dims = overlay.dims();
        let mut canvas = image::DynamicImage::ImageRgb8(rgb).to_rgba8();
        if canvas.dimensions() != (dims.width, dims.height) {
            canvas = image::imageops::resize(
                &canvas,
                dims.width,
                dims.height,
                image::imageops::FilterType::Triangle,
            );
        }
        image::imageops::overlay(&mut canvas, &overlay.render(font.as_ref()), 0, 0);
        canvas.save(&path).map_err(|e| e.to_string())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "failed to write overlay snapshot"),
        Err(e) => tracing::warn!(error = %e, "overlay snapshot task failed"),
    }
}
