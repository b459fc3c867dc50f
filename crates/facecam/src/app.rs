//! The interactive application: owns all state and wires the model loader,
//! camera, detection loop, recorder and shell together.
//!
//! Everything here runs on the main task. Slow work (model loading, camera
//! open, inference, capture, stdin) lives on other threads and reports back
//! through channels that the main `select!` loop drains.

use crate::clip::RecordedClip;
use crate::config::Config;
use crate::detection::{DetectionLoop, DetectionSettings};
use crate::engine::{spawn_engine, EngineHandle};
use crate::recorder::{MjpegBackend, Recorder, RecorderError, RecorderEvent};
use crate::shell::{render_faces, render_view, Command, ViewState, HEADING, PAGE_TITLE};
use crate::store::ClipStore;
use facecam_core::{find_label_font, ModelError, ModelSet, Overlay};
use facecam_hw::{start_camera, CameraError, Frame, LiveStream, StreamClosed};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

/// How long quitting waits for an in-flight recording to finalize.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(2);

/// Mutable application state. Only the main task touches it.
pub struct AppState {
    pub models_ready: bool,
    pub stream: Option<LiveStream>,
    /// Frame that made the stream ready.
    pub first_frame: Option<Arc<Frame>>,
    pub engine: Option<EngineHandle>,
    pub recorder: Recorder,
    pub detection: Option<DetectionLoop>,
}

pub struct App {
    config: Config,
    state: AppState,
    store: ClipStore,
    backend: MjpegBackend,
    events_rx: mpsc::UnboundedReceiver<RecorderEvent>,
    /// Overlay updates from the detection loop, once attached.
    overlay_rx: Option<watch::Receiver<Overlay>>,
    /// Face labels last shown to the user.
    shown_labels: Vec<String>,
}

impl App {
    /// Build the app and restore any clip left in the store.
    pub fn new(config: Config) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut recorder = Recorder::new(events_tx);
        let store = ClipStore::new(&config.data_dir);

        match store.load() {
            Ok(Some(clip)) => recorder.restore(clip),
            Ok(None) => {}
            Err(e) => tracing::warn!(
                dir = %store.dir().display(),
                error = %e,
                "could not read stored clip"
            ),
        }

        let backend = MjpegBackend {
            timeslice_frames: config.record_timeslice_frames,
            quality: config.jpeg_quality,
        };

        Self {
            config,
            state: AppState {
                models_ready: false,
                stream: None,
                first_frame: None,
                engine: None,
                recorder,
                detection: None,
            },
            store,
            backend,
            events_rx,
            overlay_rx: None,
            shown_labels: Vec::new(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn clip(&self) -> Option<&Arc<RecordedClip>> {
        self.state.recorder.clip()
    }

    /// Run until the user quits, stdin and Ctrl-C included.
    pub async fn run(mut self) -> anyhow::Result<()> {
        println!("{PAGE_TITLE}");
        println!("{HEADING}");
        self.print_view();

        let model_dir = self.config.model_dir.clone();
        let min_confidence = self.config.min_confidence;
        let mut models_task = Some(tokio::task::spawn_blocking(move || {
            ModelSet::load(&model_dir, min_confidence)
        }));

        let device = self.config.camera_device.clone();
        let (width, height) = (self.config.capture_width, self.config.capture_height);
        let mut camera_task = Some(tokio::task::spawn_blocking(move || {
            start_camera(&device, width, height)
        }));

        let mut ready_task: Option<JoinHandle<Result<Arc<Frame>, StreamClosed>>> = None;
        let mut commands = spawn_stdin_reader()?;

        loop {
            tokio::select! {
                res = join_opt(&mut models_task) => {
                    models_task = None;
                    self.on_models_loaded(res);
                }
                res = join_opt(&mut camera_task) => {
                    camera_task = None;
                    if let Some(mut stream) = self.on_camera_opened(res) {
                        ready_task = Some(tokio::spawn(async move { stream.ready().await }));
                    }
                }
                res = join_opt(&mut ready_task) => {
                    ready_task = None;
                    self.on_stream_ready(res);
                }
                res = overlay_changed(&mut self.overlay_rx) => match res {
                    Ok(overlay) => self.on_overlay(&overlay),
                    Err(_) => self.overlay_rx = None,
                },
                Some(event) = self.events_rx.recv() => {
                    if let Some(clip) = self.state.recorder.handle_event(event, &self.store) {
                        println!("Recording saved ({} bytes)", clip.len());
                        self.print_view();
                    }
                }
                line = commands.recv() => match line {
                    Some(line) => match Command::parse(&line) {
                        Some(cmd) => {
                            if !self.apply(cmd) {
                                break;
                            }
                        }
                        None if line.trim().is_empty() => {}
                        None => println!("Unknown command: {}", line.trim()),
                    },
                    None => {
                        tracing::info!("stdin closed");
                        break;
                    }
                },
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        tracing::warn!(error = %e, "ctrl-c handler failed");
                    }
                    break;
                }
            }
        }

        self.teardown().await;
        Ok(())
    }

    /// Apply one user command. Returns `false` when the app should exit.
    pub fn apply(&mut self, cmd: Command) -> bool {
        if cmd == Command::Quit {
            return false;
        }
        if !self.state.models_ready {
            println!("Models are still loading.");
            return true;
        }

        match cmd {
            Command::Start => {
                let stream = self.state.stream.as_ref();
                if let Err(e) = self.state.recorder.start(stream, &self.backend) {
                    tracing::error!(
                        failure = start_failure_kind(&e),
                        error = %e,
                        "recording not started"
                    );
                }
            }
            Command::Stop => self.state.recorder.stop(),
            Command::Download => match self.state.recorder.export(&self.config.download_dir) {
                Ok(path) => println!("Saved {}", path.display()),
                Err(RecorderError::NoClip) => println!("No recorded video."),
                Err(e) => tracing::error!(error = %e, "download failed"),
            },
            Command::Delete => self.state.recorder.delete(&self.store),
            Command::Quit => return false,
        }

        self.print_view();
        true
    }

    fn on_models_loaded(&mut self, res: Result<Result<ModelSet, ModelError>, JoinError>) {
        let models = match res {
            Ok(Ok(models)) => models,
            Ok(Err(e)) => {
                tracing::error!(
                    failure = "ModelLoadFailure",
                    dir = %self.config.model_dir.display(),
                    error = %e,
                    "face models failed to load"
                );
                return;
            }
            Err(e) => {
                tracing::error!(
                    failure = "ModelLoadFailure",
                    error = %e,
                    "model loading task failed"
                );
                return;
            }
        };

        match spawn_engine(Box::new(models)) {
            Ok(engine) => {
                self.state.engine = Some(engine);
                self.state.models_ready = true;
                tracing::info!("face models ready");
            }
            Err(e) => {
                tracing::error!(
                    failure = "ModelLoadFailure",
                    error = %e,
                    "could not start inference engine"
                );
                return;
            }
        }

        self.maybe_attach_detection();
        self.print_view();
    }

    fn on_camera_opened(
        &mut self,
        res: Result<Result<LiveStream, CameraError>, JoinError>,
    ) -> Option<LiveStream> {
        match res {
            Ok(Ok(stream)) => {
                tracing::info!(device = %self.config.camera_device, "camera stream bound");
                self.state.stream = Some(stream.clone());
                Some(stream)
            }
            Ok(Err(e)) => {
                tracing::error!(
                    failure = "CameraAccessFailure",
                    device = %self.config.camera_device,
                    error = %e,
                    "could not access camera"
                );
                None
            }
            Err(e) => {
                tracing::error!(
                    failure = "CameraAccessFailure",
                    error = %e,
                    "camera open task failed"
                );
                None
            }
        }
    }

    fn on_stream_ready(&mut self, res: Result<Result<Arc<Frame>, StreamClosed>, JoinError>) {
        match res {
            Ok(Ok(frame)) => {
                tracing::info!(width = frame.width, height = frame.height, "first frame received");
                self.state.first_frame = Some(frame);
                self.maybe_attach_detection();
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "camera stopped before the first frame"),
            Err(e) => tracing::warn!(error = %e, "stream ready task failed"),
        }
    }

    /// Attach the detection loop once models, stream and first frame all exist.
    /// Runs at most once per app.
    pub fn maybe_attach_detection(&mut self) -> bool {
        if self.state.detection.is_some() || !self.state.models_ready {
            return false;
        }
        let (Some(engine), Some(stream), Some(first)) =
            (&self.state.engine, &self.state.stream, &self.state.first_frame)
        else {
            return false;
        };

        let label_font = match &self.config.overlay_path {
            Some(_) => find_label_font(self.config.label_font.as_deref()),
            None => None,
        };
        let settings = DetectionSettings {
            interval: self.config.detect_interval,
            display: self.config.display_size,
            overlay_path: self.config.overlay_path.clone(),
            label_font,
        };
        let detection = DetectionLoop::attach(engine.clone(), stream.clone(), first, settings);
        self.overlay_rx = Some(detection.overlay());
        self.state.detection = Some(detection);
        true
    }

    /// Print the detected faces when the set of labels changes.
    fn on_overlay(&mut self, overlay: &Overlay) {
        let labels: Vec<String> = overlay.labels().into_iter().map(str::to_string).collect();
        if labels != self.shown_labels {
            println!("{}", render_faces(&labels));
            self.shown_labels = labels;
        }
    }

    /// The control area as currently rendered.
    pub fn view(&self) -> String {
        render_view(&ViewState {
            models_ready: self.state.models_ready,
            recording: self.state.recorder.state(),
            clip: self.state.recorder.clip().map(|c| c.as_ref()),
        })
    }

    fn print_view(&self) {
        println!();
        println!("{}", self.view());
    }

    /// Stop the loop, finalize any recording, then release the camera and engine.
    async fn teardown(self) {
        let Self {
            mut state,
            store,
            mut events_rx,
            ..
        } = self;

        if let Some(detection) = state.detection.take() {
            detection.shutdown().await;
        }

        state.recorder.stop();
        // A stopped recorder may still be flushing its last chunk.
        if state.recorder.is_finalizing() {
            let recorder = &mut state.recorder;
            let finalized = tokio::time::timeout(FINALIZE_TIMEOUT, async {
                while let Some(event) = events_rx.recv().await {
                    if recorder.handle_event(event, &store).is_some() {
                        break;
                    }
                }
            })
            .await;
            if finalized.is_err() {
                tracing::warn!("recording did not finalize before exit");
            }
        }

        state.stream = None;
        state.first_frame = None;
        state.engine = None;
        tracing::info!("facecam shut down");
    }
}

/// Await an optional task; pending forever when there is none.
async fn join_opt<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match task.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Log tag for a failed recording start.
fn start_failure_kind(err: &RecorderError) -> &'static str {
    match err {
        RecorderError::NoStream => "NoStreamBound",
        _ => "RecorderConstructionFailure",
    }
}

/// Wait for the next overlay; pending forever when no loop is attached.
async fn overlay_changed(
    rx: &mut Option<watch::Receiver<Overlay>>,
) -> Result<Overlay, watch::error::RecvError> {
    match rx.as_mut() {
        Some(rx) => {
            rx.changed().await?;
            Ok(rx.borrow_and_update().clone())
        }
        None => std::future::pending().await,
    }
}

/// Read stdin lines on a dedicated thread.
fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("facecam-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::CenterFaceAnalyzer;
    use crate::recorder::RecordingState;
    use crate::shell::LOADING_MESSAGE;
    use facecam_core::detector::DetectorError;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    fn config(data_dir: &std::path::Path, download_dir: &std::path::Path) -> Config {
        let vars: HashMap<&str, String> = [
            ("FACECAM_DATA_DIR", data_dir.display().to_string()),
            ("FACECAM_DOWNLOAD_DIR", download_dir.display().to_string()),
            ("FACECAM_DETECT_INTERVAL_MS", "10".to_string()),
            ("FACECAM_RECORD_TIMESLICE_FRAMES", "1".to_string()),
        ]
        .into_iter()
        .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    fn engine() -> EngineHandle {
        spawn_engine(Box::new(CenterFaceAnalyzer {
            calls: Arc::new(AtomicUsize::new(0)),
        }))
        .unwrap()
    }

    #[test]
    fn test_new_restores_stored_clip() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), dir.path());
        let stored = RecordedClip::new(vec![7; 12], crate::clip::CLIP_MIME);
        ClipStore::new(&cfg.data_dir).save(&stored).unwrap();

        let app = App::new(cfg);
        let clip = app.clip().expect("restored");
        assert_eq!(clip.len(), 12);
        assert_eq!(clip.id, stored.id);
    }

    #[test]
    fn test_commands_ignored_while_loading() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new(config(dir.path(), dir.path()));
        assert!(app.apply(Command::Start));
        assert_eq!(app.state().recorder.state(), RecordingState::Idle);
        assert!(!app.apply(Command::Quit));
    }

    #[test]
    fn test_start_without_camera_stays_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new(config(dir.path(), dir.path()));
        app.state.models_ready = true;
        assert!(app.apply(Command::Start));
        assert_eq!(app.state().recorder.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn test_detection_attaches_once_everything_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new(config(dir.path(), dir.path()));
        let (publisher, stream) = LiveStream::channel();

        app.state.stream = Some(stream.clone());
        app.state.engine = Some(engine());
        assert!(!app.maybe_attach_detection());

        publisher.publish(Frame::new(vec![0; 16 * 12 * 3], 16, 12, 1));
        app.state.first_frame = stream.latest();
        assert!(!app.maybe_attach_detection(), "models not ready yet");

        app.state.models_ready = true;
        assert!(app.maybe_attach_detection());
        assert!(!app.maybe_attach_detection(), "never attaches twice");
        assert!(app.state().detection.is_some());
    }

    /// Start recording, publish two frames, then stop.
    async fn record_two_frames(app: &mut App, publisher: &facecam_hw::FramePublisher) {
        assert!(app.apply(Command::Start));
        assert!(app.state().recorder.is_recording());
        tokio::task::yield_now().await;
        for seq in 0..2 {
            publisher.publish(Frame::new(vec![200; 8 * 8 * 3], 8, 8, seq));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        assert!(app.apply(Command::Stop));
        assert_eq!(app.state().recorder.state(), RecordingState::Idle);
    }

    async fn drain_until_clip(app: &mut App) {
        let store = ClipStore::new(&app.config.data_dir);
        tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = app.events_rx.recv().await {
                if app.state.recorder.handle_event(event, &store).is_some() {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_record_download_delete_cycle() {
        let data = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        let mut app = App::new(config(data.path(), downloads.path()));
        let (publisher, stream) = LiveStream::channel();
        app.state.stream = Some(stream);
        app.state.models_ready = true;

        record_two_frames(&mut app, &publisher).await;
        drain_until_clip(&mut app).await;
        let store = ClipStore::new(data.path());
        assert!(app.clip().is_some_and(|c| !c.is_empty()));
        assert!(store.exists());

        assert!(app.apply(Command::Download));
        assert!(downloads.path().join(crate::clip::DOWNLOAD_FILE_NAME).exists());

        assert!(app.apply(Command::Delete));
        assert!(app.clip().is_none());
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn test_quit_right_after_stop_persists_clip() {
        let data = tempfile::tempdir().unwrap();
        let cfg = config(data.path(), data.path());
        let mut app = App::new(cfg.clone());
        let (publisher, stream) = LiveStream::channel();
        app.state.stream = Some(stream);
        app.state.models_ready = true;

        record_two_frames(&mut app, &publisher).await;
        assert!(app.state().recorder.is_finalizing());
        app.teardown().await;

        let store = ClipStore::new(data.path());
        assert!(store.exists());
        let restored = App::new(cfg);
        assert!(restored.clip().is_some_and(|c| !c.is_empty()));
    }

    #[tokio::test]
    async fn test_deleted_clip_is_not_restored() {
        let data = tempfile::tempdir().unwrap();
        let cfg = config(data.path(), data.path());
        let mut app = App::new(cfg.clone());
        let (publisher, stream) = LiveStream::channel();
        app.state.stream = Some(stream);
        app.state.models_ready = true;

        record_two_frames(&mut app, &publisher).await;
        drain_until_clip(&mut app).await;
        assert!(App::new(cfg.clone()).clip().is_some());

        assert!(app.apply(Command::Delete));
        let reloaded = App::new(cfg);
        assert!(reloaded.clip().is_none());
    }

    #[test]
    fn test_model_failure_keeps_loading_view() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new(config(dir.path(), dir.path()));
        let missing = DetectorError::ModelNotFound("models/ssd_mobilenetv1.onnx".into());

        app.on_models_loaded(Ok(Err(ModelError::Detector(missing))));
        assert!(!app.state().models_ready);
        assert!(app.state().engine.is_none());
        assert_eq!(app.view(), LOADING_MESSAGE);

        assert!(app.apply(Command::Start));
        assert_eq!(app.state().recorder.state(), RecordingState::Idle);
        assert_eq!(app.view(), LOADING_MESSAGE);
    }

    #[test]
    fn test_start_failures_are_tagged_separately() {
        assert_eq!(start_failure_kind(&RecorderError::NoStream), "NoStreamBound");
        assert_eq!(
            start_failure_kind(&RecorderError::Construction("busy".into())),
            "RecorderConstructionFailure"
        );
    }

    #[tokio::test]
    async fn test_overlay_labels_reach_the_shell() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new(config(dir.path(), dir.path()));
        let (publisher, stream) = LiveStream::channel();
        publisher.publish(Frame::new(vec![0; 16 * 12 * 3], 16, 12, 1));
        app.state.first_frame = stream.latest();
        app.state.stream = Some(stream);
        app.state.engine = Some(engine());
        app.state.models_ready = true;
        assert!(app.maybe_attach_detection());

        let next = overlay_changed(&mut app.overlay_rx);
        let overlay = tokio::time::timeout(Duration::from_secs(2), next)
            .await
            .expect("overlay published in time")
            .expect("loop alive");
        app.on_overlay(&overlay);
        assert_eq!(app.shown_labels, vec!["happy".to_string()]);
    }
}
