//! Terminal shell: the text the user sees and the keys they press.

use crate::clip::RecordedClip;
use crate::recorder::RecordingState;

pub const PAGE_TITLE: &str = "Face Tracking App";
pub const HEADING: &str = "Face Tracking with Video Recording";
pub const LOADING_MESSAGE: &str = "Loading face models, please wait...";

/// A user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Download,
    Delete,
    Quit,
}

impl Command {
    /// Parse one input line. Surrounding whitespace and case are ignored.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "r" | "record" | "start" => Some(Self::Start),
            "s" | "stop" => Some(Self::Stop),
            "x" | "download" => Some(Self::Download),
            "d" | "delete" => Some(Self::Delete),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Everything the view depends on.
pub struct ViewState<'a> {
    pub models_ready: bool,
    pub recording: RecordingState,
    pub clip: Option<&'a RecordedClip>,
}

/// Render the control area. Before the models are ready only the loading
/// message is shown.
pub fn render_view(view: &ViewState<'_>) -> String {
    if !view.models_ready {
        return LOADING_MESSAGE.to_string();
    }

    let mut lines = Vec::new();
    match view.recording {
        RecordingState::Idle => lines.push("[r] Start Recording".to_string()),
        RecordingState::Recording { started_at, .. } => {
            let since = started_at.format("%H:%M:%S");
            lines.push(format!("[s] Stop Recording  (recording since {since})"));
        }
    }

    if let Some(clip) = view.clip {
        lines.push(format!("Recorded clip: {} ({})", format_size(clip.len()), clip.mime));
        lines.push("[x] Download Video  [d] Delete Video".to_string());
    }
    lines.push("[q] Quit".to_string());
    lines.join("\n")
}

/// One status line for the faces currently on the overlay.
pub fn render_faces(labels: &[String]) -> String {
    if labels.is_empty() {
        "No faces detected".to_string()
    } else {
        format!("Faces: {}", labels.join(", "))
    }
}

fn format_size(bytes: usize) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KIB * KIB {
        format!("{:.1} MiB", b / (KIB * KIB))
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}
