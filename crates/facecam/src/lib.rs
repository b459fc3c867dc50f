//! facecam: webcam face tracking with a live overlay and clip recording.

pub mod app;
pub mod cli;
pub mod clip;
pub mod config;
pub mod detection;
pub mod engine;
pub mod recorder;
pub mod shell;
pub mod store;
