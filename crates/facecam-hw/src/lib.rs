//! facecam-hw — Camera access for facecam.
//!
//! Provides V4L2-based capture, conversion of YUYV/GREY/MJPG buffers to
//! RGB, and the `LiveStream` that hands the newest frame to every reader.

pub mod camera;
pub mod frame;
pub mod stream;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use stream::{start_camera, FramePublisher, LiveStream, StreamClosed};
