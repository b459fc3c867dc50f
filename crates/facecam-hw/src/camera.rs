//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameError};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const MMAP_BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("video capture not supported")]
    StreamingNotSupported,
    #[error("frame conversion failed: {0}")]
    Frame(#[from] FrameError),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// Motion-JPEG, one JPEG image per buffer.
    Mjpg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(PixelFormat::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(PixelFormat::Grey)
        } else if fourcc == FourCC::new(b"MJPG") {
            Some(PixelFormat::Mjpg)
        } else {
            None
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and request
    /// `width` x `height` YUYV. The driver may answer with GREY or MJPG.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or MJPG)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Capture continuously on one mmap stream, handing each RGB frame to
    /// `on_frame` until it returns `false`.
    ///
    /// Frames that fail to convert are skipped; dequeue failures end the loop.
    pub fn stream_frames<F>(&self, mut on_frame: F) -> Result<(), CameraError>
    where
        F: FnMut(Frame) -> bool,
    {
        let mut stream = self.mmap_stream()?;

        loop {
            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;

            let rgb = match self.buf_to_rgb(buf) {
                Ok(rgb) => rgb,
                Err(e) => {
                    tracing::debug!(
                        seq = meta.sequence,
                        error = %e,
                        "dropping unconvertible frame"
                    );
                    continue;
                }
            };

            if !on_frame(Frame::new(rgb, self.width, self.height, meta.sequence)) {
                return Ok(());
            }
        }
    }

    fn mmap_stream(&self) -> Result<MmapStream<'_>, CameraError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, MMAP_BUFFER_COUNT)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))
    }

    /// Convert a raw buffer to RGB based on the negotiated format.
    fn buf_to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let rgb = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height)?,
            PixelFormat::Grey => frame::grey_to_rgb(buf, self.width, self.height)?,
            PixelFormat::Mjpg => frame::mjpeg_to_rgb(buf, self.width, self.height)?,
        };
        Ok(rgb)
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}
