//! The live stream: latest-frame fan-out from the capture thread.
//!
//! One publisher (the capture thread) and any number of `LiveStream`
//! handles. Readers only ever see the newest frame; a slow reader skips
//! frames instead of queueing them.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
#[error("live stream closed")]
pub struct StreamClosed;

/// Write side of a live stream.
pub struct FramePublisher {
    tx: watch::Sender<Option<Arc<Frame>>>,
}

impl FramePublisher {
    /// Publish a frame. Returns `false` once every stream handle is gone.
    pub fn publish(&self, frame: Frame) -> bool {
        self.tx.send(Some(Arc::new(frame))).is_ok()
    }
}

/// Read side of a live stream. Cheap to clone.
#[derive(Clone)]
pub struct LiveStream {
    rx: watch::Receiver<Option<Arc<Frame>>>,
}

impl LiveStream {
    /// Create a connected publisher/stream pair with no frame yet.
    pub fn channel() -> (FramePublisher, LiveStream) {
        let (tx, rx) = watch::channel(None);
        (FramePublisher { tx }, LiveStream { rx })
    }

    /// The newest frame, if any has arrived.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.rx.borrow().clone()
    }

    /// Wait until the first frame is available (the stream is "ready").
    pub async fn ready(&mut self) -> Result<Arc<Frame>, StreamClosed> {
        let frame = self
            .rx
            .wait_for(|f| f.is_some())
            .await
            .map_err(|_| StreamClosed)?;
        frame.clone().ok_or(StreamClosed)
    }

    /// Wait for a frame newer than the last one this handle observed.
    pub async fn next_frame(&mut self) -> Result<Arc<Frame>, StreamClosed> {
        loop {
            self.rx.changed().await.map_err(|_| StreamClosed)?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Ok(frame);
            }
        }
    }
}

/// Open `device_path` and start publishing its frames from a dedicated
/// capture thread.
///
/// The device is opened on the calling thread so that access failures are
/// returned here. The capture thread exits when every `LiveStream` handle
/// has been dropped or when the device stops delivering frames.
pub fn start_camera(device_path: &str, width: u32, height: u32) -> Result<LiveStream, CameraError> {
    let camera = Camera::open(device_path, width, height)?;
    let (publisher, stream) = LiveStream::channel();
    let device = device_path.to_string();

    std::thread::Builder::new()
        .name("facecam-capture".into())
        .spawn(move || {
            tracing::info!(device = %device, "capture thread started");
            match camera.stream_frames(|frame| publisher.publish(frame)) {
                Ok(()) => tracing::info!(device = %device, "capture stopped: no viewers left"),
                Err(e) => tracing::error!(device = %device, error = %e, "capture stopped"),
            }
        })
        .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u32) -> Frame {
        Frame::new(vec![0; 4 * 3], 2, 2, seq)
    }

    #[tokio::test]
    async fn test_ready_waits_for_first_frame() {
        let (publisher, mut stream) = LiveStream::channel();
        assert!(stream.latest().is_none());

        let handle = tokio::spawn(async move { stream.ready().await.map(|f| f.sequence) });
        tokio::task::yield_now().await;
        assert!(publisher.publish(frame(7)));

        assert_eq!(handle.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_ready_returns_immediately_when_frame_exists() {
        let (publisher, mut stream) = LiveStream::channel();
        publisher.publish(frame(1));
        assert_eq!(stream.ready().await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_latest_only_keeps_newest() {
        let (publisher, mut stream) = LiveStream::channel();
        publisher.publish(frame(1));
        publisher.publish(frame(2));
        assert_eq!(stream.next_frame().await.unwrap().sequence, 2);
        assert_eq!(stream.latest().unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_closed_publisher_ends_stream() {
        let (publisher, mut stream) = LiveStream::channel();
        drop(publisher);
        assert!(stream.ready().await.is_err());
        assert!(stream.next_frame().await.is_err());
    }

    #[test]
    fn test_publish_fails_without_readers() {
        let (publisher, stream) = LiveStream::channel();
        let clone = stream.clone();
        drop(stream);
        assert!(publisher.publish(frame(1)));
        drop(clone);
        assert!(!publisher.publish(frame(2)));
    }
}
