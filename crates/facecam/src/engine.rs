use facecam_core::{AnalyzeError, FaceAnalyzer, FaceDetection};
use facecam_hw::Frame;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("analysis failed: {0}")]
    Analyze(#[from] AnalyzeError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// One frame to analyze, with the channel for its result.
struct AnalyzeRequest {
    frame: Arc<Frame>,
    reply: oneshot::Sender<Result<Vec<FaceDetection>, AnalyzeError>>,
}

/// Clone-safe handle to the inference thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<AnalyzeRequest>,
}

impl EngineHandle {
    /// Run the full pipeline on `frame`. Geometry is in frame pixels.
    pub async fn analyze(&self, frame: Arc<Frame>) -> Result<Vec<FaceDetection>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(AnalyzeRequest {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Move `analyzer` onto a dedicated OS thread and serve requests until
/// every handle is dropped.
pub fn spawn_engine(mut analyzer: Box<dyn FaceAnalyzer>) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<AnalyzeRequest>(1);

    std::thread::Builder::new()
        .name("facecam-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let frame = &req.frame;
                let result = analyzer.analyze(&frame.data, frame.width, frame.height);
                if let Err(e) = &result {
                    tracing::debug!(seq = frame.sequence, error = %e, "analysis failed");
                }
                let _ = req.reply.send(result);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use facecam_core::{BoundingBox, Expression, Expressions, Landmarks68};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Analyzer that reports one face covering the middle of every frame.
    pub(crate) struct CenterFaceAnalyzer {
        pub calls: Arc<AtomicUsize>,
    }

    impl FaceAnalyzer for CenterFaceAnalyzer {
        fn analyze(
            &mut self,
            rgb: &[u8],
            width: u32,
            height: u32,
        ) -> Result<Vec<FaceDetection>, AnalyzeError> {
            if rgb.len() < (width * height * 3) as usize {
                return Err(AnalyzeError::InvalidFrame { width, height });
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (w, h) = (width as f32, height as f32);
            let bbox = BoundingBox {
                x: w / 4.0,
                y: h / 4.0,
                width: w / 2.0,
                height: h / 2.0,
                confidence: 0.95,
            };
            let landmarks = Landmarks68::from_points(vec![(w / 2.0, h / 2.0); 68]).unwrap();
            Ok(vec![FaceDetection {
                bbox,
                landmarks,
                expressions: Expressions::from_pairs([
                    (Expression::Happy, 0.8),
                    (Expression::Neutral, 0.2),
                ]),
            }])
        }
    }

    pub(crate) fn frame(width: u32, height: u32, sequence: u32) -> Arc<Frame> {
        Arc::new(Frame::new(vec![90; (width * height * 3) as usize], width, height, sequence))
    }

    #[tokio::test]
    async fn test_engine_round_trip() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = spawn_engine(Box::new(CenterFaceAnalyzer {
            calls: calls.clone(),
        }))
        .unwrap();

        let faces = engine.analyze(frame(40, 20, 1)).await.unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bbox.x, 10.0);
        assert_eq!(faces[0].bbox.height, 10.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_engine_propagates_analysis_errors() {
        let engine = spawn_engine(Box::new(CenterFaceAnalyzer {
            calls: Arc::new(AtomicUsize::new(0)),
        }))
        .unwrap();
        let bad = Arc::new(Frame::new(vec![0; 3], 4, 4, 0));
        assert!(matches!(
            engine.analyze(bad).await,
            Err(EngineError::Analyze(AnalyzeError::InvalidFrame { .. }))
        ));
    }
}
