use crate::provider::{DescriptorProvider, DetectionError};
use async_trait::async_trait;
use facesift_core::{AnalyzeError, Detection, DetectorMode, FaceAnalyzer, ImageFile};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to load models: {0}")]
    Load(#[from] AnalyzeError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Detect {
        image: ImageFile,
        mode: DetectorMode,
        reply: oneshot::Sender<Result<Vec<Detection>, AnalyzeError>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Every clone feeds the same thread, so requests are served strictly one at
/// a time in arrival order.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect faces and extract descriptors for one image.
    pub async fn analyze(
        &self,
        image: ImageFile,
        mode: DetectorMode,
    ) -> Result<Vec<Detection>, DetectionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect {
                image,
                mode,
                reply: reply_tx,
            })
            .await
            .map_err(|_| DetectionError::EngineUnavailable)?;
        let detections = reply_rx
            .await
            .map_err(|_| DetectionError::EngineUnavailable)??;
        Ok(detections)
    }
}

#[async_trait]
impl DescriptorProvider for EngineHandle {
    async fn detect(
        &self,
        image: &ImageFile,
        mode: DetectorMode,
    ) -> Result<Vec<Detection>, DetectionError> {
        self.analyze(image.clone(), mode).await
    }
}

/// Load both ONNX models and start the engine thread.
///
/// Fails fast if either model is missing or unreadable.
pub fn spawn_engine(scrfd_path: &str, arcface_path: &str) -> Result<EngineHandle, EngineError> {
    let analyzer = FaceAnalyzer::load(scrfd_path, arcface_path)?;
    tracing::info!(scrfd = scrfd_path, arcface = arcface_path, "face models loaded");
    spawn_with(analyzer)
}

/// Move an already-loaded analyzer onto a dedicated OS thread.
///
/// The thread exits once every [`EngineHandle`] has been dropped.
pub fn spawn_with(mut analyzer: FaceAnalyzer) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facesift-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { image, mode, reply } => {
                        let result = analyzer.analyze(&image, mode);
                        if let Err(err) = &result {
                            tracing::debug!(image = image.name(), error = %err, "analysis failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
