use async_trait::async_trait;
use facesift_core::{AnalyzeError, Detection, DetectorMode, ImageFile};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error("inference engine is not running")]
    EngineUnavailable,
    #[error("{0}")]
    Other(String),
}

/// Source of face descriptors for an image.
///
/// Implementations may hold a heavyweight model; callers issue one request at
/// a time and await it before the next.
#[async_trait]
pub trait DescriptorProvider: Send + Sync {
    async fn detect(
        &self,
        image: &ImageFile,
        mode: DetectorMode,
    ) -> Result<Vec<Detection>, DetectionError>;
}
