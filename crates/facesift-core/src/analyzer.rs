//! Face analysis: detection followed by descriptor extraction for every face.

use crate::detector::{DetectorError, DetectorMode, FaceDetector};
use crate::image_file::{ImageFile, ImageFileError};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Detection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error(transparent)]
    Image(#[from] ImageFileError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// SCRFD detector and ArcFace recognizer, run back to back on one image.
///
/// Holds two ONNX sessions; not meant to be shared between threads.
pub struct FaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceAnalyzer {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self {
            detector,
            recognizer,
        }
    }

    /// Load both models from disk.
    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, AnalyzeError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self::new(detector, recognizer))
    }

    /// Detect every face in `image` and extract its descriptor.
    ///
    /// Detections come back sorted by detector confidence, best first. Faces
    /// the detector returned without landmarks cannot be aligned and are dropped.
    pub fn analyze(
        &mut self,
        image: &ImageFile,
        mode: DetectorMode,
    ) -> Result<Vec<Detection>, AnalyzeError> {
        let rgb = image.decode_rgb()?;
        self.detector.set_mode(mode);
        let faces = self.detector.detect(&rgb)?;

        let mut detections = Vec::with_capacity(faces.len());
        for face in faces {
            if face.landmarks.is_none() {
                tracing::debug!(image = image.name(), confidence = face.confidence, "face without landmarks skipped");
                continue;
            }
            let descriptor = self.recognizer.extract(&rgb, &face)?;
            detections.push(Detection {
                bounding_box: face,
                descriptor,
            });
        }

        tracing::debug!(
            image = image.name(),
            width = rgb.width(),
            height = rgb.height(),
            faces = detections.len(),
            ?mode,
            "analyzed image"
        );
        Ok(detections)
    }
}
