//! facesift-core — find a person across a pile of photos.
//!
//! Uses SCRFD for face detection and ArcFace for face descriptors, both
//! running via ONNX Runtime on the CPU, plus the distance-based matcher that
//! decides whether a photo shows one of the reference faces.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod enhance;
pub mod image_file;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use analyzer::{AnalyzeError, FaceAnalyzer};
pub use detector::DetectorMode;
pub use enhance::{EnhanceError, EnhanceOptions, Enhancer, ToneEnhancer};
pub use image_file::{ImageFile, ImageFileError};
pub use matcher::{DistanceMatcher, MatchOutcome, Matcher};
pub use types::{
    confidence, BoundingBox, Descriptor, Detection, ReferenceSet, ReferenceSetEmpty, Tolerance,
    ToleranceError,
};

use std::path::PathBuf;

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default model directory: `$XDG_DATA_HOME/facesift/models`, falling back to
/// `~/.local/share/facesift/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facesift")
        .join("models")
}
