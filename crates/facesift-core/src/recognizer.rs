//! ArcFace descriptors via ONNX Runtime.
//!
//! Each face is aligned to the 112×112 ArcFace crop, fed through the
//! w600k_r50 model, and the 512-d output is scaled to unit length so that
//! descriptor distances fall in [0, 2].

use crate::alignment::{align_face, ALIGNED_SIZE};
use crate::types::{BoundingBox, Descriptor};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Symmetric normalization into [-1, 1].
const PIXEL_CENTER: f32 = 127.5;
const PIXEL_SCALE: f32 = 127.5;

pub const ARCFACE_DESCRIPTOR_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("face has no landmarks to align")]
    NoLandmarks,
    #[error("unexpected model output: {0}")]
    BadOutput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Descriptor for one detected face of `image`.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Descriptor, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let crop = align_face(image, landmarks);
        let input = to_tensor(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::BadOutput(e.to_string()))?;

        if values.len() != ARCFACE_DESCRIPTOR_DIM {
            return Err(RecognizerError::BadOutput(format!(
                "{} values, expected {ARCFACE_DESCRIPTOR_DIM}",
                values.len()
            )));
        }

        Ok(Descriptor::new(
            l2_normalize(values.to_vec()),
            Some(ARCFACE_MODEL_VERSION.to_string()),
        ))
    }
}

/// NCHW float tensor from the aligned crop, channels in RGB order.
fn to_tensor(crop: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        let value = crop
            .get_pixel_checked(x as u32, y as u32)
            .map_or(0.0, |p| p[c] as f32);
        (value - PIXEL_CENTER) / PIXEL_SCALE
    })
}

/// Scale to unit length; the zero vector is returned as is.
fn l2_normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
    values
}
