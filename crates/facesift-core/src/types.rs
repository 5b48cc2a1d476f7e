use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face descriptor (typically 512-dimensional for ArcFace).
///
/// Immutable once produced: the values are only reachable through a slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    values: Vec<f32>,
    /// Model version that produced this descriptor (e.g., "w600k_r50").
    model_version: Option<String>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>, model_version: Option<String>) -> Self {
        Self {
            values,
            model_version,
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two descriptors.
    ///
    /// Symmetric and non-negative. Descriptors of different lengths come from
    /// different models (or a broken one) and are infinitely far apart.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found in one image: where it is and who it looks like.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    pub descriptor: Descriptor,
}

impl Detection {
    pub fn landmarks(&self) -> Option<&[(f32, f32); 5]> {
        self.bounding_box.landmarks.as_ref()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToleranceError {
    #[error("tolerance must be within [0, 1], got {0}")]
    OutOfRange(f32),
}

/// Distance threshold below which two descriptors are the same identity.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Tolerance(f32);

impl Tolerance {
    pub const DEFAULT: Tolerance = Tolerance(0.9);

    pub fn new(value: f32) -> Result<Self, ToleranceError> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ToleranceError::OutOfRange(value))
        }
    }

    /// Clamp an arbitrary value into range. NaN falls back to the default.
    pub fn clamped(value: f32) -> Self {
        if value.is_nan() {
            Self::DEFAULT
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    pub fn get(self) -> f32 {
        self.0
    }

    /// Strict inequality: a distance equal to the tolerance does not match.
    pub fn accepts(self, distance: f32) -> bool {
        distance < self.0
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<f32> for Tolerance {
    type Error = ToleranceError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Tolerance> for f32 {
    fn from(t: Tolerance) -> f32 {
        t.0
    }
}

impl std::fmt::Display for Tolerance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no face descriptors were collected from any reference image")]
pub struct ReferenceSetEmpty;

/// Ordered, non-empty collection of reference descriptors for one run.
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    descriptors: Vec<Descriptor>,
}

impl ReferenceSet {
    pub fn new(descriptors: Vec<Descriptor>) -> Result<Self, ReferenceSetEmpty> {
        if descriptors.is_empty() {
            return Err(ReferenceSetEmpty);
        }
        Ok(Self { descriptors })
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Confidence percentage for a descriptor distance: `(1 - d) * 100`.
pub fn confidence(distance: f32) -> f32 {
    (1.0 - distance) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec(), None)
    }

    #[test]
    fn test_distance_identical() {
        let a = d(&[0.6, 0.8, 0.0]);
        assert!(a.distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_distance_symmetric() {
        let a = d(&[1.0, 0.0, 0.5]);
        let b = d(&[0.0, 1.0, -0.5]);
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn test_distance_known_value() {
        let a = d(&[0.0, 0.0]);
        let b = d(&[3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_non_negative() {
        let a = d(&[-1.0, -2.0]);
        let b = d(&[2.0, 1.0]);
        assert!(a.distance(&b) >= 0.0);
    }

    #[test]
    fn test_distance_length_mismatch_is_infinite() {
        let a = d(&[0.6, 0.8, 0.0, 0.0]);
        assert_eq!(a.distance(&d(&[])), f32::INFINITY);
        assert_eq!(d(&[0.6]).distance(&a), f32::INFINITY);
        assert!(d(&[]).distance(&d(&[])).abs() < 1e-6);
    }

    #[test]
    fn test_tolerance_range() {
        assert!(Tolerance::new(0.0).is_ok());
        assert!(Tolerance::new(1.0).is_ok());
        assert_eq!(Tolerance::new(1.5), Err(ToleranceError::OutOfRange(1.5)));
        assert!(Tolerance::new(-0.1).is_err());
        assert!(Tolerance::new(f32::NAN).is_err());
    }

    #[test]
    fn test_tolerance_clamped() {
        assert_eq!(Tolerance::clamped(2.0).get(), 1.0);
        assert_eq!(Tolerance::clamped(-3.0).get(), 0.0);
        assert_eq!(Tolerance::clamped(f32::NAN), Tolerance::DEFAULT);
    }

    #[test]
    fn test_tolerance_strict_inequality() {
        let t = Tolerance::new(0.5).unwrap();
        assert!(t.accepts(0.49));
        assert!(!t.accepts(0.5));
        assert!(!t.accepts(0.51));
        assert!(!Tolerance::new(0.0).unwrap().accepts(0.0));
    }

    #[test]
    fn test_confidence_monotonic() {
        let samples = [0.0f32, 0.1, 0.3, 0.5, 0.6, 0.9, 1.0];
        for w in samples.windows(2) {
            assert!(confidence(w[0]) > confidence(w[1]));
        }
        assert!((confidence(0.0) - 100.0).abs() < 1e-4);
        assert!(confidence(1.0).abs() < 1e-4);
        assert_eq!(format!("{:.1}", confidence(0.6)), "40.0");
    }

    #[test]
    fn test_reference_set_requires_descriptor() {
        assert_eq!(ReferenceSet::new(vec![]).unwrap_err(), ReferenceSetEmpty);
        let set = ReferenceSet::new(vec![d(&[1.0])]).unwrap();
        assert_eq!(set.len(), 1);
        assert!(!set.is_empty());
    }
}
