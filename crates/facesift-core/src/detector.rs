//! SCRFD face detection via ONNX Runtime.
//!
//! The photo is letterboxed into a square network input, the three stride
//! heads (8, 16, 32) are decoded into boxes with five landmarks each, and
//! overlapping boxes are merged by non-maximum suppression.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;

const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unsupported SCRFD model: {0}")]
    UnsupportedModel(String),
    #[error("unexpected model output: {0}")]
    BadOutput(String),
    #[error("image has zero width or height")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detector accuracy trade-off.
///
/// Both modes run the same weights; `Fast` feeds a quarter of the pixels and
/// misses small faces in group shots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorMode {
    #[default]
    Accurate,
    Fast,
}

impl DetectorMode {
    /// Side of the square network input, in pixels.
    pub fn input_size(self) -> usize {
        match self {
            DetectorMode::Accurate => 640,
            DetectorMode::Fast => 320,
        }
    }
}

/// Scale-and-pad placement of a photo inside the square network input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, size: usize) -> Self {
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let scaled_w = ((width as f32 * scale).round() as u32).clamp(1, size as u32);
        let scaled_h = ((height as f32 * scale).round() as u32).clamp(1, size as u32);
        Self {
            scale,
            width: scaled_w,
            height: scaled_h,
            pad_x: (size as u32 - scaled_w) / 2,
            pad_y: (size as u32 - scaled_h) / 2,
        }
    }

    /// Network-input coordinates back to photo coordinates.
    fn to_image(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Where one stride's score, box and landmark tensors sit in the model outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeadLayout {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Map each stride to its output tensors.
///
/// Exports name them `score_8`, `bbox_16`, `kps_32` and so on; anonymous
/// exports use the reference order of all scores, then boxes, then landmarks.
fn locate_heads(names: &[String]) -> [HeadLayout; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let by_name = |stride: usize| -> Option<HeadLayout> {
        Some(HeadLayout {
            score: position("score", stride)?,
            bbox: position("bbox", stride)?,
            kps: position("kps", stride)?,
        })
    };

    match (by_name(STRIDES[0]), by_name(STRIDES[1]), by_name(STRIDES[2])) {
        (Some(s8), Some(s16), Some(s32)) => [s8, s16, s32],
        _ => {
            tracing::debug!(?names, "SCRFD outputs unnamed, assuming reference order");
            [0, 1, 2].map(|i| HeadLayout {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

/// Raw tensors of one stride head.
struct HeadOutputs<'a> {
    stride: usize,
    scores: &'a [f32],
    boxes: &'a [f32],
    keypoints: &'a [f32],
}

impl HeadOutputs<'_> {
    /// Boxes scoring above `threshold`, in photo coordinates.
    fn decode(&self, input_size: usize, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
        let cells_per_row = input_size / self.stride;
        let anchors = cells_per_row * cells_per_row * ANCHORS_PER_CELL;
        let stride = self.stride as f32;

        (0..anchors.min(self.scores.len()))
            .filter(|&i| self.scores[i] > threshold)
            .filter_map(|i| {
                let cell = i / ANCHORS_PER_CELL;
                let cx = (cell % cells_per_row) as f32 * stride;
                let cy = (cell / cells_per_row) as f32 * stride;

                let d = self.boxes.get(i * 4..i * 4 + 4)?;
                let (x1, y1) = letterbox.to_image(cx - d[0] * stride, cy - d[1] * stride);
                let (x2, y2) = letterbox.to_image(cx + d[2] * stride, cy + d[3] * stride);

                let landmarks = self.keypoints.get(i * 10..i * 10 + 10).map(|k| {
                    let mut points = [(0.0f32, 0.0f32); 5];
                    for (point, offset) in points.iter_mut().zip(k.chunks_exact(2)) {
                        *point = letterbox.to_image(cx + offset[0] * stride, cy + offset[1] * stride);
                    }
                    points
                });

                Some(BoundingBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                    confidence: self.scores[i],
                    landmarks,
                })
            })
            .collect()
    }
}

pub struct FaceDetector {
    session: Session,
    mode: DetectorMode,
    heads: [HeadLayout; 3],
}

impl FaceDetector {
    /// Load the SCRFD model; the detector starts in [`DetectorMode::Accurate`].
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 9 {
            return Err(DetectorError::UnsupportedModel(format!(
                "expected 9 outputs (score, bbox, kps per stride), found {}",
                names.len()
            )));
        }

        let heads = locate_heads(&names);
        tracing::info!(path = model_path, ?heads, "loaded SCRFD model");

        Ok(Self {
            session,
            mode: DetectorMode::default(),
            heads,
        })
    }

    pub fn mode(&self) -> DetectorMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: DetectorMode) {
        self.mode = mode;
    }

    /// Faces in `image`, most confident first, in `image` pixel coordinates.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectorError::EmptyImage);
        }

        let size = self.mode.input_size();
        let letterbox = Letterbox::fit(width, height, size);
        let input = to_input_tensor(image, &letterbox, size);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let tensor = |index: usize, what: &str, stride: usize| {
            outputs[index]
                .try_extract_tensor::<f32>()
                .map(|(_, data)| data)
                .map_err(|e| DetectorError::BadOutput(format!("{what} for stride {stride}: {e}")))
        };

        let mut candidates = Vec::new();
        for (&stride, layout) in STRIDES.iter().zip(&self.heads) {
            let head = HeadOutputs {
                stride,
                scores: tensor(layout.score, "scores", stride)?,
                boxes: tensor(layout.bbox, "boxes", stride)?,
                keypoints: tensor(layout.kps, "landmarks", stride)?,
            };
            candidates.extend(head.decode(size, &letterbox, SCORE_THRESHOLD));
        }

        let faces = non_max_suppression(candidates, NMS_IOU_THRESHOLD);
        tracing::debug!(width, height, size, faces = faces.len(), "SCRFD pass");
        Ok(faces)
    }
}

/// Resize into the letterbox and pad with the mean (which normalizes to zero).
/// Channels stay in RGB order.
fn to_input_tensor(image: &RgbImage, letterbox: &Letterbox, size: usize) -> Array4<f32> {
    let scaled = imageops::resize(image, letterbox.width, letterbox.height, FilterType::Triangle);
    let (left, top) = (letterbox.pad_x as usize, letterbox.pad_y as usize);

    Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        let pixel = match (x.checked_sub(left), y.checked_sub(top)) {
            (Some(sx), Some(sy)) => scaled
                .get_pixel_checked(sx as u32, sy as u32)
                .map_or(PIXEL_MEAN, |p| p[c] as f32),
            _ => PIXEL_MEAN,
        };
        (pixel - PIXEL_MEAN) / PIXEL_STD
    })
}

fn by_confidence(a: &BoundingBox, b: &BoundingBox) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
}

/// Greedy NMS: keep the most confident box, drop everything overlapping it
/// by more than `iou_threshold`, repeat. Output is sorted by confidence.
fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(by_confidence);
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let overlap_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let overlap_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let overlap = overlap_w * overlap_h;
    let union = a.width * a.height + b.width * b.height - overlap;
    if union > 0.0 {
        overlap / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn bbox(x: f32, y: f32, size: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: size,
            height: size,
            confidence,
            landmarks: None,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &bbox(20.0, 20.0, 10.0, 1.0)), 0.0);
        // 5×10 overlap over a 150 union.
        let half = BoundingBox { x: 5.0, ..a.clone() };
        assert!((iou(&a, &half) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_merges_overlaps_and_sorts() {
        let kept = non_max_suppression(
            vec![
                bbox(200.0, 200.0, 50.0, 0.7),
                bbox(5.0, 5.0, 100.0, 0.8),
                bbox(0.0, 0.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confidences: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_keeps_disjoint_boxes() {
        let kept = non_max_suppression(
            vec![bbox(0.0, 0.0, 10.0, 0.6), bbox(50.0, 50.0, 10.0, 0.8)],
            0.4,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.8);
        assert!(non_max_suppression(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_landscape() {
        let lb = Letterbox::fit(320, 240, 640);
        assert_eq!((lb.width, lb.height), (640, 480));
        assert_eq!((lb.pad_x, lb.pad_y), (0, 80));

        let (x, y) = lb.to_image(100.0 * lb.scale, 50.0 * lb.scale + 80.0);
        assert!((x - 100.0).abs() < 1e-3 && (y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_letterbox_tall_thin_image_keeps_one_pixel() {
        let lb = Letterbox::fit(1, 5000, 320);
        assert_eq!(lb.width, 1);
        assert_eq!(lb.height, 320);
    }

    #[test]
    fn test_locate_heads_named_in_any_order() {
        let heads = locate_heads(&names(&[
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]));
        assert_eq!(heads[0], HeadLayout { score: 2, bbox: 0, kps: 1 });
        assert_eq!(heads[2], HeadLayout { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_locate_heads_falls_back_to_reference_order() {
        let numeric: Vec<String> = (0..9).map(|i: usize| (428 + i).to_string()).collect();
        let heads = locate_heads(&numeric);
        assert_eq!(heads[1], HeadLayout { score: 1, bbox: 4, kps: 7 });

        // One missing name is enough to fall back.
        let partial = locate_heads(&names(&[
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32", "kps_8", "kps_16",
            "landmarks_32",
        ]));
        assert_eq!(partial[2], HeadLayout { score: 2, bbox: 5, kps: 8 });
    }

    #[test]
    fn test_decode_single_anchor() {
        // 32×32 input at stride 16: a 2×2 grid, 8 anchors.
        let mut scores = vec![0.0f32; 8];
        let mut boxes = vec![0.0f32; 32];
        let mut keypoints = vec![0.0f32; 80];
        // Anchor 3 sits in cell 1 (x=16, y=0).
        scores[3] = 0.9;
        boxes[12..16].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);
        keypoints[30..32].copy_from_slice(&[0.25, 0.5]);

        let head = HeadOutputs {
            stride: 16,
            scores: &scores,
            boxes: &boxes,
            keypoints: &keypoints,
        };
        let identity = Letterbox {
            scale: 1.0,
            width: 32,
            height: 32,
            pad_x: 0,
            pad_y: 0,
        };
        let faces = head.decode(32, &identity, 0.5);

        assert_eq!(faces.len(), 1);
        let face = &faces[0];
        assert_eq!((face.x, face.y, face.width, face.height), (8.0, 0.0, 16.0, 16.0));
        assert_eq!(face.landmarks.unwrap()[0], (20.0, 8.0));
    }

    #[test]
    fn test_decode_ignores_truncated_tensors() {
        let scores = vec![0.9f32; 8];
        let head = HeadOutputs {
            stride: 16,
            scores: &scores,
            boxes: &[0.0; 4],
            keypoints: &[],
        };
        let identity = Letterbox::fit(32, 32, 32);
        let faces = head.decode(32, &identity, 0.5);
        assert_eq!(faces.len(), 1);
        assert!(faces[0].landmarks.is_none());
    }

    #[test]
    fn test_input_tensor_padding_is_zero() {
        let image = RgbImage::from_pixel(64, 32, Rgb([255u8, 0, 128]));
        let lb = Letterbox::fit(64, 32, 64);
        let tensor = to_input_tensor(&image, &lb, 64);
        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        // Rows 0..16 are padding, rows 16..48 hold the image.
        for c in 0..3 {
            assert_eq!(tensor[[0, c, 0, 10]], 0.0);
        }
        let norm = |v: f32| (v - PIXEL_MEAN) / PIXEL_STD;
        assert!((tensor[[0, 0, 32, 10]] - norm(255.0)).abs() < 1e-6);
        assert!((tensor[[0, 1, 32, 10]] - norm(0.0)).abs() < 1e-6);
        assert!((tensor[[0, 2, 32, 10]] - norm(128.0)).abs() < 1e-6);
    }

    #[test]
    fn test_detector_mode_input_sizes() {
        assert_eq!(DetectorMode::default(), DetectorMode::Accurate);
        assert_eq!(DetectorMode::Accurate.input_size(), 640);
        assert_eq!(DetectorMode::Fast.input_size(), 320);
        for stride in STRIDES {
            assert_eq!(DetectorMode::Fast.input_size() % stride, 0);
        }
    }

    #[test]
    fn test_missing_model() {
        let err = FaceDetector::load("/nonexistent/det_10g.onnx").err().unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }
}
