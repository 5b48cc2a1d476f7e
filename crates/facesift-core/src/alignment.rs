//! Face alignment onto the canonical ArcFace crop.
//!
//! The five detected landmarks are mapped onto the InsightFace reference
//! positions by a least-squares similarity transform (uniform scale, rotation
//! and translation); the crop is then resampled through its inverse.

use image::{Rgb, RgbImage};

/// Side of the square crop the recognizer expects.
pub const ALIGNED_SIZE: u32 = 112;

/// InsightFace landmark layout for a 112×112 crop: eyes, nose tip, mouth corners.
const ARCFACE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// `(x, y) -> (a·x − b·y + tx, b·x + a·y + ty)`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    const IDENTITY: Similarity = Similarity {
        a: 1.0,
        b: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Closed-form least-squares fit from `src` onto `dst`.
    ///
    /// With both point sets centred, the optimal `a` and `b` are the dot and
    /// cross products of the centred pairs over the source spread.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let (src_cx, src_cy) = centroid(src);
        let (dst_cx, dst_cy) = centroid(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut spread = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy) = (sx - src_cx, sy - src_cy);
            let (dx, dy) = (dx - dst_cx, dy - dst_cy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            spread += sx * sx + sy * sy;
        }
        if spread < 1e-6 {
            return None;
        }

        let a = dot / spread;
        let b = cross / spread;
        Some(Self {
            a,
            b,
            tx: dst_cx - (a * src_cx - b * src_cy),
            ty: dst_cy - (b * src_cx + a * src_cy),
        })
    }

    fn scale(&self) -> f32 {
        self.a.hypot(self.b)
    }

    /// Map a destination point back into the source image.
    fn invert(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (self.a * dy - self.b * dx) / det,
        ))
    }
}

fn centroid(points: &[(f32, f32); 5]) -> (f32, f32) {
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
    (sx / 5.0, sy / 5.0)
}

/// Bilinear sample of all three channels; pixels outside the image read as black.
fn sample(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let at = |px: i64, py: i64| -> [f32; 3] {
        if (0..w).contains(&px) && (0..h).contains(&py) {
            image.get_pixel(px as u32, py as u32).0.map(f32::from)
        } else {
            [0.0; 3]
        }
    };

    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let corners = [
        (at(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (at(x0 + 1, y0), fx * (1.0 - fy)),
        (at(x0, y0 + 1), (1.0 - fx) * fy),
        (at(x0 + 1, y0 + 1), fx * fy),
    ];
    let mut out = [0.0f32; 3];
    for (pixel, weight) in corners {
        for (channel, value) in out.iter_mut().zip(pixel) {
            *channel += value * weight;
        }
    }
    out
}

fn warp(image: &RgbImage, transform: &Similarity, size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| {
        let value = transform
            .invert(x as f32, y as f32)
            .map(|(sx, sy)| sample(image, sx, sy))
            .unwrap_or([0.0; 3]);
        Rgb(value.map(|v| v.round().clamp(0.0, 255.0) as u8))
    })
}

/// Crop and align the face whose landmarks are given, returning an
/// `ALIGNED_SIZE`×`ALIGNED_SIZE` color image.
///
/// Degenerate landmarks (all on one point) fall back to an untransformed crop
/// of the top-left corner.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::fit(landmarks, &ARCFACE_LANDMARKS).unwrap_or_else(|| {
        tracing::debug!("degenerate landmarks, skipping alignment");
        Similarity::IDENTITY
    });
    warp(image, &transform, ALIGNED_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_fit_identity() {
        let t = Similarity::fit(&ARCFACE_LANDMARKS, &ARCFACE_LANDMARKS).unwrap();
        assert!(close(t.a, 1.0, 1e-4), "{t:?}");
        assert!(close(t.b, 0.0, 1e-4), "{t:?}");
        assert!(close(t.tx, 0.0, 1e-3), "{t:?}");
        assert!(close(t.ty, 0.0, 1e-3), "{t:?}");
    }

    #[test]
    fn test_fit_recovers_scale_and_offset() {
        // Landmarks twice as far apart and shifted: the fit must halve them.
        let src = ARCFACE_LANDMARKS.map(|(x, y)| (x * 2.0 + 30.0, y * 2.0 - 10.0));
        let t = Similarity::fit(&src, &ARCFACE_LANDMARKS).unwrap();
        assert!(close(t.scale(), 0.5, 1e-3), "scale {}", t.scale());
        assert!(close(t.b, 0.0, 1e-4));
        assert!(close(t.tx, -15.0, 1e-2), "tx {}", t.tx);
        assert!(close(t.ty, 5.0, 1e-2), "ty {}", t.ty);
    }

    #[test]
    fn test_fit_recovers_rotation() {
        // Rotate the reference layout by 90° about the origin.
        let src = ARCFACE_LANDMARKS.map(|(x, y)| (-y, x));
        let t = Similarity::fit(&src, &ARCFACE_LANDMARKS).unwrap();
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(&ARCFACE_LANDMARKS) {
            let mx = t.a * sx - t.b * sy + t.tx;
            let my = t.b * sx + t.a * sy + t.ty;
            assert!(close(mx, dx, 1e-2) && close(my, dy, 1e-2), "({mx}, {my}) vs ({dx}, {dy})");
        }
    }

    #[test]
    fn test_fit_rejects_collapsed_landmarks() {
        assert!(Similarity::fit(&[(10.0, 10.0); 5], &ARCFACE_LANDMARKS).is_none());
    }

    #[test]
    fn test_invert_round_trip() {
        let t = Similarity {
            a: 0.8,
            b: 0.3,
            tx: 4.0,
            ty: -7.0,
        };
        let (x, y) = (21.0, 42.0);
        let fx = t.a * x - t.b * y + t.tx;
        let fy = t.b * x + t.a * y + t.ty;
        let (bx, by) = t.invert(fx, fy).unwrap();
        assert!(close(bx, x, 1e-3) && close(by, y, 1e-3));
    }

    #[test]
    fn test_sample_interpolates_and_pads_black() {
        let image = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([0, 40, 10])
            } else {
                Rgb([200, 40, 30])
            }
        });
        let mid = sample(&image, 0.5, 0.0);
        assert!(close(mid[0], 100.0, 1e-3) && close(mid[1], 40.0, 1e-3) && close(mid[2], 20.0, 1e-3));
        assert_eq!(sample(&image, -5.0, 0.0), [0.0; 3]);
        assert_eq!(sample(&image, 1.0, 0.0), [200.0, 40.0, 30.0]);
    }

    #[test]
    fn test_output_size() {
        let image = RgbImage::from_pixel(640, 480, Rgb([128u8, 64, 32]));
        let aligned = align_face(&image, &ARCFACE_LANDMARKS);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
    }

    #[test]
    fn test_reference_landmarks_leave_image_unchanged() {
        let image = RgbImage::from_fn(112, 112, |x, _| Rgb([(x * 2) as u8, 7, 255 - (x * 2) as u8]));
        let aligned = align_face(&image, &ARCFACE_LANDMARKS);
        for x in [10u32, 56, 100] {
            let [r, g, b] = aligned.get_pixel(x, 60).0.map(i32::from);
            assert!((r - (x as i32 * 2)).abs() <= 2, "x={x} r={r}");
            assert!((g - 7).abs() <= 1, "x={x} g={g}");
            assert!((b - (255 - x as i32 * 2)).abs() <= 2, "x={x} b={b}");
        }
    }

    #[test]
    fn test_eye_patch_lands_on_reference_eye() {
        let landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        // 5×5 red patch on the left eye survives interpolation.
        let image = RgbImage::from_fn(200, 200, |x, y| {
            let near = (x as i32 - 80).abs() <= 2 && (y as i32 - 60).abs() <= 2;
            Rgb(if near { [255, 0, 0] } else { [0, 0, 0] })
        });

        let aligned = align_face(&image, &landmarks);

        let (ex, ey) = ARCFACE_LANDMARKS[0];
        let (ex, ey) = (ex.round() as u32, ey.round() as u32);
        let patch: Vec<[u8; 3]> = (ey - 1..=ey + 1)
            .flat_map(|y| (ex - 1..=ex + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y).0)
            .collect();
        let reddest = patch.iter().map(|p| p[0]).max().unwrap_or(0);
        assert!(reddest > 100, "left eye at ({ex}, {ey}) is {reddest}");
        assert!(patch.iter().all(|p| p[1] == 0 && p[2] == 0));
    }
}
