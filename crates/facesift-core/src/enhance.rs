//! Photo enhancement for matched images: tone, saturation, sharpening, CLAHE.
//!
//! Enhancement is cosmetic. Callers treat any error as "keep the original".

use crate::image_file::{ImageFile, ImageFileError};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONTRAST_FACTOR: f32 = 1.15;
const BRIGHTNESS_OFFSET: f32 = 15.0;
const SATURATION_FACTOR: f32 = 1.2;
const SHARPEN_SIGMA: f32 = 1.0;
const SHARPEN_THRESHOLD: i32 = 2;
const CLAHE_TILES: u32 = 8;
const CLAHE_CLIP_LIMIT: f32 = 0.02;
const JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum EnhanceError {
    #[error(transparent)]
    Decode(#[from] ImageFileError),
    #[error("failed to encode enhanced image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Post-processing applied to a matched image.
pub trait Enhancer {
    /// Produce an enhanced copy of `image` under the same name.
    fn enhance(&self, image: &ImageFile) -> Result<ImageFile, EnhanceError>;
}

/// Which filters [`ToneEnhancer`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhanceOptions {
    pub brightness: bool,
    pub contrast: bool,
    pub saturation: bool,
    pub sharpen: bool,
    /// Contrast-limited adaptive histogram equalization on luma.
    pub local_contrast: bool,
}

impl Default for EnhanceOptions {
    fn default() -> Self {
        Self {
            brightness: true,
            contrast: true,
            saturation: true,
            sharpen: true,
            local_contrast: false,
        }
    }
}

/// Global tone adjustments plus optional sharpening, re-encoded as JPEG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToneEnhancer {
    pub options: EnhanceOptions,
}

impl ToneEnhancer {
    pub fn new(options: EnhanceOptions) -> Self {
        Self { options }
    }

    /// Apply the configured filters to decoded pixels.
    pub fn apply(&self, mut rgb: RgbImage) -> RgbImage {
        let opts = self.options;
        let contrast = if opts.contrast { CONTRAST_FACTOR } else { 1.0 };
        let brightness = if opts.brightness { BRIGHTNESS_OFFSET } else { 0.0 };

        if opts.contrast || opts.brightness || opts.saturation {
            for pixel in rgb.pixels_mut() {
                let mut c = pixel.0.map(|v| (v as f32 - 128.0) * contrast + 128.0 + brightness);
                if opts.saturation {
                    let gray = luma(c);
                    c = c.map(|v| gray + SATURATION_FACTOR * (v - gray));
                }
                pixel.0 = c.map(|v| v.round().clamp(0.0, 255.0) as u8);
            }
        }

        if opts.local_contrast {
            equalize_luma(&mut rgb);
        }

        if opts.sharpen {
            rgb = imageops::unsharpen(&rgb, SHARPEN_SIGMA, SHARPEN_THRESHOLD);
        }

        rgb
    }
}

impl Enhancer for ToneEnhancer {
    fn enhance(&self, image: &ImageFile) -> Result<ImageFile, EnhanceError> {
        let rgb = self.apply(image.decode_rgb()?);

        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY).encode_image(&rgb)?;

        tracing::debug!(
            image = image.name(),
            original_bytes = image.len(),
            enhanced_bytes = encoded.len(),
            "enhanced image"
        );
        Ok(ImageFile::new(image.name(), encoded))
    }
}

/// Rec.601 luma of an RGB triple.
fn luma(c: [f32; 3]) -> f32 {
    0.2989 * c[0] + 0.5870 * c[1] + 0.1140 * c[2]
}

/// Run CLAHE on the luma channel and rescale each pixel's RGB by the luma gain.
fn equalize_luma(rgb: &mut RgbImage) {
    let before = GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let c = rgb.get_pixel(x, y).0.map(f32::from);
        Luma([luma(c).round().clamp(0.0, 255.0) as u8])
    });
    let Some(curves) = TileCurves::build(&before, CLAHE_TILES, CLAHE_CLIP_LIMIT) else {
        return;
    };

    for (x, y, pixel) in rgb.enumerate_pixels_mut() {
        let old = before.get_pixel(x, y)[0];
        let new = curves.map(x, y, old);
        pixel.0 = if old == 0 {
            [new; 3]
        } else {
            let gain = new as f32 / old as f32;
            pixel.0.map(|v| (v as f32 * gain).round().clamp(0.0, 255.0) as u8)
        };
    }
}

/// Per-tile tone curves for contrast-limited adaptive histogram equalization.
struct TileCurves {
    tiles: u32,
    tile_w: u32,
    tile_h: u32,
    /// Row-major, `tiles * tiles` entries.
    curves: Vec<[f32; 256]>,
}

impl TileCurves {
    /// `None` when the image is smaller than the tile grid.
    fn build(gray: &GrayImage, tiles: u32, clip_limit: f32) -> Option<Self> {
        let tile_w = gray.width() / tiles;
        let tile_h = gray.height() / tiles;
        if tiles == 0 || tile_w == 0 || tile_h == 0 {
            return None;
        }

        let curves = (0..tiles * tiles)
            .map(|i| {
                let (col, row) = (i % tiles, i / tiles);
                let mut histogram = [0u32; 256];
                for y in row * tile_h..(row + 1) * tile_h {
                    for x in col * tile_w..(col + 1) * tile_w {
                        histogram[gray.get_pixel(x, y)[0] as usize] += 1;
                    }
                }
                equalization_curve(histogram, tile_w * tile_h, clip_limit)
            })
            .collect();

        Some(Self {
            tiles,
            tile_w,
            tile_h,
            curves,
        })
    }

    fn curve(&self, col: u32, row: u32) -> &[f32; 256] {
        &self.curves[(row * self.tiles + col) as usize]
    }

    /// Blend the curves of the four tiles around `(x, y)`.
    fn map(&self, x: u32, y: u32, value: u8) -> u8 {
        let last = (self.tiles - 1) as f32;
        let gx = (x as f32 / self.tile_w as f32 - 0.5).clamp(0.0, last);
        let gy = (y as f32 / self.tile_h as f32 - 0.5).clamp(0.0, last);
        let (c0, r0) = (gx as u32, gy as u32);
        let (c1, r1) = ((c0 + 1).min(self.tiles - 1), (r0 + 1).min(self.tiles - 1));
        let (fx, fy) = (gx - c0 as f32, gy - r0 as f32);

        let v = value as usize;
        let top = self.curve(c0, r0)[v] * (1.0 - fx) + self.curve(c1, r0)[v] * fx;
        let bottom = self.curve(c0, r1)[v] * (1.0 - fx) + self.curve(c1, r1)[v] * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }
}

/// Clip the histogram, spread the clipped mass over all bins and turn the
/// cumulative distribution into a 0..=255 curve.
fn equalization_curve(mut histogram: [u32; 256], pixels: u32, clip_limit: f32) -> [f32; 256] {
    let clip = ((clip_limit * pixels as f32) as u32).max(1);
    let excess: u32 = histogram.iter().map(|&n| n.saturating_sub(clip)).sum();
    let (share, remainder) = (excess / 256, (excess % 256) as usize);
    for (i, bin) in histogram.iter_mut().enumerate() {
        *bin = (*bin).min(clip) + share + u32::from(i < remainder);
    }

    let mut curve = [0f32; 256];
    let mut total = 0u32;
    for (slot, &n) in curve.iter_mut().zip(&histogram) {
        total += n;
        *slot = total as f32;
    }

    let floor = curve.iter().copied().find(|&v| v > 0.0).unwrap_or(0.0);
    let range = pixels as f32 - floor;
    if range > 0.0 {
        curve
            .iter_mut()
            .for_each(|v| *v = ((*v - floor) / range * 255.0).clamp(0.0, 255.0));
    }
    curve
}
