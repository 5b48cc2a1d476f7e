//! In-memory image files: the unit every stage of the pipeline passes around.

use image::{DynamicImage, ImageReader, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageFileError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: image::ImageError,
    },
}

/// An encoded image (JPEG, PNG, ...) with the file name it was selected under.
///
/// The bytes are shared, so clones are cheap and a match record can hold on
/// to the artifact without copying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    name: String,
    data: Arc<[u8]>,
}

impl ImageFile {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Read a file from disk, naming it after the final path component.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ImageFileError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| ImageFileError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, data))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same bytes under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Arc::clone(&self.data),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode, guessing the format from the content rather than the name.
    pub fn decode(&self) -> Result<DynamicImage, ImageFileError> {
        ImageReader::new(Cursor::new(self.bytes()))
            .with_guessed_format()
            .map_err(|e| ImageFileError::Decode {
                name: self.name.clone(),
                source: image::ImageError::IoError(e),
            })?
            .decode()
            .map_err(|source| ImageFileError::Decode {
                name: self.name.clone(),
                source,
            })
    }

    pub fn decode_rgb(&self) -> Result<RgbImage, ImageFileError> {
        Ok(self.decode()?.into_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let file = ImageFile::new("a.png", png_bytes(4, 3));
        let rgb = file.decode_rgb().unwrap();
        assert_eq!(rgb.dimensions(), (4, 3));
        assert_eq!(rgb.get_pixel(0, 0).0, [200, 100, 50]);
    }

    #[test]
    fn test_gray_source_decodes_to_equal_channels() {
        let gray = image::GrayImage::from_pixel(2, 2, image::Luma([90]));
        let mut out = Cursor::new(Vec::new());
        gray.write_to(&mut out, ImageFormat::Png).unwrap();

        let rgb = ImageFile::new("ir.png", out.into_inner()).decode_rgb().unwrap();
        assert_eq!(rgb.get_pixel(1, 1).0, [90, 90, 90]);
    }

    #[test]
    fn test_decode_ignores_misleading_name() {
        let file = ImageFile::new("photo.jpg", png_bytes(2, 2));
        assert!(file.decode().is_ok());
    }

    #[test]
    fn test_decode_garbage_fails_with_name() {
        let file = ImageFile::new("broken.jpg", b"not an image".to_vec());
        let err = file.decode().unwrap_err();
        assert!(err.to_string().contains("broken.jpg"), "{err}");
    }

    #[test]
    fn test_clone_shares_bytes() {
        let file = ImageFile::new("a.png", png_bytes(1, 1));
        let copy = file.clone();
        assert_eq!(file, copy);
        assert!(std::ptr::eq(file.bytes().as_ptr(), copy.bytes().as_ptr()));
    }

    #[test]
    fn test_renamed_keeps_bytes() {
        let a = ImageFile::new("a.jpg", vec![9u8, 8, 7]);
        let b = a.renamed("enhanced_a.jpg");
        assert_eq!(b.name(), "enhanced_a.jpg");
        assert_eq!(b.bytes(), a.bytes());
        assert_eq!(a.name(), "a.jpg");
    }

    #[test]
    fn test_load_missing_file() {
        let err = ImageFile::load("/nonexistent/facesift/nothing.png").unwrap_err();
        assert!(matches!(err, ImageFileError::Read { .. }));
    }
}
