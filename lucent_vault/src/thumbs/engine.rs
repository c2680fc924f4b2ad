//! Lucent Vault - Thumbnail Engine
//!
//! Renders square JPEG thumbnails from imported images. Runs on plaintext
//! only inside the import path; the output is sealed before it reaches disk.

use std::io::Cursor;

use image::{imageops::FilterType, DynamicImage, GenericImageView};

use crate::error::{VaultError, VaultResult};
use crate::model::Dimensions;

/// A rendered thumbnail plus what was learned from decoding the source
#[derive(Debug, Clone)]
pub struct RenderedThumbnail {
    pub jpeg: Vec<u8>,
    pub source_dimensions: Dimensions,
}

/// Thumbnail Engine
pub struct ThumbnailEngine {
    /// Thumbnail edge (square)
    size: u32,
}

impl ThumbnailEngine {
    pub fn new(size: u32) -> Self {
        Self { size: size.max(1) }
    }

    /// Decode `image_data` and render a thumbnail
    pub fn render(&self, image_data: &[u8]) -> VaultResult<RenderedThumbnail> {
        let img = image::load_from_memory(image_data)
            .map_err(|e| VaultError::ThumbnailFailed(e.to_string()))?;
        let (width, height) = img.dimensions();

        let thumb = self.resize_to_thumbnail(&img);

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(thumb.to_rgb8());
        let mut jpeg = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .map_err(|e| VaultError::ThumbnailFailed(e.to_string()))?;

        Ok(RenderedThumbnail {
            jpeg,
            source_dimensions: Dimensions { width, height },
        })
    }

    /// Center-crop to a square, then resize
    fn resize_to_thumbnail(&self, img: &DynamicImage) -> DynamicImage {
        let (width, height) = img.dimensions();

        let (crop_x, crop_y, crop_size) = if width > height {
            ((width - height) / 2, 0, height)
        } else {
            (0, (height - width) / 2, width)
        };

        let cropped = img.crop_imm(crop_x, crop_y, crop_size, crop_size);
        cropped.resize_exact(self.size, self.size, FilterType::Lanczos3)
    }
}
