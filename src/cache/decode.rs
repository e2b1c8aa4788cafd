//! Turning fetched bytes into pixels

use crate::error::{SyncError, SyncResult};
use image::DynamicImage;

/// An image ready to be drawn: RGBA8 pixels, row-major
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Size of the pixel buffer in bytes
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Pure `bytes -> image` conversion used by the resource cache.
///
/// Called on the blocking pool, so implementations may do CPU-heavy work.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> SyncResult<DecodedImage>;
}

/// Decodes common raster formats with the `image` crate
#[derive(Debug, Clone)]
pub struct RasterDecoder {
    max_dimension: u32,
}

impl RasterDecoder {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }

    /// Scale down to fit `max_dimension` on both sides, keeping aspect ratio
    fn fit_to_bounds(&self, img: DynamicImage) -> DynamicImage {
        let (orig_width, orig_height) = (img.width(), img.height());
        if orig_width == 0 || orig_height == 0 {
            return img;
        }

        let scale_w = self.max_dimension as f32 / orig_width as f32;
        let scale_h = self.max_dimension as f32 / orig_height as f32;
        let scale = scale_w.min(scale_h).min(1.0); // Don't upscale

        if scale < 1.0 {
            let new_width = ((orig_width as f32 * scale) as u32).max(1);
            let new_height = ((orig_height as f32 * scale) as u32).max(1);
            img.resize(new_width, new_height, image::imageops::FilterType::Triangle)
        } else {
            img
        }
    }
}

impl Default for RasterDecoder {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl ImageDecoder for RasterDecoder {
    fn decode(&self, bytes: &[u8]) -> SyncResult<DecodedImage> {
        let img = image::load_from_memory(bytes).map_err(|e| SyncError::decode(e.to_string()))?;
        let rgba = self.fit_to_bounds(img).to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(DecodedImage::new(width, height, rgba.into_raw()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageOutputFormat, Rgba};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let buffer = ImageBuffer::from_pixel(width, height, Rgba([10u8, 20, 30, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(buffer)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decodes_png() {
        let decoded = RasterDecoder::new(64).decode(&png(4, 3)).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
        assert_eq!(decoded.byte_len(), 4 * 3 * 4);
        assert_eq!(&decoded.pixels()[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_large_images_are_scaled_down() {
        let decoded = RasterDecoder::new(50).decode(&png(200, 100)).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (50, 25));
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let result = RasterDecoder::default().decode(b"definitely not an image");
        assert!(matches!(result, Err(SyncError::Decode { .. })));
    }
}
