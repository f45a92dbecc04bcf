//! QR code decoder using rqrr

use crate::error::{Error, Result};
use image::{DynamicImage, GrayImage};

/// QR code decoder used to check rendered symbols
#[derive(Debug, Clone, Copy, Default)]
pub struct QrDecoder;

impl QrDecoder {
    /// Create a new QR decoder with default settings
    pub fn new() -> Self {
        Self
    }

    /// Decode the first QR code found in an image
    pub fn decode(&self, img: &DynamicImage) -> Result<String> {
        self.decode_gray(img.to_luma8())
    }

    /// Decode the first QR code found in a grayscale image
    pub fn decode_gray(&self, img: GrayImage) -> Result<String> {
        let mut prepared = rqrr::PreparedImage::prepare(img);
        let grids = prepared.detect_grids();

        let grid = grids
            .first()
            .ok_or_else(|| Error::Decode("no QR code found in image".to_string()))?;

        match grid.decode() {
            Ok((meta, content)) => {
                tracing::trace!(
                    "Decoded QR: version={:?}, ecc_level={:?}, length={}",
                    meta.version,
                    meta.ecc_level,
                    content.len()
                );
                Ok(content)
            }
            Err(e) => Err(Error::Decode(format!("{:?}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_image_has_no_code() {
        let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, image::Luma([255])));
        assert!(matches!(QrDecoder::new().decode(&blank), Err(Error::Decode(_))));
    }
}
