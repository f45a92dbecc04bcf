//! QR code encoder

use crate::error::{Error, Result};
use crate::qr::{QrDecoder, RenderStyle};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use qrcode::QrCode;
use std::time::Instant;

/// Largest rendered edge in pixels
const MAX_EDGE: u32 = 16_384;
/// Modules of quiet zone on each side
const QUIET_ZONE_MODULES: u32 = 4;

/// Stateless QR encoder adapter.
///
/// `encode` only reads `self`, so a single instance can be shared by every
/// worker of a batch.
#[derive(Debug, Clone, Default)]
pub struct QrEncoder {
    style: RenderStyle,
    verifier: Option<QrDecoder>,
}

impl QrEncoder {
    /// Create a new QR encoder with the given style
    pub fn new(style: RenderStyle) -> Self {
        Self {
            style,
            verifier: None,
        }
    }

    /// Decode every render back and fail the item when it does not round-trip
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verifier = verify.then(QrDecoder::new);
        self
    }

    /// Rendering style in use
    pub fn style(&self) -> &RenderStyle {
        &self.style
    }

    /// Encode `text` into a styled QR image, optionally stamping `logo` in the centre.
    pub fn encode(&self, text: &str, logo: Option<&RgbaImage>) -> Result<RgbaImage> {
        let code = QrCode::with_error_correction_level(text.as_bytes(), self.style.ecc_level)
            .map_err(|e| Error::encoding(text, e))?;

        let size = self.style.module_size.max(1);
        let quiet = if self.style.quiet_zone { 2 * QUIET_ZONE_MODULES } else { 0 };
        let edge = u32::try_from(code.width())
            .ok()
            .and_then(|modules| modules.checked_add(quiet))
            .and_then(|modules| modules.checked_mul(size))
            .filter(|edge| *edge <= MAX_EDGE);
        if edge.is_none() {
            return Err(Error::encoding(
                text,
                format!("rendered image would exceed {MAX_EDGE} pixels per side at module size {size}"),
            ));
        }

        let mut image = code
            .render::<Rgba<u8>>()
            .dark_color(self.style.dark.to_rgba())
            .light_color(self.style.light.to_rgba())
            .quiet_zone(self.style.quiet_zone)
            .module_dimensions(size, size)
            .build();

        if let Some(logo) = logo {
            overlay_logo(&mut image, logo, &self.style);
        }

        if let Some(verifier) = &self.verifier {
            let decoded = verifier
                .decode(&DynamicImage::ImageRgba8(image.clone()))
                .map_err(|e| Error::encoding(text, format!("render did not verify: {e}")))?;
            if decoded != text {
                return Err(Error::encoding(
                    text,
                    format!("render decoded as '{decoded}'"),
                ));
            }
        }

        tracing::trace!(
            width = image.width(),
            modules = code.width(),
            logo = logo.is_some(),
            "Rendered QR code"
        );

        Ok(image)
    }

    /// Render a throwaway symbol so the first real item does not pay one-off costs.
    pub fn warm_up(&self, logo: Option<&RgbaImage>) -> Result<()> {
        let started = Instant::now();
        self.encode("preload", logo)?;
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Encoder warmed up");
        Ok(())
    }
}

/// Scale `logo` to the configured share of the image width and centre it on a
/// light frame.
fn overlay_logo(image: &mut RgbaImage, logo: &RgbaImage, style: &RenderStyle) {
    if logo.width() == 0 || logo.height() == 0 {
        return;
    }

    let target = (image.width() * style.logo_size_percent.min(100) / 100).max(1);
    let longest = logo.width().max(logo.height());
    let width = (logo.width() * target / longest).max(1);
    let height = (logo.height() * target / longest).max(1);
    let scaled = imageops::resize(logo, width, height, FilterType::Lanczos3);

    let border = style.logo_border;
    let frame_w = (width + 2 * border).min(image.width());
    let frame_h = (height + 2 * border).min(image.height());
    let frame_x = (image.width() - frame_w) / 2;
    let frame_y = (image.height() - frame_h) / 2;
    let light = style.light.to_rgba();
    for y in frame_y..frame_y + frame_h {
        for x in frame_x..frame_x + frame_w {
            image.put_pixel(x, y, light);
        }
    }

    let x = (i64::from(image.width()) - i64::from(width)) / 2;
    let y = (i64::from(image.height()) - i64::from(height)) / 2;
    imageops::overlay(image, &scaled, x, y);
}
