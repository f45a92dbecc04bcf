//! QR code rendering
//!
//! This module wraps the external `qrcode` encoder behind a small, stateless
//! adapter ([`QrEncoder`]) and provides the styling knobs the generator needs:
//! colours, module size, error-correction level and an optional centred logo.

mod decoder;
mod encoder;
mod logo;

pub use decoder::QrDecoder;
pub use encoder::QrEncoder;
pub use logo::{Logo, LogoLease, LogoPool};

use crate::error::{Error, Result};
use image::{Rgba, RgbaImage};
use qrcode::EcLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest accepted pixels-per-module setting
pub const MAX_MODULE_SIZE: u32 = 100;

/// Anything that can turn a string into a rendered symbol.
///
/// Implementations are called concurrently from every pipeline worker, so
/// they must not mutate shared state: each call owns its inputs and returns a
/// freshly allocated image.
pub trait SymbolEncoder: Send + Sync {
    /// Render `text`, stamping `logo` in the centre when given.
    fn encode(&self, text: &str, logo: Option<&RgbaImage>) -> Result<RgbaImage>;
}

impl SymbolEncoder for QrEncoder {
    fn encode(&self, text: &str, logo: Option<&RgbaImage>) -> Result<RgbaImage> {
        QrEncoder::encode(self, text, logo)
    }
}

/// An RGBA colour parsed from `#RRGGBB` or `#RRGGBBAA`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QrColor(pub [u8; 4]);

impl QrColor {
    /// Opaque black
    pub const BLACK: QrColor = QrColor([0, 0, 0, 255]);
    /// Opaque white
    pub const WHITE: QrColor = QrColor([255, 255, 255, 255]);
    /// Default dark module colour (deep teal)
    pub const TEAL: QrColor = QrColor([0, 67, 84, 255]);

    /// Parse a hex colour, with or without the leading `#`.
    pub fn parse(value: &str) -> Result<Self> {
        let digits = value.trim().trim_start_matches('#');
        let bytes = hex::decode(digits)?;
        match bytes.as_slice() {
            [r, g, b] => Ok(Self([*r, *g, *b, 255])),
            [r, g, b, a] => Ok(Self([*r, *g, *b, *a])),
            _ => Err(Error::Config(format!(
                "Colour '{value}' must have 6 or 8 hex digits"
            ))),
        }
    }

    /// Pixel value for the `image` crate
    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba(self.0)
    }
}

impl fmt::Display for QrColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{r:02X}{g:02X}{b:02X}")
        } else {
            write!(f, "#{r:02X}{g:02X}{b:02X}{a:02X}")
        }
    }
}

impl FromStr for QrColor {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<String> for QrColor {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<QrColor> for String {
    fn from(color: QrColor) -> Self {
        color.to_string()
    }
}

/// Parse an error-correction level name (`L`, `M`, `Q`, `H`), case-insensitive.
pub fn parse_ecc_level(value: &str) -> Result<EcLevel> {
    match value.trim().to_ascii_uppercase().as_str() {
        "L" => Ok(EcLevel::L),
        "M" => Ok(EcLevel::M),
        "Q" => Ok(EcLevel::Q),
        "H" => Ok(EcLevel::H),
        other => Err(Error::Config(format!(
            "Unknown error-correction level '{other}'. Use L, M, Q or H"
        ))),
    }
}

/// Fully resolved rendering parameters shared by every worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStyle {
    /// Colour of dark modules
    pub dark: QrColor,
    /// Colour of light modules, quiet zone and logo frame
    pub light: QrColor,
    /// Pixels per module edge
    pub module_size: u32,
    /// Draw the 4-module quiet zone around the symbol
    pub quiet_zone: bool,
    /// Error-correction level
    pub ecc_level: EcLevel,
    /// Logo edge length as a percentage of the rendered image width
    pub logo_size_percent: u32,
    /// Light frame drawn around the logo, in pixels
    pub logo_border: u32,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            dark: QrColor::TEAL,
            light: QrColor::WHITE,
            module_size: 10,
            quiet_zone: true,
            // High correction leaves room for the logo overlay
            ecc_level: EcLevel::H,
            logo_size_percent: 23,
            logo_border: 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rgb_colour() {
        let color = QrColor::parse("#004354").unwrap();
        assert_eq!(color, QrColor::TEAL);
        assert_eq!(color.to_string(), "#004354");
    }

    #[test]
    fn test_parse_rgba_colour_without_hash() {
        let color = QrColor::parse("ff000080").unwrap();
        assert_eq!(color.0, [255, 0, 0, 128]);
        assert_eq!(color.to_string(), "#FF000080");
    }

    #[test]
    fn test_reject_bad_colours() {
        assert!(QrColor::parse("#12345").is_err());
        assert!(QrColor::parse("#1234").is_err());
        assert!(QrColor::parse("zzzzzz").is_err());
    }

    #[test]
    fn test_parse_ecc_level() {
        assert_eq!(parse_ecc_level("h").unwrap(), EcLevel::H);
        assert_eq!(parse_ecc_level(" M ").unwrap(), EcLevel::M);
        assert!(parse_ecc_level("X").is_err());
    }
}
