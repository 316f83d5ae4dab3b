//! RGB ↔ CIE Lab conversion and perceptual distance
//!
//! Conversions go through `palette` (sRGB gamma decode, D65 XYZ, CIE Lab)
//! in `f64`. Distance is plain CIE76: it is evaluated O(n²) times per call,
//! so no CIE94/CIEDE2000 weighting.

use palette::{FromColor, Hsv, Lab, Srgb, encoding, white_point::D65};
use serde::{Deserialize, Serialize};

use crate::{PaletteError, Result};

/// Chroma at which saturation and contrast scores saturate.
pub const CHROMA_SCALE: f64 = 80.0;

/// An 8-bit sRGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Clear the low `bits` of every channel.
    pub fn quantize(self, bits: u8) -> Self {
        if bits == 0 {
            return self;
        }
        let mask = 0xFFu8 << bits.min(7);
        Self::new(self.r & mask, self.g & mask, self.b & mask)
    }

    pub fn to_lab(self) -> LabColor {
        to_lab(self)
    }

    /// HSV hue in degrees, `[0, 360)`. Achromatic colors report 0.
    pub fn hue(self) -> f64 {
        let hsv = Hsv::<encoding::Srgb, f64>::from_color(self.to_srgb_f64());
        hsv.hue.into_positive_degrees()
    }

    /// `#RRGGBB`
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Parse `RRGGBB` with or without a leading `#`.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(PaletteError::invalid_parameter("hex", hex));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| PaletteError::invalid_parameter("hex", hex))
        };
        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    fn to_srgb_f64(self) -> Srgb<f64> {
        Srgb::new(self.r, self.g, self.b).into_format()
    }
}

impl From<Srgb<u8>> for Rgb {
    fn from(c: Srgb<u8>) -> Self {
        Self::new(c.red, c.green, c.blue)
    }
}

impl From<Rgb> for Srgb<u8> {
    fn from(c: Rgb) -> Self {
        Srgb::new(c.r, c.g, c.b)
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self::new(r, g, b)
    }
}

/// A CIE Lab color together with the 8-bit triple it stands for.
///
/// For colors built from RGB, `rgb` is the originating triple. For colors
/// built from Lab components (e.g. merged averages), it is the clamped
/// round-trip back to sRGB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabColor {
    pub l: f64,
    pub a: f64,
    pub b: f64,
    pub rgb: Rgb,
}

impl LabColor {
    pub fn from_components(l: f64, a: f64, b: f64) -> Self {
        Self {
            l,
            a,
            b,
            rgb: to_rgb(l, a, b),
        }
    }

    /// Chroma, `sqrt(a² + b²)`.
    pub fn saturation(&self) -> f64 {
        self.a.hypot(self.b)
    }

    /// Distance from neutral mid-gray, averaged over lightness and chroma.
    pub fn contrast(&self) -> f64 {
        ((self.l - 50.0).abs() / 50.0 + self.saturation() / CHROMA_SCALE) / 2.0
    }

    pub fn delta_e(&self, other: &LabColor) -> f64 {
        delta_e(self, other)
    }
}

pub fn to_lab(rgb: Rgb) -> LabColor {
    let lab = Lab::<D65, f64>::from_color(rgb.to_srgb_f64());
    LabColor {
        l: lab.l,
        a: lab.a,
        b: lab.b,
        rgb,
    }
}

/// Convert Lab back to 8-bit sRGB, rounding and clamping every channel.
pub fn to_rgb(l: f64, a: f64, b: f64) -> Rgb {
    let srgb = Srgb::<f64>::from_color(Lab::<D65, f64>::new(l, a, b));
    Rgb::new(
        encode_channel(srgb.red),
        encode_channel(srgb.green),
        encode_channel(srgb.blue),
    )
}

fn encode_channel(c: f64) -> u8 {
    if c.is_nan() {
        return 0;
    }
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// CIE76 color difference.
pub fn delta_e(x: &LabColor, y: &LabColor) -> f64 {
    let dl = x.l - y.l;
    let da = x.a - y.a;
    let db = x.b - y.b;
    (dl * dl + da * da + db * db).sqrt()
}

/// Sort colors by ascending hue.
pub fn sort_by_hue(colors: &mut [Rgb]) {
    colors.sort_by(|x, y| x.hue().total_cmp(&y.hue()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_lab_black_and_white() {
        let black = to_lab(Rgb::new(0, 0, 0));
        assert!(black.l.abs() < 1e-6);

        let white = to_lab(Rgb::new(255, 255, 255));
        assert!((white.l - 100.0).abs() < 0.01);
        assert!(white.a.abs() < 0.01);
        assert!(white.b.abs() < 0.01);
    }

    #[test]
    fn test_pure_red_reference() {
        let red = to_lab(Rgb::new(255, 0, 0));
        assert!((red.l - 53.24).abs() < 0.1);
        assert!((red.a - 80.09).abs() < 0.2);
        assert!((red.b - 67.20).abs() < 0.2);
    }

    #[test]
    fn test_round_trip_within_one() {
        for r in (0..=255u16).step_by(5) {
            for g in (0..=255u16).step_by(5) {
                for b in (0..=255u16).step_by(5) {
                    let rgb = Rgb::new(r as u8, g as u8, b as u8);
                    let lab = to_lab(rgb);
                    let back = to_rgb(lab.l, lab.a, lab.b);
                    assert!((back.r as i16 - rgb.r as i16).abs() <= 1, "{rgb:?} -> {back:?}");
                    assert!((back.g as i16 - rgb.g as i16).abs() <= 1, "{rgb:?} -> {back:?}");
                    assert!((back.b as i16 - rgb.b as i16).abs() <= 1, "{rgb:?} -> {back:?}");
                }
            }
        }
    }

    #[test]
    fn test_out_of_gamut_lab_is_clamped() {
        let bright = to_rgb(150.0, 0.0, 0.0);
        assert_eq!(bright, Rgb::new(255, 255, 255));
        let dark = to_rgb(-10.0, 0.0, 0.0);
        assert_eq!(dark, Rgb::new(0, 0, 0));
    }

    #[test]
    fn test_delta_e_identity_and_symmetry() {
        let x = to_lab(Rgb::new(12, 200, 99));
        let y = to_lab(Rgb::new(240, 3, 77));
        assert_eq!(delta_e(&x, &x), 0.0);
        assert_eq!(delta_e(&x, &y), delta_e(&y, &x));
        assert!(delta_e(&x, &y) > 0.0);
    }

    #[test]
    fn test_quantize_clears_low_bits() {
        let c = Rgb::new(255, 130, 7);
        assert_eq!(c.quantize(0), c);
        assert_eq!(c.quantize(2), Rgb::new(252, 128, 4));
        assert_eq!(c.quantize(5), Rgb::new(224, 128, 0));
    }

    #[test]
    fn test_hex_round_trip() {
        let c = Rgb::new(0x33, 0x66, 0xCC);
        assert_eq!(c.to_hex(), "#3366CC");
        assert_eq!(Rgb::from_hex("#3366cc").unwrap(), c);
        assert_eq!(Rgb::from_hex("3366CC").unwrap(), c);
        assert!(Rgb::from_hex("#12345").is_err());
        assert!(Rgb::from_hex("zzzzzz").is_err());
    }

    #[test]
    fn test_hue_ordering() {
        let mut colors = vec![
            Rgb::new(0, 0, 255),
            Rgb::new(255, 0, 0),
            Rgb::new(0, 255, 0),
        ];
        sort_by_hue(&mut colors);
        assert_eq!(
            colors,
            vec![Rgb::new(255, 0, 0), Rgb::new(0, 255, 0), Rgb::new(0, 0, 255)]
        );
    }

    #[test]
    fn test_contrast_of_mid_gray_is_low() {
        let gray = to_lab(Rgb::new(119, 119, 119));
        assert!(gray.contrast() < 0.02);
        let white = to_lab(Rgb::new(255, 255, 255));
        assert!(white.contrast() > 0.45);
    }
}
