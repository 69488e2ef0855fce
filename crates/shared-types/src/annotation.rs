//! Pending text annotation, positioned in screen space
//!
//! An annotation only lives for one editing session. Once committed it is
//! flattened into page content and no longer exists as a value.

use serde::{Deserialize, Serialize};

/// Pixel position relative to the top-left corner of the rendered page
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

/// Pixel size of the annotation box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxSize {
    pub width: f64,
    pub height: f64,
}

/// Colour as three fractional channels in 0..=1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    /// Parse "#1d4ed8" or "1d4ed8"
    pub fn from_hex(color: &str) -> Option<Rgb> {
        let hex = color.trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16)
                .ok()
                .map(|v| v as f64 / 255.0)
        };
        Some(Rgb {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }

    pub fn is_valid(&self) -> bool {
        [self.r, self.g, self.b]
            .iter()
            .all(|c| c.is_finite() && (0.0..=1.0).contains(c))
    }
}

/// The fixed set of font families offered by the editor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FontFamily {
    /// "Handwritten"
    Cursive,
    Serif,
    SansSerif,
    Monospace,
}

impl FontFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            FontFamily::Cursive => "cursive",
            FontFamily::Serif => "serif",
            FontFamily::SansSerif => "sans-serif",
            FontFamily::Monospace => "monospace",
        }
    }
}

/// Allowed font sizes in pixels, inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FontSizeBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for FontSizeBounds {
    fn default() -> Self {
        Self {
            min: 12.0,
            max: 60.0,
        }
    }
}

impl FontSizeBounds {
    pub fn contains(&self, size: f64) -> bool {
        size.is_finite() && size >= self.min && size <= self.max
    }
}

/// A styled text annotation placed on the rendered page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub position: ScreenPoint,
    pub size: BoxSize,
    pub text: String,
    pub color: Rgb,
    pub font_family: FontFamily,
    /// Font size in pixels
    pub font_size: f64,
}

impl Default for Annotation {
    fn default() -> Self {
        Self {
            position: ScreenPoint { x: 50.0, y: 50.0 },
            size: BoxSize {
                width: 200.0,
                height: 60.0,
            },
            text: "Double Click to Edit".to_string(),
            color: Rgb::BLACK,
            font_family: FontFamily::Cursive,
            font_size: 24.0,
        }
    }
}

impl Annotation {
    /// Apply the delta reported at the end of a drag
    pub fn move_by(&mut self, dx: f64, dy: f64) {
        self.position.x += dx;
        self.position.y += dy;
    }

    /// Check the text can be committed
    pub fn validate_text(&self) -> Result<(), &'static str> {
        if self.text.is_empty() {
            return Err("Annotation text must not be empty");
        }
        if self.text.trim().is_empty() {
            return Err("Annotation text must not be only whitespace");
        }
        Ok(())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: any non-blank text validates
        #[test]
        fn non_blank_text_is_valid(text in "[a-zA-Z][a-zA-Z .'-]{0,40}") {
            let annotation = Annotation { text, ..Annotation::default() };
            prop_assert!(annotation.validate_text().is_ok());
        }

        /// Property: whitespace-only text is rejected
        #[test]
        fn whitespace_text_is_invalid(text in " {1,10}") {
            let annotation = Annotation { text, ..Annotation::default() };
            prop_assert_eq!(
                annotation.validate_text().unwrap_err(),
                "Annotation text must not be only whitespace"
            );
        }

        /// Property: hex parsing yields channels within 0..=1
        #[test]
        fn hex_channels_in_range(r in any::<u8>(), g in any::<u8>(), b in any::<u8>()) {
            let rgb = Rgb::from_hex(&format!("#{:02x}{:02x}{:02x}", r, g, b)).unwrap();
            prop_assert!(rgb.is_valid());
            prop_assert!((rgb.r * 255.0 - r as f64).abs() < 1e-9);
        }
    }
}
