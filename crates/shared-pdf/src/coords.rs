//! Coordinate transformation between screen and PDF coordinate systems
//!
//! Screen space is the page rasterized at a fixed pixel width, origin
//! top-left. PDF space is the page's MediaBox, origin bottom-left. Text is
//! anchored at its baseline, so the font size is subtracted once more when
//! flipping the Y axis.

use serde::{Deserialize, Serialize};
use shared_types::{Annotation, FontSizeBounds, ScreenPoint};

use crate::error::PdfError;

/// Only the first page can carry an annotation.
pub const SUPPORTED_PAGE_INDEX: u32 = 0;

/// Rounding slack when checking a box that touches the page edge
const EDGE_TOLERANCE: f64 = 1e-6;

/// Page rectangle in PDF units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MediaBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl MediaBox {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }

    pub fn letter() -> Self {
        Self::new(612.0, 792.0)
    }
}

/// Annotation position and size in PDF units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PdfPlacement {
    /// Left edge of the text
    pub x: f64,
    /// Text baseline
    pub y: f64,
    pub font_size: f64,
    /// PDF units per screen pixel
    pub scale: f64,
}

/// PDF units per pixel for a page rendered `render_width` pixels wide
pub fn render_scale(render_width: f64, media_box: MediaBox) -> Result<f64, PdfError> {
    if !(render_width.is_finite() && render_width > 0.0) {
        return Err(PdfError::Placement(format!(
            "render width must be positive, got {}",
            render_width
        )));
    }
    if !(media_box.width.is_finite()
        && media_box.width > 0.0
        && media_box.height.is_finite()
        && media_box.height > 0.0)
    {
        return Err(PdfError::Placement(format!(
            "page size must be positive, got {}x{}",
            media_box.width, media_box.height
        )));
    }
    Ok(media_box.width / render_width)
}

/// Map an annotation placed on the rendered page into PDF space.
///
/// Out-of-bounds input is rejected, never clamped.
pub fn screen_to_pdf(
    annotation: &Annotation,
    page_index: u32,
    render_width: f64,
    media_box: MediaBox,
    bounds: FontSizeBounds,
) -> Result<PdfPlacement, PdfError> {
    if page_index != SUPPORTED_PAGE_INDEX {
        return Err(PdfError::PageIndex {
            index: page_index,
            reason: "annotations can only be placed on the first page".to_string(),
        });
    }

    let scale = render_scale(render_width, media_box)?;

    if !bounds.contains(annotation.font_size) {
        return Err(PdfError::Placement(format!(
            "font size {} outside {}..={}",
            annotation.font_size, bounds.min, bounds.max
        )));
    }

    let ScreenPoint { x, y } = annotation.position;
    let box_width = annotation.size.width;
    let box_height = annotation.size.height;
    if !(x.is_finite() && y.is_finite()) {
        return Err(PdfError::Placement("position is not a finite number".to_string()));
    }
    if !(box_width.is_finite() && box_width > 0.0 && box_height.is_finite() && box_height > 0.0) {
        return Err(PdfError::Placement(format!(
            "box size must be positive, got {}x{}",
            box_width, box_height
        )));
    }

    let left = x * scale;
    let right = (x + box_width) * scale;
    if left < -EDGE_TOLERANCE || right > media_box.width + EDGE_TOLERANCE {
        return Err(PdfError::Placement(format!(
            "horizontal extent {:.2}..{:.2} outside page width {}",
            left, right, media_box.width
        )));
    }

    let font_size = annotation.font_size * scale;
    let baseline = media_box.height - y * scale - font_size;
    if baseline < -EDGE_TOLERANCE || baseline > media_box.height + EDGE_TOLERANCE {
        return Err(PdfError::Placement(format!(
            "baseline {:.2} outside page height {}",
            baseline, media_box.height
        )));
    }

    Ok(PdfPlacement {
        x: media_box.x + left,
        y: media_box.y + baseline,
        font_size,
        scale,
    })
}

/// Project a placement back onto the rendered page (top-left of the text box)
pub fn pdf_to_screen(placement: &PdfPlacement, media_box: MediaBox) -> ScreenPoint {
    let scale = placement.scale;
    ScreenPoint {
        x: (placement.x - media_box.x) / scale,
        y: (media_box.y + media_box.height - placement.y - placement.font_size) / scale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{BoxSize, FontFamily, Rgb};

    fn annotation_at(x: f64, y: f64, font_size: f64) -> Annotation {
        Annotation {
            position: ScreenPoint { x, y },
            size: BoxSize {
                width: 200.0,
                height: 60.0,
            },
            text: "John Doe".to_string(),
            color: Rgb::BLACK,
            font_family: FontFamily::Serif,
            font_size,
        }
    }

    #[test]
    fn test_letter_page_at_600px() {
        let placement = screen_to_pdf(
            &annotation_at(50.0, 50.0, 24.0),
            0,
            600.0,
            MediaBox::letter(),
            FontSizeBounds::default(),
        )
        .unwrap();

        assert!((placement.scale - 1.02).abs() < 1e-9);
        assert!((placement.font_size - 24.48).abs() < 1e-9);
        assert!((placement.x - 51.0).abs() < 1e-9);
        assert!((placement.y - 716.52).abs() < 1e-9);
    }

    #[test]
    fn test_top_left_corner_maps_to_top_of_page() {
        let placement = screen_to_pdf(
            &annotation_at(0.0, 0.0, 12.0),
            0,
            612.0,
            MediaBox::letter(),
            FontSizeBounds::default(),
        )
        .unwrap();

        assert_eq!(placement.x, 0.0);
        assert_eq!(placement.y, 792.0 - 12.0);
    }

    #[test]
    fn test_media_box_origin_is_respected() {
        let media_box = MediaBox {
            x: 10.0,
            y: 20.0,
            width: 600.0,
            height: 800.0,
        };
        let placement = screen_to_pdf(
            &annotation_at(100.0, 100.0, 20.0),
            0,
            600.0,
            media_box,
            FontSizeBounds::default(),
        )
        .unwrap();

        assert_eq!(placement.x, 110.0);
        assert_eq!(placement.y, 20.0 + 800.0 - 100.0 - 20.0);
        let back = pdf_to_screen(&placement, media_box);
        assert!((back.x - 100.0).abs() < 1e-9);
        assert!((back.y - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_second_page_is_rejected() {
        let result = screen_to_pdf(
            &annotation_at(50.0, 50.0, 24.0),
            1,
            600.0,
            MediaBox::letter(),
            FontSizeBounds::default(),
        );
        assert!(matches!(result, Err(PdfError::PageIndex { index: 1, .. })));
    }

    #[test]
    fn test_box_past_right_edge_is_rejected() {
        // 450 + 200 = 650 px > 600 px render width
        let result = screen_to_pdf(
            &annotation_at(450.0, 50.0, 24.0),
            0,
            600.0,
            MediaBox::letter(),
            FontSizeBounds::default(),
        );
        assert!(matches!(result, Err(PdfError::Placement(_))));
    }

    #[test]
    fn test_negative_x_is_rejected() {
        let result = screen_to_pdf(
            &annotation_at(-1.0, 50.0, 24.0),
            0,
            600.0,
            MediaBox::letter(),
            FontSizeBounds::default(),
        );
        assert!(matches!(result, Err(PdfError::Placement(_))));
    }

    #[test]
    fn test_baseline_below_page_is_rejected() {
        // 600 px render of a letter page is 776.47 px tall
        let result = screen_to_pdf(
            &annotation_at(50.0, 770.0, 24.0),
            0,
            600.0,
            MediaBox::letter(),
            FontSizeBounds::default(),
        );
        assert!(matches!(result, Err(PdfError::Placement(_))));
    }

    #[test]
    fn test_font_size_out_of_bounds_is_rejected() {
        for size in [11.0, 61.0, f64::NAN] {
            let result = screen_to_pdf(
                &annotation_at(50.0, 50.0, size),
                0,
                600.0,
                MediaBox::letter(),
                FontSizeBounds::default(),
            );
            assert!(
                matches!(result, Err(PdfError::Placement(_))),
                "size {} should be rejected",
                size
            );
        }
    }

    #[test]
    fn test_zero_render_width_is_rejected() {
        let result = screen_to_pdf(
            &annotation_at(50.0, 50.0, 24.0),
            0,
            0.0,
            MediaBox::letter(),
            FontSizeBounds::default(),
        );
        assert!(matches!(result, Err(PdfError::Placement(_))));
    }
}
