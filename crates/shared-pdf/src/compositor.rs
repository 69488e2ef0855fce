//! Flatten a text annotation into a page's content stream
//!
//! The result is ordinary page content: there is no annotation object left
//! to find, move or remove. Existing content streams are kept byte-for-byte;
//! they are bracketed by a new `q` stream before and a new stream after that
//! restores the graphics state and draws the text.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Object, ObjectId, StringFormat};
use shared_types::{FontFamily, Rgb};
use tracing::debug;

use crate::coords::PdfPlacement;
use crate::error::PdfError;
use crate::parser::PdfDocument;

/// Everything needed to draw one line of text onto a page
#[derive(Debug, Clone)]
pub struct TextStamp<'a> {
    /// Zero-based page index
    pub page_index: u32,
    pub placement: PdfPlacement,
    pub text: &'a str,
    pub color: Rgb,
    pub font: FontFamily,
}

/// Standard 14 font used for a font family
pub fn standard_font(family: FontFamily) -> &'static str {
    match family {
        FontFamily::Serif => "Times-Roman",
        FontFamily::SansSerif => "Helvetica",
        FontFamily::Monospace => "Courier",
        FontFamily::Cursive => "Times-Italic",
    }
}

/// Composite `stamp` onto a copy of `base` and return the new PDF bytes.
///
/// `base` is only read; the caller keeps its bytes unchanged.
pub fn burn_text(base: &[u8], stamp: &TextStamp<'_>) -> Result<Vec<u8>, PdfError> {
    let mut pdf = PdfDocument::from_bytes(base)?;
    pdf.burn_text(stamp)?;
    pdf.save_to_bytes()
}

impl PdfDocument {
    /// Draw `stamp` into the target page's content
    pub fn burn_text(&mut self, stamp: &TextStamp<'_>) -> Result<(), PdfError> {
        let page_id = self.page_id(stamp.page_index)?;
        let encoded = encode_win_ansi(stamp.text)?;
        if !stamp.color.is_valid() {
            return Err(PdfError::Operation(format!(
                "colour channels must be within 0..1, got {:?}",
                stamp.color
            )));
        }

        let base_font = standard_font(stamp.font);
        let font_id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => base_font,
            "Encoding" => "WinAnsiEncoding",
        });
        let font_key = self.register_font(page_id, font_id)?;

        let PdfPlacement { x, y, font_size, .. } = stamp.placement;
        let Rgb { r, g, b } = stamp.color;
        let draw = Content {
            operations: vec![
                Operation::new("Q", vec![]),
                Operation::new("q", vec![]),
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tf",
                    vec![
                        Object::Name(font_key.clone().into_bytes()),
                        Object::Real(font_size as f32),
                    ],
                ),
                Operation::new(
                    "rg",
                    vec![
                        Object::Real(r as f32),
                        Object::Real(g as f32),
                        Object::Real(b as f32),
                    ],
                ),
                Operation::new("Td", vec![Object::Real(x as f32), Object::Real(y as f32)]),
                Operation::new("Tj", vec![Object::String(encoded, StringFormat::Literal)]),
                Operation::new("ET", vec![]),
                Operation::new("Q", vec![]),
            ],
        };
        // Leading newline keeps the first operator apart from the previous stream's last token
        let mut draw_bytes = b"\n".to_vec();
        draw_bytes.extend(
            draw.encode()
                .map_err(|e| PdfError::Operation(format!("Failed to encode content: {}", e)))?,
        );

        let existing = self.content_refs(page_id)?;
        let open_id = self
            .doc
            .add_object(lopdf::Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let draw_id = self
            .doc
            .add_object(lopdf::Stream::new(Dictionary::new(), draw_bytes));

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(open_id));
        contents.extend(existing);
        contents.push(Object::Reference(draw_id));
        self.page_dict_mut(page_id)?
            .set("Contents", Object::Array(contents));

        debug!(
            page = stamp.page_index,
            font = base_font,
            font_key = %font_key,
            x,
            y,
            font_size,
            "Burned text into page content"
        );
        Ok(())
    }

    /// Existing content stream references of a page, in drawing order
    fn content_refs(&self, page_id: ObjectId) -> Result<Vec<Object>, PdfError> {
        let page = self.page_dict(page_id)?;
        Ok(match page.get(b"Contents") {
            Ok(Object::Reference(id)) => match self.doc.get_object(*id) {
                // Indirect array of streams
                Ok(Object::Array(arr)) => arr.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(arr)) => arr.clone(),
            _ => Vec::new(),
        })
    }

    /// Add `font_id` to the page's font resources under an unused name.
    ///
    /// Resources shared with other pages or inherited from the page tree are
    /// copied onto this page first, so no other page changes.
    fn register_font(&mut self, page_id: ObjectId, font_id: ObjectId) -> Result<String, PdfError> {
        let mut resources = self
            .inherited_attribute(page_id, b"Resources")?
            .and_then(|obj| self.resolve_dict(obj))
            .unwrap_or_else(Dictionary::new);
        let mut fonts = resources
            .get(b"Font")
            .ok()
            .and_then(|obj| self.resolve_dict(obj))
            .unwrap_or_else(Dictionary::new);

        let font_key = unused_font_key(&fonts);
        fonts.set(font_key.clone(), Object::Reference(font_id));
        resources.set("Font", Object::Dictionary(fonts));
        self.page_dict_mut(page_id)?
            .set("Resources", Object::Dictionary(resources));

        Ok(font_key)
    }
}

fn unused_font_key(fonts: &Dictionary) -> String {
    (1u32..)
        .map(|n| format!("FBurn{}", n))
        .find(|key| !fonts.has(key.as_bytes()))
        .unwrap_or_else(|| "FBurn".to_string())
}

/// Encode text for a standard font with WinAnsiEncoding.
///
/// Standard fonts carry no glyphs outside this encoding, so anything else
/// cannot be drawn and is a font error.
pub fn encode_win_ansi(text: &str) -> Result<Vec<u8>, PdfError> {
    text.chars()
        .map(|c| {
            let code = c as u32;
            match c {
                ' '..='~' => Ok(code as u8),
                '\u{00A0}'..='\u{00FF}' => Ok(code as u8),
                '€' => Ok(0x80),
                '‚' => Ok(0x82),
                '„' => Ok(0x84),
                '…' => Ok(0x85),
                '‘' => Ok(0x91),
                '’' => Ok(0x92),
                '“' => Ok(0x93),
                '”' => Ok(0x94),
                '•' => Ok(0x95),
                '–' => Ok(0x96),
                '—' => Ok(0x97),
                '™' => Ok(0x99),
                _ => Err(PdfError::Font(format!(
                    "character {:?} (U+{:04X}) cannot be encoded in WinAnsiEncoding",
                    c, code
                ))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_pdf;
    use lopdf::Document;
    use pretty_assertions::assert_eq;

    fn stamp(text: &str) -> TextStamp<'_> {
        TextStamp {
            page_index: 0,
            placement: PdfPlacement {
                x: 51.0,
                y: 716.52,
                font_size: 24.48,
                scale: 1.02,
            },
            text,
            color: Rgb::BLACK,
            font: FontFamily::Serif,
        }
    }

    fn number(obj: &Object) -> f32 {
        match obj {
            Object::Real(v) => *v,
            Object::Integer(v) => *v as f32,
            other => panic!("not a number: {:?}", other),
        }
    }

    fn page_operations(bytes: &[u8], page_number: u32) -> Vec<Operation> {
        let doc = Document::load_mem(bytes).unwrap();
        let page_id = doc.get_pages()[&page_number];
        let content = doc.get_page_content(page_id).unwrap();
        Content::decode(&content).unwrap().operations
    }

    #[test]
    fn test_burn_draws_text_at_placement() {
        let base = test_pdf::build(1);
        let out = burn_text(&base, &stamp("John Doe")).unwrap();
        assert!(out.starts_with(b"%PDF-"));

        let ops = page_operations(&out, 1);
        let tj: Vec<_> = ops.iter().filter(|op| op.operator == "Tj").collect();
        assert_eq!(tj.len(), 2, "original text plus the stamp");
        match &tj[1].operands[0] {
            Object::String(bytes, _) => assert_eq!(bytes.as_slice(), b"John Doe"),
            other => panic!("expected a string operand, got {:?}", other),
        }

        let td = ops.iter().rfind(|op| op.operator == "Td").unwrap();
        assert!((number(&td.operands[0]) - 51.0).abs() < 1e-3);
        assert!((number(&td.operands[1]) - 716.52).abs() < 1e-3);

        let tf = ops.iter().rfind(|op| op.operator == "Tf").unwrap();
        assert!((number(&tf.operands[1]) - 24.48).abs() < 1e-3);
    }

    #[test]
    fn test_graphics_state_is_balanced() {
        let out = burn_text(&test_pdf::build(1), &stamp("Balanced")).unwrap();
        let ops = page_operations(&out, 1);
        let mut depth = 0i32;
        for op in &ops {
            match op.operator.as_str() {
                "q" => depth += 1,
                "Q" => {
                    depth -= 1;
                    assert!(depth >= 0, "Q without matching q");
                }
                _ => {}
            }
        }
        assert_eq!(depth, 0);
        assert_eq!(ops.first().unwrap().operator, "q");
    }

    #[test]
    fn test_existing_content_streams_are_untouched() {
        let base = test_pdf::build(1);
        let original = Document::load_mem(&base).unwrap();
        let page_id = original.get_pages()[&1];
        let original_streams: Vec<(ObjectId, Vec<u8>)> = original
            .get_page_contents(page_id)
            .into_iter()
            .map(|id| {
                let stream = original.get_object(id).unwrap().as_stream().unwrap();
                (id, stream.content.clone())
            })
            .collect();

        let out = burn_text(&base, &stamp("John Doe")).unwrap();
        let burned = Document::load_mem(&out).unwrap();
        let burned_contents = burned.get_page_contents(burned.get_pages()[&1]);

        for (id, content) in original_streams {
            assert!(burned_contents.contains(&id));
            let stream = burned.get_object(id).unwrap().as_stream().unwrap();
            assert_eq!(stream.content, content);
        }
        assert_eq!(burned_contents.len(), 3);
    }

    #[test]
    fn test_other_pages_are_unchanged() {
        let base = test_pdf::build(2);
        let out = burn_text(&base, &stamp("Only page one")).unwrap();
        let content = |bytes: &[u8]| {
            let doc = Document::load_mem(bytes).unwrap();
            doc.get_page_content(doc.get_pages()[&2]).unwrap()
        };
        assert_eq!(content(&out), content(&base));
    }

    #[test]
    fn test_input_bytes_are_not_mutated() {
        let base = test_pdf::build(1);
        let snapshot = base.clone();
        let _ = burn_text(&base, &stamp("John Doe")).unwrap();
        assert_eq!(base, snapshot);
    }

    #[test]
    fn test_inherited_fonts_stay_resolvable() {
        let out = burn_text(&test_pdf::build(1), &stamp("John Doe")).unwrap();
        let doc = Document::load_mem(&out).unwrap();
        let page = doc
            .get_object(doc.get_pages()[&1])
            .and_then(Object::as_dict)
            .unwrap();
        let fonts = page
            .get(b"Resources")
            .and_then(Object::as_dict)
            .and_then(|resources| resources.get(b"Font"))
            .and_then(Object::as_dict)
            .unwrap();
        assert!(fonts.has(b"F1"));
        let burn_font_id = fonts.get(b"FBurn1").and_then(Object::as_reference).unwrap();
        let burn_font = doc.get_object(burn_font_id).and_then(Object::as_dict).unwrap();
        assert_eq!(
            burn_font.get(b"BaseFont").and_then(Object::as_name).unwrap(),
            b"Times-Roman"
        );
    }

    #[test]
    fn test_font_key_avoids_collisions() {
        let mut fonts = Dictionary::new();
        fonts.set("FBurn1", Object::Null);
        fonts.set("FBurn2", Object::Null);
        assert_eq!(unused_font_key(&fonts), "FBurn3");
    }

    #[test]
    fn test_missing_page_is_rejected() {
        let mut s = stamp("John Doe");
        s.page_index = 1;
        let err = burn_text(&test_pdf::build(1), &s).unwrap_err();
        assert!(matches!(err, PdfError::PageIndex { index: 1, .. }));
    }

    #[test]
    fn test_garbage_is_format_error() {
        let err = burn_text(b"not a pdf at all", &stamp("x")).unwrap_err();
        assert!(matches!(err, PdfError::Format(_)));
    }

    #[test]
    fn test_unencodable_text_is_font_error() {
        let err = burn_text(&test_pdf::build(1), &stamp("署名")).unwrap_err();
        assert!(matches!(err, PdfError::Font(_)));
    }

    #[test]
    fn test_font_mapping() {
        assert_eq!(standard_font(FontFamily::Serif), "Times-Roman");
        assert_eq!(standard_font(FontFamily::SansSerif), "Helvetica");
        assert_eq!(standard_font(FontFamily::Monospace), "Courier");
        assert_eq!(standard_font(FontFamily::Cursive), "Times-Italic");
    }

    #[test]
    fn test_win_ansi_encoding() {
        assert_eq!(
            encode_win_ansi("Zoë – “ok”").unwrap(),
            vec![b'Z', b'o', 0xEB, b' ', 0x96, b' ', 0x93, b'o', b'k', 0x94]
        );
        assert!(matches!(encode_win_ansi("line\nbreak"), Err(PdfError::Font(_))));
    }
}
