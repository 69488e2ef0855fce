//! PDF parsing and manipulation using lopdf

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::coords::MediaBox;
use crate::error::PdfError;

/// Page tree depth after which inherited attribute lookup gives up
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Parsed PDF, owned independently of the bytes it was loaded from
pub struct PdfDocument {
    pub(crate) doc: Document,
}

impl PdfDocument {
    /// Load a PDF from raw bytes. The input is only read.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PdfError> {
        let doc = Document::load_mem(bytes).map_err(|e| PdfError::Format(e.to_string()))?;
        Ok(Self { doc })
    }

    /// Get the number of pages
    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    /// Get page object ID for a zero-based page index
    pub fn page_id(&self, page_index: u32) -> Result<ObjectId, PdfError> {
        let page_count = self.page_count();
        self.doc
            .get_pages()
            .get(&page_index.saturating_add(1))
            .copied()
            .ok_or_else(|| PdfError::PageIndex {
                index: page_index,
                reason: format!("document has {} page(s)", page_count),
            })
    }

    pub(crate) fn page_dict(&self, page_id: ObjectId) -> Result<&Dictionary, PdfError> {
        self.doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .map_err(|e| PdfError::Operation(format!("Failed to get page object: {}", e)))
    }

    pub(crate) fn page_dict_mut(&mut self, page_id: ObjectId) -> Result<&mut Dictionary, PdfError> {
        self.doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| PdfError::Operation(format!("Failed to get page object: {}", e)))
    }

    /// MediaBox of a zero-based page, inherited from the page tree if needed
    pub fn media_box(&self, page_index: u32) -> Result<MediaBox, PdfError> {
        let page_id = self.page_id(page_index)?;
        match self.inherited_attribute(page_id, b"MediaBox")? {
            Some(obj) => self.parse_rect(obj),
            // Default to US Letter size
            None => Ok(MediaBox::letter()),
        }
    }

    /// Look up a page attribute, walking up through `Parent` links
    pub(crate) fn inherited_attribute(
        &self,
        page_id: ObjectId,
        key: &[u8],
    ) -> Result<Option<&Object>, PdfError> {
        let mut dict = self.page_dict(page_id)?;
        for _ in 0..MAX_INHERITANCE_DEPTH {
            if let Ok(value) = dict.get(key) {
                return Ok(Some(value));
            }
            let parent = match dict.get(b"Parent").and_then(Object::as_reference) {
                Ok(parent) => parent,
                Err(_) => return Ok(None),
            };
            dict = match self.doc.get_object(parent).and_then(Object::as_dict) {
                Ok(parent_dict) => parent_dict,
                Err(_) => return Ok(None),
            };
        }
        Ok(None)
    }

    /// Clone a dictionary given inline or by reference
    pub(crate) fn resolve_dict(&self, obj: &Object) -> Option<Dictionary> {
        match obj {
            Object::Dictionary(dict) => Some(dict.clone()),
            Object::Reference(id) => self
                .doc
                .get_object(*id)
                .and_then(Object::as_dict)
                .ok()
                .cloned(),
            _ => None,
        }
    }

    /// Parse a PDF rectangle array into a MediaBox
    fn parse_rect(&self, obj: &Object) -> Result<MediaBox, PdfError> {
        let arr = match obj {
            Object::Array(a) => a,
            Object::Reference(id) => {
                let resolved = self
                    .doc
                    .get_object(*id)
                    .map_err(|e| PdfError::Format(format!("Failed to resolve reference: {}", e)))?;
                resolved
                    .as_array()
                    .map_err(|_| PdfError::Format("MediaBox reference is not an array".into()))?
            }
            _ => return Err(PdfError::Format("MediaBox is not an array".to_string())),
        };

        if arr.len() != 4 {
            return Err(PdfError::Format(format!(
                "MediaBox has {} elements, expected 4",
                arr.len()
            )));
        }

        let mut values = [0.0f64; 4];
        for (i, obj) in arr.iter().enumerate() {
            values[i] = self.extract_number(obj)?;
        }

        // [x1, y1, x2, y2] may be given in any corner order
        let (x1, x2) = (values[0].min(values[2]), values[0].max(values[2]));
        let (y1, y2) = (values[1].min(values[3]), values[1].max(values[3]));
        Ok(MediaBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        })
    }

    /// Extract a number from a PDF object
    fn extract_number(&self, obj: &Object) -> Result<f64, PdfError> {
        match obj {
            Object::Integer(i) => Ok(*i as f64),
            Object::Real(r) => Ok(*r as f64),
            Object::Reference(id) => {
                let resolved = self
                    .doc
                    .get_object(*id)
                    .map_err(|e| PdfError::Format(format!("Failed to resolve: {}", e)))?;
                self.extract_number(resolved)
            }
            _ => Err(PdfError::Format("Expected number in rectangle".to_string())),
        }
    }

    /// Save the document to new bytes
    pub fn save_to_bytes(&mut self) -> Result<Vec<u8>, PdfError> {
        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| PdfError::Operation(format!("Failed to save PDF: {}", e)))?;
        Ok(buffer)
    }
}
