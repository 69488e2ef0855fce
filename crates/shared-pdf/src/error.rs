use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PdfError {
    #[error("Failed to parse PDF: {0}")]
    Format(String),

    #[error("Page index {index} unavailable: {reason}")]
    PageIndex { index: u32, reason: String },

    #[error("Font error: {0}")]
    Font(String),

    #[error("Placement out of bounds: {0}")]
    Placement(String),

    #[error("PDF operation failed: {0}")]
    Operation(String),
}
