//! Shared PDF handling utilities
//!
//! This crate provides PDF parsing, the screen-to-PDF coordinate transform,
//! and the compositor that flattens a text annotation into page content.

pub mod compositor;
pub mod coords;
pub mod error;
pub mod parser;

pub use compositor::{burn_text, standard_font, TextStamp};
pub use coords::{pdf_to_screen, screen_to_pdf, MediaBox, PdfPlacement, SUPPORTED_PAGE_INDEX};
pub use error::PdfError;
pub use parser::PdfDocument;
