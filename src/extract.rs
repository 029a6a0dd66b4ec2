//! PDF text extraction.
//!
//! Extraction sits behind [`TextExtractor`] so ingestion can be driven by a
//! different backend (or a fixed-text stub in tests). A failure never
//! panics out of this module; the source walker logs it and skips the file.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read file: {0}")]
    Io(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// `path → text`. Pages without a text layer contribute nothing, so a
/// scanned PDF yields an empty string rather than an error.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractError>;
}

/// Extracts the text layer with `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = std::fs::read(path).map_err(|e| ExtractError::Io(e.to_string()))?;
        extract_pdf(&bytes)
    }
}

/// Extract text from in-memory PDF bytes.
pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs.
    match catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
        Ok(result) => result.map_err(|e| ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked".to_string())),
    }
}
