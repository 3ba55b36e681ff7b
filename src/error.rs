//! Error types for the formscan library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`FormScanError`]: **Fatal**: the document cannot be turned into a
//!   field list at all (unreadable upload, OCR engine failure, nothing that
//!   looks like a field). Returned as `Err(FormScanError)` from the
//!   top-level `detect*` functions.
//!
//! * [`ExtractionUnavailable`]: **Non-fatal**: the LLM extractor timed out,
//!   failed, or answered garbage. The pipeline carries on with heuristic
//!   candidates only and records the reason on
//!   [`crate::output::DetectionOutput::llm_error`].
//!
//! * [`ValidationError`]: **Non-fatal**: a proposed answer does not satisfy
//!   its field's rule. The field keeps its previous value.

use crate::field::FieldType;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the formscan library.
#[derive(Debug, Error)]
pub enum FormScanError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Form file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// The upload is neither a PDF nor a supported raster image.
    #[error("Unsupported upload '{path}': expected PDF, PNG or JPEG (first bytes: {magic:?})")]
    UnsupportedInput { path: PathBuf, magic: [u8; 4] },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Rasterisation ─────────────────────────────────────────────────────
    /// A PDF page (or an image upload) could not be decoded to pixels.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first use.\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Extraction ────────────────────────────────────────────────────────
    /// The OCR engine could not process a page. Fatal for the whole
    /// document: field numbering must be consistent across all pages.
    #[error("Cannot process this document: OCR failed on page {page}: {detail}")]
    Extraction { page: usize, detail: String },

    /// The OCR engine binary could not be started at all.
    #[error("OCR engine '{engine}' is unavailable: {detail}\nInstall tesseract or pass --tesseract <PATH>.")]
    OcrEngineUnavailable { engine: String, detail: String },

    /// Both detectors together produced zero fields above the confidence floor.
    #[error("No fields detected ({heuristic} heuristic and {llm} LLM candidates, none above the confidence floor).\nUpload a clearer scan.")]
    NoFieldsDetected { heuristic: usize, llm: usize },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A TOML configuration file could not be read or parsed.
    #[error("Failed to load config '{path}': {detail}")]
    ConfigLoad { path: PathBuf, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why the LLM extractor produced no candidates for a document.
///
/// Stored on [`crate::output::DetectionOutput`]; the document is then
/// flagged heuristic-only.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ExtractionUnavailable {
    /// The whole call budget elapsed.
    #[error("LLM extraction timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Every attempt failed at the provider.
    #[error("LLM call failed after {attempts} attempt(s): {detail}")]
    CallFailed { attempts: u32, detail: String },

    /// The model answered, but not with the expected JSON.
    #[error("LLM returned a malformed response: {detail}")]
    Malformed { detail: String },

    /// No provider could be resolved.
    #[error("LLM provider not configured: {detail}")]
    NotConfigured { detail: String },

    /// LLM extraction switched off in configuration.
    #[error("LLM extraction disabled")]
    Disabled,
}

/// A proposed field value failed its validation rule.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ValidationError {
    /// Field is required but the answer is blank.
    #[error("This field is required.")]
    Required,

    /// Answer does not match the expected shape for its type.
    #[error("{hint}")]
    Invalid { field_type: FieldType, hint: String },

    /// Numeric answer outside the configured range.
    #[error("Please enter a number between {min} and {max}.")]
    OutOfRange { value: f64, min: f64, max: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_display_mentions_page() {
        let e = FormScanError::Extraction {
            page: 2,
            detail: "corrupt image".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 2"), "got: {msg}");
        assert!(msg.contains("Cannot process this document"));
    }

    #[test]
    fn no_fields_display() {
        let e = FormScanError::NoFieldsDetected {
            heuristic: 3,
            llm: 0,
        };
        assert!(e.to_string().contains("No fields detected"));
        assert!(e.to_string().contains("3 heuristic"));
    }

    #[test]
    fn timeout_display() {
        let e = ExtractionUnavailable::Timeout { elapsed_ms: 5000 };
        assert!(e.to_string().contains("5000ms"));
    }

    #[test]
    fn unavailable_serialises() {
        let e = ExtractionUnavailable::CallFailed {
            attempts: 2,
            detail: "503".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: ExtractionUnavailable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn validation_error_shows_hint() {
        let e = ValidationError::Invalid {
            field_type: FieldType::Email,
            hint: "Please enter a valid email address.".into(),
        };
        assert_eq!(e.to_string(), "Please enter a valid email address.");
    }
}
