//! # formscan
//!
//! Find the fillable fields on a scanned or PDF form, give each one a type
//! and a validation rule, and put them in the order a person would read
//! them, so a guided wizard can ask for one answer at a time.
//!
//! ## Why two detectors?
//!
//! Keyword heuristics over OCR geometry are fast and precise about *where*
//! an answer goes, but miss labels they have no keyword for. A language
//! model reads labels a keyword list never anticipated, but cannot be
//! trusted with coordinates and may be slow or down. Both run concurrently;
//! fusion keeps the heuristic's geometry and the better label, and the LLM
//! is never on the critical path: past its timeout the document is simply
//! flagged heuristic-only.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (PDF / PNG / JPEG, path or URL)
//!  │
//!  ├─ 1. Input     resolve and sniff magic bytes
//!  ├─ 2. Render    rasterise pages via pdfium (spawn_blocking)
//!  ├─ 3. OCR       tesseract word tokens with boxes and confidences
//!  ├─ 4. Detect    heuristic ‖ LLM (tokio::join!, LLM bounded by llm_timeout)
//!  ├─ 5. Fuse      cluster candidates, resolve type conflicts, drop noise
//!  ├─ 6. Order     page → row band → left to right; ids f000, f001, …
//!  └─ 7. Output    DetectionOutput (fields, page geometry, stats)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use formscan::{detect, DetectionConfig, ValidatorRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // LLM provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = DetectionConfig::default();
//!     let mut output = detect("application.pdf", &config).await?;
//!
//!     let registry = ValidatorRegistry::new(&config.validation);
//!     for field in &mut output.fields {
//!         println!("{} ({})", field.label, field.field_type);
//!         if let Err(e) = field.set_value("2024-01-31", &registry) {
//!             eprintln!("  {e}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `formscan` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ## External tools
//!
//! OCR shells out to the `tesseract` binary (`OcrSettings::binary`). PDF
//! rendering needs a pdfium shared library, fetched automatically on first
//! use or taken from `PDFIUM_LIB_PATH`.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod detect;
pub mod error;
pub mod export;
pub mod field;
pub mod geometry;
pub mod keywords;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod validators;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConfigFile, DetectionConfig, DetectionConfigBuilder, NricScheme, OcrSettings, Thresholds,
    ValidationSettings,
};
pub use detect::{
    detect, detect_fields, detect_fields_in_pages, detect_from_bytes, detect_sync,
    detect_with_engine,
};
pub use error::{ExtractionUnavailable, FormScanError, ValidationError};
pub use export::{pdf_placements, placements, text_summary, Offset, PdfPlacement, Placement};
pub use field::{CandidateField, DetectorSource, FieldType, FormField};
pub use geometry::{BBox, Document, LineKey, Page, SourceKind, Token};
pub use keywords::{KeywordRule, KeywordSet};
pub use output::{DetectionOutput, DetectionStats, PageSummary};
pub use pipeline::llm::CompletionBackend;
pub use pipeline::ocr::{OcrEngine, TesseractEngine};
pub use progress::{DetectionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use validators::{ValidationRule, ValidatorRegistry};
