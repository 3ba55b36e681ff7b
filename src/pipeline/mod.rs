//! Pipeline stages for form field detection.
//!
//! Each submodule implements one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ ocr ──┬──▶ heuristic (regions) ──┬──▶ fusion ──▶ ordering
//! (path/URL) (pdfium)  (tsv) └──▶ llm ─────── anchor ───┘
//! ```
//!
//! 1. [`input`]     : resolve a path or URL to a local file and sniff its kind
//! 2. [`render`]    : rasterise pages; `spawn_blocking` because pdfium is not
//!    async-safe
//! 3. [`ocr`]       : word tokens per page, bounded concurrency
//! 4. [`heuristic`] : keyword labels plus blank regions from [`regions`]
//! 5. [`llm`]       : one timeout-bounded model call, runs alongside the
//!    heuristic; its labels are anchored onto the heuristic's page layouts
//! 6. [`fusion`]    : cluster both candidate sets into fields
//! 7. [`ordering`]  : page, row band, left to right

pub mod fusion;
pub mod heuristic;
pub mod input;
pub mod llm;
pub mod ocr;
pub mod ordering;
pub mod regions;
pub mod render;
