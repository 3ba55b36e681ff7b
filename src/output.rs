//! Output types returned by the detection entry points.

use crate::error::ExtractionUnavailable;
use crate::field::FormField;
use crate::geometry::{Page, SourceKind};
use serde::{Deserialize, Serialize};

/// Result of detecting fields in one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionOutput {
    /// Fused fields in reading order; `fields[i].order_index == i`.
    pub fields: Vec<FormField>,

    /// Per-page raster metadata, needed by the exporter.
    pub pages: Vec<PageSummary>,

    /// `None` when the fields were detected from pre-recognised pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceKind>,

    /// True when the LLM extractor contributed nothing.
    pub heuristic_only: bool,

    /// Why the LLM extractor contributed nothing, if it didn't.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_error: Option<ExtractionUnavailable>,

    pub stats: DetectionStats,
}

impl DetectionOutput {
    /// Look up a field by its stable id.
    pub fn field(&self, id: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_mut(&mut self, id: &str) -> Option<&mut FormField> {
        self.fields.iter_mut().find(|f| f.id == id)
    }

    pub fn page(&self, index: usize) -> Option<&PageSummary> {
        self.pages.iter().find(|p| p.index == index)
    }
}

/// Geometry of one rasterised page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub dpi: f32,
    pub token_count: usize,
}

impl From<&Page> for PageSummary {
    fn from(page: &Page) -> Self {
        Self {
            index: page.index,
            width: page.width,
            height: page.height,
            dpi: page.dpi,
            token_count: page.tokens.len(),
        }
    }
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionStats {
    pub page_count: usize,
    pub token_count: usize,
    pub heuristic_candidates: usize,
    pub llm_candidates: usize,
    /// Candidate clusters formed by fusion.
    pub clusters: usize,
    /// Clusters dropped below the confidence floor.
    pub dropped_clusters: usize,
    pub total_duration_ms: u64,
    /// Rasterisation and OCR.
    pub ocr_duration_ms: u64,
    /// Detectors, fusion and ordering.
    pub detection_duration_ms: u64,
}
