//! Answer placement for the PDF exporter.
//!
//! Fields carry pixel-space anchors on the rasterised page. The exporter
//! needs PDF user space: points, origin bottom-left. [`placements`] picks
//! the filled fields and applies any caller nudges; [`Placement::to_pdf_points`]
//! converts one placement using the page's effective DPI and fits a font
//! size to the answer box.

use crate::field::FormField;
use crate::output::{DetectionOutput, PageSummary};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;
use tracing::debug;

const BASE_FONT_PT: f32 = 12.0;
const MIN_FONT_PT: f32 = 8.0;
const MAX_FONT_PT: f32 = 24.0;
/// Average glyph width as a fraction of the font size.
const GLYPH_WIDTH_RATIO: f32 = 0.6;
/// Baseline inset from the answer box's bottom-left corner, in points.
const TEXT_INSET_PT: (f32, f32) = (2.0, 3.0);

/// Caller adjustment to an answer's position, in page pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Offset {
    pub dx: f32,
    pub dy: f32,
}

/// Where to write one answer, in page pixels (origin top-left).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub field_id: String,
    pub page_index: usize,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub text: String,
}

/// A placement in PDF user space (points, origin bottom-left).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfPlacement {
    pub field_id: String,
    pub page_index: usize,
    /// Text baseline origin.
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
    pub text: String,
}

impl Placement {
    /// Convert to PDF points for a page `page_height_px` tall rasterised at
    /// `dpi`. `font_scale` is clamped to 0.6–1.6.
    pub fn to_pdf_points(&self, page_height_px: u32, dpi: f32, font_scale: f32) -> PdfPlacement {
        let scale = 72.0 / dpi.max(1.0);
        let font_scale = if font_scale.is_finite() {
            font_scale.clamp(0.6, 1.6)
        } else {
            1.0
        };

        let page_h_pt = page_height_px as f32 * scale;
        let x = self.x * scale;
        let y = page_h_pt - (self.y + self.height) * scale;

        let box_w_pt = self.width * scale;
        let chars = self.text.chars().count() as f32;
        let fitted = BASE_FONT_PT.min(box_w_pt / (chars * GLYPH_WIDTH_RATIO).max(1.0));
        let font_size = (fitted.max(MIN_FONT_PT) * font_scale).min(MAX_FONT_PT);

        PdfPlacement {
            field_id: self.field_id.clone(),
            page_index: self.page_index,
            x: x + TEXT_INSET_PT.0,
            y: y + TEXT_INSET_PT.1,
            font_size,
            text: self.text.clone(),
        }
    }
}

/// Pixel placements for every filled field, in field order.
pub fn placements(fields: &[FormField], offsets: &HashMap<String, Offset>) -> Vec<Placement> {
    fields
        .iter()
        .filter(|f| f.is_filled())
        .map(|f| {
            let off = offsets.get(&f.id).copied().unwrap_or_default();
            Placement {
                field_id: f.id.clone(),
                page_index: f.page_index,
                x: f.anchor.x + off.dx,
                y: f.anchor.y + off.dy,
                width: f.anchor.width,
                height: f.anchor.height,
                text: f.value().unwrap_or_default().to_string(),
            }
        })
        .collect()
}

/// PDF placements for every filled field of a detection result. Fields on
/// pages missing from `output.pages` are skipped.
pub fn pdf_placements(
    output: &DetectionOutput,
    offsets: &HashMap<String, Offset>,
    font_scale: f32,
) -> Vec<PdfPlacement> {
    placements(&output.fields, offsets)
        .iter()
        .filter_map(|p| {
            let page: &PageSummary = output.page(p.page_index).or_else(|| {
                debug!("No page {} for field {}", p.page_index, p.field_id);
                None
            })?;
            Some(p.to_pdf_points(page.height, page.dpi, font_scale))
        })
        .collect()
}

/// Plain-text answer sheet: one `Label: answer` line per field.
pub fn text_summary(fields: &[FormField]) -> String {
    let mut out = String::new();
    for (i, f) in fields.iter().enumerate() {
        let answer = match f.value() {
            Some(v) if !v.is_empty() => v,
            _ => "(blank)",
        };
        let _ = writeln!(out, "{}. {}: {}", i + 1, f.label, answer);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{CandidateField, DetectorSource, FieldType};
    use crate::geometry::BBox;
    use crate::validators::ValidatorRegistry;

    fn field(id: &str, label: &str, anchor: BBox) -> FormField {
        let c = CandidateField::new(label, FieldType::Text, anchor, 0, DetectorSource::Heuristic, 0.9);
        let mut f = FormField::from_candidate(
            &c,
            label.into(),
            FieldType::Text,
            0.9,
            false,
            vec![DetectorSource::Heuristic],
            0,
        );
        f.id = id.into();
        f
    }

    fn filled(id: &str, label: &str, anchor: BBox, value: &str) -> FormField {
        let mut f = field(id, label, anchor);
        f.set_value(value, &ValidatorRegistry::default()).unwrap();
        f
    }

    #[test]
    fn only_filled_fields_are_placed() {
        let fields = vec![
            filled("f000", "Name", BBox::new(100.0, 50.0, 300.0, 30.0), "Jane Tan"),
            field("f001", "Email", BBox::new(100.0, 100.0, 300.0, 30.0)),
        ];
        let mut offsets = HashMap::new();
        offsets.insert("f000".to_string(), Offset { dx: 5.0, dy: -2.0 });

        let placed = placements(&fields, &offsets);
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].field_id, "f000");
        assert_eq!((placed[0].x, placed[0].y), (105.0, 48.0));
        assert_eq!(placed[0].text, "Jane Tan");
    }

    #[test]
    fn pixels_to_points_flip_origin() {
        let p = Placement {
            field_id: "f000".into(),
            page_index: 0,
            x: 300.0,
            y: 600.0,
            width: 600.0,
            height: 60.0,
            text: "Jane".into(),
        };
        // 300 dpi: 1 px = 0.24 pt; page 3300 px = 792 pt.
        let pdf = p.to_pdf_points(3300, 300.0, 1.0);
        assert!((pdf.x - (72.0 + 2.0)).abs() < 1e-3);
        assert!((pdf.y - (792.0 - 660.0 * 0.24 + 3.0)).abs() < 1e-3);
        assert_eq!(pdf.font_size, 12.0);
    }

    #[test]
    fn long_answers_shrink_to_the_floor() {
        let p = Placement {
            field_id: "f000".into(),
            page_index: 0,
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 20.0,
            text: "a very long answer that will not fit".into(),
        };
        assert_eq!(p.to_pdf_points(1000, 72.0, 1.0).font_size, 8.0);
        // Scale is clamped to 1.6 and the result capped at 24.
        assert!((p.to_pdf_points(1000, 72.0, 5.0).font_size - 12.8).abs() < 1e-4);
        let short = Placement {
            text: "x".into(),
            width: 1000.0,
            ..p
        };
        assert!((short.to_pdf_points(1000, 72.0, 1.6).font_size - 19.2).abs() < 1e-4);
    }

    #[test]
    fn summary_marks_blanks() {
        let fields = vec![
            filled("f000", "Name", BBox::new(0.0, 0.0, 10.0, 10.0), "Jane"),
            field("f001", "Email", BBox::new(0.0, 20.0, 10.0, 10.0)),
        ];
        assert_eq!(text_summary(&fields), "1. Name: Jane\n2. Email: (blank)\n");
    }

    #[test]
    fn offsets_deserialize_with_defaults() {
        let offsets: HashMap<String, Offset> =
            serde_json::from_str(r#"{"f001": {"dx": 4}}"#).unwrap();
        assert_eq!(offsets["f001"], Offset { dx: 4.0, dy: 0.0 });
    }
}
