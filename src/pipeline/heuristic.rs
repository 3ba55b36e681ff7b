//! Geometric + keyword field classifier.
//!
//! For each page:
//!
//! 1. group tokens into OCR lines and split lines into label segments at
//!    wide horizontal gaps ([`analyze_page`]);
//! 2. collect blank regions: raster underlines and boxes, OCR rule tokens
//!    (`_____`), and the gaps themselves;
//! 3. classify every segment against the keyword set and attach the
//!    nearest qualifying blank region ([`resolve_anchor`]).
//!
//! The classifier is pure and deterministic: the same pages and config
//! always yield the same candidates in the same order.

use crate::config::{DetectionConfig, Thresholds};
use crate::field::{CandidateField, DetectorSource};
use crate::geometry::{BBox, LineKey, Page, Token};
use crate::keywords::{clean_label, is_required, looks_like_instruction};
use crate::pipeline::regions::{detect_regions, BlankRegion, RegionKind};
use std::collections::HashMap;
use tracing::debug;

/// Edge tolerance when deciding "right of" / "below".
const EDGE_TOLERANCE: f32 = 2.0;
/// Offset of an inferred answer region from its label.
const INFERRED_OFFSET: f32 = 10.0;
const INFERRED_MAX_WIDTH: f32 = 400.0;
const INFERRED_MIN_WIDTH: f32 = 20.0;

/// A run of label-like tokens on one line.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelSegment {
    pub text: String,
    pub bbox: BBox,
    pub tokens: Vec<Token>,
}

impl LabelSegment {
    fn from_tokens(tokens: Vec<Token>) -> Option<Self> {
        let first = tokens.first()?;
        let bbox = tokens.iter().fold(first.bbox, |acc, t| acc.union(&t.bbox));
        let text = tokens
            .iter()
            .map(|t| t.text.trim())
            .collect::<Vec<_>>()
            .join(" ");
        Some(Self { text, bbox, tokens })
    }
}

/// Label segments and blank regions of one page.
#[derive(Debug, Clone, Default)]
pub struct PageLayout {
    pub page_index: usize,
    pub width: f32,
    pub segments: Vec<LabelSegment>,
    pub regions: Vec<BlankRegion>,
}

/// Segment a page and collect every blank region on it.
pub fn analyze_page(page: &Page, t: &Thresholds) -> PageLayout {
    let mut regions = page
        .image
        .as_ref()
        .map(|img| detect_regions(img, t))
        .unwrap_or_default();
    let mut segments = Vec::new();

    for line in group_lines(&page.tokens) {
        split_line(line, t.min_gap_width_px, &mut segments, &mut regions);
    }

    PageLayout {
        page_index: page.index,
        width: page.width as f32,
        segments,
        regions,
    }
}

/// Group tokens into lines, sorted left to right.
///
/// Tokens with an OCR line key are grouped by key; the rest are grouped by
/// vertical overlap. Lines keep the order in which they first appear.
fn group_lines(tokens: &[Token]) -> Vec<Vec<Token>> {
    let mut keyed: Vec<Vec<Token>> = Vec::new();
    let mut by_key: HashMap<LineKey, usize> = HashMap::new();
    let mut loose: Vec<&Token> = Vec::new();

    for token in tokens.iter().filter(|t| !t.text.trim().is_empty()) {
        match token.line {
            Some(key) => {
                let idx = *by_key.entry(key).or_insert_with(|| {
                    keyed.push(Vec::new());
                    keyed.len() - 1
                });
                keyed[idx].push(token.clone());
            }
            None => loose.push(token),
        }
    }

    loose.sort_by(|a, b| {
        a.bbox
            .center_y()
            .total_cmp(&b.bbox.center_y())
            .then(a.bbox.x.total_cmp(&b.bbox.x))
    });
    let mut geometric: Vec<(BBox, Vec<Token>)> = Vec::new();
    for token in loose {
        let joins = geometric.last().is_some_and(|(bbox, _)| {
            let min_h = bbox.height.min(token.bbox.height).max(1.0);
            bbox.vertical_overlap(&token.bbox) >= 0.5 * min_h
        });
        match geometric.last_mut() {
            Some((bbox, line)) if joins => {
                *bbox = bbox.union(&token.bbox);
                line.push(token.clone());
            }
            _ => geometric.push((token.bbox, vec![token.clone()])),
        }
    }

    let mut lines: Vec<Vec<Token>> = keyed
        .into_iter()
        .chain(geometric.into_iter().map(|(_, line)| line))
        .collect();
    for line in &mut lines {
        line.sort_by(|a, b| a.bbox.x.total_cmp(&b.bbox.x));
    }
    lines
}

/// Split a sorted line into label segments. Rule tokens and wide gaps end a
/// segment and become blank regions.
fn split_line(
    line: Vec<Token>,
    min_gap: f32,
    segments: &mut Vec<LabelSegment>,
    regions: &mut Vec<BlankRegion>,
) {
    let line_box = match line.first() {
        Some(first) => line.iter().fold(first.bbox, |acc, t| acc.union(&t.bbox)),
        None => return,
    };
    let mut current: Vec<Token> = Vec::new();

    for token in line {
        if token.is_rule() {
            regions.push(BlankRegion::new(token.bbox, RegionKind::RuleToken));
            segments.extend(LabelSegment::from_tokens(std::mem::take(&mut current)));
            continue;
        }
        if let Some(prev) = current.last() {
            let gap = token.bbox.x - prev.bbox.right();
            if gap >= min_gap {
                regions.push(BlankRegion::new(
                    BBox::new(prev.bbox.right(), line_box.y, gap, line_box.height),
                    RegionKind::Gap,
                ));
                segments.extend(LabelSegment::from_tokens(std::mem::take(&mut current)));
            }
        }
        current.push(token);
    }
    segments.extend(LabelSegment::from_tokens(current));
}

/// Where the answer for a label goes.
///
/// Returns the nearest qualifying blank region and `true`, or an inferred
/// region to the right of the label and `false`. A region qualifies when it
/// sits to the right on the same line or below the label, within
/// `max_distance` of it. Ties go to the smaller y, then the smaller x.
pub fn resolve_anchor(
    label: &BBox,
    regions: &[BlankRegion],
    page_width: f32,
    max_distance: f32,
) -> (BBox, bool) {
    let best = regions
        .iter()
        .filter(|r| qualifies(label, &r.bbox, max_distance))
        .min_by(|a, b| {
            label
                .gap_distance(&a.bbox)
                .total_cmp(&label.gap_distance(&b.bbox))
                .then(a.bbox.y.total_cmp(&b.bbox.y))
                .then(a.bbox.x.total_cmp(&b.bbox.x))
        });

    match best {
        Some(region) => (region.bbox, true),
        None => (infer_region(label, page_width), false),
    }
}

fn qualifies(label: &BBox, region: &BBox, max_distance: f32) -> bool {
    if label.gap_distance(region) > max_distance {
        return false;
    }
    let same_line = region.x >= label.right() - EDGE_TOLERANCE
        && (region.center_y() - label.center_y()).abs() < label.height.max(region.height);
    let below = region.y >= label.bottom() - EDGE_TOLERANCE
        && region.x <= label.right()
        && region.right() >= label.x;
    same_line || below
}

/// Answer area assumed to the right of a label with no visible blank.
fn infer_region(label: &BBox, page_width: f32) -> BBox {
    let x = label.right() + INFERRED_OFFSET;
    let width = (page_width * 0.8 - x)
        .min(INFERRED_MAX_WIDTH)
        .max(INFERRED_MIN_WIDTH);
    BBox::new(x, label.y, width, label.height.max(1.0))
}

/// True when a cleaned label should never become a field.
pub(crate) fn is_excluded(label: &str, raw: &str, stop_labels: &[String]) -> bool {
    label.is_empty()
        || looks_like_instruction(raw)
        || stop_labels.iter().any(|s| s == &label.to_lowercase())
}

/// Propose candidates from pre-computed layouts.
pub fn classify_layouts(layouts: &[PageLayout], config: &DetectionConfig) -> Vec<CandidateField> {
    let t = &config.thresholds;
    let mut candidates = Vec::new();

    for layout in layouts {
        for segment in &layout.segments {
            let label = clean_label(&segment.text);
            if is_excluded(&label, &segment.text, &config.stop_labels) {
                continue;
            }
            let Some(hit) = config.keywords.classify(&label, t.keyword_fuzzy_threshold) else {
                continue;
            };
            let (anchor, confirmed) = resolve_anchor(
                &segment.bbox,
                &layout.regions,
                layout.width,
                t.max_blank_distance_px,
            );
            let factor = if confirmed {
                t.confirmed_confidence
            } else {
                t.unconfirmed_confidence
            };
            candidates.push(
                CandidateField::new(
                    label,
                    hit.field_type,
                    anchor,
                    layout.page_index,
                    DetectorSource::Heuristic,
                    hit.strength * factor,
                )
                .with_label_bbox(segment.bbox)
                .with_required(is_required(&segment.text)),
            );
        }
    }

    debug!("Heuristic classifier proposed {} candidates", candidates.len());
    candidates
}

/// Analyse pages and propose candidates. Returns the layouts too so the LLM
/// extractor can anchor its fields against the same segments and regions.
pub fn detect_heuristic(
    pages: &[Page],
    config: &DetectionConfig,
) -> (Vec<CandidateField>, Vec<PageLayout>) {
    let layouts: Vec<PageLayout> = pages
        .iter()
        .map(|p| analyze_page(p, &config.thresholds))
        .collect();
    (classify_layouts(&layouts, config), layouts)
}
