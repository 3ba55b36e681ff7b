//! Blank-region detection: printed underlines and answer boxes.
//!
//! Works on the page's grayscale raster. Horizontal ink runs at least
//! `min_rule_length_px` long are merged across adjacent rows into rules.
//! Two rules with the same horizontal extent, a plausible gap between them,
//! and inked vertical edges form a box; every other rule is an underline
//! whose writing area sits `underline_lift_px` above it.

use crate::config::Thresholds;
use crate::geometry::BBox;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Thicker strokes are filled shapes, not rules.
const MAX_RULE_THICKNESS: u32 = 8;
/// Horizontal slack when matching box edges.
const EDGE_SLACK: u32 = 6;
const MIN_BOX_HEIGHT: u32 = 15;
const MAX_BOX_HEIGHT: u32 = 80;
/// Fraction of an edge column that must be ink to confirm a box side.
const MIN_EDGE_INK: f32 = 0.7;

/// How a blank region was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// Printed rule under the writing area.
    Underline,
    /// Closed rectangle.
    Box,
    /// Wide whitespace between two label segments on one OCR line.
    Gap,
    /// OCR token made of `_`, `.` or `-`.
    RuleToken,
}

/// A place where an answer can be written.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlankRegion {
    pub bbox: BBox,
    pub kind: RegionKind,
}

impl BlankRegion {
    pub fn new(bbox: BBox, kind: RegionKind) -> Self {
        Self { bbox, kind }
    }
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
}

impl Rule {
    fn overlap(&self, x0: u32, x1: u32) -> u32 {
        self.x1.min(x1).saturating_sub(self.x0.max(x0))
    }
}

/// Find underlines and boxes on a page raster.
pub fn detect_regions(image: &GrayImage, t: &Thresholds) -> Vec<BlankRegion> {
    let rules = find_rules(image, t.ink_threshold, t.min_rule_length_px.max(1));
    let mut used = vec![false; rules.len()];
    let mut regions = Vec::new();

    for i in 0..rules.len() {
        if used[i] {
            continue;
        }
        let top = rules[i];
        let partner = (i + 1..rules.len()).find(|&j| {
            if used[j] {
                return false;
            }
            let bottom = rules[j];
            let gap = bottom.y0.saturating_sub(top.y1);
            top.x0.abs_diff(bottom.x0) <= EDGE_SLACK
                && top.x1.abs_diff(bottom.x1) <= EDGE_SLACK
                && (MIN_BOX_HEIGHT..=MAX_BOX_HEIGHT).contains(&gap)
                && has_edge(image, top.x0, top.y1, bottom.y0, t.ink_threshold)
                && has_edge(image, top.x1, top.y1, bottom.y0, t.ink_threshold)
        });
        if let Some(j) = partner {
            used[i] = true;
            used[j] = true;
            let bottom = rules[j];
            regions.push(BlankRegion::new(
                BBox::from_corners(
                    top.x0.min(bottom.x0) as f32,
                    top.y0 as f32,
                    top.x1.max(bottom.x1) as f32,
                    (bottom.y1 + 1) as f32,
                ),
                RegionKind::Box,
            ));
        }
    }

    for (rule, _) in rules.iter().zip(&used).filter(|(_, u)| !**u) {
        let lift = t.underline_lift_px.max(1.0);
        regions.push(BlankRegion::new(
            BBox::new(
                rule.x0 as f32,
                rule.y0 as f32 - lift,
                (rule.x1 - rule.x0) as f32,
                lift,
            ),
            RegionKind::Underline,
        ));
    }

    debug!(
        "Detected {} blank regions from {} rules",
        regions.len(),
        rules.len()
    );
    regions
}

/// Long horizontal ink runs merged across consecutive rows, sorted by y.
fn find_rules(image: &GrayImage, ink: u8, min_len: u32) -> Vec<Rule> {
    let (w, h) = image.dimensions();
    let mut open: Vec<Rule> = Vec::new();
    let mut done: Vec<Rule> = Vec::new();

    for y in 0..h {
        let mut runs = Vec::new();
        let mut start: Option<u32> = None;
        for x in 0..=w {
            let dark = x < w && image.get_pixel(x, y).0[0] < ink;
            match (dark, start) {
                (true, None) => start = Some(x),
                (false, Some(s)) => {
                    if x - s >= min_len {
                        runs.push((s, x));
                    }
                    start = None;
                }
                _ => {}
            }
        }

        let mut next_open = Vec::new();
        for (x0, x1) in runs {
            let hit = open.iter().position(|r| {
                r.y1 + 1 == y && r.overlap(x0, x1) * 5 >= (x1 - x0).min(r.x1 - r.x0) * 4
            });
            match hit {
                Some(k) => {
                    let mut r = open.swap_remove(k);
                    r.x0 = r.x0.min(x0);
                    r.x1 = r.x1.max(x1);
                    r.y1 = y;
                    next_open.push(r);
                }
                None => next_open.push(Rule { x0, x1, y0: y, y1: y }),
            }
        }
        done.append(&mut open);
        open = next_open;
    }
    done.append(&mut open);

    let mut rules: Vec<Rule> = done
        .into_iter()
        .filter(|r| r.y1 - r.y0 < MAX_RULE_THICKNESS)
        .collect();
    rules.sort_by_key(|r| (r.y0, r.x0));
    rules
}

/// True when some column within `EDGE_SLACK` of `x` is mostly ink between
/// `y0` and `y1`.
fn has_edge(image: &GrayImage, x: u32, y0: u32, y1: u32, ink: u8) -> bool {
    let (w, h) = image.dimensions();
    let y1 = y1.min(h);
    if y1 <= y0 {
        return false;
    }
    let span = (y1 - y0) as f32;
    let lo = x.saturating_sub(EDGE_SLACK);
    let hi = (x + EDGE_SLACK).min(w.saturating_sub(1));
    (lo..=hi).any(|cx| {
        let dark = (y0..y1)
            .filter(|&cy| image.get_pixel(cx, cy).0[0] < ink)
            .count() as f32;
        dark / span >= MIN_EDGE_INK
    })
}
