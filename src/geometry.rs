//! Token geometry: recognised text units and their page-relative boxes.
//!
//! Every coordinate in the crate is a page-pixel coordinate with the origin
//! at the top-left corner of the rasterised page. The same [`BBox`] value
//! travels unchanged from the OCR token, through candidate and fused fields,
//! to the export placement, so an answer lands exactly where the blank was
//! detected.

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in page pixels, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    /// Build from corner coordinates `(x1, y1)`–`(x2, y2)`.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs())
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// True when the two boxes share any area or touch.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.x <= other.right()
            && other.x <= self.right()
            && self.y <= other.bottom()
            && other.y <= self.bottom()
    }

    /// Vertical overlap in pixels (0 when disjoint).
    pub fn vertical_overlap(&self, other: &BBox) -> f32 {
        (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0)
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Euclidean distance between the two box centers.
    pub fn center_distance(&self, other: &BBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).hypot(ay - by)
    }

    /// Euclidean length of the gap between the two rectangles (0 when they
    /// touch or overlap).
    pub fn gap_distance(&self, other: &BBox) -> f32 {
        let dx = (other.x - self.right()).max(self.x - other.right()).max(0.0);
        let dy = (other.y - self.bottom()).max(self.y - other.bottom()).max(0.0);
        dx.hypot(dy)
    }

    /// True when the center of `self` lies inside `other`.
    pub fn center_within(&self, other: &BBox) -> bool {
        let (cx, cy) = self.center();
        cx >= other.x && cx <= other.right() && cy >= other.y && cy <= other.bottom()
    }
}

/// OCR layout key of a token: tesseract's (block, paragraph, line) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineKey {
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
}

/// One OCR-recognised text unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub page_index: usize,
    pub bbox: BBox,
    /// Recognition confidence, 0–1.
    pub confidence: f32,
    /// Engine-reported line membership, when the engine provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<LineKey>,
}

impl Token {
    pub fn new(text: impl Into<String>, page_index: usize, bbox: BBox, confidence: f32) -> Self {
        Self {
            text: text.into(),
            page_index,
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
            line: None,
        }
    }

    pub fn with_line(mut self, line: LineKey) -> Self {
        self.line = Some(line);
        self
    }

    /// Runs of underscores, dots or dashes: a printed blank, not a word.
    pub fn is_rule(&self) -> bool {
        let t = self.text.trim();
        t.chars().count() >= 3 && t.chars().all(|c| matches!(c, '_' | '.' | '-' | '…'))
    }
}

/// One rasterised page with its OCR tokens.
#[derive(Debug, Clone)]
pub struct Page {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    /// Effective pixels-per-inch of the raster; used to map boxes to PDF points.
    pub dpi: f32,
    /// Grayscale raster for blank-region detection. `None` when only tokens
    /// are known (tests, pre-OCR'd input).
    pub image: Option<GrayImage>,
    /// Tokens in engine emission order.
    pub tokens: Vec<Token>,
}

impl Page {
    pub fn new(index: usize, width: u32, height: u32, tokens: Vec<Token>) -> Self {
        Self {
            index,
            width,
            height,
            dpi: 300.0,
            image: None,
            tokens,
        }
    }

    pub fn with_image(mut self, image: GrayImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_dpi(mut self, dpi: f32) -> Self {
        self.dpi = dpi;
        self
    }
}

/// Where a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Image,
    Pdf,
}

/// One uploaded form after OCR. Immutable from here on.
#[derive(Debug, Clone)]
pub struct Document {
    pub source: SourceKind,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn new(source: SourceKind, pages: Vec<Page>) -> Self {
        Self { source, pages }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn token_count(&self) -> usize {
        self.pages.iter().map(|p| p.tokens.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_and_center() {
        let b = BBox::new(10.0, 10.0, 40.0, 10.0);
        assert_eq!(b.right(), 50.0);
        assert_eq!(b.bottom(), 20.0);
        assert_eq!(b.center(), (30.0, 15.0));
    }

    #[test]
    fn gap_distance_to_the_right() {
        let label = BBox::new(10.0, 10.0, 40.0, 10.0);
        let blank = BBox::new(55.0, 10.0, 100.0, 10.0);
        assert_eq!(label.gap_distance(&blank), 5.0);
        assert_eq!(blank.gap_distance(&label), 5.0);
    }

    #[test]
    fn gap_distance_diagonal() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(13.0, 14.0, 5.0, 5.0);
        assert!((a.gap_distance(&b) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn overlapping_boxes_intersect() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 5.0, 10.0, 10.0);
        let c = BBox::new(30.0, 30.0, 1.0, 1.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert_eq!(a.gap_distance(&b), 0.0);
    }

    #[test]
    fn union_covers_both() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(20.0, 5.0, 10.0, 10.0);
        assert_eq!(a.union(&b), BBox::new(0.0, 0.0, 30.0, 15.0));
    }

    #[test]
    fn rule_tokens() {
        let b = BBox::default();
        assert!(Token::new("________", 0, b, 0.9).is_rule());
        assert!(Token::new("......", 0, b, 0.9).is_rule());
        assert!(!Token::new("__", 0, b, 0.9).is_rule());
        assert!(!Token::new("Name", 0, b, 0.9).is_rule());
    }

    #[test]
    fn confidence_is_clamped() {
        let t = Token::new("x", 0, BBox::default(), 1.7);
        assert_eq!(t.confidence, 1.0);
    }
}
