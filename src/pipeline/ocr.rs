//! OCR adapter: turn a rasterised page into positioned tokens.
//!
//! The engine sits behind [`OcrEngine`] so callers can plug in anything that
//! yields word boxes. The shipped [`TesseractEngine`] shells out to the
//! `tesseract` CLI in TSV mode, which reports one row per word with its box,
//! confidence and (block, paragraph, line) membership.
//!
//! A failure on any page aborts the whole document. Field numbering must be
//! consistent across pages, so partial token sets are never returned.

use crate::config::OcrSettings;
use crate::error::FormScanError;
use crate::geometry::{BBox, LineKey, Page, Token};
use crate::pipeline::render::RenderedPage;
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt, TryStreamExt};
use image::DynamicImage;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info};

/// A text recogniser for one page image.
///
/// Implementations are blocking; [`recognize_pages`] runs them on the tokio
/// blocking pool.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Recognise `image`, returning tokens in emission order with
    /// `page_index` set on every token.
    fn recognize(&self, page_index: usize, image: &DynamicImage)
        -> Result<Vec<Token>, FormScanError>;
}

/// `tesseract` CLI engine.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    settings: OcrSettings,
}

impl TesseractEngine {
    pub fn new(settings: OcrSettings) -> Self {
        Self { settings }
    }

    /// Check the binary can be started (`tesseract --version`).
    pub fn probe(&self) -> Result<(), FormScanError> {
        Command::new(&self.settings.binary)
            .arg("--version")
            .output()
            .map(|_| ())
            .map_err(|e| self.unavailable(e.to_string()))
    }

    fn unavailable(&self, detail: String) -> FormScanError {
        FormScanError::OcrEngineUnavailable {
            engine: self.settings.binary.display().to_string(),
            detail,
        }
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(
        &self,
        page_index: usize,
        image: &DynamicImage,
    ) -> Result<Vec<Token>, FormScanError> {
        let extraction = |detail: String| FormScanError::Extraction {
            page: page_index + 1,
            detail,
        };

        let tmp = tempfile::Builder::new()
            .prefix("formscan-page-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| FormScanError::Internal(format!("tempfile: {e}")))?;
        image
            .save_with_format(tmp.path(), image::ImageFormat::Png)
            .map_err(|e| extraction(format!("could not write page image: {e}")))?;

        let out = Command::new(&self.settings.binary)
            .arg(tmp.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.settings.language)
            .arg("--psm")
            .arg(self.settings.psm.to_string())
            .arg("tsv")
            .output()
            .map_err(|e| self.unavailable(e.to_string()))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(extraction(format!(
                "tesseract exited with {}: {}",
                out.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&out.stdout);
        let tokens: Vec<Token> = parse_tsv(page_index, &tsv)
            .into_iter()
            .filter(|t| t.confidence >= self.settings.min_token_confidence)
            .collect();
        debug!("Page {}: {} tokens", page_index + 1, tokens.len());
        Ok(tokens)
    }
}

/// Parse tesseract TSV output into word tokens.
///
/// Only level-5 (word) rows with a non-negative confidence and non-blank
/// text are kept. Malformed rows are skipped.
pub fn parse_tsv(page_index: usize, tsv: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for row in tsv.lines() {
        let cols: Vec<&str> = row.splitn(12, '\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<f32>().ok();
        let int = |i: usize| cols[i].trim().parse::<u32>().ok();
        let (Some(left), Some(top), Some(width), Some(height), Some(conf)) =
            (num(6), num(7), num(8), num(9), num(10))
        else {
            continue;
        };
        if conf < 0.0 {
            continue;
        }
        let mut token = Token::new(
            text,
            page_index,
            BBox::new(left, top, width, height),
            conf / 100.0,
        );
        if let (Some(block), Some(paragraph), Some(line)) = (int(2), int(3), int(4)) {
            token = token.with_line(LineKey {
                block,
                paragraph,
                line,
            });
        }
        tokens.push(token);
    }
    tokens
}

/// Recognise every page, at most `concurrency` at a time.
///
/// Pages are returned sorted by index with their grayscale raster attached
/// for blank-region detection. The first failure aborts the document.
pub async fn recognize_pages(
    engine: Arc<dyn OcrEngine>,
    images: Vec<RenderedPage>,
    concurrency: usize,
    progress: Option<ProgressCallback>,
) -> Result<Vec<Page>, FormScanError> {
    let total = images.len();
    info!("Running OCR ({}) on {} page(s)", engine.name(), total);

    let mut pages: Vec<Page> = stream::iter(images.into_iter().map(|rendered| {
        let engine = Arc::clone(&engine);
        let progress = progress.clone();
        let RenderedPage { index: idx, image, dpi } = rendered;
        async move {
            let page = tokio::task::spawn_blocking(move || {
                let tokens = engine.recognize(idx, &image)?;
                let gray = image.to_luma8();
                Ok::<_, FormScanError>(
                    Page::new(idx, gray.width(), gray.height(), tokens)
                        .with_image(gray)
                        .with_dpi(dpi),
                )
            })
            .await
            .map_err(|e| FormScanError::Internal(format!("OCR task panicked: {e}")))??;

            if let Some(cb) = &progress {
                cb.on_page_recognized(idx + 1, total, page.tokens.len());
            }
            Ok::<_, FormScanError>(page)
        }
    }))
    .buffer_unordered(concurrency.max(1))
    .try_collect()
    .await?;

    pages.sort_by_key(|p| p.index);
    Ok(pages)
}
