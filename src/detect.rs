//! Detection entry points.
//!
//! [`detect`] runs the whole pipeline on an upload. [`detect_fields`] and
//! [`detect_fields_in_pages`] start from pages that were already
//! recognised, which is how callers with their own OCR (and the tests)
//! drive the detectors.
//!
//! The heuristic detector and the LLM extractor run concurrently over the
//! same `Arc`-shared pages. Fusion waits for the heuristic unconditionally
//! and for the LLM at most `llm_timeout`; an LLM failure is recorded on the
//! output and the run continues heuristic-only.

use crate::config::DetectionConfig;
use crate::error::{ExtractionUnavailable, FormScanError};
use crate::geometry::{Document, Page};
use crate::output::{DetectionOutput, DetectionStats, PageSummary};
use crate::pipeline::llm::{CompletionBackend, ProviderBackend};
use crate::pipeline::ocr::{OcrEngine, TesseractEngine};
use crate::pipeline::{fusion, heuristic, input, llm, ocr, ordering, render};
use crate::validators::ValidatorRegistry;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Detect the fields of a form given as a local path or HTTP/HTTPS URL.
///
/// OCR runs through the `tesseract` binary named in `config.ocr`.
///
/// # Errors
/// Returns `Err(FormScanError)` only for fatal errors:
/// - unreadable or unsupported upload
/// - OCR failure on any page
/// - no field survived fusion
///
/// An unavailable LLM is not an error; see
/// [`DetectionOutput::llm_error`].
pub async fn detect(
    input_str: impl AsRef<str>,
    config: &DetectionConfig,
) -> Result<DetectionOutput, FormScanError> {
    let engine = TesseractEngine::new(config.ocr.clone());
    engine.probe()?;
    detect_with_engine(input_str, Arc::new(engine), config).await
}

/// [`detect`] with a caller-supplied OCR engine.
pub async fn detect_with_engine(
    input_str: impl AsRef<str>,
    engine: Arc<dyn OcrEngine>,
    config: &DetectionConfig,
) -> Result<DetectionOutput, FormScanError> {
    let total_start = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting detection: {}", input_str);

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;

    // ── Step 2: Rasterise ────────────────────────────────────────────────
    let ocr_start = Instant::now();
    let rendered = render::render_document(resolved.path(), resolved.kind(), config).await?;
    if let Some(ref cb) = config.progress_callback {
        cb.on_detection_start(rendered.len());
    }

    // ── Step 3: OCR ──────────────────────────────────────────────────────
    let pages = ocr::recognize_pages(
        engine,
        rendered,
        config.ocr.concurrency,
        config.progress_callback.clone(),
    )
    .await?;
    let document = Document::new(resolved.kind(), pages);
    let ocr_duration_ms = ocr_start.elapsed().as_millis() as u64;
    info!(
        "Recognised {} page(s), {} tokens in {}ms",
        document.page_count(),
        document.token_count(),
        ocr_duration_ms
    );

    // ── Step 4: Detect, fuse, order ──────────────────────────────────────
    let mut output = run_detection(document.pages, resolve_backend(config), config).await?;
    output.source = Some(document.source);
    output.stats.ocr_duration_ms = ocr_duration_ms;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Detection complete: {} fields, {}ms total",
        output.fields.len(),
        output.stats.total_duration_ms
    );
    Ok(output)
}

/// Detect fields in an in-memory upload (PDF, PNG or JPEG bytes).
///
/// The bytes go to a managed temp file that is removed on return.
pub async fn detect_from_bytes(
    bytes: &[u8],
    config: &DetectionConfig,
) -> Result<DetectionOutput, FormScanError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| FormScanError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| FormScanError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    detect(&path, config).await
}

/// Synchronous wrapper around [`detect`].
///
/// Creates a temporary tokio runtime internally.
pub fn detect_sync(
    input_str: impl AsRef<str>,
    config: &DetectionConfig,
) -> Result<DetectionOutput, FormScanError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FormScanError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(detect(input_str, config))
}

/// Detect fields in pages that already carry OCR tokens, resolving the LLM
/// provider from `config`.
pub async fn detect_fields_in_pages(
    pages: Vec<Page>,
    config: &DetectionConfig,
) -> Result<DetectionOutput, FormScanError> {
    run_detection(pages, resolve_backend(config), config).await
}

/// Detect fields in recognised pages with an explicit completion backend.
///
/// `None` runs heuristic-only.
pub async fn detect_fields(
    pages: Vec<Page>,
    backend: Option<Arc<dyn CompletionBackend>>,
    config: &DetectionConfig,
) -> Result<DetectionOutput, FormScanError> {
    let backend = match backend {
        Some(b) if config.llm_enabled => Ok(b),
        Some(_) => Err(ExtractionUnavailable::Disabled),
        None if !config.llm_enabled => Err(ExtractionUnavailable::Disabled),
        None => Err(ExtractionUnavailable::NotConfigured {
            detail: "no completion backend supplied".into(),
        }),
    };
    run_detection(pages, backend, config).await
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn run_detection(
    pages: Vec<Page>,
    backend: Result<Arc<dyn CompletionBackend>, ExtractionUnavailable>,
    config: &DetectionConfig,
) -> Result<DetectionOutput, FormScanError> {
    let start = Instant::now();
    let pages = Arc::new(pages);

    // ── Heuristic ‖ LLM ──────────────────────────────────────────────────
    let heuristic_task = {
        let pages = Arc::clone(&pages);
        let config = config.clone();
        tokio::task::spawn_blocking(move || heuristic::detect_heuristic(&pages, &config))
    };
    let llm_task = async {
        match backend {
            Ok(backend) => llm::extract_llm_fields(backend.as_ref(), &pages, config).await,
            Err(reason) => Err(reason),
        }
    };
    let (heuristic_res, llm_res) = tokio::join!(heuristic_task, llm_task);
    let (heuristic_candidates, layouts) = heuristic_res
        .map_err(|e| FormScanError::Internal(format!("Heuristic task panicked: {}", e)))?;

    let (llm_candidates, llm_error) = match llm_res {
        Ok(fields) => (llm::anchor_llm_fields(&fields, &layouts, config), None),
        Err(ExtractionUnavailable::Disabled) => {
            debug!("LLM extraction disabled");
            (Vec::new(), Some(ExtractionUnavailable::Disabled))
        }
        Err(reason) => {
            warn!("Continuing heuristic-only: {}", reason);
            if let Some(ref cb) = config.progress_callback {
                cb.on_llm_unavailable(&reason.to_string());
            }
            (Vec::new(), Some(reason))
        }
    };
    info!(
        "Candidates: {} heuristic, {} LLM",
        heuristic_candidates.len(),
        llm_candidates.len()
    );

    // ── Fuse and order ───────────────────────────────────────────────────
    let registry = ValidatorRegistry::new(&config.validation);
    let (fused, fusion_stats) = fusion::fuse(
        &heuristic_candidates,
        &llm_candidates,
        &pages,
        &registry,
        &config.thresholds,
    )?;
    let fields = ordering::order_fields(fused, config.thresholds.band_tolerance_ratio);

    let heuristic_only = llm_candidates.is_empty();
    let detection_duration_ms = start.elapsed().as_millis() as u64;
    let stats = DetectionStats {
        page_count: pages.len(),
        token_count: pages.iter().map(|p| p.tokens.len()).sum(),
        heuristic_candidates: heuristic_candidates.len(),
        llm_candidates: llm_candidates.len(),
        clusters: fusion_stats.clusters,
        dropped_clusters: fusion_stats.dropped,
        total_duration_ms: detection_duration_ms,
        ocr_duration_ms: 0,
        detection_duration_ms,
    };

    if let Some(ref cb) = config.progress_callback {
        cb.on_detection_complete(fields.len(), heuristic_only);
    }

    Ok(DetectionOutput {
        fields,
        pages: pages.iter().map(PageSummary::from).collect(),
        source: None,
        heuristic_only,
        llm_error,
        stats,
    })
}

/// The LLM backend for this run, or why there is none.
fn resolve_backend(
    config: &DetectionConfig,
) -> Result<Arc<dyn CompletionBackend>, ExtractionUnavailable> {
    if !config.llm_enabled {
        return Err(ExtractionUnavailable::Disabled);
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(ProviderBackend::new(provider, config)))
}

fn create_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ExtractionUnavailable> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractionUnavailable::NotConfigured {
            detail: format!("{provider_name}: {e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    then `OPENAI_API_KEY` alone.
/// 4. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// Failure is non-fatal: the run continues heuristic-only.
fn resolve_provider(
    config: &DetectionConfig,
) -> Result<Arc<dyn LLMProvider>, ExtractionUnavailable> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractionUnavailable::NotConfigured {
            detail: format!(
                "no provider could be auto-detected; set OPENAI_API_KEY or ANTHROPIC_API_KEY ({})",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{DetectorSource, FieldType};
    use crate::geometry::{BBox, Token};
    use crate::progress::DetectionProgressCallback;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn form_page() -> Page {
        let tok = |text: &str, x: f32, y: f32, w: f32| {
            Token::new(text, 0, BBox::new(x, y, w, 12.0), 0.95)
        };
        Page::new(
            0,
            800,
            1000,
            vec![
                tok("Full", 10.0, 10.0, 30.0),
                tok("Name:", 44.0, 10.0, 40.0),
                tok("__________", 100.0, 10.0, 200.0),
                tok("Email:", 10.0, 60.0, 45.0),
                tok("__________", 100.0, 60.0, 200.0),
            ],
        )
    }

    struct FixedBackend(&'static str);

    #[async_trait]
    impl CompletionBackend for FixedBackend {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, String> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl DetectionProgressCallback for Events {
        fn on_llm_unavailable(&self, reason: &str) {
            self.0.lock().unwrap().push(format!("unavailable: {reason}"));
        }
        fn on_detection_complete(&self, field_count: usize, heuristic_only: bool) {
            self.0
                .lock()
                .unwrap()
                .push(format!("complete: {field_count} {heuristic_only}"));
        }
    }

    #[tokio::test]
    async fn disabled_llm_runs_heuristic_only() {
        let config = DetectionConfig::builder().llm_enabled(false).build().unwrap();
        let out = detect_fields_in_pages(vec![form_page()], &config)
            .await
            .unwrap();
        assert!(out.heuristic_only);
        assert_eq!(out.llm_error, Some(ExtractionUnavailable::Disabled));
        let labels: Vec<&str> = out.fields.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, vec!["Full Name", "Email"]);
        assert_eq!(out.fields[1].field_type, FieldType::Email);
        assert_eq!(out.stats.page_count, 1);
        assert_eq!(out.pages[0].token_count, 5);
    }

    #[tokio::test]
    async fn llm_fields_merge_with_heuristic() {
        let backend = FixedBackend(
            r#"{"fields":[{"label":"Full Name","field_type":"text","page":0,"required":true,"confidence":0.9}]}"#,
        );
        let out = detect_fields(
            vec![form_page()],
            Some(Arc::new(backend)),
            &DetectionConfig::default(),
        )
        .await
        .unwrap();
        assert!(!out.heuristic_only);
        assert!(out.llm_error.is_none());
        assert_eq!(out.stats.llm_candidates, 1);
        let name = &out.fields[0];
        assert_eq!(name.label, "Full Name");
        assert!(name.required);
        assert!(name.sources.contains(&DetectorSource::Heuristic));
        assert!(name.sources.contains(&DetectorSource::Llm));
    }

    #[tokio::test]
    async fn malformed_answer_is_reported_not_raised() {
        let events = Arc::new(Events::default());
        let config = DetectionConfig::builder()
            .llm_max_retries(0)
            .progress_callback(events.clone())
            .build()
            .unwrap();
        let out = detect_fields(
            vec![form_page()],
            Some(Arc::new(FixedBackend("I could not find any fields."))),
            &config,
        )
        .await
        .unwrap();
        assert!(out.heuristic_only);
        assert!(matches!(
            out.llm_error,
            Some(ExtractionUnavailable::Malformed { .. })
        ));
        let seen = events.0.lock().unwrap().clone();
        assert!(seen[0].starts_with("unavailable: LLM returned a malformed"));
        assert_eq!(seen[1], "complete: 2 true");
    }

    #[tokio::test]
    async fn missing_backend_is_not_configured() {
        let out = detect_fields(vec![form_page()], None, &DetectionConfig::default())
            .await
            .unwrap();
        assert!(matches!(
            out.llm_error,
            Some(ExtractionUnavailable::NotConfigured { .. })
        ));
    }

    #[tokio::test]
    async fn empty_page_is_no_fields() {
        let config = DetectionConfig::builder().llm_enabled(false).build().unwrap();
        let err = detect_fields_in_pages(vec![Page::new(0, 800, 1000, Vec::new())], &config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FormScanError::NoFieldsDetected { heuristic: 0, llm: 0 }
        ));
    }
}
