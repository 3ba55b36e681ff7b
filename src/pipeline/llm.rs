//! LLM-assisted field extraction.
//!
//! One completion call per document: the system prompt plus every page's
//! OCR text (see [`crate::prompts`]). The model answers with labels and
//! types only; geometry never comes from the model. Each returned label is
//! anchored back onto the page by fuzzy-matching it against the label
//! segments the heuristic pass found, and the answer box is then resolved
//! with the same blank-region rule the heuristic uses.
//!
//! ## Budget
//!
//! `llm_timeout` is a single deadline covering every attempt and backoff.
//! A failed call or a malformed answer is retried up to `llm_max_retries`
//! times (`retry_backoff_ms * 2^attempt`) while the deadline allows. Every
//! failure mode ends in [`ExtractionUnavailable`], never in a fatal error.

use crate::config::DetectionConfig;
use crate::error::ExtractionUnavailable;
use crate::field::{CandidateField, DetectorSource, FieldType};
use crate::geometry::{BBox, Page};
use crate::keywords::{clean_label, is_required, normalise_words};
use crate::pipeline::heuristic::{is_excluded, resolve_anchor, PageLayout};
use crate::prompts::{build_extraction_payload, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout_at, Duration};
use tracing::{debug, info, warn};

/// Model confidence assumed when the answer omits one.
const DEFAULT_LLM_CONFIDENCE: f32 = 0.7;

/// A text-completion service.
///
/// Errors are plain strings: every failure is folded into
/// [`ExtractionUnavailable::CallFailed`].
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, String>;
}

/// [`CompletionBackend`] over an `edgequake-llm` provider.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &DetectionConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }
}

#[async_trait]
impl CompletionBackend for ProviderBackend {
    async fn complete(&self, system: &str, user: &str) -> Result<String, String> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| e.to_string())?;
        debug!(
            "LLM: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Build `CompletionOptions` from the detection config.
fn build_options(config: &DetectionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// One field as the model reported it, before anchoring.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmField {
    pub label: String,
    pub field_type: FieldType,
    pub page: usize,
    pub required: bool,
    pub confidence: f32,
}

#[derive(Deserialize)]
struct RawResponse {
    fields: Vec<RawField>,
}

#[derive(Deserialize)]
struct RawField {
    label: String,
    #[serde(default, alias = "type")]
    field_type: Option<String>,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    required: Option<bool>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Parse the model's answer. Markdown fences and prose around the JSON
/// object are tolerated; anything else is malformed.
pub fn parse_response(text: &str) -> Result<Vec<LlmField>, String> {
    let body = strip_fences(text);
    let parsed: RawResponse = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(first) => {
            let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) else {
                return Err(format!("no JSON object in response: {first}"));
            };
            if end <= start {
                return Err(format!("no JSON object in response: {first}"));
            }
            serde_json::from_str(&body[start..=end]).map_err(|e| e.to_string())?
        }
    };

    Ok(parsed
        .fields
        .into_iter()
        .filter(|f| !f.label.trim().is_empty())
        .map(|f| LlmField {
            label: f.label.trim().to_string(),
            field_type: f
                .field_type
                .as_deref()
                .map(FieldType::parse_lenient)
                .unwrap_or(FieldType::Unknown),
            page: f.page.unwrap_or(0),
            required: f.required.unwrap_or(false),
            confidence: f
                .confidence
                .filter(|c| c.is_finite())
                .unwrap_or(DEFAULT_LLM_CONFIDENCE)
                .clamp(0.0, 1.0),
        })
        .collect())
}

fn strip_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Ask the model for the document's fields within the configured budget.
pub async fn extract_llm_fields(
    backend: &dyn CompletionBackend,
    pages: &[Page],
    config: &DetectionConfig,
) -> Result<Vec<LlmField>, ExtractionUnavailable> {
    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + config.llm_timeout;
    let elapsed = || ExtractionUnavailable::Timeout {
        elapsed_ms: start.elapsed().as_millis() as u64,
    };

    let system = config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let user = build_extraction_payload(pages, config.max_prompt_lines);

    let mut last_err: Option<ExtractionUnavailable> = None;
    for attempt in 0..=config.llm_max_retries {
        if attempt > 0 {
            let backoff = config
                .retry_backoff_ms
                .saturating_mul(2u64.saturating_pow(attempt - 1));
            warn!(
                "LLM extraction: retry {}/{} after {}ms",
                attempt, config.llm_max_retries, backoff
            );
            if timeout_at(deadline, sleep(Duration::from_millis(backoff)))
                .await
                .is_err()
            {
                return Err(elapsed());
            }
        }

        match timeout_at(deadline, backend.complete(system, &user)).await {
            Err(_) => {
                warn!("LLM extraction timed out after {:?}", start.elapsed());
                return Err(elapsed());
            }
            Ok(Err(detail)) => {
                warn!("LLM extraction: attempt {} failed: {}", attempt + 1, detail);
                last_err = Some(ExtractionUnavailable::CallFailed {
                    attempts: attempt + 1,
                    detail,
                });
            }
            Ok(Ok(text)) => match parse_response(&text) {
                Ok(fields) => {
                    info!(
                        "LLM proposed {} fields in {}ms",
                        fields.len(),
                        start.elapsed().as_millis()
                    );
                    return Ok(fields);
                }
                Err(detail) => {
                    warn!("LLM extraction: attempt {} malformed: {}", attempt + 1, detail);
                    last_err = Some(ExtractionUnavailable::Malformed { detail });
                }
            },
        }
    }

    Err(last_err.unwrap_or(ExtractionUnavailable::CallFailed {
        attempts: 0,
        detail: "no attempt made".into(),
    }))
}

/// Turn model fields into positioned candidates. Fields whose label cannot
/// be found on their page are dropped.
pub fn anchor_llm_fields(
    fields: &[LlmField],
    layouts: &[PageLayout],
    config: &DetectionConfig,
) -> Vec<CandidateField> {
    let t = &config.thresholds;
    let mut candidates = Vec::new();
    // (page, label box) pairs already taken by earlier fields.
    let mut claimed: Vec<(usize, BBox)> = Vec::new();

    for field in fields {
        let Some(layout) = layouts.iter().find(|l| l.page_index == field.page) else {
            debug!("LLM field '{}' names missing page {}", field.label, field.page);
            continue;
        };
        let label = clean_label(&field.label);
        if is_excluded(&label, &field.label, &config.stop_labels) {
            continue;
        }
        let Some((score, label_bbox)) = best_text_match(&label, layout, &claimed) else {
            debug!("LLM field '{}' not found on page {}", label, field.page);
            continue;
        };
        if score < t.anchor_similarity_threshold {
            debug!(
                "LLM field '{}' best match {:.2} below threshold",
                label, score
            );
            continue;
        }
        claimed.push((field.page, label_bbox));
        let (anchor, _) =
            resolve_anchor(&label_bbox, &layout.regions, layout.width, t.max_blank_distance_px);
        candidates.push(
            CandidateField::new(
                label,
                field.field_type,
                anchor,
                field.page,
                DetectorSource::Llm,
                field.confidence,
            )
            .with_label_bbox(label_bbox)
            .with_required(field.required || is_required(&field.label)),
        );
    }

    candidates
}

/// Highest-similarity run of tokens inside any label segment. Runs span the
/// label's word count ±1. Ties prefer a run no earlier field has claimed,
/// then the first run found.
fn best_text_match(
    label: &str,
    layout: &PageLayout,
    claimed: &[(usize, BBox)],
) -> Option<(f32, BBox)> {
    let target = normalise_words(label).join(" ");
    if target.is_empty() {
        return None;
    }
    let n = target.split(' ').count();
    let is_claimed = |bbox: &BBox| {
        claimed
            .iter()
            .any(|(page, b)| *page == layout.page_index && b == bbox)
    };
    let mut best: Option<(f32, BBox, bool)> = None;

    for segment in &layout.segments {
        let words: Vec<String> = segment
            .tokens
            .iter()
            .map(|t| normalise_words(&t.text).join(" "))
            .collect();
        let lo = n.saturating_sub(1).max(1);
        let hi = (n + 1).min(words.len());
        for size in lo..=hi {
            for start in 0..=words.len() - size {
                let window = &words[start..start + size];
                let text = window
                    .iter()
                    .filter(|w| !w.is_empty())
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" ");
                if text.is_empty() {
                    continue;
                }
                let score = strsim::normalized_levenshtein(&target, &text) as f32;
                let tokens = &segment.tokens[start..start + size];
                let bbox = tokens
                    .iter()
                    .skip(1)
                    .fold(tokens[0].bbox, |acc, t| acc.union(&t.bbox));
                let taken = is_claimed(&bbox);
                let better = match best {
                    None => true,
                    Some((s, _, best_taken)) => score > s || (score == s && best_taken && !taken),
                };
                if better {
                    best = Some((score, bbox, taken));
                }
            }
        }
    }
    best.map(|(score, bbox, _)| (score, bbox))
}
