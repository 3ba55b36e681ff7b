//! Configuration types for form field detection.
//!
//! All pipeline behaviour is controlled through [`DetectionConfig`], built via
//! its [`DetectionConfigBuilder`]. Every threshold the detectors, fusion and
//! ordering consult lives in [`Thresholds`] so tests can pin boundary cases,
//! and deployments can tune them from a TOML file ([`ConfigFile`]) without a
//! rebuild.
//!
//! The keyword set and validation settings are built once and shared
//! read-only (`Arc`) by every document processed with the same config.

use crate::error::FormScanError;
use crate::keywords::{KeywordRule, KeywordSet};
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Numeric knobs of the detection pipeline.
///
/// Defaults are conservative values for 300 DPI scans of A4/Letter forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum `normalized_levenshtein` similarity for a fuzzy keyword hit. Default: 0.85.
    pub keyword_fuzzy_threshold: f32,
    /// Max rectangle gap between a label and its blank. Default: 200 px.
    pub max_blank_distance_px: f32,
    /// Minimum horizontal whitespace inside a line that counts as a blank. Default: 40 px.
    pub min_gap_width_px: f32,
    /// Confidence factor when a blank region was geometrically confirmed. Default: 0.95.
    pub confirmed_confidence: f32,
    /// Confidence factor for labels with only an inferred answer region. Default: 0.6.
    pub unconfirmed_confidence: f32,
    /// Dark-run length that counts as a printed rule. Default: 80 px.
    pub min_rule_length_px: u32,
    /// Height of the writing area above an underline. Default: 24 px.
    pub underline_lift_px: f32,
    /// Luma below which a pixel is ink. Default: 160.
    pub ink_threshold: u8,
    /// Center distance under which two anchors describe the same field. Default: 40 px.
    pub proximity_radius_px: f32,
    /// Heuristic confidence above which its type beats a disagreeing LLM type. Default: 0.8.
    pub high_confidence_threshold: f32,
    /// Clusters whose best confidence is below this are noise. Default: 0.35.
    pub confidence_floor: f32,
    /// Soft confidence shift applied when a validator accepts the blank's text. Default: 0.1.
    pub plausibility_bonus: f32,
    /// Minimum label/text similarity to anchor an LLM field. Default: 0.8.
    pub anchor_similarity_threshold: f32,
    /// Row-band tolerance as a fraction of the page's median field height. Default: 0.5.
    pub band_tolerance_ratio: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            keyword_fuzzy_threshold: 0.85,
            max_blank_distance_px: 200.0,
            min_gap_width_px: 40.0,
            confirmed_confidence: 0.95,
            unconfirmed_confidence: 0.6,
            min_rule_length_px: 80,
            underline_lift_px: 24.0,
            ink_threshold: 160,
            proximity_radius_px: 40.0,
            high_confidence_threshold: 0.8,
            confidence_floor: 0.35,
            plausibility_bonus: 0.1,
            anchor_similarity_threshold: 0.8,
            band_tolerance_ratio: 0.5,
        }
    }
}

/// Settings for the tesseract OCR engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Path or name of the tesseract binary. Default: `tesseract`.
    pub binary: PathBuf,
    /// Tesseract language pack(s), e.g. `eng` or `eng+chi_sim`. Default: `eng`.
    pub language: String,
    /// Page segmentation mode. Default: 3 (fully automatic).
    pub psm: u8,
    /// Tokens below this recognition confidence are discarded. Default: 0.0.
    pub min_token_confidence: f32,
    /// Pages recognised in parallel. Default: 4.
    pub concurrency: usize,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: "eng".to_string(),
            psm: 3,
            min_token_confidence: 0.0,
            concurrency: 4,
        }
    }
}

/// National ID scheme used by the `nric` validator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "pattern")]
pub enum NricScheme {
    /// Singapore NRIC/FIN: prefix letter, 7 digits, checksum letter.
    #[default]
    Singapore,
    /// Any regex; matched against the uppercased, trimmed answer.
    Pattern(String),
}

/// Per-type validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// `chrono` formats accepted for dates; output is always ISO `%Y-%m-%d`.
    pub date_formats: Vec<String>,
    pub nric_scheme: NricScheme,
    pub phone_min_digits: usize,
    pub phone_max_digits: usize,
    pub number_min: Option<f64>,
    pub number_max: Option<f64>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            date_formats: [
                "%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%d %b %Y", "%d %B %Y",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            nric_scheme: NricScheme::default(),
            phone_min_digits: 7,
            phone_max_digits: 15,
            number_min: None,
            number_max: None,
        }
    }
}

/// Configuration for one field-detection run.
///
/// Built via [`DetectionConfig::builder()`] or [`DetectionConfig::default()`].
///
/// # Example
/// ```rust
/// use formscan::DetectionConfig;
/// use std::time::Duration;
///
/// let config = DetectionConfig::builder()
///     .dpi(200)
///     .llm_timeout(Duration::from_secs(20))
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct DetectionConfig {
    /// DPI used to rasterise PDF pages. Range: 72–600. Default: 300.
    ///
    /// Tesseract is tuned for ~300 DPI; lower values lose small print.
    pub dpi: u32,

    /// Longest rendered page edge in pixels. Default: 4000.
    pub max_rendered_pixels: u32,

    pub thresholds: Thresholds,
    pub ocr: OcrSettings,
    pub validation: ValidationSettings,

    /// Curated label keywords, shared read-only.
    pub keywords: Arc<KeywordSet>,

    /// Labels never treated as fields (lowercase, exact match after cleaning).
    pub stop_labels: Vec<String>,

    /// Run the LLM extractor at all. Default: true.
    pub llm_enabled: bool,

    /// LLM model identifier. If None, uses `gpt-4.1-nano` for named providers.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0 (extraction, not generation).
    pub temperature: f32,

    /// Max tokens the model may generate. Default: 2048.
    pub max_tokens: usize,

    /// Total budget for the LLM call including its retry. Default: 30 s.
    ///
    /// The heuristic path never waits on this; fusion waits at most this long.
    pub llm_timeout: Duration,

    /// Retries after a failed or malformed LLM answer. Default: 1.
    pub llm_max_retries: u32,

    /// Delay before a retry, in milliseconds. Default: 250.
    pub retry_backoff_ms: u64,

    /// OCR lines per page sent to the model. Default: 200.
    pub max_prompt_lines: usize,

    /// Custom system prompt. If None, uses the built-in extraction prompt.
    pub system_prompt: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_rendered_pixels: 4000,
            thresholds: Thresholds::default(),
            ocr: OcrSettings::default(),
            validation: ValidationSettings::default(),
            keywords: Arc::new(KeywordSet::default()),
            stop_labels: Vec::new(),
            llm_enabled: true,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 2048,
            llm_timeout: Duration::from_secs(30),
            llm_max_retries: 1,
            retry_backoff_ms: 250,
            max_prompt_lines: 200,
            system_prompt: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DetectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("thresholds", &self.thresholds)
            .field("ocr", &self.ocr)
            .field("validation", &self.validation)
            .field("keywords", &self.keywords.len())
            .field("stop_labels", &self.stop_labels)
            .field("llm_enabled", &self.llm_enabled)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("llm_timeout", &self.llm_timeout)
            .field("llm_max_retries", &self.llm_max_retries)
            .finish()
    }
}

impl DetectionConfig {
    /// Create a new builder for `DetectionConfig`.
    pub fn builder() -> DetectionConfigBuilder {
        DetectionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`DetectionConfig`].
#[derive(Debug)]
pub struct DetectionConfigBuilder {
    config: DetectionConfig,
}

impl DetectionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.config.thresholds = thresholds;
        self
    }

    pub fn ocr(mut self, ocr: OcrSettings) -> Self {
        self.config.ocr = ocr;
        self
    }

    pub fn validation(mut self, validation: ValidationSettings) -> Self {
        self.config.validation = validation;
        self
    }

    pub fn keywords(mut self, keywords: KeywordSet) -> Self {
        self.config.keywords = Arc::new(keywords);
        self
    }

    pub fn stop_labels(mut self, labels: Vec<String>) -> Self {
        self.config.stop_labels = labels
            .into_iter()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect();
        self
    }

    pub fn llm_enabled(mut self, v: bool) -> Self {
        self.config.llm_enabled = v;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn llm_timeout(mut self, timeout: Duration) -> Self {
        self.config.llm_timeout = timeout;
        self
    }

    pub fn llm_max_retries(mut self, n: u32) -> Self {
        self.config.llm_max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_prompt_lines(mut self, n: usize) -> Self {
        self.config.max_prompt_lines = n.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Overlay every section present in a loaded [`ConfigFile`].
    pub fn apply_file(mut self, file: ConfigFile) -> Self {
        if let Some(t) = file.thresholds {
            self.config.thresholds = t;
        }
        if let Some(o) = file.ocr {
            self.config.ocr = o;
        }
        if let Some(v) = file.validation {
            self.config.validation = v;
        }
        if let Some(k) = file.keywords {
            self.config.keywords = Arc::new(KeywordSet::new(k));
        }
        if let Some(s) = file.stop_labels {
            self = self.stop_labels(s);
        }
        if let Some(llm) = file.llm {
            if let Some(enabled) = llm.enabled {
                self.config.llm_enabled = enabled;
            }
            if llm.model.is_some() {
                self.config.model = llm.model;
            }
            if llm.provider.is_some() {
                self.config.provider_name = llm.provider;
            }
            if let Some(secs) = llm.timeout_secs {
                self.config.llm_timeout = Duration::from_secs(secs);
            }
            if let Some(n) = llm.max_retries {
                self.config.llm_max_retries = n;
            }
        }
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DetectionConfig, FormScanError> {
        let c = &self.config;
        let t = &c.thresholds;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(FormScanError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        for (name, v) in [
            ("keyword_fuzzy_threshold", t.keyword_fuzzy_threshold),
            ("confirmed_confidence", t.confirmed_confidence),
            ("unconfirmed_confidence", t.unconfirmed_confidence),
            ("high_confidence_threshold", t.high_confidence_threshold),
            ("confidence_floor", t.confidence_floor),
            ("anchor_similarity_threshold", t.anchor_similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(FormScanError::InvalidConfig(format!(
                    "{name} must be within 0–1, got {v}"
                )));
            }
        }
        if t.proximity_radius_px < 0.0 || t.max_blank_distance_px < 0.0 {
            return Err(FormScanError::InvalidConfig(
                "Pixel distances must be ≥ 0".into(),
            ));
        }
        if t.band_tolerance_ratio <= 0.0 {
            return Err(FormScanError::InvalidConfig(
                "band_tolerance_ratio must be > 0".into(),
            ));
        }
        if c.validation.phone_min_digits > c.validation.phone_max_digits {
            return Err(FormScanError::InvalidConfig(
                "phone_min_digits must be ≤ phone_max_digits".into(),
            ));
        }
        if c.validation.date_formats.is_empty() {
            return Err(FormScanError::InvalidConfig(
                "At least one date format is required".into(),
            ));
        }
        if let NricScheme::Pattern(p) = &c.validation.nric_scheme {
            regex::Regex::new(p).map_err(|e| {
                FormScanError::InvalidConfig(format!("Invalid NRIC pattern '{p}': {e}"))
            })?;
        }
        if c.ocr.concurrency == 0 {
            return Err(FormScanError::InvalidConfig(
                "OCR concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── TOML file ────────────────────────────────────────────────────────────

/// LLM overrides accepted from a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmFileSettings {
    pub enabled: Option<bool>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

/// On-disk configuration. Every section is optional; absent sections keep
/// the builder's current values.
///
/// ```toml
/// stop_labels = ["office use only"]
///
/// [thresholds]
/// confidence_floor = 0.4
///
/// [[keywords]]
/// phrase = "passport no"
/// field_type = "nric"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub thresholds: Option<Thresholds>,
    pub ocr: Option<OcrSettings>,
    pub validation: Option<ValidationSettings>,
    pub keywords: Option<Vec<KeywordRule>>,
    pub stop_labels: Option<Vec<String>>,
    pub llm: Option<LlmFileSettings>,
}

impl ConfigFile {
    /// Read and parse a TOML config file. A missing file yields the empty
    /// (all-default) config.
    pub fn load(path: &Path) -> Result<ConfigFile, FormScanError> {
        if !path.exists() {
            return Ok(ConfigFile::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| FormScanError::ConfigLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::parse(&contents).map_err(|detail| FormScanError::ConfigLoad {
            path: path.to_path_buf(),
            detail,
        })
    }

    pub fn parse(contents: &str) -> Result<ConfigFile, String> {
        toml::from_str(contents).map_err(|e| e.to_string())
    }
}
