//! CLI binary for formscan.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `DetectionConfig` and prints the detected fields.

use anyhow::{Context, Result};
use clap::Parser;
use formscan::pipeline::input::{is_url, resolve_local};
use formscan::{
    detect, ConfigFile, DetectionConfig, DetectionOutput, DetectionProgressCallback,
    ProgressCallback, SourceKind,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner while rendering, a page bar during OCR,
/// and a spinner again while the detectors run. Pages may finish out of
/// order.
struct CliProgressCallback {
    bar: ProgressBar,
    tokens: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(spinner_style());
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            tokens: AtomicUsize::new(0),
        })
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS)
}

fn bar_style(unit: &str) -> ProgressStyle {
    ProgressStyle::with_template(&format!(
        "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  ⏱ {{elapsed_precise}}"
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(TICKS)
}

impl DetectionProgressCallback for CliProgressCallback {
    fn on_detection_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(bar_style("pages"));
        self.bar.set_prefix("OCR");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reading {total_pages} page(s)…"))
        ));
    }

    fn on_page_recognized(&self, page_num: usize, total_pages: usize, tokens: usize) {
        self.tokens.fetch_add(tokens, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{tokens:>5} words")),
        ));
        self.bar.inc(1);
        if self.bar.position() >= total_pages as u64 {
            self.bar.set_style(spinner_style());
            self.bar.set_prefix("Detecting");
            self.bar.set_message("labels, blanks and types…");
        }
    }

    fn on_llm_unavailable(&self, reason: &str) {
        let msg = if reason.chars().count() > 80 {
            format!("{}\u{2026}", reason.chars().take(79).collect::<String>())
        } else {
            reason.to_string()
        };
        self.bar.println(format!(
            "  {} LLM unavailable, heuristic-only: {}",
            yellow("⚠"),
            dim(&msg)
        ));
    }

    fn on_detection_complete(&self, field_count: usize, heuristic_only: bool) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} fields detected from {} words{}",
            green("✔"),
            bold(&field_count.to_string()),
            self.tokens.load(Ordering::SeqCst),
            if heuristic_only {
                yellow("  (heuristic-only)")
            } else {
                String::new()
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Detect fields, JSON on stdout
  formscan application.pdf

  # Write JSON to a file
  formscan scan.png -o fields.json

  # Human-readable field list
  formscan --summary application.pdf

  # Keyword heuristics only (no LLM call)
  formscan --no-llm application.pdf

  # Tuned thresholds and keywords from a TOML file
  formscan --config formscan.toml application.pdf

  # Another OCR language and model
  formscan --lang eng+msa --model gpt-4.1-mini --provider openai form.jpg

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download
  RUST_LOG                Log filter, e.g. formscan=debug

SETUP:
  1. Install tesseract:  apt install tesseract-ocr   (or brew install tesseract)
  2. Optional LLM key:   export OPENAI_API_KEY=sk-...
  3. Detect:             formscan application.pdf

  Without an API key the LLM extractor is skipped and the output is flagged
  heuristic_only. PDFium (~30 MB) is downloaded on the first PDF upload.
"#;

/// Detect, type and order the fillable fields of a scanned or PDF form.
#[derive(Parser, Debug)]
#[command(
    name = "formscan",
    version,
    about = "Detect, type and order the fillable fields of a scanned or PDF form",
    long_about = "Run OCR over a form (PDF, PNG or JPEG; local file or URL), find its fields \
with keyword heuristics over the page geometry and, when a provider is configured, an LLM \
reading of the text. Prints the fused, typed fields in reading order as JSON.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF/PNG/JPEG path or HTTP/HTTPS URL.
    input: String,

    /// Write the JSON result to this file instead of stdout.
    #[arg(short, long, env = "FORMSCAN_OUTPUT")]
    output: Option<PathBuf>,

    /// Print a field table instead of JSON.
    #[arg(long)]
    summary: bool,

    /// TOML file with thresholds, OCR, validation, keyword and LLM settings.
    #[arg(short, long, env = "FORMSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Skip the LLM extractor; keyword heuristics only.
    #[arg(long, env = "FORMSCAN_NO_LLM")]
    no_llm: bool,

    /// Total LLM budget in seconds, retries included.
    #[arg(long, env = "FORMSCAN_LLM_TIMEOUT")]
    llm_timeout: Option<u64>,

    /// Rendering DPI for PDF pages (72–600).
    #[arg(long, env = "FORMSCAN_DPI",
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: Option<u32>,

    /// Path to the tesseract binary.
    #[arg(long, env = "FORMSCAN_TESSERACT")]
    tesseract: Option<PathBuf>,

    /// Tesseract language(s), e.g. eng or eng+chi_sim.
    #[arg(long, env = "FORMSCAN_LANG")]
    lang: Option<String>,

    /// Tesseract page segmentation mode (0–13).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=13))]
    psm: Option<u8>,

    /// Disable progress bar.
    #[arg(long, env = "FORMSCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FORMSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FORMSCAN_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Ensure PDFium is available for PDF uploads ──────────────────────
    if needs_pdfium(&cli.input) && !pdfium_auto::is_pdfium_cached() {
        fetch_pdfium(cli.quiet)?;
    }

    // ── Build config and run ─────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn DetectionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let output = detect(&cli.input, &config)
        .await
        .context("Field detection failed")?;

    if cli.summary {
        print_summary(&output)?;
    } else {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        match cli.output {
            Some(ref path) => {
                write_atomic(path, &json).await?;
                if !cli.quiet {
                    eprintln!(
                        "{}  {} fields  {}ms  →  {}",
                        green("✔"),
                        output.fields.len(),
                        output.stats.total_duration_ms,
                        bold(&path.display().to_string()),
                    );
                }
            }
            None => println!("{json}"),
        }
    }

    if !cli.quiet && !show_progress {
        eprintln!(
            "Detected {} fields on {} page(s) in {}ms{}",
            output.fields.len(),
            output.stats.page_count,
            output.stats.total_duration_ms,
            if output.heuristic_only {
                " (heuristic-only)"
            } else {
                ""
            }
        );
        if let Some(ref reason) = output.llm_error {
            eprintln!("  LLM: {reason}");
        }
    }

    Ok(())
}

/// Map CLI args (and an optional config file) to `DetectionConfig`.
/// Flags override the file.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<DetectionConfig> {
    let mut builder = DetectionConfig::builder();

    if let Some(ref path) = cli.config {
        let file = ConfigFile::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?;
        builder = builder.apply_file(file);
    }
    if let Some(dpi) = cli.dpi {
        builder = builder.dpi(dpi);
    }
    if let Some(secs) = cli.llm_timeout {
        builder = builder.llm_timeout(Duration::from_secs(secs));
    }
    if cli.no_llm {
        builder = builder.llm_enabled(false);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let mut config = builder.build().context("Invalid configuration")?;

    // OCR overrides apply on top of whatever section the file supplied.
    if let Some(ref bin) = cli.tesseract {
        config.ocr.binary = bin.clone();
    }
    if let Some(ref lang) = cli.lang {
        config.ocr.language = lang.clone();
    }
    if let Some(psm) = cli.psm {
        config.ocr.psm = psm;
    }

    Ok(config)
}

fn needs_pdfium(input: &str) -> bool {
    if is_url(input) {
        return input.to_lowercase().ends_with(".pdf");
    }
    resolve_local(input).is_ok_and(|r| r.kind() == SourceKind::Pdf)
}

/// First-run pdfium download with a byte progress bar.
fn fetch_pdfium(quiet: bool) -> Result<()> {
    if quiet {
        pdfium_auto::ensure_pdfium_library(None).context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.set_message("Connecting…");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;

    dl_bar.finish_with_message("ready ✓");
    Ok(())
}

fn print_summary(output: &DetectionOutput) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for f in &output.fields {
        writeln!(
            out,
            "{}  p{}  {:<32}  {:<9}  {:>4.2}  {}{}",
            f.id,
            f.page_index + 1,
            f.label,
            f.field_type.as_str(),
            f.confidence,
            if f.required { "required " } else { "" },
            dim(&format!(
                "[{}]",
                f.sources
                    .iter()
                    .map(|s| format!("{s:?}").to_lowercase())
                    .collect::<Vec<_>>()
                    .join("+")
            )),
        )
        .context("Failed to write to stdout")?;
    }
    Ok(())
}

/// Write to a temp file next to `path`, then rename.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {:?}", tmp_path))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}
