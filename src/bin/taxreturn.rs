//! CLI binary for taxreturn-core.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints the return summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use taxreturn_core::{
    file_return, file_return_to_file, load_inputs, BatchProgressCallback, FilingStatus, Outcome,
    PipelineConfig, ProgressCallback,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per document.
/// Documents complete out of order, so start times are keyed by index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting {total} document(s)…"))
        ));
    }

    fn on_document_start(&self, index: usize, _total: usize, name: &str) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(index, Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_document_complete(&self, index: usize, total: usize, name: &str) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            green("✓"),
            index + 1,
            total,
            name,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let failed = total.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} document(s) extracted",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} document(s) extracted  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Text-layer statements, single filer
  taxreturn --filing-status single w2.txt 1099-int.txt

  # JSON manifest with scanned pages (needs an LLM provider)
  taxreturn --filing-status mfj documents.json

  # Write the renderer-facing JSON to a file
  taxreturn --filing-status hoh w2.txt -o return.json

  # Drop fields the fallback was unsure about
  taxreturn --filing-status single --confidence-threshold 0.7 scan.json

INPUT FILES:
  *.json   Manifest: one document object or an array of them.
           { "name": "...", "kind_hint": "W-2",
             "pages": [ { "text": "...", "text_layer_ok": true,
                          "image": { "data": "<base64>", "mime_type": "image/png" } } ] }
  other    Plain text: the document's text layer.

FILING STATUS:
  single, married_filing_jointly (mfj), married_filing_separately (mfs),
  head_of_household (hoh)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID

  An LLM provider is only contacted when some document has no usable text
  layer. Text-only batches never need an API key.
"#;

/// Extract W-2 / 1099 statements and compute a federal return.
#[derive(Parser, Debug)]
#[command(
    name = "taxreturn",
    version,
    about = "Extract W-2 / 1099 statements and compute a federal income tax return",
    long_about = "Extract wage and income statements (W-2, 1099-INT, 1099-NEC) into canonical \
records, aggregate them and compute a simplified Form 1040 for the 2024 tax year. Documents \
without a usable text layer are structured by an LLM (OpenAI, Anthropic, Gemini, Ollama, …).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Statement files: plain text or JSON manifests.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Filing status: single, mfj, mfs, hoh.
    #[arg(short, long, env = "TAXRETURN_FILING_STATUS", value_parser = parse_filing_status)]
    filing_status: FilingStatus,

    /// Tax year of the return.
    #[arg(long, env = "TAXRETURN_TAX_YEAR", default_value_t = 2024)]
    tax_year: i32,

    /// Write the JSON return output to this file.
    #[arg(short, long, env = "TAXRETURN_OUTPUT")]
    output: Option<PathBuf>,

    /// Print the JSON return output instead of the summary.
    #[arg(long, env = "TAXRETURN_JSON")]
    json: bool,

    /// LLM model ID used for fallback inference.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "TAXRETURN_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Number of documents extracted concurrently.
    #[arg(short, long, env = "TAXRETURN_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// Retries per document on transient fallback failures (at most 10).
    #[arg(long, env = "TAXRETURN_MAX_RETRIES", default_value_t = 1)]
    max_retries: u32,

    /// Per-attempt fallback timeout in seconds.
    #[arg(long, env = "TAXRETURN_FALLBACK_TIMEOUT", default_value_t = 60)]
    fallback_timeout: u64,

    /// Treat fields at or below this confidence as missing (0.0–1.0).
    #[arg(long, env = "TAXRETURN_CONFIDENCE_THRESHOLD")]
    confidence_threshold: Option<f64>,

    /// Withholding difference (dollars) tolerated between duplicate statements.
    #[arg(long, env = "TAXRETURN_CONFLICT_TOLERANCE", default_value = "1.00")]
    conflict_tolerance: String,

    /// Disable progress bar.
    #[arg(long, env = "TAXRETURN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TAXRETURN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the result.
    #[arg(short, long, env = "TAXRETURN_QUIET")]
    quiet: bool,
}

fn parse_filing_status(s: &str) -> Result<FilingStatus, String> {
    FilingStatus::from_str(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Run ──────────────────────────────────────────────────────────────
    let inputs = load_inputs(&cli.files)
        .await
        .context("Failed to load documents")?;
    let output = match cli.output {
        Some(ref path) => file_return_to_file(&inputs, cli.filing_status, path, &config).await,
        None => file_return(&inputs, cli.filing_status, &config).await,
    }
    .context("Return could not be computed")?;

    if let Some(ref path) = cli.output {
        if !cli.quiet {
            eprintln!(
                "{}  {}  →  {}",
                green("✔"),
                output.summary.outcome,
                bold(&path.display().to_string())
            );
        }
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if cli.output.is_none() || !cli.quiet {
        print!("{}", output.summary);
    }

    if !cli.quiet && !cli.json {
        let stats = &output.stats;
        eprintln!(
            "{}",
            dim(&format!(
                "{}/{} documents  {} via fallback  {} retries  {}ms",
                stats.extracted_documents,
                stats.total_documents,
                stats.fallback_documents,
                stats.total_retries,
                stats.total_duration_ms
            ))
        );
        for failed in &output.summary.failed_documents {
            eprintln!("  {} {}", red("✗"), failed);
        }
        if matches!(output.summary.outcome, Outcome::AmountDue(_)) {
            eprintln!("{}", cyan("Payment is due with this return."));
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let conflict_tolerance = Decimal::from_str(cli.conflict_tolerance.trim())
        .with_context(|| format!("Invalid conflict tolerance '{}'", cli.conflict_tolerance))?;

    let mut builder = PipelineConfig::builder()
        .concurrency(cli.concurrency)
        .tax_year(cli.tax_year)
        .conflict_tolerance(conflict_tolerance)
        .max_retries(cli.max_retries)
        .fallback_timeout_secs(cli.fallback_timeout);

    if let Some(threshold) = cli.confidence_threshold {
        builder = builder.confidence_threshold(threshold);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
