//! CLI binary for po2ledger.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`/`LedgerConfig` and prints results.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use po2ledger::{
    ingest_batch, parse_order_day, write_workbook, BackendStatus, BatchProgressCallback,
    DateRange, DualWriteLedger, LedgerConfig, LoadSource, PipelineConfig, ResetReceipt,
    SourceDocument,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
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

/// Shorten long error messages on a character boundary so one bad reply
/// cannot wreck the progress log. Order forms are Korean; byte slicing would
/// panic mid-character.
fn truncate_message(msg: &str, max_chars: usize) -> String {
    if msg.chars().count() <= max_chars {
        msg.to_string()
    } else {
        let head: String = msg.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{head}\u{2026}")
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: renders a live progress bar and a per-document
/// log line using [indicatif]. Documents are processed one at a time, so the
/// per-document start times never race.
struct CliProgressCallback {
    /// The single progress bar anchored at the bottom of the terminal.
    bar: ProgressBar,
    /// Per-document wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Create a callback whose progress-bar length is set dynamically
    /// by `on_batch_start` (called before any documents are processed).
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_batch_start

        // Initial style: spinner only (no counter until we know the total).
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading documents…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    /// Switch to the full progress-bar style once we know `total`.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>2}/{len} documents  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        // Switch from spinner-only style to full progress bar now that we
        // know the actual document count.
        self.activate_bar(total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting extraction of {total} document(s)…"))
        ));
    }

    fn on_document_start(&self, index: usize, _total: usize, filename: &str) {
        self.start_times
            .lock()
            .unwrap()
            .insert(index, Instant::now());
        self.bar.set_message(filename.to_string());
    }

    fn on_document_complete(&self, index: usize, total: usize, filename: &str, rows: usize) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&index)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.bar.println(format!(
            "  {} [{:>2}/{:<2}] {}  {}  {}",
            green("✓"),
            index,
            total,
            filename,
            dim(&format!("{rows} row(s)")),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, filename: &str, error: &str) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&index)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        let msg = truncate_message(error, 80);

        self.bar.println(format!(
            "  {} [{:>2}/{:<2}] {}  {}  {}",
            red("✗"),
            index,
            total,
            filename,
            red(&msg),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        let failed = total.saturating_sub(succeeded);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} document(s) extracted successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents extracted  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one scanned order and append it to the ledger
  po2ledger ingest order_0520.pdf

  # A morning's worth of faxes in one batch
  po2ledger ingest scans/*.pdf

  # Preview the extracted rows without touching the ledger
  po2ledger ingest --dry-run order_0520.pdf

  # Export the whole ledger to a month-tabbed workbook
  po2ledger export -o po_report.xlsx

  # Export May only
  po2ledger export --start 2024-05-01 --end 2024-05-31

  # Wipe both backends (requires confirmation)
  po2ledger reset --yes

LEDGER BACKENDS:
  Backend   Needs                       When unavailable
  ───────   ─────────────────────────   ───────────────────────────────
  remote    PO2LEDGER_SHEETS_TOKEN      skipped; ingest continues local-only
  local     writable --local-db path    failed; remote carries the rows

  An append only errors when NEITHER backend persisted the rows.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY             Vision-model API key (required for ingest)
  PO2LEDGER_SHEET_URL        Hosted spreadsheet URL
  PO2LEDGER_SHEET_NAME       Spreadsheet title to find or create (default: po_ledger)
  PO2LEDGER_SHEETS_TOKEN     OAuth bearer token for the hosted sheet APIs
  PO2LEDGER_ADMIN_EMAIL      Share newly created spreadsheets with this account
  PO2LEDGER_LOCAL_DB         Local CSV path (default: po_database.csv)
  PO2LEDGER_MODEL            Primary vision model
  PO2LEDGER_FALLBACK_MODEL   Fallback vision model

SETUP:
  1. Set API key:   export GEMINI_API_KEY=AIza...
  2. Ingest:        po2ledger ingest order_0520.pdf
  3. Export:        po2ledger export -o po_report.xlsx

  Without PO2LEDGER_SHEETS_TOKEN the ledger runs local-only: rows land in
  the CSV at --local-db and the hosted sheet is skipped.
"#;

/// Extract scanned purchase orders into a dual-backend ledger.
#[derive(Parser, Debug)]
#[command(
    name = "po2ledger",
    version,
    about = "Extract scanned purchase orders into a dual-backend ledger",
    long_about = "Extract structured purchase-order data from scanned PDFs using a vision model, \
append it to a dual-backend ledger (hosted spreadsheet + local CSV), and export month-tabbed \
xlsx reports.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// API key for the vision-model service.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Hosted spreadsheet URL. When unset, the sheet is looked up (or
    /// created) by --sheet-name.
    #[arg(long, env = "PO2LEDGER_SHEET_URL", global = true)]
    sheet_url: Option<String>,

    /// Spreadsheet title used to find or create the hosted sheet.
    #[arg(
        long,
        env = "PO2LEDGER_SHEET_NAME",
        default_value = "po_ledger",
        global = true
    )]
    sheet_name: String,

    /// OAuth bearer token for the hosted sheet APIs. Without it the ledger
    /// runs local-only.
    #[arg(
        long,
        env = "PO2LEDGER_SHEETS_TOKEN",
        hide_env_values = true,
        global = true
    )]
    sheets_token: Option<String>,

    /// Share newly created spreadsheets with this account.
    #[arg(long, env = "PO2LEDGER_ADMIN_EMAIL", global = true)]
    admin_email: Option<String>,

    /// Local CSV database path.
    #[arg(
        long,
        env = "PO2LEDGER_LOCAL_DB",
        default_value = "po_database.csv",
        global = true
    )]
    local_db: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PO2LEDGER_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(
        short,
        long,
        env = "PO2LEDGER_QUIET",
        conflicts_with = "verbose",
        global = true
    )]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract purchase orders from scanned PDFs and append them to the ledger.
    Ingest(IngestArgs),
    /// Export ledger rows to a month-tabbed xlsx workbook.
    Export(ExportArgs),
    /// Delete every row from both ledger backends.
    Reset(ResetArgs),
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Scanned PDF files to process, in order.
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Primary vision model.
    #[arg(
        long,
        env = "PO2LEDGER_MODEL",
        default_value = "models/gemini-flash-latest"
    )]
    model: String,

    /// Model switched to when the primary reports "not found".
    #[arg(
        long,
        env = "PO2LEDGER_FALLBACK_MODEL",
        default_value = "models/gemini-1.5-flash-001"
    )]
    fallback_model: String,

    /// Total extraction attempts per document, across both models.
    #[arg(long, env = "PO2LEDGER_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..=10))]
    max_attempts: u32,

    /// Pause between documents in seconds, to stay under rate limits.
    #[arg(long, env = "PO2LEDGER_PACING", default_value_t = 5,
          value_parser = clap::value_parser!(u64).range(0..=120))]
    pacing: u64,

    /// Rasterisation scale factor (1.0–4.0).
    #[arg(long, env = "PO2LEDGER_SCALE", default_value_t = 2.0)]
    scale: f32,

    /// Per-call API timeout in seconds.
    #[arg(long, env = "PO2LEDGER_API_TIMEOUT", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(5..=600))]
    timeout: u64,

    /// Own-company name variants the model must never return as the client.
    /// Comma-separated or repeated.
    #[arg(long, env = "PO2LEDGER_EXCLUDE_CLIENT", value_delimiter = ',')]
    exclude_client: Vec<String>,

    /// Extract and print rows as TSV without writing to the ledger.
    #[arg(long)]
    dry_run: bool,

    /// Disable the progress bar.
    #[arg(long, env = "PO2LEDGER_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Write the workbook to this path.
    #[arg(short, long, default_value = "po_report.xlsx")]
    output: PathBuf,

    /// First order date to include (YYYY-MM-DD, inclusive).
    #[arg(long, value_parser = parse_cli_date)]
    start: Option<NaiveDate>,

    /// Last order date to include (YYYY-MM-DD, inclusive).
    #[arg(long, value_parser = parse_cli_date)]
    end: Option<NaiveDate>,
}

#[derive(Args, Debug)]
struct ResetArgs {
    /// Confirm the wipe; without this flag nothing is touched.
    #[arg(long)]
    yes: bool,
}

/// Parse `--start`/`--end` values, accepting the same date spellings the
/// ledger accepts in its order-date column.
fn parse_cli_date(s: &str) -> std::result::Result<NaiveDate, String> {
    parse_order_day(s)
        .ok_or_else(|| format!("invalid date '{s}': expected YYYY-MM-DD (or YYYY.MM.DD, YYYY/MM/DD)"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress =
        !cli.quiet && matches!(&cli.command, Command::Ingest(args) if !args.no_progress);
    let filter = if cli.quiet || show_progress {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    // In verbose mode we always want all logs regardless of progress.
    let filter = if cli.verbose { "debug" } else { filter };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Ingest(args) => run_ingest(&cli, args, show_progress).await,
        Command::Export(args) => run_export(&cli, args).await,
        Command::Reset(args) => run_reset(&cli, args).await,
    }
}

/// Map the global ledger flags to a `LedgerConfig`.
fn ledger_config(cli: &Cli) -> Result<LedgerConfig> {
    let mut builder = LedgerConfig::builder()
        .sheet_name(&cli.sheet_name)
        .local_path(&cli.local_db);
    if let Some(ref url) = cli.sheet_url {
        builder = builder.sheet_url(url);
    }
    if let Some(ref token) = cli.sheets_token {
        builder = builder.remote_token(token);
    }
    if let Some(ref email) = cli.admin_email {
        builder = builder.admin_email(email);
    }
    builder.build().context("Invalid ledger configuration")
}

async fn run_ingest(cli: &Cli, args: &IngestArgs, show_progress: bool) -> Result<()> {
    let api_key = cli.api_key.clone().unwrap_or_default();
    if api_key.trim().is_empty() {
        anyhow::bail!("no API key configured — set GEMINI_API_KEY or pass --api-key");
    }

    // ── Read source documents ────────────────────────────────────────────
    let mut documents = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let doc = SourceDocument::from_path(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        documents.push(doc);
    }

    // ── Build pipeline config ────────────────────────────────────────────
    let mut builder = PipelineConfig::builder()
        .api_key(api_key)
        .primary_model(&args.model)
        .fallback_model(&args.fallback_model)
        .max_attempts(args.max_attempts)
        .document_pacing_secs(args.pacing)
        .render_scale(args.scale)
        .api_timeout_secs(args.timeout)
        .excluded_client_keywords(args.exclude_client.clone());

    if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        builder = builder.progress_callback(cb as Arc<dyn BatchProgressCallback>);
    }

    let config = builder.build().context("Invalid configuration")?;

    // ── Run the batch ────────────────────────────────────────────────────
    let outcome = ingest_batch(&documents, &config)
        .await
        .context("Ingestion failed")?;

    // Per-document log lines come from the progress callback when it is
    // active; print a compact summary otherwise.
    if !cli.quiet && !show_progress {
        for doc in &outcome.documents {
            match &doc.error {
                None => eprintln!(
                    "  {} {}  {} row(s)  {}ms",
                    green("✓"),
                    doc.filename,
                    doc.rows.len(),
                    doc.duration_ms
                ),
                Some(e) => eprintln!(
                    "  {} {}  {}",
                    red("✗"),
                    doc.filename,
                    red(&truncate_message(&e.to_string(), 120))
                ),
            }
        }
    }

    if !outcome.any_succeeded() {
        anyhow::bail!(
            "all {} document(s) failed; nothing to append",
            outcome.stats.total_documents
        );
    }

    // ── Dry run: show the rows, skip the ledger ──────────────────────────
    if args.dry_run {
        for row in &outcome.rows {
            println!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                row.order_date,
                row.client_name,
                row.item_name_with_spec,
                row.qty,
                row.consignee,
                row.phone_number,
                row.address,
                row.payment_type,
                row.remarks,
                row.filename,
            );
        }
        if !cli.quiet {
            eprintln!(
                "{} dry run: {} row(s) extracted, ledger untouched",
                cyan("◆"),
                bold(&outcome.rows.len().to_string())
            );
        }
        return Ok(());
    }

    // ── Append to the ledger ─────────────────────────────────────────────
    // Ledger I/O is blocking (CSV on disk, blocking HTTP); keep it off the
    // async workers.
    let ledger_config = ledger_config(cli)?;
    let rows = outcome.rows.clone();
    let receipt = tokio::task::spawn_blocking(move || {
        let ledger = DualWriteLedger::open(&ledger_config)?;
        ledger.append(&rows)
    })
    .await
    .context("Ledger task panicked")??;

    if !cli.quiet {
        eprintln!(
            "{} {} row(s) appended  (remote: {}, local: {})",
            if receipt.degraded() {
                yellow("⚠")
            } else {
                green("✔")
            },
            bold(&receipt.appended.to_string()),
            receipt.remote,
            receipt.local,
        );
        if receipt.degraded() {
            eprintln!(
                "   {}",
                yellow("one backend missed this batch; the rows are safe in the other")
            );
        }
        eprintln!(
            "   {}",
            dim(&format!(
                "{} document(s), {} failed  —  {}ms total",
                outcome.stats.total_documents,
                outcome.stats.failed,
                outcome.stats.total_duration_ms
            ))
        );
    }

    Ok(())
}

async fn run_export(cli: &Cli, args: &ExportArgs) -> Result<()> {
    let range = match (args.start, args.end) {
        (Some(start), Some(end)) => {
            if start > end {
                anyhow::bail!("--start {start} is after --end {end}");
            }
            Some(DateRange::new(start, end))
        }
        (None, None) => None,
        _ => anyhow::bail!("--start and --end must be given together"),
    };

    let ledger_config = ledger_config(cli)?;
    let output = args.output.clone();
    let (count, source) = tokio::task::spawn_blocking(
        move || -> po2ledger::Result<(usize, LoadSource)> {
            let ledger = DualWriteLedger::open(&ledger_config)?;
            let snapshot = match range {
                Some(ref range) => ledger.load_range(range),
                None => ledger.load_all(),
            };
            write_workbook(&output, &snapshot.entries)?;
            Ok((snapshot.entries.len(), snapshot.source))
        },
    )
    .await
    .context("Export task panicked")??;

    if !cli.quiet {
        let source = match source {
            LoadSource::Remote => "hosted sheet",
            LoadSource::Local => "local CSV",
            LoadSource::Neither => "no reachable backend",
        };
        eprintln!(
            "{} {} row(s) from {}  →  {}",
            green("✔"),
            bold(&count.to_string()),
            source,
            bold(&args.output.display().to_string()),
        );
    }

    Ok(())
}

async fn run_reset(cli: &Cli, args: &ResetArgs) -> Result<()> {
    if !args.yes {
        anyhow::bail!("reset deletes every row from both ledger backends; pass --yes to confirm");
    }

    let ledger_config = ledger_config(cli)?;
    let receipt = tokio::task::spawn_blocking(move || -> po2ledger::Result<ResetReceipt> {
        let ledger = DualWriteLedger::open(&ledger_config)?;
        Ok(ledger.reset())
    })
    .await
    .context("Ledger task panicked")??;

    if !cli.quiet {
        let clean = !matches!(receipt.remote, BackendStatus::Failed(_))
            && !matches!(receipt.local, BackendStatus::Failed(_));
        eprintln!(
            "{} ledger reset  (remote: {}, local: {})",
            if clean { green("✔") } else { cyan("⚠") },
            receipt.remote,
            receipt.local,
        );
    }

    Ok(())
}
