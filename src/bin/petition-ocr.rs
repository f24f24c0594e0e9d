//! CLI binary for petition-ocr.
//!
//! A thin shim over the library crate that maps CLI flags onto
//! `PipelineConfig` / `PetitionJob` and prints results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use petition_ocr::{
    BatchProgressCallback, CredentialCipher, CredentialSource, CredentialStore, CropConfig,
    FileCredentialStore, HttpTransport, JobOutput, JobRequest, JsonFileSink, NoopProgressCallback,
    PetitionJob, PipelineConfig, ProviderKind, ReqwestTransport, RetryPolicy, RpcMatchingProcedure,
    SourceFile,
};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

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

/// Terminal progress: one bar over images, one log line per chunk and per
/// failed image.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Cropping pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Self {
            bar,
            errors: AtomicUsize::new(0),
        }
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
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
    fn on_batch_start(&self, total_images: usize, total_chunks: usize) {
        self.activate_bar(total_images);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Extracting {total_images} page(s) in {total_chunks} chunk(s)…"
            ))
        ));
    }

    fn on_progress(&self, fraction: f64, chunk: usize, total_chunks: usize) {
        let len = self.bar.length().unwrap_or(0);
        self.bar.set_position((fraction * len as f64).round() as u64);
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}",
            green("✓"),
            chunk,
            total_chunks,
            dim(&format!("{:>3.0}%", fraction * 100.0)),
        ));
    }

    fn on_image_error(&self, page_num: usize, filename: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3} {}  {}",
            red("✗"),
            page_num,
            dim(filename),
            red(&msg)
        ));
    }

    fn on_batch_complete(&self, total_images: usize, total_records: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} rows from {} pages",
                green("✔"),
                bold(&total_records.to_string()),
                total_images
            );
        } else {
            eprintln!(
                "{} {} rows from {} pages  ({} failed)",
                cyan("⚠"),
                bold(&total_records.to_string()),
                total_images,
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract rows with an API key from the environment
  MISTRAL_API_KEY=... petition-ocr extract --crop-config crop.json --provider mistral ward7.pdf

  # Use a stored, encrypted key and persist under a campaign
  petition-ocr extract --crop-config crop.json --provider openai \
      --owner alice --credentials keys.json --campaign spring-2024 scans/*.jpg

  # Also run the matching procedure after persisting
  petition-ocr extract ... --campaign spring-2024 \
      --match-url https://db.example.org/rest/v1 --match-key $DB_KEY

  # Store an API key (read from stdin)
  echo "$OPENAI_KEY" | petition-ocr store-key --owner alice --provider openai --credentials keys.json

CROP CONFIG (crop.json):
  {"TOP_CROP": 0.22, "BOTTOM_CROP": 0.93}
  (topCropFraction / bottomCropFraction are accepted too)

ENVIRONMENT VARIABLES:
  PETITION_OCR_API_KEY     Vendor key (overrides stored credentials)
  OPENAI_API_KEY, MISTRAL_API_KEY, GEMINI_API_KEY
                           Fallback vendor keys
  PETITION_OCR_MASTER_KEY  Base64 32-byte key protecting the credential file
  PDFIUM_LIB_PATH          Path to libpdfium (file or directory)
  RUST_LOG                 Log filter override
"#;

/// Digitise scanned petition pages with vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "petition-ocr",
    version,
    about = "Digitise scanned petition pages with vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PETITION_OCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PETITION_OCR_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crop, extract and (optionally) persist signer rows.
    Extract(ExtractArgs),
    /// Encrypt and store a vendor API key read from stdin.
    StoreKey(StoreKeyArgs),
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Petition scans: PDFs and/or images, processed in the given order.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// JSON document with the crop fractions.
    #[arg(long, env = "PETITION_OCR_CROP_CONFIG")]
    crop_config: Option<PathBuf>,

    /// Vendor: openai, mistral, gemini.
    #[arg(long, env = "PETITION_OCR_PROVIDER", default_value = "openai")]
    provider: ProviderKind,

    /// Vendor API key. Takes precedence over stored credentials.
    #[arg(long, env = "PETITION_OCR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(flatten)]
    store: StoreArgs,

    /// Persist rows under this campaign (replaces earlier rows).
    #[arg(long, env = "PETITION_OCR_CAMPAIGN")]
    campaign: Option<String>,

    /// Directory holding one JSON file per campaign.
    #[arg(long, env = "PETITION_OCR_SINK_DIR", default_value = "campaigns")]
    sink_dir: PathBuf,

    /// Text file with a custom extraction prompt.
    #[arg(long, env = "PETITION_OCR_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Images in flight per chunk.
    #[arg(short, long, env = "PETITION_OCR_BATCH_SIZE", default_value_t = 10)]
    batch_size: usize,

    /// Override the vendor's default model.
    #[arg(long, env = "PETITION_OCR_MODEL")]
    model: Option<String>,

    /// Override the vendor endpoint (e.g. a proxy).
    #[arg(long, env = "PETITION_OCR_ENDPOINT")]
    endpoint: Option<String>,

    /// Max output tokens per page.
    #[arg(long, env = "PETITION_OCR_MAX_TOKENS")]
    max_tokens: Option<u32>,

    /// Delay between dispatches inside one chunk, in milliseconds.
    #[arg(long, env = "PETITION_OCR_PACING_MS")]
    pacing_ms: Option<u64>,

    /// Attempts per image on HTTP 429, including the first. `1` disables retrying.
    #[arg(long, env = "PETITION_OCR_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// How the wait between attempts grows.
    #[arg(long, value_enum, env = "PETITION_OCR_BACKOFF", default_value_t = BackoffArg::Linear)]
    backoff: BackoffArg,

    /// Backoff step (linear) or base (exponential), in milliseconds.
    #[arg(long, env = "PETITION_OCR_BACKOFF_MS", default_value_t = 5000)]
    backoff_ms: u64,

    /// PDF rasterisation scale.
    #[arg(long, env = "PETITION_OCR_RENDER_SCALE", default_value_t = 2.0)]
    render_scale: f32,

    /// libpdfium location (file or directory). Default: system library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Also write each normalised page PNG to this directory.
    #[arg(long, env = "PETITION_OCR_SAVE_IMAGES")]
    save_images: Option<PathBuf>,

    /// Base URL of the matching RPC endpoint; enables matching.
    #[arg(long, env = "PETITION_OCR_MATCH_URL", requires = "campaign")]
    match_url: Option<String>,

    /// Name of the matching procedure.
    #[arg(long, env = "PETITION_OCR_MATCH_PROCEDURE", default_value = RpcMatchingProcedure::DEFAULT_NAME)]
    match_procedure: String,

    /// API key for the matching endpoint.
    #[arg(long, env = "PETITION_OCR_MATCH_KEY", hide_env_values = true)]
    match_key: Option<String>,

    /// Output the full job result as JSON.
    #[arg(long, env = "PETITION_OCR_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PETITION_OCR_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackoffArg {
    /// Wait `attempt × step`.
    Linear,
    /// Double the wait after every attempt.
    Exponential,
}

/// Where encrypted keys live.
#[derive(Args, Debug)]
struct StoreArgs {
    /// Owner the key belongs to.
    #[arg(long, env = "PETITION_OCR_OWNER")]
    owner: Option<String>,

    /// Credential store file.
    #[arg(long, env = "PETITION_OCR_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Base64 32-byte master key.
    #[arg(long, env = "PETITION_OCR_MASTER_KEY", hide_env_values = true)]
    master_key: Option<String>,
}

#[derive(Args, Debug)]
struct StoreKeyArgs {
    /// Vendor the key is for.
    #[arg(long)]
    provider: ProviderKind,

    #[command(flatten)]
    store: StoreArgs,

    /// Deactivate the stored key instead of storing a new one.
    #[arg(long)]
    deactivate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar provides all the feedback that matters; keep library
    // INFO logs out of its way unless asked.
    let show_progress = match &cli.command {
        Command::Extract(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::StoreKey(_) => false,
    };
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

    match cli.command {
        Command::Extract(args) => run_extract(args, show_progress, cli.quiet).await,
        Command::StoreKey(args) => run_store_key(args, cli.quiet).await,
    }
}

async fn run_extract(args: ExtractArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let config = build_config(&args).await?;
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new());
    let credentials = resolve_credentials(&args)?;

    let mut job = PetitionJob::new(config, Arc::clone(&transport), credentials);
    if args.campaign.is_some() {
        job = job.with_sink(Arc::new(JsonFileSink::new(&args.sink_dir)));
    }
    if let Some(url) = &args.match_url {
        let key = args
            .match_key
            .clone()
            .context("--match-url needs --match-key (or PETITION_OCR_MATCH_KEY)")?;
        job = job.with_matching(Arc::new(RpcMatchingProcedure::new(
            url.clone(),
            args.match_procedure.clone(),
            key,
            Arc::clone(&transport),
        )));
    }
    if let Some(dir) = &args.save_images {
        job = job.save_images_to(dir);
    }

    let mut sources = Vec::with_capacity(args.files.len());
    for path in &args.files {
        sources.push(
            SourceFile::from_path(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        );
    }

    let request = JobRequest {
        provider: args.provider,
        campaign_key: args.campaign.clone(),
    };

    let output = if show_progress {
        job.run(&sources, &request, &CliProgressCallback::new()).await
    } else {
        job.run(&sources, &request, &NoopProgressCallback).await
    }
    .context("Extraction failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        print_rows(&output)?;
    }

    if !quiet {
        print_summary(&output, args.campaign.as_deref(), show_progress);
    }
    Ok(())
}

/// One tab-separated line per row: page, row, name, address, date, ward.
fn print_rows(output: &JobOutput) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for r in &output.records {
        writeln!(
            handle,
            "{}\t{}\t{}\t{}\t{}\t{}",
            r.page_number,
            r.row_number,
            r.record.name.as_deref().unwrap_or(""),
            r.record.address.as_deref().unwrap_or(""),
            r.record.date.as_deref().unwrap_or(""),
            r.record.ward.as_deref().unwrap_or(""),
        )
        .context("Failed to write to stdout")?;
    }
    Ok(())
}

fn print_summary(output: &JobOutput, campaign: Option<&str>, show_progress: bool) {
    let stats = &output.stats;
    if !show_progress {
        eprintln!(
            "Extracted {} rows from {} pages ({} source files) in {}ms",
            stats.total_records, stats.normalized_images, stats.source_files, stats.total_duration_ms
        );
        if stats.failed_images > 0 {
            eprintln!("  {} pages failed", stats.failed_images);
        }
    } else {
        eprintln!(
            "   {} pages with no rows  —  {}ms total",
            dim(&stats.empty_images.to_string()),
            stats.total_duration_ms
        );
    }
    if let Some(campaign) = campaign {
        eprintln!("   stored under campaign {}", bold(campaign));
    }
    match &output.matching {
        petition_ocr::MatchingOutcome::Skipped => {}
        petition_ocr::MatchingOutcome::Completed { procedure } => {
            eprintln!("   {} matching '{}' done", green("✔"), procedure)
        }
        petition_ocr::MatchingOutcome::Failed { procedure, detail } => {
            eprintln!("   {} matching '{}' failed: {}", red("✘"), procedure, detail)
        }
    }
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(args: &ExtractArgs) -> Result<PipelineConfig> {
    let crop = match &args.crop_config {
        Some(path) => Some(
            CropConfig::from_json_file(path)
                .with_context(|| format!("Failed to load crop config from {}", path.display()))?,
        ),
        None => None,
    };

    let prompt = if let Some(ref path) = args.prompt_file {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read prompt from {}", path.display()))?,
        )
    } else {
        None
    };

    let kind = args.provider;
    let mut builder = PipelineConfig::builder()
        .maybe_crop(crop)
        .batch_size(args.batch_size)
        .render_scale(args.render_scale);

    if let Some(p) = prompt {
        builder = builder.prompt(p);
    }
    if let Some(lib) = &args.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    if let Some(model) = &args.model {
        builder = builder.model(kind, model);
    }
    if let Some(endpoint) = &args.endpoint {
        builder = builder.endpoint(kind, endpoint);
    }
    if let Some(n) = args.max_tokens {
        builder = builder.max_tokens(kind, n);
    }
    if let Some(ms) = args.pacing_ms {
        builder = builder.pacing(kind, Some(Duration::from_millis(ms)));
    }
    if let Some(attempts) = args.max_attempts {
        let step = Duration::from_millis(args.backoff_ms);
        let policy = match (attempts, args.backoff) {
            (0 | 1, _) => RetryPolicy::none(),
            (n, BackoffArg::Linear) => RetryPolicy::linear(n, step),
            (n, BackoffArg::Exponential) => RetryPolicy::exponential(n, step),
        };
        builder = builder.retry(kind, policy);
    }

    builder.build().context("Invalid configuration")
}

/// `--api-key` → stored credential → legacy `<VENDOR>_API_KEY` variable.
fn resolve_credentials(args: &ExtractArgs) -> Result<CredentialSource> {
    if let Some(key) = &args.api_key {
        return Ok(CredentialSource::Plain(Zeroizing::new(key.clone())));
    }

    if args.store.owner.is_some() || args.store.credentials.is_some() {
        let (store, cipher, owner) = open_store(&args.store)?;
        return Ok(CredentialSource::Stored {
            store: Arc::new(store),
            cipher: Arc::new(cipher),
            owner_id: owner,
        });
    }

    match std::env::var(args.provider.legacy_tag()) {
        Ok(key) if !key.trim().is_empty() => Ok(CredentialSource::Plain(Zeroizing::new(key))),
        _ => bail!(
            "No {} API key: pass --api-key, --owner/--credentials/--master-key, or set {}",
            args.provider,
            args.provider.legacy_tag()
        ),
    }
}

fn open_store(args: &StoreArgs) -> Result<(FileCredentialStore, CredentialCipher, String)> {
    let owner = args.owner.clone().context("--owner is required")?;
    let path = args.credentials.clone().context("--credentials is required")?;
    let master = args
        .master_key
        .as_deref()
        .context("--master-key (or PETITION_OCR_MASTER_KEY) is required")?;
    let cipher = CredentialCipher::from_base64(master).context("Invalid master key")?;
    Ok((FileCredentialStore::new(path), cipher, owner))
}

async fn run_store_key(args: StoreKeyArgs, quiet: bool) -> Result<()> {
    let (store, cipher, owner) = open_store(&args.store)?;

    if args.deactivate {
        store
            .deactivate(&owner, args.provider)
            .await
            .context("Failed to deactivate key")?;
        if !quiet {
            eprintln!("{} {} key for '{}' deactivated", green("✔"), args.provider, owner);
        }
        return Ok(());
    }

    let mut raw = Zeroizing::new(String::new());
    io::stdin()
        .read_to_string(&mut raw)
        .context("Failed to read key from stdin")?;
    let key = raw.trim();
    if key.is_empty() {
        bail!("No key on stdin");
    }

    let secret = cipher.encrypt(key).context("Failed to encrypt key")?;
    store
        .upsert(&owner, args.provider, secret)
        .await
        .context("Failed to store key")?;

    if !quiet {
        eprintln!(
            "{} {} key stored for '{}' in {}",
            green("✔"),
            args.provider,
            owner,
            store.path().display()
        );
    }
    Ok(())
}
