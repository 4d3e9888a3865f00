//! CLI binary for edgequake-doc2pdf.
//!
//! A thin shim over the library crate: maps flags onto `ServiceConfig`,
//! picks the storage and status backends, then either serves the HTTP
//! trigger or runs one conversion in the foreground.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use edgequake_doc2pdf::breaker::CircuitBreaker;
use edgequake_doc2pdf::server::{self, AppState};
use edgequake_doc2pdf::{
    ConversionPipeline, ConversionProgressCallback, ConversionRequest, Dispatcher, DocumentStore,
    FirestoreDocumentStore, GcsObjectStore, LibreOfficeEngine, LocalObjectStore,
    MemoryDocumentStore, MemoryObjectStore, ObjectStore, PipelineStage, ServiceConfig,
    TokenSource,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal spinner that names the stage a foreground run is in.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("doc2pdf");
        bar.set_message("Preparing…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, _doc_id: &str, stage: PipelineStage) {
        let msg = match stage {
            PipelineStage::Downloading => "Downloading source…",
            PipelineStage::Converting => "Converting to PDF…",
            PipelineStage::Uploading => "Uploading PDF…",
            PipelineStage::Signing => "Signing download URL…",
        };
        self.bar.set_message(msg);
    }

    fn on_run_complete(&self, _doc_id: &str, _pdf_url: &str) {
        self.bar.finish_with_message(green("completed ✓"));
    }

    fn on_run_error(&self, _doc_id: &str, stage: PipelineStage, _message: &str) {
        self.bar
            .abandon_with_message(red(&format!("failed while {stage} ✗")));
    }
}

// ── CLI definition ───────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve the HTTP trigger against Google Cloud
  doc2pdf serve --storage gcs --bucket my-bucket --status-store firestore --project my-proj

  # Convert one document in the foreground, local directory as the bucket
  doc2pdf convert --storage local --local-root ./bucket --signing-secret s3cr3t \
      --doc-id doc123 --file-name report.docx --file-path uploads/report.docx

  # Try it without any cloud: seed an in-memory bucket from a local file
  doc2pdf convert --source ./report.docx --doc-id d1 --file-name report.docx --file-path report.docx

CREDENTIALS:
  GCS and Firestore use, in order: --credentials-file, GOOGLE_OAUTH_ACCESS_TOKEN
  (for example from `gcloud auth print-access-token`), the key file named by
  GOOGLE_APPLICATION_CREDENTIALS, then gcloud or the metadata server.
  Signed URLs need a service account: the key file's client_email, or
  --signer-email.
"#;

/// Convert office documents in object storage to PDF.
#[derive(Parser, Debug)]
#[command(
    name = "doc2pdf",
    version,
    about = "Convert office documents in object storage to PDF",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP trigger.
    Serve(ServeArgs),
    /// Run one conversion in the foreground and print its status record.
    Convert(ConvertArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StorageKind {
    Memory,
    Local,
    Gcs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StatusKind {
    Memory,
    Firestore,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Object store backend.
    #[arg(long, global = true, env = "DOC2PDF_STORAGE", value_enum, default_value = "memory")]
    storage: StorageKind,

    /// GCS bucket (with or without gs://).
    #[arg(long, global = true, env = "DOC2PDF_BUCKET")]
    bucket: Option<String>,

    /// Service account that signs GCS download URLs. Defaults to the key
    /// file's `client_email`.
    #[arg(long, global = true, env = "DOC2PDF_SIGNER_EMAIL")]
    signer_email: Option<String>,

    /// Service-account key file for GCS and Firestore. Without it, credentials
    /// are discovered (GOOGLE_OAUTH_ACCESS_TOKEN, GOOGLE_APPLICATION_CREDENTIALS,
    /// gcloud, metadata server).
    #[arg(long, global = true, env = "DOC2PDF_CREDENTIALS_FILE")]
    credentials_file: Option<PathBuf>,

    /// Directory acting as the bucket for `--storage local`.
    #[arg(long, global = true, env = "DOC2PDF_LOCAL_ROOT", default_value = "bucket")]
    local_root: PathBuf,

    /// Base URL signed local URLs point at. Defaults to the bind address.
    #[arg(long, global = true, env = "DOC2PDF_PUBLIC_URL")]
    public_url: Option<String>,

    /// HMAC secret for local signed URLs.
    #[arg(long, global = true, env = "DOC2PDF_SIGNING_SECRET", hide_env_values = true)]
    signing_secret: Option<String>,

    /// Status store backend.
    #[arg(long, global = true, env = "DOC2PDF_STATUS_STORE", value_enum, default_value = "memory")]
    status_store: StatusKind,

    /// Google Cloud project holding the Firestore database.
    #[arg(long, global = true, env = "DOC2PDF_PROJECT")]
    project: Option<String>,

    /// Status collection name.
    #[arg(long, global = true, env = "DOC2PDF_COLLECTION", default_value = "conversions")]
    collection: String,

    /// Working directory for downloads and converted files.
    #[arg(long, global = true, env = "DOC2PDF_WORK_DIR", default_value = "work")]
    work_dir: PathBuf,

    /// Object key prefix for converted PDFs.
    #[arg(long, global = true, env = "DOC2PDF_CONVERTED_PREFIX", default_value = "converted-files/")]
    converted_prefix: String,

    /// Lifetime of signed download URLs, in seconds.
    #[arg(long, global = true, env = "DOC2PDF_URL_TTL", default_value_t = 300)]
    url_ttl_secs: u64,

    /// Maximum simultaneous conversions.
    #[arg(long, global = true, env = "DOC2PDF_MAX_CONCURRENT", default_value_t = 4)]
    max_concurrent: usize,

    /// Kill the engine after this many seconds.
    #[arg(long, global = true, env = "DOC2PDF_ENGINE_TIMEOUT", default_value_t = 120)]
    engine_timeout_secs: u64,

    /// LibreOffice binary.
    #[arg(long, global = true, env = "DOC2PDF_SOFFICE", default_value = "soffice")]
    soffice: PathBuf,

    /// Also write logs to <DIR>/app.log.
    #[arg(long, global = true, env = "DOC2PDF_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long, global = true, env = "DOC2PDF_VERBOSE")]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true, env = "DOC2PDF_QUIET")]
    quiet: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "DOC2PDF_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Require `Authorization: Bearer <token>` on API routes.
    #[arg(long, env = "DOC2PDF_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Consecutive 5xx answers that open the circuit breaker.
    #[arg(long, env = "DOC2PDF_BREAKER_THRESHOLD", default_value_t = 5)]
    breaker_threshold: u32,

    /// Seconds the breaker stays open.
    #[arg(long, env = "DOC2PDF_BREAKER_RESET", default_value_t = 60)]
    breaker_reset_secs: u64,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Status record id.
    #[arg(long)]
    doc_id: String,

    /// Source file name (.pdf, .docx or .txt).
    #[arg(long)]
    file_name: String,

    /// Source object, optionally prefixed with scheme://bucket/.
    #[arg(long)]
    file_path: String,

    /// Seed the in-memory bucket with this local file first (memory storage only).
    #[arg(long)]
    source: Option<PathBuf>,

    /// Disable the spinner.
    #[arg(long, env = "DOC2PDF_NO_PROGRESS")]
    no_progress: bool,
}

// ── Backends ─────────────────────────────────────────────────────────────────

struct Backends {
    objects: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentStore>,
    /// Present for `--storage memory`, so `convert --source` can seed it.
    memory: Option<MemoryObjectStore>,
    /// Present for `--storage local`, so the server can serve signed URLs.
    local: Option<Arc<LocalObjectStore>>,
}

fn build_config(c: &CommonArgs) -> Result<ServiceConfig> {
    ServiceConfig::builder()
        .work_dir(&c.work_dir)
        .converted_prefix(c.converted_prefix.clone())
        .signed_url_ttl(Duration::from_secs(c.url_ttl_secs))
        .max_concurrent_runs(c.max_concurrent)
        .engine_timeout(Duration::from_secs(c.engine_timeout_secs))
        .status_collection(c.collection.clone())
        .build()
        .context("Invalid configuration")
}

async fn build_backends(c: &CommonArgs, default_public_url: &str) -> Result<Backends> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("Failed to build HTTP client")?;
    // Only cloud backends need credentials.
    let tokens = if matches!(c.storage, StorageKind::Gcs)
        || matches!(c.status_store, StatusKind::Firestore)
    {
        Some(Arc::new(
            TokenSource::discover(c.credentials_file.as_deref())
                .await
                .context("Failed to load Google Cloud credentials")?,
        ))
    } else {
        None
    };

    let (objects, memory, local): (Arc<dyn ObjectStore>, _, _) = match c.storage {
        StorageKind::Memory => {
            let store = MemoryObjectStore::new();
            (Arc::new(store.clone()), Some(store), None)
        }
        StorageKind::Local => {
            let secret = c
                .signing_secret
                .as_deref()
                .context("--signing-secret is required for --storage local")?;
            let base = c.public_url.as_deref().unwrap_or(default_public_url);
            let store = Arc::new(
                LocalObjectStore::new(&c.local_root, base, secret)
                    .context("Failed to open local bucket")?,
            );
            (store.clone() as Arc<dyn ObjectStore>, None, Some(store))
        }
        StorageKind::Gcs => {
            let bucket = c
                .bucket
                .as_deref()
                .context("--bucket is required for --storage gcs")?;
            let tokens = tokens.clone().context("Google Cloud credentials not loaded")?;
            let mut store = GcsObjectStore::new(client.clone(), bucket, tokens);
            if let Some(email) = &c.signer_email {
                store = store.with_signer(email.clone());
            }
            (Arc::new(store), None, None)
        }
    };

    let documents: Arc<dyn DocumentStore> = match c.status_store {
        StatusKind::Memory => Arc::new(MemoryDocumentStore::new()),
        StatusKind::Firestore => {
            let project = c
                .project
                .as_deref()
                .context("--project is required for --status-store firestore")?;
            let tokens = tokens.context("Google Cloud credentials not loaded")?;
            Arc::new(FirestoreDocumentStore::new(client, project, tokens))
        }
    };

    Ok(Backends {
        objects,
        documents,
        memory,
        local,
    })
}

// ── Logging ──────────────────────────────────────────────────────────────────

/// Install the subscriber. The returned guard flushes the file writer and
/// must live as long as the process.
fn init_tracing(
    c: &CommonArgs,
    default_level: &str,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = if c.verbose {
        "debug"
    } else if c.quiet {
        "error"
    } else {
        default_level
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match &c.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, "app.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(ref args) => serve(&cli.common, args).await,
        Command::Convert(ref args) => convert(&cli.common, args).await,
    }
}

async fn serve(c: &CommonArgs, args: &ServeArgs) -> Result<()> {
    let _guard = init_tracing(c, "info")?;

    let config = build_config(c)?;
    let backends = build_backends(c, &format!("http://{}", args.bind)).await?;
    let engine = Arc::new(LibreOfficeEngine::new(&c.soffice));

    let pipeline = ConversionPipeline::new(&config, backends.objects, backends.documents, engine)
        .await
        .context("Failed to initialise pipeline")?;
    let dispatcher = Dispatcher::new(Arc::new(pipeline), config.max_concurrent_runs);

    let mut state = AppState::new(dispatcher);
    if let Some(token) = &args.api_token {
        state = state.with_api_token(token.clone());
    }
    if let Some(local) = backends.local {
        state = state.with_local_objects(local);
    }
    let breaker = Arc::new(CircuitBreaker::new(
        args.breaker_threshold,
        Duration::from_secs(args.breaker_reset_secs),
    ));

    tracing::info!("Storage: {:?}, status store: {:?}", c.storage, c.status_store);
    tracing::info!("Endpoints:");
    tracing::info!("  - POST /convert");
    tracing::info!("  - GET  /conversions/{{docId}}");
    tracing::info!("  - GET  /health");

    server::serve(args.bind, server::router_with_breaker(state, breaker))
        .await
        .context("Server error")
}

async fn convert(c: &CommonArgs, args: &ConvertArgs) -> Result<()> {
    // The spinner gives all the feedback that matters; keep library logs quiet.
    let show_progress = !c.quiet && !args.no_progress;
    let _guard = init_tracing(c, if show_progress { "error" } else { "info" })?;

    let request = ConversionRequest::new(&args.doc_id, &args.file_name, &args.file_path)
        .context("Invalid request")?;

    let config = build_config(c)?;
    let backends = build_backends(c, "http://127.0.0.1:8080").await?;

    if let Some(source) = &args.source {
        let Some(memory) = &backends.memory else {
            bail!("--source only applies to --storage memory");
        };
        let data = tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;
        memory.insert(request.object_key(), data);
    }

    let engine = Arc::new(LibreOfficeEngine::new(&c.soffice));
    let mut pipeline =
        ConversionPipeline::new(&config, backends.objects, backends.documents, engine)
            .await
            .context("Failed to initialise pipeline")?;
    if show_progress {
        pipeline = pipeline.with_progress(CliProgressCallback::new());
    }

    let outcome = pipeline.run(&request).await;

    let record = pipeline
        .recorder()
        .get(request.doc_id())
        .await
        .context("Failed to read status record")?;
    if let Some(record) = record {
        println!(
            "{}",
            serde_json::to_string_pretty(&record).context("Failed to serialise status record")?
        );
    }

    match outcome {
        Ok(done) => {
            if !c.quiet {
                eprintln!(
                    "{}  {}  {}ms",
                    green("✔"),
                    bold(&done.object.key),
                    done.duration_ms
                );
            }
            Ok(())
        }
        Err(e) => bail!("{} (HTTP {})", e.detail, e.status_code()),
    }
}
