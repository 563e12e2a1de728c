// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use indicatif::{ProgressBar, ProgressStyle};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, error, info, warn};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use novelwai::app_config::{self, Config};
use novelwai::file_utils::FileManager;
use novelwai::ledger::JobLedger;
use novelwai::ledger::UnitStatus;
use novelwai::translation::{
    Document, DocumentStatus, Glossary, Orchestrator, PhaseSet, PipelineEvent, PipelineState,
};

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a directory of chapters through glossary, translation and proofing
    Translate(TranslateArgs),

    /// Continue a paused or failed document
    Resume {
        /// Document id shown by `novelwai list`
        document_id: String,

        /// Directory for translated chapters and reports; defaults to the one used at start
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Only use this provider
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Show phase, per-chapter progress and cost of a document
    Status {
        document_id: String,
    },

    /// List documents recorded in the ledger
    List,

    /// Generate shell completions for novelwai
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct TranslateArgs {
    /// Directory with one .txt file per chapter
    #[arg(value_name = "INPUT_DIR")]
    input_dir: PathBuf,

    /// Document id; defaults to the input directory name
    #[arg(short, long)]
    document_id: Option<String>,

    /// Directory for translated chapters and reports
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Stop after extracting the glossary
    #[arg(long, conflicts_with_all = ["skip_glossary", "no_proofing"])]
    glossary_only: bool,

    /// Skip glossary extraction and use this JSON glossary instead
    #[arg(long, value_name = "GLOSSARY_JSON")]
    skip_glossary: Option<PathBuf>,

    /// Stop after the translate phase
    #[arg(long)]
    no_proofing: bool,

    /// Only use this provider
    #[arg(short, long)]
    provider: Option<String>,

    /// Source language code (e.g., 'zh', 'ja', 'ko')
    #[arg(short, long)]
    source_language: Option<String>,

    /// Target language code (e.g., 'en', 'fr')
    #[arg(short, long)]
    target_language: Option<String>,
}

/// NovelWAI - Novel translation With AI
///
/// Translates chapter-based novels through several AI providers, with
/// glossary extraction, proofing, automatic fallback and resumable runs.
#[derive(Parser, Debug)]
#[command(name = "novelwai")]
#[command(author = "NovelWAI Team")]
#[command(version)]
#[command(about = "AI-powered novel translation pipeline")]
#[command(long_about = "NovelWAI translates a directory of chapters through glossary extraction, \
translation and proofing, falling back across providers and recording every attempt so that \
interrupted runs can be resumed.

EXAMPLES:
    novelwai translate ./novel                          # Full run with default config
    novelwai translate ./novel --glossary-only          # Only extract the glossary
    novelwai translate ./novel --skip-glossary g.json   # Use an existing glossary
    novelwai translate ./novel --no-proofing -p gemini  # Translate with one provider
    novelwai resume novel                               # Continue after Ctrl-C or a failure
    novelwai status novel                               # Show per-chapter progress and cost
    novelwai completions bash > novelwai.bash           # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. If the file doesn't exist,
    a default one is created. API keys may be left empty in the file and given as
    <PROVIDER_NAME>_API_KEY environment variables instead.

SUPPORTED PROVIDERS:
    gemini    - Google Gemini API
    openai    - OpenAI chat completions API
    anthropic - Anthropic messages API
    scripted  - Offline backend that echoes its input (dry runs)")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "conf.json")]
    config_path: String,

    /// Ledger database path (overrides the configuration)
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    /// Set logging level
    #[arg(short, long, global = true, value_enum)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI color and emoji for log level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("1;31", "❌ "),
            Level::Warn => ("1;33", "🚧 "),
            Level::Info => ("1;32", " "),
            Level::Debug => ("1;36", "🔍 "),
            Level::Trace => ("1;35", "📋 "),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        // The effective level is adjusted later through log::set_max_level
        metadata.level() <= self.level.max(log::max_level())
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let (color, emoji) = Self::style_for_level(record.level());

            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "\x1B[{}m{} {} {}\x1B[0m",
                color,
                now,
                emoji,
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger once with info level by default
    // We'll update the level after loading the config if needed
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(*shell, &mut cmd, "novelwai", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config_path, cli.log_level.clone())?;
    let ledger = open_ledger(cli.ledger.as_deref(), &config)?;
    let orchestrator = Orchestrator::new(ledger);

    match cli.command {
        Commands::Translate(args) => run_translate(&orchestrator, config, args).await,
        Commands::Resume {
            document_id,
            output_dir,
            provider,
        } => run_resume(&orchestrator, config, &document_id, output_dir, provider).await,
        Commands::Status { document_id } => print_status(&orchestrator, &document_id).await,
        Commands::List => list_documents(orchestrator.ledger()).await,
        Commands::Completions { .. } => Ok(()),
    }
}

// @loads: Configuration file, creating a default one when missing
fn load_config(config_path: &str, log_level: Option<CliLogLevel>) -> Result<Config> {
    // If log level is set via command line, apply it immediately
    if let Some(cmd_log_level) = &log_level {
        let level: app_config::LogLevel = cmd_log_level.clone().into();
        log::set_max_level(level.to_level_filter());
    }

    let mut config = if Path::new(config_path).exists() {
        let file = File::open(config_path)
            .context(format!("Failed to open config file: {}", config_path))?;
        let reader = BufReader::new(file);
        serde_json::from_reader::<_, Config>(reader)
            .context(format!("Failed to parse config file: {}", config_path))?
    } else {
        warn!("Config file not found at '{}', creating default config.", config_path);

        let config = Config::default();
        let config_json = serde_json::to_string_pretty(&config)
            .context("Failed to serialize default config to JSON")?;
        std::fs::write(config_path, config_json)
            .context(format!("Failed to write default config to file: {}", config_path))?;
        config
    };

    if let Some(level) = log_level {
        config.log_level = level.into();
    } else {
        log::set_max_level(config.log_level.to_level_filter());
    }

    config.fill_credentials_from(|var| std::env::var(var).ok());
    Ok(config)
}

fn open_ledger(cli_path: Option<&Path>, config: &Config) -> Result<JobLedger> {
    match cli_path.or(config.ledger_path.as_deref()) {
        Some(path) => {
            JobLedger::open(path).context(format!("Failed to open ledger at {:?}", path))
        }
        None => JobLedger::open_default().context("Failed to open the default ledger"),
    }
}

async fn run_translate(
    orchestrator: &Orchestrator,
    mut config: Config,
    args: TranslateArgs,
) -> Result<()> {
    if let Some(source) = args.source_language {
        config.source_language = source;
    }
    if let Some(target) = args.target_language {
        config.target_language = target;
    }
    config.validate().context("Configuration validation failed")?;

    let document_id = match args.document_id {
        Some(id) => id,
        None => args
            .input_dir
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .ok_or_else(|| anyhow!("Cannot derive a document id from {:?}", args.input_dir))?,
    };

    let chapters = FileManager::read_chapters(&args.input_dir)?;
    info!(
        "Read {} chapter(s) from {:?} as document '{}'",
        chapters.len(),
        args.input_dir,
        document_id
    );
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| args.input_dir.join("translated"));
    let document = Document::new(&document_id, chapters).with_output_dir(&output_dir);

    let mut phases = if args.glossary_only {
        PhaseSet::glossary_only()
    } else if let Some(path) = &args.skip_glossary {
        PhaseSet::skip_glossary(FileManager::read_glossary(path)?)
    } else {
        PhaseSet::full()
    };
    if args.no_proofing {
        phases = phases.without_proofing();
    }

    let mut pipeline = config.pipeline_config();
    if let Some(provider) = args.provider {
        pipeline = pipeline.with_pinned_provider(provider);
    }

    let watcher = watch_progress(orchestrator);
    let result = orchestrator.start(document, &pipeline, phases).await;
    watcher.abort();

    let state = result.context("Translation run failed")?;
    finish(orchestrator, &document_id, &state, Some(output_dir), &config).await
}

async fn run_resume(
    orchestrator: &Orchestrator,
    config: Config,
    document_id: &str,
    output_dir: Option<PathBuf>,
    provider: Option<String>,
) -> Result<()> {
    config.validate().context("Configuration validation failed")?;

    let mut pipeline = config.pipeline_config();
    if let Some(provider) = provider {
        pipeline = pipeline.with_pinned_provider(provider);
    }

    let watcher = watch_progress(orchestrator);
    let result = orchestrator.resume(document_id, &pipeline).await;
    watcher.abort();

    let state = result.context(format!("Could not resume '{}'", document_id))?;
    finish(orchestrator, document_id, &state, output_dir, &config).await
}

// @writes: Whatever the ledger holds so far, then reports the final state
async fn finish(
    orchestrator: &Orchestrator,
    document_id: &str,
    state: &PipelineState,
    output_dir: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    let document = orchestrator.load_document(document_id).await?;
    let record = orchestrator.ledger().get_document(document_id).await?;

    // An explicit directory wins, then the one recorded when the run started
    let output_dir = output_dir
        .or_else(|| document.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("translated").join(document_id));
    let output_dir = output_dir.as_path();
    let target_language = record
        .and_then(|r| r.target_language)
        .unwrap_or_else(|| config.target_language.clone());

    let written = FileManager::write_translations(&document, output_dir, &target_language)?;
    if written > 0 {
        info!("Wrote {} translated chapter(s) to {:?}", written, output_dir);
    }

    let glossary = orchestrator.ledger().get_glossary(document_id).await?;
    if !glossary.is_empty() {
        let glossary = Glossary::from_entries(glossary);
        FileManager::write_glossary(&glossary, output_dir.join("glossary.json"))?;
    }

    if document.chapters.iter().any(|c| !c.findings.is_empty()) {
        let path = output_dir.join("proofing-report.md");
        let findings = FileManager::write_findings_report(&document, &path)?;
        info!("{} proofing finding(s) written to {:?}", findings, path);
    }

    let cost = orchestrator.ledger().cost_summary(document_id).await?;
    info!("Usage for '{}': {}", document_id, cost);

    match state {
        PipelineState::Completed => {
            info!("Document '{}' completed", document_id);
            Ok(())
        }
        PipelineState::Paused { phase } => {
            warn!(
                "Document '{}' paused in the {} phase; run `novelwai resume {}` to continue",
                document_id, phase, document_id
            );
            Ok(())
        }
        PipelineState::Failed { message, .. } => {
            error!("{}", message);
            Err(anyhow!(
                "Document '{}' failed; fix the cause and run `novelwai resume {}`",
                document_id,
                document_id
            ))
        }
        other => Err(anyhow!("Run for '{}' ended in unexpected state {}", document_id, other)),
    }
}

// @spawns: Ctrl-C handler and a progress bar fed by pipeline events
fn watch_progress(orchestrator: &Orchestrator) -> JoinHandle<()> {
    let stopper = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after in-flight calls settle");
            stopper.stop();
        }
    });

    let orchestrator = orchestrator.clone();
    let mut events = orchestrator.subscribe();

    tokio::spawn(async move {
        let progress_bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} units ({percent}%) {msg}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(style.progress_chars("█▓▒░"));

        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };

            match &event {
                PipelineEvent::StateChanged { document_id, state } => {
                    if let Some(phase) = state.running_phase() {
                        if let Ok(status) = orchestrator.status(document_id).await {
                            let (done, total) = status.phase_progress(phase);
                            progress_bar.set_length(total as u64);
                            progress_bar.set_position(done as u64);
                        }
                        progress_bar.set_message(phase.to_string());
                    } else if state.status() != DocumentStatus::Running {
                        progress_bar.finish_and_clear();
                    }
                }
                PipelineEvent::UnitExhausted { unit_key, .. } => {
                    progress_bar.println(format!("unit '{}' exhausted every provider", unit_key));
                    progress_bar.inc(1);
                }
                event if event.is_unit_resolved() => progress_bar.inc(1),
                _ => {}
            }
        }
    })
}

async fn print_status(orchestrator: &Orchestrator, document_id: &str) -> Result<()> {
    let status = orchestrator.status(document_id).await?;

    println!("Document: {}", status.document_id);
    println!("State:    {} ({})", status.state, status.status);
    for phase in status.phases.phases() {
        let (done, total) = status.phase_progress(phase);
        println!("  {:<10} {}/{}", phase.to_string(), done, total);
    }

    println!();
    println!("{:<20} {:<12} {:<12} {:<8} findings", "chapter", "glossary", "translate", "proof");
    for chapter in &status.chapters {
        let label = |s: Option<UnitStatus>| {
            s.map_or_else(|| "-".to_string(), |s| s.to_string())
        };
        println!(
            "{:<20} {:<12} {:<12} {:<8} {}",
            chapter.chapter_id,
            label(chapter.glossary),
            label(chapter.translate),
            format!("{}/{}", chapter.proof_done, chapter.proof_total),
            chapter.findings
        );
    }

    println!();
    println!("Usage: {}", status.cost);
    for (provider, usage) in &status.cost.per_provider {
        println!(
            "  {:<16} {} attempts, {} failed, avg {} ms",
            provider,
            usage.attempts,
            usage.failures,
            usage.average_latency_ms()
        );
    }
    Ok(())
}

async fn list_documents(ledger: &JobLedger) -> Result<()> {
    let documents = ledger.list_documents().await?;
    if documents.is_empty() {
        println!("No documents in the ledger");
        return Ok(());
    }

    for record in documents {
        println!(
            "{:<24} {:<24} updated {}",
            record.id,
            record.state.label(),
            record.updated_at
        );
    }
    Ok(())
}
