use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

use reg_ingest::config::{self, Settings};
use reg_ingest::pipeline::ingestion::{HtmlTableSource, JsonFileSource, RawSource};
use reg_ingest::pipeline::processing::validation::RuleSet;
use reg_ingest::pipeline::storage::sqlite::StoreOptions;
use reg_ingest::pipeline::storage::{PersistenceCoordinator, SqliteStore};
use reg_ingest::pipeline::{run_stage, Pipeline, RunFailure, RunStatus, RunSummary};
use reg_ingest::types::Record;
use reg_ingest::{logging, metrics, PipelineError, Result};

#[derive(Parser)]
#[command(name = "reg_ingest")]
#[command(about = "Scrape, validate and persist regulation listings without duplicates")]
#[command(version)]
struct Cli {
    /// Write Prometheus-format metrics to this file when the command ends
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store tables if they do not exist
    EnsureSchema,
    /// Fetch and normalize raw listing rows into a hand-off file
    Extract {
        /// Number of listing pages to crawl
        #[arg(long, default_value_t = 1)]
        pages: usize,
        /// Replay raw rows from a JSON file instead of crawling
        #[arg(long)]
        from_json: Option<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Validate a hand-off file against the rule document
    Validate {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Deduplicate and persist a validated hand-off file
    Write {
        #[arg(long)]
        input: PathBuf,
        /// Hand-off files to delete once the write finished
        #[arg(long)]
        cleanup: Vec<PathBuf>,
    },
    /// Run every stage in one process
    Run {
        #[arg(long, default_value_t = 1)]
        pages: usize,
        #[arg(long, conflicts_with = "pages")]
        from_json: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let _guard = logging::init_logging(&config::log_dir_from_env());

    let cli = Cli::parse();
    metrics::init_metrics();

    let result = execute(&cli);

    if let Some(path) = &cli.metrics_file {
        if let Some(text) = metrics::render() {
            if let Err(e) = fs::write(path, text) {
                warn!("Could not write metrics to {}: {}", path.display(), e);
            }
        }
    }

    match result {
        Ok(summary) => {
            print_summary(&summary);
            if summary.status == RunStatus::Failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_summary(summary: &RunSummary) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Could not serialize run summary: {}", e),
    }
}

fn execute(cli: &Cli) -> anyhow::Result<RunSummary> {
    let settings = Settings::from_env().context("loading settings")?;
    let summary = RunSummary::new(&settings.entity);

    let summary = match &cli.command {
        Commands::EnsureSchema => run_stage("ensure_schema", summary, |summary| {
            ensure_schema(&settings)?;
            summary.message = "Schema ensured.".to_string();
            Ok(())
        }),
        Commands::Extract {
            pages,
            from_json,
            output,
        } => run_stage("extract", summary, |summary| {
            let pipeline = Pipeline::new(&settings);
            let mut source = open_source(&settings, *pages, from_json.as_deref())?;
            let records = pipeline.extract(source.as_mut(), summary)?;
            if summary.status != RunStatus::Skipped {
                save_records(output, &records)?;
                summary.message =
                    format!("{} records written to {}", records.len(), output.display());
            }
            Ok(())
        }),
        Commands::Validate { input, output } => run_stage("validate", summary, |summary| {
            let pipeline = Pipeline::new(&settings);
            let records = load_records(input)?;
            summary.extracted = records.len();
            let rules = RuleSet::load(&settings.rules_file)?;
            let accepted = pipeline.validate(rules, records, summary);
            if summary.status != RunStatus::Skipped {
                save_records(output, &accepted)?;
                summary.message =
                    format!("{} records written to {}", accepted.len(), output.display());
            }
            Ok(())
        }),
        Commands::Write { input, cleanup } => run_stage("write", summary, |summary| {
            let pipeline = Pipeline::new(&settings);
            let records = load_records(input)?;
            summary.validated = records.len();
            let mut coordinator = open_writer(&settings)?;
            pipeline.write(&mut coordinator, records, summary)?;
            cleanup_files(cleanup);
            Ok(())
        }),
        Commands::Run { pages, from_json } => {
            match prepare_run(&settings, *pages, from_json.as_deref()) {
                Ok((rules, mut source, mut coordinator)) => {
                    let pipeline = Pipeline::new(&settings);
                    match pipeline.run(source.as_mut(), rules, &mut coordinator) {
                        Ok(summary) => summary,
                        Err(failure) => *failure.summary,
                    }
                }
                Err(e) => *RunFailure::new("setup", summary, e).summary,
            }
        }
    };
    Ok(summary)
}

type RunParts = (RuleSet, Box<dyn RawSource>, PersistenceCoordinator<SqliteStore>);

fn prepare_run(settings: &Settings, pages: usize, from_json: Option<&Path>) -> Result<RunParts> {
    ensure_schema(settings)?;
    let rules = RuleSet::load(&settings.rules_file)?;
    let source = open_source(settings, pages, from_json)?;
    let coordinator = open_writer(settings)?;
    Ok((rules, source, coordinator))
}

/// Schema DDL runs on its own connection, closed before any data is touched.
fn ensure_schema(settings: &Settings) -> Result<()> {
    let mut store = SqliteStore::open(&settings.db_path, StoreOptions::from_settings(settings))?;
    store.ensure_schema_from_file(&settings.schema_file)
}

fn open_writer(settings: &Settings) -> Result<PersistenceCoordinator<SqliteStore>> {
    let store = SqliteStore::open(&settings.db_path, StoreOptions::from_settings(settings))?;
    Ok(PersistenceCoordinator::new(store, settings.default_component_id))
}

fn open_source(
    settings: &Settings,
    pages: usize,
    from_json: Option<&Path>,
) -> Result<Box<dyn RawSource>> {
    if let Some(path) = from_json {
        return Ok(Box::new(JsonFileSource::new(path)));
    }
    let base = settings.url_base.as_deref().ok_or_else(|| {
        PipelineError::Config("SCRAPER_URL_BASE must be set to crawl listing pages".to_string())
    })?;
    Ok(Box::new(HtmlTableSource::new(base, pages, settings.http_timeout_secs)?))
}

fn load_records(path: &Path) -> Result<Vec<Record>> {
    let text = fs::read_to_string(path)?;
    let records: Vec<Record> = serde_json::from_str(&text)?;
    info!(path = %path.display(), records = records.len(), "Loaded hand-off file");
    Ok(records)
}

fn save_records(path: &Path, records: &[Record]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(records)?)?;
    info!(path = %path.display(), records = records.len(), "Saved hand-off file");
    Ok(())
}

fn cleanup_files(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => info!(path = %path.display(), "Removed hand-off file"),
            Err(e) => warn!("Could not remove hand-off file {}: {}", path.display(), e),
        }
    }
}
