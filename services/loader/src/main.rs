//! Loader CLI - runs configured sources into the fact table
//!
//! Usage:
//!   # Everything in the config:
//!   cargo run --bin loader -- --config config/sources.json
//!
//!   # API sources only, facts from 2018 on, without writing:
//!   cargo run --bin loader -- --mode api --year-from 2018 --dry-run
//!
//!   # One source by resource id, category or file name:
//!   cargo run --bin loader -- --mode single --source penduduk.csv
//!
//!   # Pre-flight check of file sources:
//!   cargo run --bin loader -- --validate

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use loader::api::ApiClient;
use loader::config::{load_sources_config, SourcesConfig};
use loader::file;
use loader::logging::init_logging;
use loader::pipeline::{Pipeline, RunOptions, RunSummary, Source};
use loader::store::Store;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    All,
    Api,
    File,
    Single,
}

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Loads public statistics into the fact table")]
struct Args {
    /// Path to sources config file
    #[arg(long, default_value = "config/sources.json")]
    config: PathBuf,

    /// Which sources to run
    #[arg(long, value_enum, default_value = "all")]
    mode: Mode,

    /// Only sources with this kategori
    #[arg(long)]
    category: Option<String>,

    /// Drop facts before this year (and facts without a year)
    #[arg(long)]
    year_from: Option<i32>,

    /// Max records per source
    #[arg(long)]
    limit: Option<usize>,

    /// Dry run - don't save to database
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Source selector for --mode single (resource id, kategori or file name)
    #[arg(long)]
    source: Option<String>,

    /// Validate file sources and exit
    #[arg(long, default_value = "false")]
    validate: bool,

    /// Clear stored checkpoints and read sources from the beginning
    #[arg(long, default_value = "false")]
    no_resume: bool,

    /// Create tables before loading
    #[arg(long, default_value = "false")]
    init_schema: bool,
}

/// Sources selected by mode, category and single-source selector
fn select_sources<'a>(config: &'a SourcesConfig, args: &Args) -> Result<Vec<Source<'a>>> {
    let api = config.api_sources.iter().map(Source::Api);
    let files = config.file_sources.iter().map(Source::File);

    let candidates: Vec<Source<'a>> = match args.mode {
        Mode::Api => api.collect(),
        Mode::File => files.collect(),
        Mode::All | Mode::Single => api.chain(files).collect(),
    };

    if args.mode == Mode::Single && args.source.is_none() {
        anyhow::bail!("--mode single requires --source <resource id | kategori | file name>");
    }

    Ok(candidates
        .into_iter()
        .filter(|s| s.enabled())
        .filter(|s| match &args.category {
            Some(category) => s.category() == category,
            None => true,
        })
        .filter(|s| match (&args.mode, &args.source) {
            (Mode::Single, Some(selector)) => s.matches(selector),
            _ => true,
        })
        .collect())
}

/// Print validation reports; returns true when every file source is valid
async fn run_validation(config: &SourcesConfig, sources: &[Source<'_>]) -> bool {
    let mut all_valid = true;
    println!("\n=== File Source Validation ===");

    for source in sources {
        let Source::File(file_source) = source else {
            continue;
        };
        let report = file::validate(file_source).await;
        let mark = if report.valid { "✓" } else { "✗" };
        println!(
            "  {} [{}] {} ({} sampled rows)",
            mark,
            file_source.kategori,
            file_source.file_path.display(),
            report.sampled_rows
        );
        for err in &report.errors {
            println!("      - {}", err);
        }
        all_valid &= report.valid;
    }

    if config.file_sources.is_empty() {
        println!("  (no file sources configured)");
    }
    all_valid
}

fn print_summary(summary: &RunSummary) {
    println!(
        "  ✓ {} | loaded {} | kept {} | inserted {} | updated {} | skipped {} | offset {} -> {}{}",
        summary.reference,
        summary.loaded,
        summary.kept,
        summary.stats.inserted,
        summary.stats.updated,
        summary.skipped,
        summary.start_offset,
        summary.next_offset,
        if summary.dry_run { " (dry run)" } else { "" }
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging()?;
    let args = Args::parse();

    let config = load_sources_config(&args.config)
        .await
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let sources = select_sources(&config, &args)?;

    info!(
        config = %args.config.display(),
        api_sources = config.api_sources.len(),
        file_sources = config.file_sources.len(),
        selected = sources.len(),
        "Configuration loaded"
    );

    if args.validate {
        if !run_validation(&config, &sources).await {
            anyhow::bail!("File source validation failed");
        }
        return Ok(());
    }

    if sources.is_empty() {
        anyhow::bail!("No sources match the filter criteria");
    }

    // Database is optional for dry runs (checkpoints then start at 0)
    let store = match std::env::var("DB_URL") {
        Ok(db_url) => Some(
            Store::connect(&db_url, config.settings.upsert_chunk_size)
                .await
                .context("Failed to connect to database")?,
        ),
        Err(_) if args.dry_run => {
            warn!("DB_URL not set - dry run without checkpoints");
            None
        }
        Err(_) => anyhow::bail!("DB_URL env var missing"),
    };

    if args.init_schema {
        if let Some(store) = &store {
            store.ensure_schema().await.context("Failed to apply schema")?;
            info!("Schema ensured");
        }
    }

    let api = ApiClient::new(&config.settings)?;
    let pipeline = Pipeline::new(&config.settings, &api, store.as_ref());
    let options = RunOptions {
        year_floor: args.year_from,
        limit: args.limit,
        dry_run: args.dry_run,
        resume: !args.no_resume,
    };

    println!("\nProcessing {} source(s)...", sources.len());

    let mut succeeded = 0;
    let mut failed = 0;
    let mut inserted = 0;
    let mut updated = 0;

    for source in &sources {
        println!("\n[{}] {} ({})", source.kind(), source.reference(), source.category());
        match pipeline.run_source(*source, &options).await {
            Ok(summary) => {
                print_summary(&summary);
                inserted += summary.stats.inserted;
                updated += summary.stats.updated;
                succeeded += 1;
            }
            Err(e) => {
                error!(source = %source.reference(), error = %e, "Source failed");
                println!("  ✗ Failed: {}", e);
                failed += 1;
            }
        }
    }

    println!("\n=== Load Summary ===");
    println!("Sources ok: {}", succeeded);
    println!("Sources failed: {}", failed);
    if args.dry_run {
        println!("Dry run - nothing written");
    } else {
        println!("Facts inserted: {}", inserted);
        println!("Facts updated: {}", updated);
    }

    if failed > 0 {
        anyhow::bail!("{} source(s) failed", failed);
    }

    Ok(())
}
