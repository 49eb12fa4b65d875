#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the parking citation ingestion tool.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use ticketstat_cli_utils::{IndicatifProgress, MultiProgress};
use ticketstat_database::citation_db::CitationStore;
use ticketstat_database::geocode_cache::GeoCache;
use ticketstat_database::paths;
use ticketstat_ingest::config::{Credentials, IngestConfig, geocoder_api_key};
use ticketstat_ingest::{DateOutcome, IngestError, Pipeline};

#[derive(Parser)]
#[command(name = "ticketstat_ingest", about = "Parking citation ingestion tool")]
struct Cli {
    /// Configuration file (defaults to the built-in configuration)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, geocode, and store citations for one or more days
    Run {
        /// First infraction date to ingest (YYYY-MM-DD). Defaults to yesterday.
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Number of consecutive days to ingest
        #[arg(long, default_value = "1")]
        days: u32,
        /// Number of days processed at the same time
        #[arg(long, default_value = "1")]
        concurrency: usize,
        /// Create the citation table before ingesting
        #[arg(long)]
        create_table: bool,
    },
    /// Create the citation table
    CreateTable,
    /// Show how many addresses the geocode cache holds
    CacheStats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = ticketstat_cli_utils::init_logger();
    let cli = Cli::parse();
    let config = IngestConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            date,
            days,
            concurrency,
            create_table,
        } => {
            let start = date.unwrap_or_else(yesterday);
            run(&config, &multi, start, days, concurrency, create_table).await?;
        }
        Commands::CreateTable => {
            let data_dir = config.storage.resolved_data_dir();
            let path = paths::citations_db_path(&data_dir);
            CitationStore::open(&path)?.create_table()?;
            println!("ticketstat table ready in {}", path.display());
        }
        Commands::CacheStats => {
            let data_dir = config.storage.resolved_data_dir();
            let cache = GeoCache::open(&paths::geocode_cache_db_path(&data_dir))?;
            println!("{} cached addresses", cache.len());
            for (provider, count) in cache.provider_counts() {
                println!("  {provider:<12} {count}");
            }
        }
    }

    Ok(())
}

async fn run(
    config: &IngestConfig,
    multi: &MultiProgress,
    start: NaiveDate,
    days: u32,
    concurrency: usize,
    create_table: bool,
) -> Result<(), IngestError> {
    let credentials = Credentials::from_env()?;
    let api_key = geocoder_api_key(config)?;
    let pipeline = Pipeline::connect(config, &credentials, api_key).await?;

    if create_table {
        pipeline.store().create_table()?;
    }

    let started = Instant::now();
    let result = tokio::select! {
        result = run_dates(&pipeline, multi, start, days, concurrency) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    pipeline.checkpoint()?;

    let Some(result) = result else {
        log::warn!("Interrupted; dates finished before the interrupt are stored");
        return Ok(());
    };

    let results = result?;
    for (date, outcome) in &results {
        println!("{date}: {outcome}");
    }

    let failed = results
        .iter()
        .filter(|(_, o)| matches!(o, DateOutcome::Failed { .. }))
        .count();
    if failed > 0 {
        log::warn!("{failed} date(s) failed and can be rerun");
    }

    let total: u64 = results.iter().map(|(_, o)| o.rows_written()).sum();
    log::info!(
        "Ingested {total} citations over {} day(s) in {:.1}s",
        results.len(),
        started.elapsed().as_secs_f64()
    );

    Ok(())
}

async fn run_dates(
    pipeline: &Pipeline,
    multi: &MultiProgress,
    start: NaiveDate,
    days: u32,
    concurrency: usize,
) -> Result<Vec<(NaiveDate, DateOutcome)>, IngestError> {
    if days == 1 {
        let progress = IndicatifProgress::rows_bar(multi, &format!("{start}"));
        let outcome = pipeline.run_for_date(start, progress.as_ref()).await?;
        progress.finish_and_clear();
        return Ok(vec![(start, outcome)]);
    }

    let progress = IndicatifProgress::dates_bar(multi, "Dates", u64::from(days));
    pipeline
        .run_for_date_range(start, days, concurrency, progress.as_ref())
        .await
}

fn yesterday() -> NaiveDate {
    let today = Local::now().date_naive();
    today.pred_opt().unwrap_or(today)
}
