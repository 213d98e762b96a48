//! twstock CLI: run the TWSE ingestion pipeline and inspect its tables.
//!
//! Commands:
//! - `run`: fetch new daily prices for every configured ticker and publish
//! - `watermarks`: show the latest stored date per configured ticker
//! - `recover`: restore production from backup after an interrupted swap

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use twstock_core::data::TwseClient;
use twstock_core::publish::RecoveryAction;
use twstock_core::schema::CLUSTERING_FIELDS;
use twstock_core::store::{mirror_table, MemoryTableStore, ParquetTableStore, TableStore};
use twstock_core::watermark::WatermarkResolver;
use twstock_core::{AtomicPublisher, Pipeline, PipelineConfig, RunSummary};

#[derive(Parser)]
#[command(
    name = "twstock",
    about = "twstock: incremental TWSE daily price ingestion"
)]
struct Cli {
    /// Path to the pipeline TOML config.
    #[arg(long, global = true, default_value = "twstock.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, stage and publish new rows for every configured ticker.
    Run {
        /// Work on an in-memory copy of the production and backup tables;
        /// the configured store is only read.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Show the latest stored date per configured ticker.
    Watermarks,
    /// Restore production from backup if a previous swap was interrupted.
    Recover,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "twstock_core=info,twstock=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run { dry_run } => run_pipeline(&config, dry_run),
        Commands::Watermarks => show_watermarks(&config),
        Commands::Recover => run_recover(&config),
    }
}

fn run_pipeline(config: &PipelineConfig, dry_run: bool) -> Result<()> {
    let client = TwseClient::with_reqwest(
        config.remote.timeout(),
        config.remote.retry_policy(),
        config.remote.base_url.clone(),
    )?;

    let store: Box<dyn TableStore> = if dry_run {
        Box::new(dry_run_store(config)?)
    } else {
        Box::new(ParquetTableStore::new(&config.store.root))
    };

    tracing::info!(
        tickers = ?config.ticker_codes,
        start = %config.start_date,
        "starting run"
    );
    let summary = Pipeline::new(store.as_ref(), &client, config).run()?;
    print_summary(&summary);

    if !summary.all_succeeded() {
        for (ticker, err) in &summary.failed {
            eprintln!("Error for {ticker}: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}

/// In-memory store seeded with the configured store's production and backup
/// tables, so watermarks and carry-over match a real run.
fn dry_run_store(config: &PipelineConfig) -> Result<MemoryTableStore> {
    let real = ParquetTableStore::new(&config.store.root);
    let memory = MemoryTableStore::new();
    for table in [&config.tables.production, &config.tables.backup] {
        let rows = mirror_table(&real, &memory, table, CLUSTERING_FIELDS)
            .with_context(|| format!("copying {table} for dry run"))?;
        match rows {
            Some(rows) => tracing::info!(%table, rows, "dry run: copied table into memory"),
            None => tracing::info!(%table, "dry run: table absent in store"),
        }
    }
    Ok(memory)
}

fn print_summary(summary: &RunSummary) {
    println!("Run stamped {}", summary.update_timestamp);
    if let RecoveryAction::RestoredFromBackup { rows } = summary.recovery {
        println!("  recovered production from backup ({rows} rows)");
    }
    for outcome in &summary.succeeded {
        println!(
            "  OK: {} {}..{} fetched {} rows, kept {} earlier rows",
            outcome.ticker_code,
            outcome.window.start,
            outcome.window.end,
            outcome.fetched_rows,
            outcome.history_rows
        );
        if outcome.kept_in_window > 0 {
            println!(
                "      {} stored rows inside the window were not returned and were kept",
                outcome.kept_in_window
            );
        }
    }
    for (ticker, err) in &summary.failed {
        println!("  FAIL: {ticker}: {err}");
    }
    println!(
        "Published {} rows ({} carried over unchanged, previous production {})",
        summary.publish.published_rows,
        summary.carried_over_rows,
        summary
            .publish
            .backed_up_rows
            .map_or("absent".to_string(), |n| format!("{n} rows")),
    );
}

fn show_watermarks(config: &PipelineConfig) -> Result<()> {
    let store = ParquetTableStore::new(&config.store.root);
    let resolver = WatermarkResolver::new(&store, &config.tables.production);

    println!("Store: {}", store.root().display());
    println!("{:<10} {:<12}", "TICKER", "LATEST");
    for ticker in &config.ticker_codes {
        let latest = resolver
            .latest_date(ticker)
            .with_context(|| format!("querying watermark for {ticker}"))?;
        let shown = latest.map_or_else(
            || format!("none (starts {})", config.start_date),
            |d| d.to_string(),
        );
        println!("{ticker:<10} {shown:<12}");
    }
    Ok(())
}

fn run_recover(config: &PipelineConfig) -> Result<()> {
    let store = ParquetTableStore::new(&config.store.root);
    let action = AtomicPublisher::new(&store, &config.tables).recover()?;
    match action {
        RecoveryAction::NotNeeded => println!("Production table present, nothing to do."),
        RecoveryAction::NothingToRestore => {
            bail!("neither production nor backup table exists")
        }
        RecoveryAction::RestoredFromBackup { rows } => {
            println!("Restored production from backup ({rows} rows).")
        }
    }
    Ok(())
}
