//! BarHarvest CLI: harvest daily bars per symbol into canonical files.
//!
//! Commands:
//! - `harvest`: run the batch for a code list
//! - `codes`: analyse a code list (totals, duplicates, per-exchange counts)
//! - `tables`: list tables in the configured database
//! - `schema`: describe a table's columns
//! - `paths`: print the output path each code would be written to

mod logging;

use anyhow::{bail, Context, Result};
use barharvest_core::codes::{CodeList, StockCode};
use barharvest_core::dates::{parse_date, DateWindow};
use barharvest_core::symbol::VendorCode;
use barharvest_runner::{BatchResult, FailureReport, HarvestConfig, LogProgress, Orchestrator};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "barharvest",
    about = "BarHarvest: per-symbol daily bar harvester"
)]
struct Cli {
    /// Path to the TOML run config. Built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides the config.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, normalize and write every symbol in a code list.
    Harvest {
        /// Tab-separated code list: symbol, start date, end date.
        #[arg(long)]
        codes: PathBuf,

        /// Fixed window start; replaces every code's own dates (needs --end).
        #[arg(long, requires = "end")]
        start: Option<String>,

        /// Fixed window end (needs --start).
        #[arg(long, requires = "start")]
        end: Option<String>,

        /// Worker count; 1 runs sequentially.
        #[arg(long)]
        jobs: Option<usize>,

        /// Process only the first N codes.
        #[arg(long)]
        limit: Option<usize>,

        /// Output root directory.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Retry only the symbols listed in a previous failure report.
        #[arg(long)]
        only_failed: Option<PathBuf>,
    },
    /// Analyse a code list without contacting the source.
    Codes {
        /// Tab-separated code list.
        path: PathBuf,
    },
    /// List tables in the configured database.
    Tables {
        /// Database to list. Defaults to the configured one.
        #[arg(long)]
        database: Option<String>,
    },
    /// Describe the columns of a table.
    Schema {
        /// Table to describe. Defaults to the configured one.
        #[arg(long)]
        table: Option<String>,
    },
    /// Print the output path each code would be written to.
    Paths {
        /// Tab-separated code list.
        #[arg(long)]
        codes: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HarvestConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => HarvestConfig::default(),
    };
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let guards = logging::init(&level, config.logging.dir.as_deref())?;
    resolve_password(&mut config);

    let succeeded = match cli.command {
        Commands::Harvest {
            codes,
            start,
            end,
            jobs,
            limit,
            output,
            only_failed,
        } => run_harvest(
            config,
            &codes,
            start.as_deref().zip(end.as_deref()),
            jobs,
            limit,
            output,
            only_failed.as_deref(),
        )?,
        Commands::Codes { path } => run_codes(&path)?,
        Commands::Tables { database } => run_tables(&config, database)?,
        Commands::Schema { table } => run_schema(&config, table)?,
        Commands::Paths { codes } => run_paths(&config, &codes)?,
    };

    // Flush file logs before a non-zero exit skips destructors.
    drop(guards);
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// The only place the environment is read for credentials.
fn resolve_password(config: &mut HarvestConfig) {
    if config.source.password.is_some() {
        return;
    }
    if let Some(var) = config.source.password_env.clone() {
        match std::env::var(&var) {
            Ok(value) => config.source.password = Some(value),
            Err(_) => warn!(var = %var, "password variable is not set; connecting without password"),
        }
    }
}

fn cli_date(flag: &str, value: &str) -> Result<chrono::NaiveDate> {
    parse_date(value).with_context(|| format!("{flag}: unparseable date '{value}'"))
}

fn load_codes(path: &Path) -> Result<CodeList> {
    CodeList::from_file(path).with_context(|| format!("reading code list {}", path.display()))
}

fn run_harvest(
    mut config: HarvestConfig,
    codes_path: &Path,
    window: Option<(&str, &str)>,
    jobs: Option<usize>,
    limit: Option<usize>,
    output: Option<PathBuf>,
    only_failed: Option<&Path>,
) -> Result<bool> {
    if let Some((start, end)) = window {
        let start = cli_date("--start", start)?;
        let end = cli_date("--end", end)?;
        let Some(window) = DateWindow::new(start, end) else {
            bail!("--start {start} is after --end {end}");
        };
        config.set_fixed_window(Some(window));
    }
    if jobs.is_some() {
        config.run.concurrency = jobs;
    }
    if limit.is_some() {
        config.run.limit = limit;
    }
    if let Some(root) = output {
        config.output.root = root;
    }
    config.validate()?;

    let mut codes: Vec<StockCode> = load_codes(codes_path)?.into_codes();
    if let Some(report) = only_failed {
        codes = filter_failed(codes, report)?;
    }
    let total = codes.len();

    let orchestrator = Orchestrator::from_config(&config)?;
    let codes = config.limit_codes(&codes);
    if codes.len() < total {
        info!(limit = codes.len(), listed = total, "processing the first codes only");
    }
    let result = orchestrator.run(codes, &LogProgress)?;
    print_summary(&result);
    Ok(result.all_succeeded())
}

/// Keep only codes whose symbol appears in a previous failure report.
fn filter_failed(codes: Vec<StockCode>, report: &Path) -> Result<Vec<StockCode>> {
    let content = std::fs::read_to_string(report)
        .with_context(|| format!("reading failure report {}", report.display()))?;
    let failed: HashSet<VendorCode> = FailureReport::parse_symbols(&content).into_iter().collect();
    let kept: Vec<StockCode> = codes
        .into_iter()
        .filter(|c| failed.contains(&c.symbol))
        .collect();
    info!(
        report = %report.display(),
        listed = failed.len(),
        matched = kept.len(),
        "retrying failed symbols"
    );
    Ok(kept)
}

fn print_summary(result: &BatchResult) {
    println!();
    println!("=== Harvest {} ===", result.run_id);
    println!("Symbols:    {}", result.total());
    println!("Succeeded:  {}", result.succeeded_count());
    println!("Failed:     {}", result.failed_count());
    println!("Success:    {:.1}%", result.success_rate() * 100.0);
    println!("Elapsed:    {:.1}s", result.elapsed().num_milliseconds() as f64 / 1000.0);
    if result.cancelled {
        println!("Cancelled:  yes");
    }
    if let Some(path) = &result.failure_report {
        println!("Report:     {}", path.display());
    }
    if let Some(path) = &result.manifest {
        println!("Manifest:   {}", path.display());
    }
}

fn run_codes(path: &Path) -> Result<bool> {
    let list = load_codes(path)?;
    let summary = list.analyze();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    for dup in list.duplicates() {
        println!("duplicate: {}\t{}\t{}", dup.symbol, dup.start_date, dup.end_date);
    }
    Ok(true)
}

fn run_tables(config: &HarvestConfig, database: Option<String>) -> Result<bool> {
    let source = config.table_source()?;
    source.connect()?;
    let database = database.unwrap_or_else(|| config.source.database.clone());
    let tables = source.list_tables(&database)?;
    println!("{database}: {} table(s)", tables.len());
    for t in tables {
        println!("  {t}");
    }
    Ok(true)
}

fn run_schema(config: &HarvestConfig, table: Option<String>) -> Result<bool> {
    let source = config.table_source()?;
    source.connect()?;
    let table = table.unwrap_or_else(|| config.source.table.clone());
    let columns = source.table_schema(&config.source.database, &table)?;
    let mapper = config.schema_mapper()?;
    println!("{}.{}", config.source.database, table);
    for c in columns {
        let mapped = mapper
            .translate(&c.name)
            .map(|col| format!("-> {col}"))
            .unwrap_or_default();
        println!("  {:<24} {:<12} {}", c.name, c.type_name, mapped);
    }
    Ok(true)
}

fn run_paths(config: &HarvestConfig, codes_path: &Path) -> Result<bool> {
    let list = load_codes(codes_path)?;
    let orchestrator = Orchestrator::from_config(config)?;
    for code in orchestrator.plan(config.limit_codes(list.codes())) {
        println!("{}\t{}", code.symbol, orchestrator.writer().path_for(&code).display());
    }
    Ok(true)
}
