//! Batch orchestrator: drives one `SymbolJob` per code and aggregates the
//! outcomes.
//!
//! A job's failure never stops the run. Only pre-run checks (output root,
//! report directory, source reachability) abort it. The failure report and
//! manifest are written after every job is terminal.

use crate::batch::BatchResult;
use crate::config::{ConfigError, HarvestConfig};
use crate::job::{JobContext, JobOutcome, Stage, SymbolJob};
use crate::progress::BatchProgress;
use crate::report::{failure_report_path, manifest_path, FailureReport, ManifestContext, RunManifest};
use barharvest_core::codes::StockCode;
use barharvest_core::data::Normalizer;
use barharvest_core::dates::DateWindow;
use barharvest_core::output::{OutputWriter, WriteFailure};
use barharvest_core::source::{FetchError, TableSource};
use chrono::{DateTime, Local};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Failures that stop a run before any job starts.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("output root is not usable: {0}")]
    OutputRoot(#[source] WriteFailure),

    #[error("cannot create report directory {path}: {source}")]
    ReportDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("data source unreachable at startup: {0}")]
    SourceUnreachable(#[source] FetchError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

pub struct Orchestrator {
    source: Arc<dyn TableSource>,
    normalizer: Normalizer,
    writer: OutputWriter,
    database: String,
    table: String,
    fixed_window: Option<DateWindow>,
    concurrency: usize,
    report_dir: PathBuf,
    cancel: Arc<AtomicBool>,
    run_id: Option<String>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("source", &self.source.name())
            .field("database", &self.database)
            .field("table", &self.table)
            .field("fixed_window", &self.fixed_window)
            .field("concurrency", &self.concurrency)
            .field("report_dir", &self.report_dir)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Sequential run, reports under `logs`, no fixed window.
    pub fn new(
        source: Arc<dyn TableSource>,
        normalizer: Normalizer,
        writer: OutputWriter,
        database: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            source,
            normalizer,
            writer,
            database: database.into(),
            table: table.into(),
            fixed_window: None,
            concurrency: 1,
            report_dir: PathBuf::from("logs"),
            cancel: Arc::new(AtomicBool::new(false)),
            run_id: None,
        }
    }

    /// Wire everything from a validated config. `password_env` must already be
    /// resolved into `source.password`.
    pub fn from_config(config: &HarvestConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.table_source()?,
            config.normalizer()?,
            config.output_writer(),
            config.source.database.clone(),
            config.source.table.clone(),
        )
        .with_fixed_window(config.fixed_window()?)
        .with_concurrency(config.concurrency())
        .with_report_dir(config.run.report_dir.clone()))
    }

    /// Replace every code's window with `window` for the whole run.
    pub fn with_fixed_window(mut self, window: Option<DateWindow>) -> Self {
        self.fixed_window = window;
        self
    }

    /// Worker count; 1 runs on the calling thread.
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers.max(1);
        self
    }

    /// Directory for `failed_codes_{run}.txt` and `run_{run}.json`.
    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    /// Share an externally owned cancel flag (e.g. set from a signal handler).
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Fixed run id. Reports from an earlier run with the same id are
    /// overwritten.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Raising this flag stops the run before the next job starts. Jobs
    /// already running finish normally.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The writer every job shares.
    pub fn writer(&self) -> &OutputWriter {
        &self.writer
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    /// The source every job fetches from.
    pub fn source(&self) -> &dyn TableSource {
        self.source.as_ref()
    }

    /// The codes a run will process: duplicates removed (first wins) and the
    /// fixed window substituted. Every remaining code gets an outcome.
    pub fn plan(&self, codes: &[StockCode]) -> Vec<StockCode> {
        let mut seen = HashSet::new();
        let mut planned = Vec::with_capacity(codes.len());
        for code in codes {
            if !seen.insert(code.symbol.clone()) {
                warn!(symbol = %code.symbol, "duplicate symbol in input, keeping first occurrence");
                continue;
            }
            planned.push(match self.fixed_window {
                Some(window) => code.with_window(window),
                None => code.clone(),
            });
        }
        planned
    }

    fn preflight(&self) -> Result<(), RunError> {
        self.writer.prepare().map_err(RunError::OutputRoot)?;
        std::fs::create_dir_all(&self.report_dir).map_err(|source| RunError::ReportDir {
            path: self.report_dir.clone(),
            source,
        })?;
        self.source.connect().map_err(RunError::SourceUnreachable)?;
        Ok(())
    }

    /// Process `codes` and return every symbol's terminal outcome, in input
    /// order. Per-symbol problems are recorded in the result; only pre-run
    /// failures return `Err`.
    pub fn run(
        &self,
        codes: &[StockCode],
        progress: &dyn BatchProgress,
    ) -> Result<BatchResult, RunError> {
        let started_at = Local::now();
        let run_id = match &self.run_id {
            Some(id) => id.clone(),
            None => unused_run_id(&self.report_dir, &started_at),
        };

        self.preflight()?;

        let jobs = self.plan(codes);
        let total = jobs.len();
        info!(
            run_id = %run_id,
            source = self.source.name(),
            database = %self.database,
            table = %self.table,
            total,
            concurrency = self.concurrency,
            output = %self.writer.directory().display(),
            "starting run"
        );
        if let Some(window) = self.fixed_window {
            info!(window = %window, "fixed window overrides per-symbol dates");
        }

        let ctx = JobContext {
            source: self.source.as_ref(),
            database: &self.database,
            table: &self.table,
            normalizer: &self.normalizer,
            writer: &self.writer,
        };

        let run_one = |(index, code): (usize, &StockCode)| -> JobOutcome {
            if self.cancel.load(Ordering::Relaxed) {
                return JobOutcome::cancelled(code.clone());
            }
            progress.on_start(code, index, total);
            let outcome = SymbolJob::new(code.clone()).run(&ctx);
            progress.on_complete(&outcome, index, total);
            outcome
        };

        let outcomes: Vec<JobOutcome> = if self.concurrency > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.concurrency)
                .thread_name(|i| format!("harvest-{i}"))
                .build()
                .map_err(|e| RunError::ThreadPool(e.to_string()))?;
            pool.install(|| jobs.par_iter().enumerate().map(&run_one).collect())
        } else {
            jobs.iter().enumerate().map(&run_one).collect()
        };

        // Every job is terminal past this point.
        let cancelled = outcomes
            .iter()
            .filter_map(JobOutcome::failure)
            .any(|f| f.stage == Stage::Cancelled);

        let mut result = BatchResult {
            run_id,
            started_at,
            finished_at: Local::now(),
            outcomes,
            cancelled,
            failure_report: None,
            manifest: None,
        };
        self.write_reports(&mut result);
        progress.on_batch_complete(&result);
        Ok(result)
    }

    fn write_reports(&self, result: &mut BatchResult) {
        match FailureReport::from_result(result).write(&self.report_dir) {
            Ok(path) => result.failure_report = Some(path),
            Err(e) => error!(dir = %self.report_dir.display(), "failed to write failure report: {e}"),
        }

        let output_dir = self.writer.directory();
        let ctx = ManifestContext {
            source: self.source.name(),
            database: &self.database,
            table: &self.table,
            output_dir: &output_dir,
            fixed_window: self.fixed_window,
            concurrency: self.concurrency,
        };
        match RunManifest::from_result(result, &ctx).write(&self.report_dir) {
            Ok(path) => result.manifest = Some(path),
            Err(e) => error!(dir = %self.report_dir.display(), "failed to write run manifest: {e}"),
        }
    }
}

/// `%Y%m%d_%H%M%S_%3f` from the start time, suffixed `_1`, `_2`, ... while a
/// report for that id already exists in `report_dir`.
fn unused_run_id(report_dir: &Path, started_at: &DateTime<Local>) -> String {
    let base = started_at.format("%Y%m%d_%H%M%S_%3f").to_string();
    let taken = |id: &str| {
        failure_report_path(report_dir, id).exists() || manifest_path(report_dir, id).exists()
    };
    if !taken(&base) {
        return base;
    }
    (1u32..)
        .map(|n| format!("{base}_{n}"))
        .find(|id| !taken(id))
        .unwrap_or(base)
}
