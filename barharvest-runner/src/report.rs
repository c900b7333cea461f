//! Run artifacts: the failed-symbol report and the JSON run manifest.
//!
//! Both land in the report directory and are named by run id:
//! - `failed_codes_{run_id}.txt`: one `VENDOR -> CANONICAL | stage | reason`
//!   line per failure after `#` header lines; written even when empty
//! - `run_{run_id}.json`: per-symbol outcome, rows, path and digest

use crate::batch::BatchResult;
use crate::job::{FailureRecord, JobResult, JobState, Stage};
use barharvest_core::dates::DateWindow;
use barharvest_core::symbol::{parse_any, VendorCode};
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Current schema version for the manifest.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// `{dir}/failed_codes_{run_id}.txt`
pub fn failure_report_path(dir: &Path, run_id: &str) -> PathBuf {
    dir.join(format!("failed_codes_{run_id}.txt"))
}

/// `{dir}/run_{run_id}.json`
pub fn manifest_path(dir: &Path, run_id: &str) -> PathBuf {
    dir.join(format!("run_{run_id}.json"))
}

/// Persisted projection of the failed half of a `BatchResult`.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureReport {
    pub run_id: String,
    pub generated_at: DateTime<Local>,
    pub total: usize,
    pub succeeded: usize,
    pub failures: Vec<FailureRecord>,
}

impl FailureReport {
    /// Snapshot the failures of a finished run, in input order.
    pub fn from_result(result: &BatchResult) -> Self {
        Self {
            run_id: result.run_id.clone(),
            generated_at: result.finished_at,
            total: result.total(),
            succeeded: result.succeeded_count(),
            failures: result.failed().cloned().collect(),
        }
    }

    /// The report text: `#` header lines, then one line per failure.
    /// Reasons are collapsed to a single line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# barharvest failed codes");
        let _ = writeln!(out, "# run: {}", self.run_id);
        let _ = writeln!(out, "# generated: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(
            out,
            "# total: {}  succeeded: {}  failed: {}",
            self.total,
            self.succeeded,
            self.failures.len()
        );
        let _ = writeln!(out, "# VENDOR -> CANONICAL | stage | reason");
        for f in &self.failures {
            let _ = writeln!(
                out,
                "{} -> {} | {} | {}",
                f.symbol,
                f.canonical,
                f.stage,
                single_line(&f.reason)
            );
        }
        out
    }

    /// Write `failed_codes_{run_id}.txt` under `dir`.
    pub fn write(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = failure_report_path(dir, &self.run_id);
        write_atomic(&path, self.render().as_bytes())?;
        Ok(path)
    }

    /// Vendor codes listed in a rendered report, in file order. Comment and
    /// malformed lines are skipped.
    pub fn parse_symbols(content: &str) -> Vec<VendorCode> {
        content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split("->").next())
            .filter_map(|s| parse_any(s.trim()).ok())
            .collect()
    }
}

/// Reasons come from arbitrary error text; keep one entry per line.
fn single_line(reason: &str) -> String {
    reason.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub symbol: VendorCode,
    pub canonical: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub elapsed_ms: u64,
}

/// What was asked for, what happened, what landed on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub run_id: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub source: String,
    pub database: String,
    pub table: String,
    pub output_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_window: Option<DateWindow>,
    pub concurrency: usize,
    pub cancelled: bool,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_rows: usize,
    pub entries: Vec<ManifestEntry>,
}

/// Run-level facts the batch result does not carry.
#[derive(Debug, Clone)]
pub struct ManifestContext<'a> {
    pub source: &'a str,
    pub database: &'a str,
    pub table: &'a str,
    pub output_dir: &'a Path,
    pub fixed_window: Option<DateWindow>,
    pub concurrency: usize,
}

impl RunManifest {
    /// One entry per outcome, in input order, plus run-level totals.
    pub fn from_result(result: &BatchResult, ctx: &ManifestContext<'_>) -> Self {
        let entries: Vec<ManifestEntry> = result
            .outcomes
            .iter()
            .map(|o| {
                let mut entry = ManifestEntry {
                    symbol: o.code.symbol.clone(),
                    canonical: o.code.canonical().to_string(),
                    start_date: o.code.start_date,
                    end_date: o.code.end_date,
                    state: o.state,
                    stage: None,
                    reason: None,
                    rows: None,
                    path: None,
                    bytes: None,
                    digest: None,
                    elapsed_ms: o.elapsed_ms,
                };
                match &o.result {
                    JobResult::Done(w) => {
                        entry.rows = Some(w.rows);
                        entry.path = Some(w.path.clone());
                        entry.bytes = Some(w.bytes);
                        entry.digest = Some(w.digest.clone());
                    }
                    JobResult::Failed(f) => {
                        entry.stage = Some(f.stage);
                        entry.reason = Some(f.reason.clone());
                    }
                }
                entry
            })
            .collect();

        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            run_id: result.run_id.clone(),
            started_at: result.started_at,
            finished_at: result.finished_at,
            source: ctx.source.to_string(),
            database: ctx.database.to_string(),
            table: ctx.table.to_string(),
            output_dir: ctx.output_dir.to_path_buf(),
            fixed_window: ctx.fixed_window,
            concurrency: ctx.concurrency,
            cancelled: result.cancelled,
            total: result.total(),
            succeeded: result.succeeded_count(),
            failed: result.failed_count(),
            total_rows: entries.iter().filter_map(|e| e.rows).sum(),
            entries,
        }
    }

    /// Write `run_{run_id}.json` under `dir` as pretty JSON.
    pub fn write(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = manifest_path(dir, &self.run_id);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write_atomic(&path, json.as_bytes())?;
        Ok(path)
    }

    /// Read a manifest back; a malformed file is `InvalidData`.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        e
    })
}
