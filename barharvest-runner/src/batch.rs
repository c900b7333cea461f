//! Aggregate outcome of one run.

use crate::job::{FailureRecord, JobOutcome};
use barharvest_core::symbol::VendorCode;
use chrono::{DateTime, Local};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Every input symbol's terminal outcome, in input order. Succeeded and
/// failed symbols partition the input: each appears in exactly one.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub run_id: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub outcomes: Vec<JobOutcome>,
    /// Some jobs never started because the cancel flag was raised.
    pub cancelled: bool,
    pub failure_report: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
}

impl BatchResult {
    /// Number of symbols the run planned.
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Symbols whose file was written, in input order.
    pub fn succeeded(&self) -> impl Iterator<Item = &VendorCode> {
        self.outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| &o.code.symbol)
    }

    /// Failure records, in input order.
    pub fn failed(&self) -> impl Iterator<Item = &FailureRecord> {
        self.outcomes.iter().filter_map(JobOutcome::failure)
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn succeeded_set(&self) -> BTreeSet<VendorCode> {
        self.succeeded().cloned().collect()
    }

    /// Failed symbol → reason.
    pub fn failed_map(&self) -> BTreeMap<VendorCode, String> {
        self.failed()
            .map(|f| (f.symbol.clone(), f.reason.clone()))
            .collect()
    }

    /// No symbol failed; also true for an empty run.
    pub fn all_succeeded(&self) -> bool {
        self.failed_count() == 0
    }

    /// Fraction of symbols that succeeded; 1.0 for an empty run.
    pub fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            1.0
        } else {
            self.succeeded_count() as f64 / self.total() as f64
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
