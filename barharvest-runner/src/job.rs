//! One symbol's unit of work: fetch → normalize → write.
//!
//! State machine:
//!
//! ```text
//! PENDING → FETCHING → FETCH_FAILED
//!                    → FETCHED → NORMALIZING → NORMALIZE_FAILED
//!                                            → NORMALIZED → WRITING → WRITE_FAILED
//!                                                                   → DONE
//! ```
//!
//! Each stage is attempted exactly once. Every stage error is caught here and
//! turned into a terminal state with a structured reason; nothing escapes to
//! the orchestrator. Only `DONE` leaves a file behind.

use barharvest_core::codes::StockCode;
use barharvest_core::data::Normalizer;
use barharvest_core::output::{OutputWriter, WrittenFile};
use barharvest_core::source::TableSource;
use barharvest_core::symbol::{CanonicalSymbol, VendorCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Fetching,
    FetchFailed,
    Fetched,
    Normalizing,
    NormalizeFailed,
    Normalized,
    Writing,
    WriteFailed,
    Done,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::FetchFailed | JobState::NormalizeFailed | JobState::WriteFailed | JobState::Done
        )
    }

    /// Legal successor states.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Fetching, FetchFailed)
                | (Fetching, Fetched)
                | (Fetched, Normalizing)
                | (Normalizing, NormalizeFailed)
                | (Normalizing, Normalized)
                | (Normalized, Writing)
                | (Writing, WriteFailed)
                | (Writing, Done)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "PENDING",
            JobState::Fetching => "FETCHING",
            JobState::FetchFailed => "FETCH_FAILED",
            JobState::Fetched => "FETCHED",
            JobState::Normalizing => "NORMALIZING",
            JobState::NormalizeFailed => "NORMALIZE_FAILED",
            JobState::Normalized => "NORMALIZED",
            JobState::Writing => "WRITING",
            JobState::WriteFailed => "WRITE_FAILED",
            JobState::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// Where a job stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Normalize,
    Write,
    /// Never started: the run was cancelled first.
    Cancelled,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::Write => "write",
            Stage::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{symbol, stage, reason}` for one failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub symbol: VendorCode,
    pub canonical: CanonicalSymbol,
    pub stage: Stage,
    /// Failure class within the stage, e.g. `MissingColumn`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobResult {
    Done(WrittenFile),
    Failed(FailureRecord),
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub code: StockCode,
    pub state: JobState,
    pub result: JobResult,
    pub elapsed_ms: u64,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, JobResult::Done(_))
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        match &self.result {
            JobResult::Failed(f) => Some(f),
            JobResult::Done(_) => None,
        }
    }

    pub fn written(&self) -> Option<&WrittenFile> {
        match &self.result {
            JobResult::Done(w) => Some(w),
            JobResult::Failed(_) => None,
        }
    }

    /// Outcome for a job that never left `PENDING`.
    pub fn cancelled(code: StockCode) -> Self {
        let failure = FailureRecord {
            canonical: code.canonical(),
            symbol: code.symbol.clone(),
            stage: Stage::Cancelled,
            kind: None,
            reason: "run cancelled before the job started".to_string(),
        };
        Self {
            code,
            state: JobState::Pending,
            result: JobResult::Failed(failure),
            elapsed_ms: 0,
        }
    }
}

/// Everything a job borrows from its run.
#[derive(Clone, Copy)]
pub struct JobContext<'a> {
    pub source: &'a dyn TableSource,
    pub database: &'a str,
    pub table: &'a str,
    pub normalizer: &'a Normalizer,
    pub writer: &'a OutputWriter,
}

#[derive(Debug, Clone)]
pub struct SymbolJob {
    code: StockCode,
    state: JobState,
    started: Option<Instant>,
}

impl SymbolJob {
    /// A `PENDING` job for `code`.
    pub fn new(code: StockCode) -> Self {
        Self {
            code,
            state: JobState::Pending,
            started: None,
        }
    }

    pub fn code(&self) -> &StockCode {
        &self.code
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn advance(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal job transition {} -> {next}",
            self.state
        );
        trace!(symbol = %self.code.symbol, from = %self.state, to = %next, "job transition");
        self.state = next;
    }

    fn fail(mut self, state: JobState, stage: Stage, kind: Option<String>, reason: String) -> JobOutcome {
        self.advance(state);
        let failure = FailureRecord {
            symbol: self.code.symbol.clone(),
            canonical: self.code.canonical(),
            stage,
            kind,
            reason,
        };
        let elapsed_ms = self.elapsed_ms();
        JobOutcome {
            code: self.code,
            state: self.state,
            result: JobResult::Failed(failure),
            elapsed_ms,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }

    /// Drive the job to a terminal state.
    pub fn run(mut self, ctx: &JobContext<'_>) -> JobOutcome {
        self.started = Some(Instant::now());
        let canonical = self.code.canonical();

        self.advance(JobState::Fetching);
        let raw = match ctx.source.query(
            ctx.database,
            ctx.table,
            &canonical,
            self.code.start_date,
            self.code.end_date,
        ) {
            Ok(raw) => raw,
            Err(e) => return self.fail(JobState::FetchFailed, Stage::Fetch, None, e.to_string()),
        };
        self.advance(JobState::Fetched);
        debug!(symbol = %self.code.symbol, rows = raw.len(), "fetched");

        self.advance(JobState::Normalizing);
        let table = match ctx.normalizer.normalize(&raw, &self.code) {
            Ok(table) => table,
            Err(e) => {
                return self.fail(
                    JobState::NormalizeFailed,
                    Stage::Normalize,
                    Some(e.kind().to_string()),
                    e.to_string(),
                )
            }
        };
        self.advance(JobState::Normalized);

        self.advance(JobState::Writing);
        let written = match ctx.writer.write(&table, &self.code) {
            Ok(written) => written,
            Err(e) => return self.fail(JobState::WriteFailed, Stage::Write, None, e.to_string()),
        };
        self.advance(JobState::Done);

        let elapsed_ms = self.elapsed_ms();
        JobOutcome {
            code: self.code,
            state: self.state,
            result: JobResult::Done(written),
            elapsed_ms,
        }
    }
}
