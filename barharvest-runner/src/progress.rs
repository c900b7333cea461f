//! Progress callbacks for a batch run.

use crate::batch::BatchResult;
use crate::job::{JobOutcome, JobResult};
use barharvest_core::codes::StockCode;
use tracing::{error, info, warn};

/// Progress callback for multi-symbol runs. Called from worker threads when
/// the run uses a pool, so implementations must be `Sync`.
pub trait BatchProgress: Send + Sync {
    /// Called when a job leaves `PENDING`.
    fn on_start(&self, code: &StockCode, index: usize, total: usize);

    /// Called when a job reaches a terminal state.
    fn on_complete(&self, outcome: &JobOutcome, index: usize, total: usize);

    /// Called once, after every job is terminal and the report is written.
    fn on_batch_complete(&self, result: &BatchResult);
}

/// Reports through `tracing`: one line per job start and outcome, then a
/// run summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl BatchProgress for LogProgress {
    fn on_start(&self, code: &StockCode, index: usize, total: usize) {
        info!(
            symbol = %code.symbol,
            start = %code.start_date,
            end = %code.end_date,
            "[{}/{}] fetching {}",
            index + 1,
            total,
            code.canonical()
        );
    }

    fn on_complete(&self, outcome: &JobOutcome, index: usize, total: usize) {
        match &outcome.result {
            JobResult::Done(written) => info!(
                symbol = %outcome.code.symbol,
                rows = written.rows,
                elapsed_ms = outcome.elapsed_ms,
                "[{}/{}] saved {}",
                index + 1,
                total,
                written.path.display()
            ),
            JobResult::Failed(failure) => error!(
                symbol = %failure.symbol,
                stage = %failure.stage,
                "[{}/{}] {} failed: {}",
                index + 1,
                total,
                failure.canonical,
                failure.reason
            ),
        }
    }

    fn on_batch_complete(&self, result: &BatchResult) {
        let total = result.total();
        let failed = result.failed_count();
        info!(
            run_id = %result.run_id,
            total,
            succeeded = result.succeeded_count(),
            failed,
            success_rate = %format!("{:.1}%", result.success_rate() * 100.0),
            "run complete"
        );
        if result.cancelled {
            warn!(run_id = %result.run_id, "run was cancelled; unstarted symbols are listed as failed");
        }
        if let Some(path) = &result.failure_report {
            if failed > 0 {
                warn!(report = %path.display(), "{failed} symbol(s) failed");
            }
        }
    }
}
