//! BarHarvest Runner: batch orchestration on top of `barharvest-core`.
//!
//! This crate provides:
//! - TOML run configuration, validated once at startup
//! - The per-symbol job state machine (fetch → normalize → write)
//! - The orchestrator: sequential or bounded worker pool, cooperative
//!   cancellation, failure isolation
//! - Batch results, the failed-codes report and the JSON run manifest
//! - Progress reporting through `tracing`

pub mod batch;
pub mod config;
pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod report;

pub use batch::BatchResult;
pub use config::{ConfigError, HarvestConfig, SourceKind};
pub use job::{FailureRecord, JobContext, JobOutcome, JobResult, JobState, Stage, SymbolJob};
pub use orchestrator::{Orchestrator, RunError};
pub use progress::{BatchProgress, LogProgress};
pub use report::{FailureReport, ManifestEntry, RunManifest};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn orchestrator_is_send_sync() {
        assert_send::<Orchestrator>();
        assert_sync::<Orchestrator>();
    }

    #[test]
    fn outcomes_are_send() {
        assert_send::<JobOutcome>();
        assert_send::<BatchResult>();
        assert_send::<RunError>();
    }
}
