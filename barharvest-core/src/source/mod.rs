//! Fetch capability: where raw tables come from.
//!
//! The `TableSource` trait abstracts over the remote database, an offline CSV
//! mirror and the in-memory source used by tests. Implementations own their
//! session handling; callers share one source across worker threads, so every
//! implementation must be `Send + Sync`.

pub mod circuit_breaker;
pub mod csv_dir;
pub mod dolphin;
pub mod memory;

use crate::data::raw::RawTable;
use crate::symbol::CanonicalSymbol;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use circuit_breaker::CircuitBreaker;
pub use csv_dir::CsvDirSource;
pub use dolphin::{DolphinHttpSource, DolphinSettings};
pub use memory::MemorySource;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("cannot reach data source: {0}")]
    Connectivity(String),

    #[error("query timed out: {0}")]
    Timeout(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),

    #[error("data source refused request (circuit breaker open, retry in {remaining_secs}s)")]
    CircuitOpen { remaining_secs: u64 },
}

impl FetchError {
    /// Worth retrying after a pause.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Connectivity(_) | FetchError::Timeout(_))
    }
}

/// One column of a source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
}

pub trait TableSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Verify the source is reachable, logging in if needed.
    fn connect(&self) -> Result<(), FetchError>;

    /// Rows of `database.table` for one symbol with dates in `[start, end]`.
    fn query(
        &self,
        database: &str,
        table: &str,
        symbol: &CanonicalSymbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawTable, FetchError>;

    fn list_tables(&self, database: &str) -> Result<Vec<String>, FetchError>;

    fn table_schema(&self, database: &str, table: &str) -> Result<Vec<ColumnInfo>, FetchError>;

    /// False while the source is refusing requests.
    fn is_available(&self) -> bool {
        true
    }
}
