//! BarHarvest Core: symbols, code lists, schema mapping, normalization,
//! table sources and output files.
//!
//! This crate holds everything a single symbol's job touches:
//! - Vendor-prefixed and dotted symbol forms
//! - Tab-separated code lists with tolerant dates
//! - Raw source tables and the canonical daily-bar table
//! - Statically validated source → canonical column mapping
//! - The normalizer (dates, numerics, dedupe, adjusted close, window)
//! - Trading-calendar lookup
//! - Table sources: DolphinDB over HTTP, CSV mirror, in-memory
//! - Deterministic, atomic output files (CSV or Parquet)

pub mod calendar;
pub mod codes;
pub mod data;
pub mod dates;
pub mod output;
pub mod source;
pub mod symbol;

pub use calendar::{CalendarError, DayFileCalendar, TradingCalendar};
pub use codes::{CodeList, CodeListError, CodeListSummary, StockCode};
pub use data::{
    CanonicalColumn, CanonicalRecord, CanonicalTable, FailureKind, NormalizationFailure,
    Normalizer, RawTable, RawValue, SchemaMapper, SchemaProfile, SuspendedRowPolicy,
};
pub use dates::{parse_date, DateWindow};
pub use output::{OutputFormat, OutputLayout, OutputWriter, WriteFailure, WrittenFile};
pub use source::{ColumnInfo, FetchError, TableSource};
pub use symbol::{CanonicalSymbol, Exchange, SymbolError, VendorCode};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything a worker thread shares is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<StockCode>();
        require_sync::<StockCode>();
        require_send::<RawTable>();
        require_sync::<RawTable>();
        require_send::<CanonicalTable>();
        require_sync::<CanonicalTable>();
        require_send::<Normalizer>();
        require_sync::<Normalizer>();
        require_send::<OutputWriter>();
        require_sync::<OutputWriter>();
        require_send::<FetchError>();
        require_send::<NormalizationFailure>();
        require_send::<WriteFailure>();

        require_send::<source::DolphinHttpSource>();
        require_sync::<source::DolphinHttpSource>();
        require_send::<source::CsvDirSource>();
        require_sync::<source::CsvDirSource>();
        require_send::<source::MemorySource>();
        require_sync::<source::MemorySource>();
    }
}
