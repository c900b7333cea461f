//! In-memory source with scripted per-symbol responses.

use super::{ColumnInfo, FetchError, TableSource};
use crate::data::raw::RawTable;
use crate::symbol::CanonicalSymbol;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Serves a fixed raw table (or a fixed error) per symbol. The whole table is
/// returned regardless of the requested window so that window filtering is
/// left to the normalizer.
#[derive(Debug, Default)]
pub struct MemorySource {
    tables: HashMap<CanonicalSymbol, Result<RawTable, FetchError>>,
    columns: Vec<String>,
    connect_error: Option<FetchError>,
    latency: Duration,
    queries: AtomicUsize,
    log: Mutex<Vec<CanonicalSymbol>>,
}

impl MemorySource {
    /// `columns` is the schema reported for symbols with no scripted table.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            ..Default::default()
        }
    }

    /// Serve `table` for `symbol`.
    pub fn with_table(mut self, symbol: CanonicalSymbol, table: RawTable) -> Self {
        self.tables.insert(symbol, Ok(table));
        self
    }

    /// Fail every query for `symbol` with `error`.
    pub fn with_error(mut self, symbol: CanonicalSymbol, error: FetchError) -> Self {
        self.tables.insert(symbol, Err(error));
        self
    }

    pub fn failing_connect(mut self, error: FetchError) -> Self {
        self.connect_error = Some(error);
        self
    }

    /// Sleep this long inside every query.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Symbols queried, in call order.
    pub fn queried(&self) -> Vec<CanonicalSymbol> {
        self.log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

impl TableSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn connect(&self) -> Result<(), FetchError> {
        match &self.connect_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn query(
        &self,
        _database: &str,
        _table: &str,
        symbol: &CanonicalSymbol,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<RawTable, FetchError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.log.lock() {
            log.push(symbol.clone());
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        match self.tables.get(symbol) {
            Some(result) => result.clone(),
            None => Ok(RawTable::new(self.columns.clone())),
        }
    }

    fn list_tables(&self, _database: &str) -> Result<Vec<String>, FetchError> {
        Ok(vec!["memory".to_string()])
    }

    fn table_schema(&self, _database: &str, _table: &str) -> Result<Vec<ColumnInfo>, FetchError> {
        Ok(self
            .columns
            .iter()
            .map(|name| ColumnInfo {
                name: name.clone(),
                type_name: "ANY".to_string(),
            })
            .collect())
    }
}
