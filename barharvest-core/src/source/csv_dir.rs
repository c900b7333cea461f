//! Offline mirror of source tables as CSV dumps.
//!
//! Layout: `{root}/{table}/{canonical symbol}.csv`, each file in the source
//! schema with a header row. The database name is ignored.

use super::{ColumnInfo, FetchError, TableSource};
use crate::data::raw::{RawTable, RawValue};
use crate::data::schema::{CanonicalColumn, SchemaMapper};
use crate::symbol::CanonicalSymbol;
use chrono::NaiveDate;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CsvDirSource {
    root: PathBuf,
    date_column: Option<String>,
}

impl CsvDirSource {
    /// Mirror rooted at `root`; dumps live at `{root}/{table}/{SYMBOL}.csv`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            date_column: None,
        }
    }

    /// Pre-filter rows on this column's dates. Rows whose date cannot be read
    /// are passed through so the normalizer can count them.
    pub fn with_date_column(mut self, column: impl Into<String>) -> Self {
        self.date_column = Some(column.into());
        self
    }

    /// Use the first date candidate of `mapper` as the pre-filter column.
    pub fn with_mapper_date(self, mapper: &SchemaMapper) -> Self {
        let column = mapper.candidates(CanonicalColumn::Date).next().map(str::to_string);
        match column {
            Some(column) => self.with_date_column(column),
            None => self,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Dump file for one symbol of `table`.
    pub fn table_path(&self, table: &str, symbol: &CanonicalSymbol) -> PathBuf {
        self.root.join(table).join(format!("{symbol}.csv"))
    }

    fn read(&self, path: &Path) -> Result<RawTable, FetchError> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::Query(format!("no dump at {}", path.display()))
            } else {
                FetchError::Connectivity(format!("{}: {e}", path.display()))
            }
        })?;
        RawTable::from_csv_reader(file)
            .map_err(|e| FetchError::UnexpectedShape(format!("{}: {e}", path.display())))
    }
}

impl TableSource for CsvDirSource {
    fn name(&self) -> &str {
        "csv_dir"
    }

    fn connect(&self) -> Result<(), FetchError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(FetchError::Connectivity(format!(
                "{} is not a directory",
                self.root.display()
            )))
        }
    }

    fn query(
        &self,
        _database: &str,
        table: &str,
        symbol: &CanonicalSymbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawTable, FetchError> {
        let path = self.table_path(table, symbol);
        let raw = self.read(&path)?;
        debug!(symbol = %symbol, path = %path.display(), rows = raw.len(), "read dump");

        let Some(idx) = self
            .date_column
            .as_deref()
            .and_then(|c| raw.column_index(c))
        else {
            return Ok(raw);
        };

        let rows: Vec<Vec<RawValue>> = raw
            .rows()
            .iter()
            .filter(|row| match row[idx].as_date() {
                Some(date) => start <= date && date <= end,
                None => true,
            })
            .cloned()
            .collect();
        RawTable::with_rows(raw.columns().to_vec(), rows)
            .map_err(|e| FetchError::UnexpectedShape(e.to_string()))
    }

    fn list_tables(&self, _database: &str) -> Result<Vec<String>, FetchError> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| FetchError::Connectivity(format!("{}: {e}", self.root.display())))?;
        let mut tables: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        tables.sort();
        Ok(tables)
    }

    fn table_schema(&self, _database: &str, table: &str) -> Result<Vec<ColumnInfo>, FetchError> {
        let dir = self.root.join(table);
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| FetchError::Query(format!("{}: {e}", dir.display())))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        files.sort();
        let first = files
            .first()
            .ok_or_else(|| FetchError::Query(format!("no dumps under {}", dir.display())))?;

        let raw = self.read(first)?;
        Ok(raw
            .columns()
            .iter()
            .map(|name| ColumnInfo {
                name: name.clone(),
                type_name: "STRING".to_string(),
            })
            .collect())
    }
}
