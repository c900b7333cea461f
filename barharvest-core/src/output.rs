//! Per-symbol output files.
//!
//! Layouts:
//! - per symbol: `{root}[/{table}]/{VENDOR}.{ext}`
//! - per window: `{root}[/{table}]/{VENDOR}_{YYYY_MM_DD}_{YYYY_MM_DD}.{ext}`
//!
//! The path is a pure function of the writer's settings and the code, so it
//! can be predicted without writing. Files are encoded in memory, written to
//! `{name}.tmp` and renamed into place: a reader never sees a partial file and
//! a failed write leaves nothing behind. Encoding is deterministic, so
//! writing the same table twice yields identical bytes.

use crate::codes::StockCode;
use crate::data::canonical::CanonicalTable;
use crate::data::schema::CanonicalColumn;
use crate::dates::underscore_format;
use chrono::Datelike;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    #[default]
    PerSymbol,
    PerWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteFailure {
    #[error("create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encode csv: {0}")]
    Csv(String),

    #[error("encode parquet: {0}")]
    Parquet(String),
}

/// A file that landed on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: u64,
    /// BLAKE3 of the file contents, hex.
    pub digest: String,
}

#[derive(Debug, Clone)]
pub struct OutputWriter {
    root: PathBuf,
    layout: OutputLayout,
    format: OutputFormat,
    section: Option<String>,
}

impl OutputWriter {
    /// CSV, one file per symbol, directly under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            layout: OutputLayout::default(),
            format: OutputFormat::default(),
            section: None,
        }
    }

    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Place files under `{root}/{section}`, typically the source table name.
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Directory every file of this writer lands in.
    pub fn directory(&self) -> PathBuf {
        match &self.section {
            Some(section) => self.root.join(section),
            None => self.root.clone(),
        }
    }

    /// Deterministic output path for `code`; identical inputs always map
    /// to the same file.
    pub fn path_for(&self, code: &StockCode) -> PathBuf {
        let ext = self.format.extension();
        let name = match self.layout {
            OutputLayout::PerSymbol => format!("{}.{ext}", code.symbol),
            OutputLayout::PerWindow => format!(
                "{}_{}_{}.{ext}",
                code.symbol,
                underscore_format(code.start_date),
                underscore_format(code.end_date)
            ),
        };
        self.directory().join(name)
    }

    /// Create the output directory. Run once before any job so an unusable
    /// root fails the whole run instead of every job.
    pub fn prepare(&self) -> Result<(), WriteFailure> {
        let dir = self.directory();
        fs::create_dir_all(&dir).map_err(|source| WriteFailure::CreateDir {
            path: dir.clone(),
            source,
        })?;
        // A directory can exist and still refuse new files.
        let probe = dir.join(".barharvest-probe");
        fs::write(&probe, b"").map_err(|source| WriteFailure::Io {
            path: probe.clone(),
            source,
        })?;
        let _ = fs::remove_file(&probe);
        Ok(())
    }

    /// Encode `table` in the configured format without touching disk.
    pub fn encode(&self, table: &CanonicalTable) -> Result<Vec<u8>, WriteFailure> {
        match self.format {
            OutputFormat::Csv => encode_csv(table),
            OutputFormat::Parquet => encode_parquet(table),
        }
    }

    /// Encode, write to a `.tmp` sibling, then rename into place. The
    /// returned digest is BLAKE3 over the final bytes.
    pub fn write(&self, table: &CanonicalTable, code: &StockCode) -> Result<WrittenFile, WriteFailure> {
        let bytes = self.encode(table)?;
        let path = self.path_for(code);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| WriteFailure::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        fs::write(&tmp_path, &bytes).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            WriteFailure::Io {
                path: tmp_path.clone(),
                source,
            }
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            WriteFailure::Io {
                path: path.clone(),
                source,
            }
        })?;

        Ok(WrittenFile {
            path,
            rows: table.len(),
            bytes: bytes.len() as u64,
            digest: blake3::hash(&bytes).to_hex().to_string(),
        })
    }
}

fn header() -> Vec<&'static str> {
    CanonicalColumn::ALL.iter().map(|c| c.name()).collect()
}

fn cell(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

/// Header row, then one line per record; dates `YYYY-MM-DD`, nulls empty.
pub fn encode_csv(table: &CanonicalTable) -> Result<Vec<u8>, WriteFailure> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(header())
        .map_err(|e| WriteFailure::Csv(e.to_string()))?;
    for r in table.records() {
        wtr.write_record([
            r.date.format("%Y-%m-%d").to_string(),
            cell(r.open),
            cell(r.high),
            cell(r.low),
            cell(r.close),
            cell(r.volume),
            cell(r.amount),
            cell(r.adjclose),
        ])
        .map_err(|e| WriteFailure::Csv(e.to_string()))?;
    }
    wtr.into_inner()
        .map_err(|e| WriteFailure::Csv(e.to_string()))
}

fn to_dataframe(table: &CanonicalTable) -> Result<DataFrame, WriteFailure> {
    let records = table.records();
    let dates: Vec<i32> = records
        .iter()
        .map(|r| r.date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
        .collect();
    let column = |c: CanonicalColumn| -> Column {
        let values: Vec<Option<f64>> = records.iter().map(|r| r.value(c)).collect();
        Column::new(c.name().into(), values)
    };

    let mut columns = vec![Column::new("date".into(), dates)
        .cast(&DataType::Date)
        .map_err(|e| WriteFailure::Parquet(format!("date cast: {e}")))?];
    columns.extend(
        CanonicalColumn::ALL
            .into_iter()
            .filter(|c| *c != CanonicalColumn::Date)
            .map(column),
    );
    DataFrame::new(columns).map_err(|e| WriteFailure::Parquet(format!("dataframe creation: {e}")))
}

/// Parquet bytes for `table`, columns in canonical order.
pub fn encode_parquet(table: &CanonicalTable) -> Result<Vec<u8>, WriteFailure> {
    let mut df = to_dataframe(table)?;
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .finish(&mut df)
        .map_err(|e| WriteFailure::Parquet(format!("write parquet: {e}")))?;
    Ok(buf)
}
