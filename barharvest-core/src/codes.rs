//! Input code list: one `symbol \t start_date \t end_date` line per security.

use crate::dates::{parse_date, DateWindow};
use crate::symbol::{parse_any, CanonicalSymbol, Exchange, SymbolError, VendorCode};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// First-cell values that mark a header row rather than a security.
const HEADER_MARKERS: [&str; 3] = ["symbol", "ticker", "代码"];

#[derive(Debug, Error)]
pub enum CodeListError {
    #[error("read code list {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("code list line {line}: {source}")]
    Csv {
        line: u64,
        #[source]
        source: csv::Error,
    },

    #[error("code list line {line}: expected 3 tab-separated columns, found {found}")]
    MissingColumns { line: u64, found: usize },

    #[error("code list line {line}: {source}")]
    Symbol {
        line: u64,
        #[source]
        source: SymbolError,
    },

    #[error("code list line {line}: unparseable date '{value}'")]
    BadDate { line: u64, value: String },

    #[error("code list line {line}: start date {start} is after end date {end}")]
    InvertedWindow {
        line: u64,
        start: NaiveDate,
        end: NaiveDate,
    },
}

/// One security and the date range requested for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockCode {
    pub symbol: VendorCode,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl StockCode {
    pub fn new(symbol: VendorCode, window: DateWindow) -> Self {
        Self {
            symbol,
            start_date: window.start,
            end_date: window.end,
        }
    }

    /// The dotted form passed to the source query.
    pub fn canonical(&self) -> CanonicalSymbol {
        self.symbol.to_canonical()
    }

    pub fn window(&self) -> DateWindow {
        DateWindow {
            start: self.start_date,
            end: self.end_date,
        }
    }

    /// Same symbol, different window.
    pub fn with_window(&self, window: DateWindow) -> Self {
        Self::new(self.symbol.clone(), window)
    }
}

/// Counts reported by `analyze()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeListSummary {
    /// Security lines read, duplicates included.
    pub total_records: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub per_exchange: BTreeMap<Exchange, usize>,
}

/// A parsed, de-duplicated code list in input order.
#[derive(Debug, Clone, Default)]
pub struct CodeList {
    codes: Vec<StockCode>,
    duplicates: Vec<StockCode>,
}

impl CodeList {
    pub fn from_file(path: &Path) -> Result<Self, CodeListError> {
        let content = std::fs::read_to_string(path).map_err(|source| CodeListError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse tab-separated content. Blank lines and a header row are skipped;
    /// a symbol seen twice keeps its first line.
    pub fn parse(content: &str) -> Result<Self, CodeListError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut list = CodeList::default();
        let mut seen: HashSet<VendorCode> = HashSet::new();

        for result in reader.records() {
            let record = result.map_err(|source| CodeListError::Csv {
                line: source.position().map(|p| p.line()).unwrap_or(0),
                source,
            })?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            let first = record.get(0).unwrap_or("");
            if record.iter().all(str::is_empty) {
                continue;
            }
            if HEADER_MARKERS
                .iter()
                .any(|m| first.eq_ignore_ascii_case(m))
            {
                continue;
            }
            if record.len() < 3 {
                return Err(CodeListError::MissingColumns {
                    line,
                    found: record.len(),
                });
            }

            let symbol =
                parse_any(first).map_err(|source| CodeListError::Symbol { line, source })?;
            let start = parse_field(&record[1], line)?;
            let end = parse_field(&record[2], line)?;
            let window = DateWindow::new(start, end)
                .ok_or(CodeListError::InvertedWindow { line, start, end })?;

            let code = StockCode::new(symbol, window);
            if seen.insert(code.symbol.clone()) {
                list.codes.push(code);
            } else {
                warn!(symbol = %code.symbol, line, "duplicate symbol in code list, keeping first");
                list.duplicates.push(code);
            }
        }

        Ok(list)
    }

    pub fn codes(&self) -> &[StockCode] {
        &self.codes
    }

    pub fn into_codes(self) -> Vec<StockCode> {
        self.codes
    }

    /// Lines dropped because their symbol appeared earlier.
    pub fn duplicates(&self) -> &[StockCode] {
        &self.duplicates
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Counts per exchange plus the duplicates dropped while parsing.
    pub fn analyze(&self) -> CodeListSummary {
        let mut per_exchange = BTreeMap::new();
        for code in &self.codes {
            *per_exchange.entry(code.symbol.exchange()).or_insert(0) += 1;
        }
        CodeListSummary {
            total_records: self.codes.len() + self.duplicates.len(),
            unique: self.codes.len(),
            duplicates: self.duplicates.len(),
            per_exchange,
        }
    }
}

fn parse_field(value: &str, line: u64) -> Result<NaiveDate, CodeListError> {
    parse_date(value).ok_or_else(|| CodeListError::BadDate {
        line,
        value: value.to_string(),
    })
}
