//! Raw tables in the source schema, exactly as the fetch capability returns them.

use crate::dates::parse_date;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::Read;
use thiserror::Error;

/// A single cell from the source. Sources hand back strings, numbers or nulls
/// depending on the column type and transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl RawValue {
    pub fn text(s: impl Into<String>) -> Self {
        RawValue::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Numeric coercion. Non-finite values, empty strings and null markers
    /// yield `None`; thousands separators are tolerated.
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            RawValue::Number(n) => *n,
            RawValue::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    return None;
                }
                t.replace(',', "").parse::<f64>().ok()?
            }
            RawValue::Null | RawValue::Bool(_) => return None,
        };
        v.is_finite().then_some(v)
    }

    /// Date coercion through the tolerant parser. Integral numbers are read
    /// as compact `YYYYMMDD`.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            RawValue::Text(s) => parse_date(s),
            RawValue::Number(n) if n.fract() == 0.0 && *n >= 10_000_101.0 && *n <= 99_991_231.0 => {
                parse_date(&format!("{}", *n as u32))
            }
            _ => None,
        }
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<f64> for RawValue {
    fn from(n: f64) -> Self {
        RawValue::Number(n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RawTableError {
    #[error("row {row} has {actual} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("column '{column}' has {actual} values, expected {expected}")]
    ColumnLength {
        column: String,
        expected: usize,
        actual: usize,
    },
}

/// Ordered rows keyed by the source schema's column names. No uniqueness is
/// assumed; duplicate trade dates are resolved by the normalizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<RawValue>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table, rejecting any row whose width differs from `columns`.
    pub fn with_rows(
        columns: Vec<String>,
        rows: Vec<Vec<RawValue>>,
    ) -> Result<Self, RawTableError> {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Build from column vectors, the layout most script endpoints return.
    pub fn from_columns(columns: Vec<(String, Vec<RawValue>)>) -> Result<Self, RawTableError> {
        let height = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        for (name, values) in &columns {
            if values.len() != height {
                return Err(RawTableError::ColumnLength {
                    column: name.clone(),
                    expected: height,
                    actual: values.len(),
                });
            }
        }

        let names = columns.iter().map(|(n, _)| n.clone()).collect();
        let mut iters: Vec<_> = columns.into_iter().map(|(_, v)| v.into_iter()).collect();
        let rows = (0..height)
            .map(|_| iters.iter_mut().filter_map(Iterator::next).collect())
            .collect();

        Ok(Self {
            columns: names,
            rows,
        })
    }

    /// Read a CSV dump with a header row. Every cell is kept as text; empty
    /// cells become nulls.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns = rdr.headers()?.iter().map(str::to_string).collect();
        let mut table = Self::new(columns);
        for record in rdr.records() {
            let record = record?;
            table.rows.push(
                record
                    .iter()
                    .map(|cell| {
                        if cell.is_empty() {
                            RawValue::Null
                        } else {
                            RawValue::text(cell)
                        }
                    })
                    .collect(),
            );
        }
        Ok(table)
    }

    /// Append one row; ragged rows are an error.
    pub fn push_row(&mut self, row: Vec<RawValue>) -> Result<(), RawTableError> {
        if row.len() != self.columns.len() {
            return Err(RawTableError::RaggedRow {
                row: self.rows.len(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<RawValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Case-insensitive column lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_coercion() {
        assert_eq!(RawValue::Number(1.5).as_f64(), Some(1.5));
        assert_eq!(RawValue::text(" 1,234.5 ").as_f64(), Some(1234.5));
        assert_eq!(RawValue::text("").as_f64(), None);
        assert_eq!(RawValue::text("abc").as_f64(), None);
        assert_eq!(RawValue::text("NaN").as_f64(), None);
        assert_eq!(RawValue::Number(f64::INFINITY).as_f64(), None);
        assert_eq!(RawValue::Null.as_f64(), None);
    }

    #[test]
    fn date_coercion() {
        let expected = NaiveDate::from_ymd_opt(2005, 4, 8);
        assert_eq!(RawValue::text("20050408").as_date(), expected);
        assert_eq!(RawValue::text("2005.04.08").as_date(), expected);
        assert_eq!(RawValue::Number(20_050_408.0).as_date(), expected);
        assert_eq!(RawValue::Number(1.5).as_date(), None);
        assert_eq!(RawValue::Null.as_date(), None);
    }

    #[test]
    fn json_cells_deserialize_untagged() {
        let cells: Vec<RawValue> = serde_json::from_str(r#"[null, 3, 2.5, "x", true]"#).unwrap();
        assert_eq!(
            cells,
            vec![
                RawValue::Null,
                RawValue::Number(3.0),
                RawValue::Number(2.5),
                RawValue::text("x"),
                RawValue::Bool(true),
            ]
        );
    }

    #[test]
    fn from_columns_transposes() {
        let table = RawTable::from_columns(vec![
            ("a".into(), vec![RawValue::from(1.0), RawValue::from(2.0)]),
            ("b".into(), vec![RawValue::from("x"), RawValue::from("y")]),
        ])
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1], vec![RawValue::from(2.0), RawValue::from("y")]);
    }

    #[test]
    fn from_columns_rejects_uneven_lengths() {
        let err = RawTable::from_columns(vec![
            ("a".into(), vec![RawValue::from(1.0)]),
            ("b".into(), vec![]),
        ])
        .unwrap_err();
        assert!(matches!(err, RawTableError::ColumnLength { .. }));
    }

    #[test]
    fn push_row_checks_width() {
        let mut table = RawTable::new(vec!["a".into(), "b".into()]);
        assert!(table.push_row(vec![RawValue::Null]).is_err());
        assert!(table.push_row(vec![RawValue::Null, RawValue::Null]).is_ok());
    }

    #[test]
    fn csv_reader_keeps_text_and_nulls() {
        let csv = "TRADE_DT,S_DQ_CLOSE\n20050408,10.5\n20050411,\n";
        let table = RawTable::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.columns(), ["TRADE_DT", "S_DQ_CLOSE"]);
        assert_eq!(table.rows()[1][1], RawValue::Null);
        assert_eq!(table.column_index("s_dq_close"), Some(1));
    }
}
