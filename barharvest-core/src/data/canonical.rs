//! Canonical daily bars: the normalized shape every output file carries.

use crate::data::schema::CanonicalColumn;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One canonical row. Every numeric field is either a finite number or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub amount: Option<f64>,
    pub adjclose: Option<f64>,
}

impl CanonicalRecord {
    /// A row with only a date; every value null.
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            amount: None,
            adjclose: None,
        }
    }

    pub fn value(&self, column: CanonicalColumn) -> Option<f64> {
        match column {
            CanonicalColumn::Date => None,
            CanonicalColumn::Open => self.open,
            CanonicalColumn::High => self.high,
            CanonicalColumn::Low => self.low,
            CanonicalColumn::Close => self.close,
            CanonicalColumn::Volume => self.volume,
            CanonicalColumn::Amount => self.amount,
            CanonicalColumn::AdjClose => self.adjclose,
        }
    }

    pub fn set(&mut self, column: CanonicalColumn, value: Option<f64>) {
        let value = value.filter(|v| v.is_finite());
        match column {
            CanonicalColumn::Date => {}
            CanonicalColumn::Open => self.open = value,
            CanonicalColumn::High => self.high = value,
            CanonicalColumn::Low => self.low = value,
            CanonicalColumn::Close => self.close = value,
            CanonicalColumn::Volume => self.volume = value,
            CanonicalColumn::Amount => self.amount = value,
            CanonicalColumn::AdjClose => self.adjclose = value,
        }
    }

    /// Traded volume parsed and is zero or negative. A missing volume says
    /// nothing about trading and is never treated as a suspension.
    pub fn is_suspended(&self) -> bool {
        matches!(self.volume, Some(v) if v <= 0.0)
    }

    /// Null out every price-like field, keeping date and volume.
    pub fn clear_prices(&mut self) {
        self.open = None;
        self.high = None;
        self.low = None;
        self.close = None;
        self.amount = None;
        self.adjclose = None;
    }
}

/// Rows sorted ascending by date with unique dates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalTable {
    records: Vec<CanonicalRecord>,
}

impl CanonicalTable {
    /// Build a table from rows in source order. When a date repeats the row
    /// seen last wins. Returns the table and the number of rows superseded.
    pub fn from_records(records: Vec<CanonicalRecord>) -> (Self, usize) {
        let before = records.len();
        let mut indexed: Vec<(usize, CanonicalRecord)> = records.into_iter().enumerate().collect();
        // Ties on date keep source order, so the last of a run is the latest row.
        indexed.sort_by(|a, b| a.1.date.cmp(&b.1.date).then(a.0.cmp(&b.0)));

        let mut out: Vec<CanonicalRecord> = Vec::with_capacity(indexed.len());
        for (_, record) in indexed {
            match out.last_mut() {
                Some(prev) if prev.date == record.date => *prev = record,
                _ => out.push(record),
            }
        }
        let superseded = before - out.len();
        (Self { records: out }, superseded)
    }

    pub fn records(&self) -> &[CanonicalRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<CanonicalRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.records.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|r| r.date)
    }

    /// Keep rows matching `keep`. Order and uniqueness are preserved.
    pub fn retain(&mut self, keep: impl FnMut(&CanonicalRecord) -> bool) {
        self.records.retain(keep);
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut CanonicalRecord> {
        self.records.iter_mut()
    }

    /// Null cells per numeric column, in canonical order.
    pub fn null_counts(&self) -> Vec<(CanonicalColumn, usize)> {
        CanonicalColumn::ALL
            .into_iter()
            .filter(|c| *c != CanonicalColumn::Date)
            .map(|c| {
                let n = self.records.iter().filter(|r| r.value(c).is_none()).count();
                (c, n)
            })
            .collect()
    }

    /// Sorted strictly ascending by date.
    pub fn is_well_formed(&self) -> bool {
        self.records.windows(2).all(|w| w[0].date < w[1].date)
    }
}
