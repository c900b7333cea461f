//! Raw source table → canonical table.
//!
//! The transform is a pure function of the raw table, the requested window
//! and the normalizer's configuration:
//!
//! 1. resolve every required canonical column through the `SchemaMapper`
//! 2. parse dates, dropping rows whose date cannot be read
//! 3. coerce numerics (a bad cell becomes null, the row stays)
//! 4. dedupe by date keeping the last row in source order, sort ascending
//! 5. fill `adjclose` from `close` when the source carries no adjusted column
//! 6. drop non-trading days when a calendar is configured
//! 7. restrict to the inclusive `[start, end]` window
//! 8. apply the suspended-row policy

use crate::calendar::TradingCalendar;
use crate::codes::StockCode;
use crate::data::canonical::{CanonicalRecord, CanonicalTable};
use crate::data::raw::{RawTable, RawValue};
use crate::data::schema::{CanonicalColumn, ResolvedColumns, SchemaMapper};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Coarse failure class, used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    MissingColumn,
    NoValidRows,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::MissingColumn => f.write_str("MissingColumn"),
            FailureKind::NoValidRows => f.write_str("NoValidRows"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationFailure {
    #[error("missing required source column(s): {}", column_list(.columns))]
    MissingColumn { columns: Vec<CanonicalColumn> },

    #[error("none of {rows} raw rows has a parseable date")]
    NoValidRows { rows: usize },
}

impl NormalizationFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            NormalizationFailure::MissingColumn { .. } => FailureKind::MissingColumn,
            NormalizationFailure::NoValidRows { .. } => FailureKind::NoValidRows,
        }
    }
}

fn column_list(columns: &[CanonicalColumn]) -> String {
    columns
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// What to do with rows whose volume parsed as zero or negative. Rows are
/// left untouched unless a policy is chosen explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendedRowPolicy {
    /// Leave the row untouched.
    #[default]
    Keep,
    /// Keep the row but null every price field.
    NullPrices,
    /// Remove the row.
    Drop,
}

/// Row accounting for one normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub raw_rows: usize,
    pub bad_dates: usize,
    /// Non-null raw cells that failed numeric coercion.
    pub bad_numbers: usize,
    pub duplicates: usize,
    pub off_calendar: usize,
    pub out_of_window: usize,
    pub suspended: usize,
    pub output_rows: usize,
    pub adjclose_from_close: bool,
}

const NUMERIC_COLUMNS: [CanonicalColumn; 7] = [
    CanonicalColumn::Open,
    CanonicalColumn::High,
    CanonicalColumn::Low,
    CanonicalColumn::Close,
    CanonicalColumn::Volume,
    CanonicalColumn::Amount,
    CanonicalColumn::AdjClose,
];

#[derive(Clone)]
pub struct Normalizer {
    mapper: SchemaMapper,
    suspended: SuspendedRowPolicy,
    calendar: Option<Arc<dyn TradingCalendar>>,
}

impl fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Normalizer")
            .field("mapper", &self.mapper)
            .field("suspended", &self.suspended)
            .field("calendar", &self.calendar.is_some())
            .finish()
    }
}

impl Normalizer {
    /// Normalizer for `mapper`: suspended rows kept as-is, no calendar.
    pub fn new(mapper: SchemaMapper) -> Self {
        Self {
            mapper,
            suspended: SuspendedRowPolicy::default(),
            calendar: None,
        }
    }

    pub fn with_suspended_policy(mut self, policy: SuspendedRowPolicy) -> Self {
        self.suspended = policy;
        self
    }

    /// Drop rows whose date is not a trading day.
    pub fn with_calendar(mut self, calendar: Arc<dyn TradingCalendar>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn mapper(&self) -> &SchemaMapper {
        &self.mapper
    }

    /// Raw rows to a sorted, deduplicated canonical table inside the code's
    /// window. Row accounting is logged at debug.
    pub fn normalize(
        &self,
        raw: &RawTable,
        code: &StockCode,
    ) -> Result<CanonicalTable, NormalizationFailure> {
        let (table, stats) = self.normalize_with_stats(raw, code)?;
        debug!(
            symbol = %code.symbol,
            raw_rows = stats.raw_rows,
            bad_dates = stats.bad_dates,
            bad_numbers = stats.bad_numbers,
            duplicates = stats.duplicates,
            off_calendar = stats.off_calendar,
            out_of_window = stats.out_of_window,
            suspended = stats.suspended,
            rows = stats.output_rows,
            "normalized"
        );
        for (column, nulls) in table.null_counts() {
            if nulls > 0 {
                debug!(symbol = %code.symbol, column = column.name(), nulls, "null cells");
            }
        }
        Ok(table)
    }

    /// `normalize` plus the row accounting.
    pub fn normalize_with_stats(
        &self,
        raw: &RawTable,
        code: &StockCode,
    ) -> Result<(CanonicalTable, NormalizeStats), NormalizationFailure> {
        let resolved = self
            .mapper
            .resolve(raw.columns())
            .map_err(|columns| NormalizationFailure::MissingColumn { columns })?;

        let mut stats = NormalizeStats {
            raw_rows: raw.len(),
            adjclose_from_close: resolved.get(CanonicalColumn::AdjClose).is_none(),
            ..Default::default()
        };

        let mut records = Vec::with_capacity(raw.len());
        for row in raw.rows() {
            match coerce_row(row, &resolved, &mut stats) {
                Some(record) => records.push(record),
                None => stats.bad_dates += 1,
            }
        }
        if records.is_empty() && !raw.is_empty() {
            return Err(NormalizationFailure::NoValidRows { rows: raw.len() });
        }

        let (mut table, duplicates) = CanonicalTable::from_records(records);
        stats.duplicates = duplicates;

        if let Some(calendar) = &self.calendar {
            let before = table.len();
            table.retain(|r| calendar.contains(r.date));
            stats.off_calendar = before - table.len();
        }

        let window = code.window();
        let before = table.len();
        table.retain(|r| window.contains(r.date));
        stats.out_of_window = before - table.len();

        stats.suspended = table.records().iter().filter(|r| r.is_suspended()).count();
        match self.suspended {
            SuspendedRowPolicy::Keep => {}
            SuspendedRowPolicy::NullPrices => table
                .records_mut()
                .filter(|r| r.is_suspended())
                .for_each(CanonicalRecord::clear_prices),
            SuspendedRowPolicy::Drop => table.retain(|r| !r.is_suspended()),
        }

        stats.output_rows = table.len();
        Ok((table, stats))
    }
}

/// Coerce one raw row. `None` means the date was unreadable.
fn coerce_row(
    row: &[RawValue],
    resolved: &ResolvedColumns,
    stats: &mut NormalizeStats,
) -> Option<CanonicalRecord> {
    let date = resolved
        .get(CanonicalColumn::Date)
        .and_then(|i| row.get(i))
        .and_then(RawValue::as_date)?;

    let mut record = CanonicalRecord::empty(date);
    for column in NUMERIC_COLUMNS {
        let Some(cell) = resolved.get(column).and_then(|i| row.get(i)) else {
            continue;
        };
        let value = cell.as_f64();
        if value.is_none() && !cell.is_null() {
            stats.bad_numbers += 1;
        }
        record.set(column, value);
    }
    if resolved.get(CanonicalColumn::AdjClose).is_none() {
        record.adjclose = record.close;
    }
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::DayFileCalendar;
    use crate::data::schema::SchemaProfile;
    use crate::dates::DateWindow;
    use crate::symbol::VendorCode;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn code(start: NaiveDate, end: NaiveDate) -> StockCode {
        StockCode::new(
            VendorCode::parse("SZ000001").unwrap(),
            DateWindow::new(start, end).unwrap(),
        )
    }

    fn wind_columns(with_adj: bool) -> Vec<String> {
        let mut cols = vec![
            "S_INFO_WINDCODE",
            "TRADE_DT",
            "S_DQ_OPEN",
            "S_DQ_HIGH",
            "S_DQ_LOW",
            "S_DQ_CLOSE",
            "S_DQ_VOLUME",
            "S_DQ_AMOUNT",
        ];
        if with_adj {
            cols.push("S_DQ_ADJCLOSE");
        }
        cols.into_iter().map(String::from).collect()
    }

    fn wind_row(date: &str, close: f64, volume: f64, adj: Option<f64>) -> Vec<RawValue> {
        let mut row = vec![
            RawValue::from("000001.SZ"),
            RawValue::from(date),
            RawValue::from(close - 0.1),
            RawValue::from(close + 0.2),
            RawValue::from(close - 0.3),
            RawValue::from(close),
            RawValue::from(volume),
            RawValue::from(volume * close),
        ];
        if let Some(a) = adj {
            row.push(RawValue::from(a));
        }
        row
    }

    fn wind() -> Normalizer {
        Normalizer::new(SchemaMapper::from_profile(SchemaProfile::Wind))
    }

    #[test]
    fn maps_vendor_columns_and_sorts() {
        let raw = RawTable::with_rows(
            wind_columns(true),
            vec![
                wind_row("20050411", 10.0, 100.0, Some(20.0)),
                wind_row("20050408", 9.0, 100.0, Some(18.0)),
            ],
        )
        .unwrap();
        let table = wind()
            .normalize(&raw, &code(d(2005, 4, 8), d(2005, 6, 30)))
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.records()[0].date, d(2005, 4, 8));
        assert_eq!(table.records()[0].adjclose, Some(18.0));
        assert_eq!(table.records()[1].close, Some(10.0));
    }

    #[test]
    fn adjclose_falls_back_to_close() {
        let raw = RawTable::with_rows(
            wind_columns(false),
            vec![wind_row("2005-04-08", 9.0, 100.0, None)],
        )
        .unwrap();
        let (table, stats) = wind()
            .normalize_with_stats(&raw, &code(d(2005, 4, 8), d(2005, 4, 8)))
            .unwrap();
        assert!(stats.adjclose_from_close);
        assert_eq!(table.records()[0].adjclose, Some(9.0));
    }

    #[test]
    fn required_adjclose_absent_is_missing_column() {
        let mapper = SchemaMapper::from_profile(SchemaProfile::Wind)
            .require_adjclose(true)
            .unwrap();
        let raw = RawTable::with_rows(
            wind_columns(false),
            vec![wind_row("2005-04-08", 9.0, 100.0, None)],
        )
        .unwrap();
        let err = Normalizer::new(mapper)
            .normalize(&raw, &code(d(2005, 4, 8), d(2005, 4, 8)))
            .unwrap_err();
        assert_eq!(
            err,
            NormalizationFailure::MissingColumn {
                columns: vec![CanonicalColumn::AdjClose]
            }
        );
    }

    #[test]
    fn missing_close_column_fails() {
        let raw = RawTable::new(vec!["TRADE_DT".into(), "S_DQ_OPEN".into()]);
        let err = wind()
            .normalize(&raw, &code(d(2005, 4, 8), d(2005, 4, 8)))
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::MissingColumn);
        assert!(err.to_string().contains("close"));
    }

    #[test]
    fn bad_dates_drop_rows_unless_all_bad() {
        let raw = RawTable::with_rows(
            wind_columns(true),
            vec![
                wind_row("not a date", 9.0, 100.0, Some(1.0)),
                wind_row("2005.04.08", 9.0, 100.0, Some(1.0)),
            ],
        )
        .unwrap();
        let (table, stats) = wind()
            .normalize_with_stats(&raw, &code(d(2005, 1, 1), d(2005, 12, 31)))
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(stats.bad_dates, 1);

        let raw = RawTable::with_rows(
            wind_columns(true),
            vec![wind_row("??", 9.0, 100.0, Some(1.0))],
        )
        .unwrap();
        let err = wind()
            .normalize(&raw, &code(d(2005, 1, 1), d(2005, 12, 31)))
            .unwrap_err();
        assert_eq!(err, NormalizationFailure::NoValidRows { rows: 1 });
    }

    #[test]
    fn bad_numeric_becomes_null_not_drop() {
        let mut row = wind_row("2005-04-08", 9.0, 100.0, Some(1.0));
        row[2] = RawValue::from("n/a");
        let raw = RawTable::with_rows(wind_columns(true), vec![row]).unwrap();
        let (table, stats) = wind()
            .normalize_with_stats(&raw, &code(d(2005, 4, 8), d(2005, 4, 8)))
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.records()[0].open, None);
        assert_eq!(stats.bad_numbers, 1);
    }

    #[test]
    fn duplicate_dates_keep_last() {
        let raw = RawTable::with_rows(
            wind_columns(true),
            vec![
                wind_row("2005-04-08", 9.0, 100.0, Some(1.0)),
                wind_row("2005-04-08", 9.5, 200.0, Some(2.0)),
            ],
        )
        .unwrap();
        let (table, stats) = wind()
            .normalize_with_stats(&raw, &code(d(2005, 4, 8), d(2005, 4, 8)))
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.records()[0].close, Some(9.5));
        assert_eq!(table.records()[0].volume, Some(200.0));
        assert_eq!(stats.duplicates, 1);
    }

    #[test]
    fn window_is_inclusive_and_empty_is_ok() {
        let raw = RawTable::with_rows(
            wind_columns(true),
            vec![
                wind_row("2005-04-07", 9.0, 100.0, Some(1.0)),
                wind_row("2005-04-08", 9.0, 100.0, Some(1.0)),
                wind_row("2005-04-11", 9.0, 100.0, Some(1.0)),
                wind_row("2005-04-12", 9.0, 100.0, Some(1.0)),
            ],
        )
        .unwrap();
        let table = wind()
            .normalize(&raw, &code(d(2005, 4, 8), d(2005, 4, 11)))
            .unwrap();
        let dates: Vec<_> = table.records().iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![d(2005, 4, 8), d(2005, 4, 11)]);

        let empty = wind()
            .normalize(&raw, &code(d(2010, 1, 1), d(2010, 12, 31)))
            .unwrap();
        assert!(empty.is_empty());

        let no_rows = RawTable::new(wind_columns(true));
        assert!(wind()
            .normalize(&no_rows, &code(d(2010, 1, 1), d(2010, 12, 31)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn suspended_policies() {
        let raw = RawTable::with_rows(
            wind_columns(true),
            vec![
                wind_row("2005-04-08", 9.0, 0.0, Some(1.0)),
                wind_row("2005-04-11", 9.0, 100.0, Some(1.0)),
            ],
        )
        .unwrap();
        let c = code(d(2005, 4, 8), d(2005, 4, 11));

        let kept = wind().normalize(&raw, &c).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.records()[0].close, Some(9.0));
        assert_eq!(kept.records()[0].volume, Some(0.0));

        let nulled = wind()
            .with_suspended_policy(SuspendedRowPolicy::NullPrices)
            .normalize(&raw, &c)
            .unwrap();
        assert_eq!(nulled.len(), 2);
        assert_eq!(nulled.records()[0].close, None);
        assert_eq!(nulled.records()[0].volume, Some(0.0));
        assert_eq!(nulled.records()[1].close, Some(9.0));

        let dropped = wind()
            .with_suspended_policy(SuspendedRowPolicy::Drop)
            .normalize(&raw, &c)
            .unwrap();
        assert_eq!(dropped.len(), 1);
    }

    #[test]
    fn unparseable_volume_keeps_prices() {
        let columns: Vec<String> = ["date", "open", "high", "low", "close", "volume"]
            .into_iter()
            .map(String::from)
            .collect();
        let row = vec![
            RawValue::from("2024-01-02"),
            RawValue::from(9.0),
            RawValue::from(9.5),
            RawValue::from(8.5),
            RawValue::from(9.0),
            RawValue::from("n/a"),
        ];
        let raw = RawTable::with_rows(columns, vec![row]).unwrap();
        let c = code(d(2024, 1, 2), d(2024, 1, 2));

        for policy in [
            SuspendedRowPolicy::Keep,
            SuspendedRowPolicy::NullPrices,
            SuspendedRowPolicy::Drop,
        ] {
            let (table, stats) = Normalizer::new(SchemaMapper::from_profile(SchemaProfile::Plain))
                .with_suspended_policy(policy)
                .normalize_with_stats(&raw, &c)
                .unwrap();
            assert_eq!(table.len(), 1, "{policy:?}");
            let r = &table.records()[0];
            assert_eq!(r.volume, None);
            assert_eq!(r.open, Some(9.0));
            assert_eq!(r.close, Some(9.0));
            assert_eq!(stats.suspended, 0);
            assert_eq!(stats.bad_numbers, 1);
        }
    }

    #[test]
    fn calendar_drops_non_trading_days() {
        let calendar: DayFileCalendar = [d(2005, 4, 8)].into_iter().collect();
        let raw = RawTable::with_rows(
            wind_columns(true),
            vec![
                wind_row("2005-04-08", 9.0, 100.0, Some(1.0)),
                wind_row("2005-04-09", 9.0, 100.0, Some(1.0)),
            ],
        )
        .unwrap();
        let (table, stats) = wind()
            .with_calendar(Arc::new(calendar))
            .normalize_with_stats(&raw, &code(d(2005, 4, 1), d(2005, 4, 30)))
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(stats.off_calendar, 1);
    }
}
