//! Property tests for symbol forms and the normalizer.
//!
//! Uses proptest to verify:
//! 1. Symbol round trip: vendor → dotted → vendor is the identity
//! 2. Output shape: rows sorted ascending with unique dates
//! 3. Window retention: every parseable in-window date survives
//! 4. Last-wins dedupe: a repeated date carries the last raw row's values

use barharvest_core::codes::StockCode;
use barharvest_core::data::{Normalizer, RawTable, RawValue, SchemaMapper, SchemaProfile};
use barharvest_core::dates::DateWindow;
use barharvest_core::symbol::{CanonicalSymbol, Exchange, VendorCode};
use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

// ── Strategies ───────────────────────────────────────────────────────

fn arb_exchange() -> impl Strategy<Value = Exchange> {
    prop::sample::select(Exchange::ALL.to_vec())
}

fn arb_code() -> impl Strategy<Value = String> {
    "[0-9]{6}"
}

/// (day offset, close, volume) rows in arbitrary order with repeats.
fn arb_rows() -> impl Strategy<Value = Vec<(i64, f64, f64)>> {
    prop::collection::vec((0i64..40, 1.0..100.0_f64, 1.0..1e6_f64), 0..60)
}

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
}

fn plain_table(rows: &[(i64, f64, f64)]) -> RawTable {
    let columns = ["date", "open", "high", "low", "close", "volume"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let rows = rows
        .iter()
        .map(|(offset, close, volume)| {
            let date = base() + Duration::days(*offset);
            vec![
                RawValue::text(date.format("%Y.%m.%d").to_string()),
                RawValue::from(*close),
                RawValue::from(*close),
                RawValue::from(*close),
                RawValue::from(*close),
                RawValue::from(*volume),
            ]
        })
        .collect();
    RawTable::with_rows(columns, rows).unwrap()
}

fn code(start: i64, end: i64) -> StockCode {
    StockCode::new(
        VendorCode::parse("SH600000").unwrap(),
        DateWindow::new(base() + Duration::days(start), base() + Duration::days(end)).unwrap(),
    )
}

fn normalizer() -> Normalizer {
    Normalizer::new(SchemaMapper::from_profile(SchemaProfile::Plain))
}

// ── 1. Symbol round trip ─────────────────────────────────────────────

proptest! {
    #[test]
    fn vendor_dotted_round_trip(exchange in arb_exchange(), digits in arb_code()) {
        let vendor = VendorCode::parse(&format!("{exchange}{digits}")).unwrap();
        let dotted = vendor.to_canonical();
        prop_assert_eq!(dotted.to_string(), format!("{digits}.{exchange}"));
        let reparsed = CanonicalSymbol::parse(&dotted.to_string()).unwrap();
        prop_assert_eq!(reparsed.to_vendor(), vendor);
    }
}

// ── 2-4. Normalizer ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn output_sorted_and_unique(rows in arb_rows()) {
        let table = normalizer().normalize(&plain_table(&rows), &code(0, 40)).unwrap();
        prop_assert!(table.is_well_formed());
    }

    #[test]
    fn in_window_dates_are_retained(rows in arb_rows(), start in 0i64..20, len in 0i64..20) {
        let end = start + len;
        let table = normalizer().normalize(&plain_table(&rows), &code(start, end)).unwrap();

        let expected: BTreeSet<NaiveDate> = rows
            .iter()
            .filter(|(offset, _, _)| *offset >= start && *offset <= end)
            .map(|(offset, _, _)| base() + Duration::days(*offset))
            .collect();
        let actual: BTreeSet<NaiveDate> = table.records().iter().map(|r| r.date).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn repeated_date_keeps_last_row(rows in arb_rows()) {
        let table = normalizer().normalize(&plain_table(&rows), &code(0, 40)).unwrap();

        let mut last: BTreeMap<NaiveDate, (f64, f64)> = BTreeMap::new();
        for (offset, close, volume) in &rows {
            last.insert(base() + Duration::days(*offset), (*close, *volume));
        }
        prop_assert_eq!(table.len(), last.len());
        for record in table.records() {
            let (close, volume) = last[&record.date];
            prop_assert_eq!(record.close, Some(close));
            prop_assert_eq!(record.volume, Some(volume));
            prop_assert_eq!(record.adjclose, Some(close));
        }
    }
}
