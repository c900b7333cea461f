//! Tolerant date parsing shared by code lists, raw tables and calendar files.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator-delimited conventions accepted everywhere.
const DELIMITED_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d"];

/// Compact `YYYYMMDD`, the vendor's trade-date convention.
const COMPACT_FORMAT: &str = "%Y%m%d";

/// Parse a date written as `YYYY-MM-DD`, `YYYY.MM.DD`, `YYYY/MM/DD` or
/// `YYYYMMDD`. A trailing time component (`T...` or ` ...`) is ignored.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let day = trimmed
        .split(|c: char| c == 'T' || c == ' ')
        .next()
        .unwrap_or(trimmed);

    if day.len() == 8 && day.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(day, COMPACT_FORMAT).ok();
    }

    DELIMITED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(day, fmt).ok())
}

/// `YYYY.MM.DD`, the literal form the source's script language expects.
pub fn dot_format(date: NaiveDate) -> String {
    date.format("%Y.%m.%d").to_string()
}

/// `YYYY_MM_DD`, used in per-window file names.
pub fn underscore_format(date: NaiveDate) -> String {
    date.format("%Y_%m_%d").to_string()
}

/// Inclusive `[start, end]` date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Returns `None` when `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn accepts_dash_and_dot() {
        assert_eq!(parse_date("2005-04-08"), Some(d(2005, 4, 8)));
        assert_eq!(parse_date("2005.04.08"), Some(d(2005, 4, 8)));
        assert_eq!(parse_date("2005/04/08"), Some(d(2005, 4, 8)));
    }

    #[test]
    fn accepts_compact_vendor_form() {
        assert_eq!(parse_date("20050408"), Some(d(2005, 4, 8)));
        assert_eq!(parse_date("20051340"), None);
    }

    #[test]
    fn ignores_time_component() {
        assert_eq!(parse_date("2005-04-08T00:00:00"), Some(d(2005, 4, 8)));
        assert_eq!(parse_date("2005.04.08 15:00:00"), Some(d(2005, 4, 8)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("n/a"), None);
        assert_eq!(parse_date("2005-02-30"), None);
    }

    #[test]
    fn formats() {
        assert_eq!(dot_format(d(2024, 1, 2)), "2024.01.02");
        assert_eq!(underscore_format(d(2024, 1, 2)), "2024_01_02");
    }

    #[test]
    fn window_is_inclusive() {
        let w = DateWindow::new(d(2024, 1, 2), d(2024, 1, 5)).unwrap();
        assert!(w.contains(d(2024, 1, 2)));
        assert!(w.contains(d(2024, 1, 5)));
        assert!(!w.contains(d(2024, 1, 1)));
        assert!(!w.contains(d(2024, 1, 6)));
        assert!(DateWindow::new(d(2024, 1, 6), d(2024, 1, 5)).is_none());
    }
}
