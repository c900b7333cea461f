//! Trading-calendar lookup.
//!
//! The calendar is consumed, never computed: a file lists the exchange's
//! trading days and the normalizer asks whether a date is one of them.

use crate::dates::parse_date;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

pub trait TradingCalendar: Send + Sync {
    /// Whether the exchange was open on `date`.
    fn contains(&self, date: NaiveDate) -> bool;
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("read calendar {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("calendar line {line}: unparseable date '{value}'")]
    BadDate { line: usize, value: String },

    #[error("calendar {0} lists no trading days")]
    Empty(String),
}

/// Calendar backed by a list of days, one per line. Blank lines and lines
/// starting with `#` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayFileCalendar {
    days: BTreeSet<NaiveDate>,
}

impl DayFileCalendar {
    pub fn from_file(path: &Path) -> Result<Self, CalendarError> {
        let content = std::fs::read_to_string(path).map_err(|source| CalendarError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let calendar = Self::parse(&content)?;
        if calendar.is_empty() {
            return Err(CalendarError::Empty(path.display().to_string()));
        }
        Ok(calendar)
    }

    /// One date per line; blank and `#` lines are skipped.
    pub fn parse(content: &str) -> Result<Self, CalendarError> {
        let mut days = BTreeSet::new();
        for (i, line) in content.lines().enumerate() {
            let value = line.trim();
            if value.is_empty() || value.starts_with('#') {
                continue;
            }
            let day = parse_date(value).ok_or_else(|| CalendarError::BadDate {
                line: i + 1,
                value: value.to_string(),
            })?;
            days.insert(day);
        }
        Ok(Self { days })
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.days.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.days.last().copied()
    }
}

impl FromIterator<NaiveDate> for DayFileCalendar {
    fn from_iter<T: IntoIterator<Item = NaiveDate>>(iter: T) -> Self {
        Self {
            days: iter.into_iter().collect(),
        }
    }
}

impl TradingCalendar for DayFileCalendar {
    fn contains(&self, date: NaiveDate) -> bool {
        self.days.contains(&date)
    }
}
