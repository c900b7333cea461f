//! Source-to-canonical column mapping.
//!
//! A `SchemaMapper` is a static table of `(source column, canonical column)`
//! pairs plus the coercion rule each canonical column applies. It is validated
//! once when built: every column the normalizer requires must have at least one
//! candidate source column. Source columns that map to nothing are dropped.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Columns of the canonical schema, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalColumn {
    Date,
    Open,
    High,
    Low,
    Close,
    Volume,
    Amount,
    #[serde(rename = "adjclose")]
    AdjClose,
}

/// How a raw cell is turned into a canonical value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Date,
    Numeric,
}

impl CanonicalColumn {
    pub const ALL: [CanonicalColumn; 8] = [
        CanonicalColumn::Date,
        CanonicalColumn::Open,
        CanonicalColumn::High,
        CanonicalColumn::Low,
        CanonicalColumn::Close,
        CanonicalColumn::Volume,
        CanonicalColumn::Amount,
        CanonicalColumn::AdjClose,
    ];

    /// Columns without which a table cannot be normalized.
    pub const REQUIRED: [CanonicalColumn; 6] = [
        CanonicalColumn::Date,
        CanonicalColumn::Open,
        CanonicalColumn::High,
        CanonicalColumn::Low,
        CanonicalColumn::Close,
        CanonicalColumn::Volume,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CanonicalColumn::Date => "date",
            CanonicalColumn::Open => "open",
            CanonicalColumn::High => "high",
            CanonicalColumn::Low => "low",
            CanonicalColumn::Close => "close",
            CanonicalColumn::Volume => "volume",
            CanonicalColumn::Amount => "amount",
            CanonicalColumn::AdjClose => "adjclose",
        }
    }

    pub fn coercion(self) -> Coercion {
        match self {
            CanonicalColumn::Date => Coercion::Date,
            _ => Coercion::Numeric,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CanonicalColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One `(source, canonical)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source: String,
    pub canonical: CanonicalColumn,
}

impl ColumnMapping {
    pub fn new(source: impl Into<String>, canonical: CanonicalColumn) -> Self {
        Self {
            source: source.into(),
            canonical,
        }
    }
}

/// Built-in mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaProfile {
    /// Vendor daily-quote tables (`TRADE_DT`, `S_DQ_*`).
    #[default]
    Wind,
    /// Tables already using plain lowercase names.
    Plain,
}

const WIND_COLUMNS: &[(&str, CanonicalColumn)] = &[
    ("TRADE_DT", CanonicalColumn::Date),
    ("S_DQ_OPEN", CanonicalColumn::Open),
    ("S_DQ_HIGH", CanonicalColumn::High),
    ("S_DQ_LOW", CanonicalColumn::Low),
    ("S_DQ_CLOSE", CanonicalColumn::Close),
    ("S_DQ_VOLUME", CanonicalColumn::Volume),
    ("S_DQ_AMOUNT", CanonicalColumn::Amount),
    ("S_DQ_ADJCLOSE", CanonicalColumn::AdjClose),
];

const PLAIN_COLUMNS: &[(&str, CanonicalColumn)] = &[
    ("date", CanonicalColumn::Date),
    ("trade_date", CanonicalColumn::Date),
    ("open", CanonicalColumn::Open),
    ("high", CanonicalColumn::High),
    ("low", CanonicalColumn::Low),
    ("close", CanonicalColumn::Close),
    ("volume", CanonicalColumn::Volume),
    ("amount", CanonicalColumn::Amount),
    ("adjclose", CanonicalColumn::AdjClose),
    ("adj_close", CanonicalColumn::AdjClose),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("no source column mapped to required canonical column '{0}'")]
    Uncovered(CanonicalColumn),

    #[error("source column '{0}' is mapped more than once")]
    DuplicateSource(String),
}

/// Column positions of one raw table, resolved through a mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolvedColumns {
    index: [Option<usize>; 8],
}

impl ResolvedColumns {
    /// Source column index for `column`, if one resolved.
    pub fn get(&self, column: CanonicalColumn) -> Option<usize> {
        self.index[column.index()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMapper {
    entries: Vec<ColumnMapping>,
    require_adjclose: bool,
}

impl SchemaMapper {
    /// Build and validate a mapping. Source names are matched
    /// case-insensitively, so two entries differing only in case collide.
    pub fn new(entries: Vec<ColumnMapping>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.source.to_ascii_lowercase()) {
                return Err(SchemaError::DuplicateSource(entry.source.clone()));
            }
        }
        let mapper = Self {
            entries,
            require_adjclose: false,
        };
        mapper.validate()?;
        Ok(mapper)
    }

    pub fn from_profile(profile: SchemaProfile) -> Self {
        let table = match profile {
            SchemaProfile::Wind => WIND_COLUMNS,
            SchemaProfile::Plain => PLAIN_COLUMNS,
        };
        Self {
            entries: table
                .iter()
                .map(|(source, canonical)| ColumnMapping::new(*source, *canonical))
                .collect(),
            require_adjclose: false,
        }
    }

    /// Treat a missing adjusted-close source column as a validation failure
    /// instead of falling back to the unadjusted close.
    pub fn require_adjclose(mut self, required: bool) -> Result<Self, SchemaError> {
        self.require_adjclose = required;
        self.validate()?;
        Ok(self)
    }

    pub fn adjclose_required(&self) -> bool {
        self.require_adjclose
    }

    /// Structural check: every required canonical column has a candidate.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for column in self.required_columns() {
            if self.candidates(column).next().is_none() {
                return Err(SchemaError::Uncovered(column));
            }
        }
        Ok(())
    }

    /// Columns whose absence fails normalization.
    pub fn required_columns(&self) -> impl Iterator<Item = CanonicalColumn> + '_ {
        CanonicalColumn::REQUIRED.into_iter().chain(
            self.require_adjclose
                .then_some(CanonicalColumn::AdjClose),
        )
    }

    pub fn entries(&self) -> &[ColumnMapping] {
        &self.entries
    }

    /// Canonical name for a source column, or `None` if it is unmapped.
    pub fn translate(&self, raw_column: &str) -> Option<CanonicalColumn> {
        self.entries
            .iter()
            .find(|e| e.source.eq_ignore_ascii_case(raw_column.trim()))
            .map(|e| e.canonical)
    }

    /// Source names that feed `column`, in priority order.
    pub fn candidates(&self, column: CanonicalColumn) -> impl Iterator<Item = &str> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.canonical == column)
            .map(|e| e.source.as_str())
    }

    /// Locate each canonical column in `columns`. When several candidates are
    /// present the one listed first in the mapping wins. Returns the missing
    /// required columns on failure.
    pub fn resolve(&self, columns: &[String]) -> Result<ResolvedColumns, Vec<CanonicalColumn>> {
        let mut resolved = ResolvedColumns::default();
        for column in CanonicalColumn::ALL {
            resolved.index[column.index()] = self.candidates(column).find_map(|candidate| {
                columns
                    .iter()
                    .position(|c| c.trim().eq_ignore_ascii_case(candidate))
            });
        }

        let missing: Vec<CanonicalColumn> = self
            .required_columns()
            .filter(|c| resolved.get(*c).is_none())
            .collect();
        if missing.is_empty() {
            Ok(resolved)
        } else {
            Err(missing)
        }
    }
}

impl Default for SchemaMapper {
    fn default() -> Self {
        Self::from_profile(SchemaProfile::default())
    }
}
