//! Run configuration loaded from TOML.
//!
//! ```toml
//! [source]
//! kind = "dolphin"
//! host = "localhost"
//! port = 8848
//! username = "admin"
//! password_env = "DOLPHINDB_PASSWORD"
//! database = "dfs://stock"
//! table = "stock_daily"
//!
//! [schema]
//! profile = "wind"
//!
//! [output]
//! root = "data"
//! layout = "per_window"
//!
//! [run]
//! concurrency = 4
//! report_dir = "logs"
//! fixed_window = { start = "2008-01-01", end = "2025-08-01" }
//! ```
//!
//! The config is read once at process start and passed down explicitly. No
//! component below the binary reads the environment; `password_env` is
//! resolved by the caller into `password` before a source is built.

use barharvest_core::calendar::{CalendarError, DayFileCalendar};
use barharvest_core::data::{
    CanonicalColumn, ColumnMapping, Normalizer, SchemaError, SchemaMapper, SchemaProfile,
    SuspendedRowPolicy,
};
use barharvest_core::dates::{parse_date, DateWindow};
use barharvest_core::output::{OutputFormat, OutputLayout, OutputWriter};
use barharvest_core::source::{
    CircuitBreaker, CsvDirSource, DolphinHttpSource, DolphinSettings, FetchError, TableSource,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("schema mapping: {0}")]
    Schema(#[from] SchemaError),

    #[error("trading calendar: {0}")]
    Calendar(#[from] CalendarError),

    #[error("data source: {0}")]
    Source(#[from] FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Dolphin,
    CsvDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable holding the password.
    pub password_env: Option<String>,
    pub database: String,
    pub table: String,
    pub symbol_column: String,
    pub date_column: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Mirror root for `kind = "csv_dir"`.
    pub root: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Dolphin,
            host: "localhost".to_string(),
            port: 8848,
            username: None,
            password: None,
            password_env: None,
            database: "dfs://stock".to_string(),
            table: "stock_daily".to_string(),
            symbol_column: "symbol".to_string(),
            date_column: "date".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            root: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaConfig {
    pub profile: SchemaProfile,
    /// Explicit mapping; replaces the profile when non-empty.
    pub columns: Vec<ColumnMapping>,
    /// Source column for the adjusted close, tried before any other.
    pub adjclose_source: Option<String>,
    pub require_adjclose: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub root: PathBuf,
    pub layout: OutputLayout,
    pub format: OutputFormat,
    /// Sub-section files by source table name.
    pub group_by_table: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            layout: OutputLayout::PerSymbol,
            format: OutputFormat::Csv,
            group_by_table: true,
        }
    }
}

/// Dates as written in the file; any accepted convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    /// Replaces every code's own window when set.
    pub fixed_window: Option<WindowConfig>,
    /// Worker count; absent or 1 runs sequentially.
    pub concurrency: Option<usize>,
    pub report_dir: PathBuf,
    /// Trading-day file, one date per line.
    pub calendar: Option<PathBuf>,
    /// Rows whose volume parsed as zero or negative; untouched by default.
    pub suspended_rows: SuspendedRowPolicy,
    /// Process only the first N codes of the list. Applied to the list
    /// before a run, so every planned code still gets an outcome.
    pub limit: Option<usize>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            fixed_window: None,
            concurrency: None,
            report_dir: PathBuf::from("logs"),
            calendar: None,
            suspended_rows: SuspendedRowPolicy::Keep,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for `barharvest.log` and `errors.log`; console only when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarvestConfig {
    pub source: SourceConfig,
    pub schema: SchemaConfig,
    pub output: OutputConfig,
    pub run: RunSection,
    pub logging: LoggingConfig,
}

/// Upper bound on workers; the remote source is the bottleneck well before this.
pub const MAX_CONCURRENCY: usize = 64;

/// Upper bound on `source.max_retries`.
pub const MAX_RETRIES: u32 = 10;

impl HarvestConfig {
    /// Read and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that need no I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.database.trim().is_empty() {
            return Err(ConfigError::Invalid("source.database must not be empty".into()));
        }
        if self.source.table.trim().is_empty() {
            return Err(ConfigError::Invalid("source.table must not be empty".into()));
        }
        if self.source.kind == SourceKind::CsvDir && self.source.root.is_none() {
            return Err(ConfigError::Invalid(
                "source.root is required when source.kind = \"csv_dir\"".into(),
            ));
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Invalid("source.timeout_secs must be positive".into()));
        }
        if self.source.max_retries > MAX_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "source.max_retries must be at most {MAX_RETRIES}"
            )));
        }
        match self.run.concurrency {
            Some(0) => return Err(ConfigError::Invalid("run.concurrency must be at least 1".into())),
            Some(n) if n > MAX_CONCURRENCY => {
                return Err(ConfigError::Invalid(format!(
                    "run.concurrency must be at most {MAX_CONCURRENCY}"
                )))
            }
            _ => {}
        }
        if self.run.limit == Some(0) {
            return Err(ConfigError::Invalid("run.limit must be at least 1".into()));
        }
        self.fixed_window()?;
        self.schema_mapper()?;
        Ok(())
    }

    /// The `[run] fixed_window` override, parsed.
    pub fn fixed_window(&self) -> Result<Option<DateWindow>, ConfigError> {
        let Some(w) = &self.run.fixed_window else {
            return Ok(None);
        };
        let start = config_date("run.fixed_window.start", &w.start)?;
        let end = config_date("run.fixed_window.end", &w.end)?;
        DateWindow::new(start, end).map(Some).ok_or_else(|| {
            ConfigError::Invalid(format!("run.fixed_window start {start} is after end {end}"))
        })
    }

    pub fn set_fixed_window(&mut self, window: Option<DateWindow>) {
        self.run.fixed_window = window.map(|w| WindowConfig {
            start: w.start.to_string(),
            end: w.end.to_string(),
        });
    }

    /// The first `run.limit` codes, or all of them when no limit is set.
    pub fn limit_codes<'a, T>(&self, codes: &'a [T]) -> &'a [T] {
        match self.run.limit {
            Some(n) => &codes[..n.min(codes.len())],
            None => codes,
        }
    }

    /// Worker count, at least 1.
    pub fn concurrency(&self) -> usize {
        self.run.concurrency.unwrap_or(1).max(1)
    }

    /// The configured profile or explicit column list, with the adjclose
    /// override placed first.
    pub fn schema_mapper(&self) -> Result<SchemaMapper, ConfigError> {
        let mut entries = if self.schema.columns.is_empty() {
            SchemaMapper::from_profile(self.schema.profile).entries().to_vec()
        } else {
            self.schema.columns.clone()
        };
        if let Some(adj) = &self.schema.adjclose_source {
            entries.retain(|e| !e.source.eq_ignore_ascii_case(adj));
            entries.insert(0, ColumnMapping::new(adj.clone(), CanonicalColumn::AdjClose));
        }
        Ok(SchemaMapper::new(entries)?.require_adjclose(self.schema.require_adjclose)?)
    }

    /// Normalizer with the mapping, suspended-row policy and calendar. Reads
    /// the calendar file when one is configured.
    pub fn normalizer(&self) -> Result<Normalizer, ConfigError> {
        let mut normalizer = Normalizer::new(self.schema_mapper()?)
            .with_suspended_policy(self.run.suspended_rows);
        if let Some(path) = &self.run.calendar {
            let calendar = DayFileCalendar::from_file(path)?;
            normalizer = normalizer.with_calendar(Arc::new(calendar));
        }
        Ok(normalizer)
    }

    /// Writer rooted at `output.root`, sectioned by table when
    /// `group_by_table` is set.
    pub fn output_writer(&self) -> OutputWriter {
        let writer = OutputWriter::new(&self.output.root)
            .with_layout(self.output.layout)
            .with_format(self.output.format);
        if self.output.group_by_table {
            writer.with_section(self.source.table.clone())
        } else {
            writer
        }
    }

    /// Connection settings for the DolphinDB source. The password must
    /// already be resolved.
    pub fn dolphin_settings(&self) -> DolphinSettings {
        DolphinSettings {
            host: self.source.host.clone(),
            port: self.source.port,
            username: self.source.username.clone(),
            password: self.source.password.clone(),
            timeout: Duration::from_secs(self.source.timeout_secs),
            max_retries: self.source.max_retries,
            symbol_column: self.source.symbol_column.clone(),
            date_column: self.source.date_column.clone(),
        }
    }

    /// Build the configured source. Nothing is contacted yet.
    pub fn table_source(&self) -> Result<Arc<dyn TableSource>, ConfigError> {
        match self.source.kind {
            SourceKind::Dolphin => {
                let source = DolphinHttpSource::new(
                    self.dolphin_settings(),
                    Arc::new(CircuitBreaker::default_source()),
                )?;
                Ok(Arc::new(source))
            }
            SourceKind::CsvDir => {
                let root = self.source.root.clone().ok_or_else(|| {
                    ConfigError::Invalid("source.root is required for csv_dir".into())
                })?;
                let source = CsvDirSource::new(root).with_mapper_date(&self.schema_mapper()?);
                Ok(Arc::new(source))
            }
        }
    }
}

fn config_date(field: &str, value: &str) -> Result<chrono::NaiveDate, ConfigError> {
    parse_date(value)
        .ok_or_else(|| ConfigError::Invalid(format!("{field}: unparseable date '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn defaults_are_valid() {
        let config = HarvestConfig::from_toml("").unwrap();
        assert_eq!(config.source.port, 8848);
        assert_eq!(config.concurrency(), 1);
        assert_eq!(config.fixed_window().unwrap(), None);
        assert_eq!(config.run.suspended_rows, SuspendedRowPolicy::Keep);
        assert_eq!(config.run.limit, None);
    }

    #[test]
    fn full_file() {
        let config = HarvestConfig::from_toml(
            r#"
            [source]
            kind = "csv_dir"
            root = "mirror"
            database = "dfs://stock"
            table = "ashare_daily"

            [schema]
            profile = "plain"
            adjclose_source = "adj_factor_close"

            [output]
            root = "out"
            layout = "per_window"
            format = "parquet"
            group_by_table = false

            [run]
            concurrency = 4
            suspended_rows = "drop"
            limit = 5
            fixed_window = { start = "2008.01.01", end = "2025-08-01" }

            [logging]
            level = "debug"
            dir = "logs"
            "#,
        )
        .unwrap();
        assert_eq!(config.source.kind, SourceKind::CsvDir);
        assert_eq!(config.concurrency(), 4);
        assert_eq!(config.run.limit, Some(5));
        assert_eq!(config.output.format, OutputFormat::Parquet);
        assert_eq!(
            config.fixed_window().unwrap(),
            DateWindow::new(
                NaiveDate::from_ymd_opt(2008, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
            )
        );
        let mapper = config.schema_mapper().unwrap();
        assert_eq!(mapper.translate("adj_factor_close"), Some(CanonicalColumn::AdjClose));
        assert_eq!(
            mapper.candidates(CanonicalColumn::AdjClose).next(),
            Some("adj_factor_close")
        );
    }

    #[test]
    fn explicit_columns_replace_profile() {
        let config = HarvestConfig::from_toml(
            r#"
            [[schema.columns]]
            source = "d"
            canonical = "date"
            [[schema.columns]]
            source = "o"
            canonical = "open"
            "#,
        );
        assert!(matches!(config, Err(ConfigError::Schema(SchemaError::Uncovered(_)))));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            HarvestConfig::from_toml("[run]\nconcurrency = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HarvestConfig::from_toml("[run]\nfixed_window = { start = \"2025-01-01\", end = \"2024-01-01\" }\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HarvestConfig::from_toml("[source]\nkind = \"csv_dir\"\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HarvestConfig::from_toml("[source]\nmax_retries = 100\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(HarvestConfig::from_toml("[source]\nmax_retries = 10\n").is_ok());
        assert!(matches!(
            HarvestConfig::from_toml("[source]\nhots = \"typo\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn limit_takes_a_prefix_of_the_list() {
        let codes = ["a", "b", "c"];
        let mut config = HarvestConfig::default();
        assert_eq!(config.limit_codes(&codes), ["a", "b", "c"]);
        config.run.limit = Some(2);
        assert_eq!(config.limit_codes(&codes), ["a", "b"]);
        config.run.limit = Some(10);
        assert_eq!(config.limit_codes(&codes), ["a", "b", "c"]);
    }

    #[test]
    fn output_writer_sections_by_table() {
        let config = HarvestConfig::from_toml("[source]\ntable = \"stock_daily\"\n").unwrap();
        let writer = config.output_writer();
        assert_eq!(writer.directory(), PathBuf::from("data").join("stock_daily"));
    }

    #[test]
    fn fixed_window_override_round_trips() {
        let mut config = HarvestConfig::default();
        let window = DateWindow::new(
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 12, 31).unwrap(),
        );
        config.set_fixed_window(window);
        assert_eq!(config.fixed_window().unwrap(), window);
    }
}
