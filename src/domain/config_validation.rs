//! Configuration validation.
//!
//! Reads the `[data]` and `[screen]` sections once, up front, and turns
//! them into typed settings. Nothing downstream touches the raw config.

use crate::domain::error::ScreenerError;
use crate::domain::screener::ScreenConfig;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::Duration;

pub const MAX_CONCURRENCY: i64 = 256;
pub const DEFAULT_POOL_SIZE: u32 = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    Csv { dir: PathBuf },
    Sqlite { path: PathBuf, pool_size: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterSource {
    Dsl(String),
    JsonFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenSettings {
    pub codes: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub filter: Option<FilterSource>,
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    pub lookback_offset: usize,
    pub include_all: bool,
}

impl ScreenSettings {
    pub fn screen_config(&self) -> ScreenConfig {
        ScreenConfig {
            concurrency: self.concurrency,
            fetch_timeout: self.fetch_timeout,
            lookback_offset: self.lookback_offset,
        }
    }
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<DataSource, ScreenerError> {
    let source = config
        .get_non_empty("data", "source")
        .unwrap_or_else(|| "csv".to_string());

    match source.to_lowercase().as_str() {
        "csv" => {
            let dir = config
                .get_non_empty("data", "csv_dir")
                .ok_or_else(|| missing("data", "csv_dir"))?;
            Ok(DataSource::Csv {
                dir: PathBuf::from(dir),
            })
        }
        "sqlite" => {
            let path = config
                .get_non_empty("data", "sqlite_path")
                .ok_or_else(|| missing("data", "sqlite_path"))?;
            let pool_size = parse_int(config, "data", "pool_size", DEFAULT_POOL_SIZE as i64)?;
            if !(1..=64).contains(&pool_size) {
                return Err(invalid("data", "pool_size", "pool_size must be between 1 and 64"));
            }
            Ok(DataSource::Sqlite {
                path: PathBuf::from(path),
                pool_size: pool_size as u32,
            })
        }
        other => Err(invalid(
            "data",
            "source",
            &format!("unknown data source '{}', expected csv or sqlite", other),
        )),
    }
}

pub fn validate_screen_config(config: &dyn ConfigPort) -> Result<ScreenSettings, ScreenerError> {
    let (start_date, end_date) = validate_dates(config)?;
    let filter = validate_filter_source(config)?;
    let defaults = ScreenConfig::default();

    let concurrency = parse_int(config, "screen", "concurrency", defaults.concurrency as i64)?;
    if !(1..=MAX_CONCURRENCY).contains(&concurrency) {
        return Err(invalid(
            "screen",
            "concurrency",
            &format!("concurrency must be between 1 and {}", MAX_CONCURRENCY),
        ));
    }

    let timeout_ms = parse_int(
        config,
        "screen",
        "fetch_timeout_ms",
        defaults.fetch_timeout.as_millis() as i64,
    )?;
    if timeout_ms <= 0 {
        return Err(invalid(
            "screen",
            "fetch_timeout_ms",
            "fetch_timeout_ms must be positive",
        ));
    }

    let lookback_offset = parse_int(config, "screen", "lookback_offset", 0)?;
    if lookback_offset < 0 {
        return Err(invalid(
            "screen",
            "lookback_offset",
            "lookback_offset must be non-negative",
        ));
    }

    Ok(ScreenSettings {
        codes: config.get_non_empty("screen", "codes"),
        start_date,
        end_date,
        filter,
        concurrency: concurrency as usize,
        fetch_timeout: Duration::from_millis(timeout_ms as u64),
        lookback_offset: lookback_offset as usize,
        include_all: config.get_bool("screen", "include_all", false),
    })
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(NaiveDate, NaiveDate), ScreenerError> {
    let start_date = parse_date(config.get_non_empty("screen", "start_date").as_deref(), "start_date")?;
    let end_date = parse_date(config.get_non_empty("screen", "end_date").as_deref(), "end_date")?;

    if start_date >= end_date {
        return Err(invalid(
            "screen",
            "start_date",
            "start_date must be before end_date",
        ));
    }
    Ok((start_date, end_date))
}

fn validate_filter_source(config: &dyn ConfigPort) -> Result<Option<FilterSource>, ScreenerError> {
    match (
        config.get_non_empty("screen", "filter"),
        config.get_non_empty("screen", "filter_file"),
    ) {
        (Some(_), Some(_)) => Err(invalid(
            "screen",
            "filter_file",
            "set either filter or filter_file, not both",
        )),
        (Some(dsl), None) => Ok(Some(FilterSource::Dsl(dsl))),
        (None, Some(path)) => Ok(Some(FilterSource::JsonFile(PathBuf::from(path)))),
        (None, None) => Ok(None),
    }
}

pub fn parse_date(value: Option<&str>, field: &str) -> Result<NaiveDate, ScreenerError> {
    match value {
        None => Err(missing("screen", field)),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
            invalid(
                "screen",
                field,
                &format!("invalid {} format, expected YYYY-MM-DD", field),
            )
        }),
    }
}

// `ConfigPort::get_int` swallows parse failures; a typo must not silently
// become the default here.
fn parse_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<i64, ScreenerError> {
    match config.get_non_empty(section, key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| invalid(section, key, &format!("'{}' is not an integer", raw))),
    }
}

fn missing(section: &str, key: &str) -> ScreenerError {
    ScreenerError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn invalid(section: &str, key: &str, reason: &str) -> ScreenerError {
    ScreenerError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
