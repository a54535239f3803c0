//! Validation helpers for configuration values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::model::LogFormatPreference;

pub(crate) fn required<T>(field: &'static str, value: Option<T>) -> ConfigResult<T> {
    value.ok_or(ConfigError::MissingField { field })
}

pub(crate) fn positive_seconds(field: &'static str, seconds: f64) -> ConfigResult<Duration> {
    if !seconds.is_finite() {
        return Err(ConfigError::invalid(
            field,
            "not_finite",
            Some(seconds.to_string()),
        ));
    }
    if seconds <= 0.0 {
        return Err(ConfigError::invalid(
            field,
            "must_be_positive",
            Some(seconds.to_string()),
        ));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| ConfigError::invalid(field, "out_of_range", Some(seconds.to_string())))
}

pub(crate) fn non_negative_count(field: &'static str, value: i64) -> ConfigResult<usize> {
    if value < 0 {
        return Err(ConfigError::invalid(
            field,
            "must_not_be_negative",
            Some(value.to_string()),
        ));
    }
    usize::try_from(value)
        .map_err(|_| ConfigError::invalid(field, "out_of_range", Some(value.to_string())))
}

pub(crate) fn non_empty(field: &'static str, value: Option<String>) -> ConfigResult<String> {
    let value = required(field, value)?;
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(field, "empty", None));
    }
    Ok(value)
}

pub(crate) fn parse_log_format(value: &str) -> ConfigResult<LogFormatPreference> {
    match value.trim().to_ascii_lowercase().as_str() {
        "pretty" => Ok(LogFormatPreference::Pretty),
        "json" => Ok(LogFormatPreference::Json),
        _ => Err(ConfigError::invalid(
            "LogFormat",
            "unknown_format",
            Some(value.to_string()),
        )),
    }
}

/// Anchor relative paths at the base directory; absolute paths pass through.
pub(crate) fn anchored(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}
