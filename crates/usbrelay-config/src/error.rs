//! Error types for configuration loading.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document could not be read.
    #[error("failed to read configuration document")]
    Read {
        /// Path of the configuration document.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The configuration document was not valid JSON for the expected shape.
    #[error("failed to parse configuration document")]
    Parse {
        /// Path of the configuration document.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// A required key was absent.
    #[error("missing configuration field")]
    MissingField {
        /// Name of the missing key.
        field: &'static str,
    },
    /// A key contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Key that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// The base directory could not be determined.
    #[error("failed to resolve base directory")]
    BaseDir {
        /// Underlying IO error.
        source: io::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: &'static str,
        reason: &'static str,
        value: impl Into<Option<String>>,
    ) -> Self {
        Self::InvalidField {
            field,
            reason,
            value: value.into(),
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_messages_stay_constant() {
        let err = ConfigError::invalid("KeepMaxFilesOnUSB", "negative", Some("-1".to_string()));
        assert_eq!(err.to_string(), "invalid configuration field");
        assert!(err.source().is_none());

        let read = ConfigError::Read {
            path: PathBuf::from("config.json"),
            source: io::Error::other("io"),
        };
        assert_eq!(read.to_string(), "failed to read configuration document");
        assert!(read.source().is_some());
    }
}
