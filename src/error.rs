//! Crate-level error type
//!
//! Scheduler and catalog code keep their own error enums. [`Error`] wraps them
//! together with I/O, JSON and TOML failures so library callers can hold a
//! single type. Nothing the station does at runtime is fatal; the category and
//! recoverability flags tell a host whether to retry, reload or give up.
//!
//! ```rust,ignore
//! use onair::error::{Error, OnairErrorTrait};
//!
//! fn report(err: &Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = %err.category(), "{err}");
//!     } else {
//!         tracing::error!(category = %err.category(), "{err}");
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

pub use crate::catalog::CatalogError;
pub use crate::scheduler::error::SchedulerError;

/// Common trait for all onair error types
pub trait OnairErrorTrait: std::error::Error {
    /// Check if this error is recoverable (the station keeps running)
    fn is_recoverable(&self) -> bool;

    /// Which part of the system failed
    fn category(&self) -> ErrorCategory;
}

/// Coarse source of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Catalog loading and content errors
    Catalog,
    /// Player failures
    Playback,
    /// Scheduler and timing errors
    Scheduler,
    /// Filesystem errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Anything else
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Catalog => "catalog",
            Self::Playback => "playback",
            Self::Scheduler => "scheduler",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Other => "other",
        };
        write!(f, "{name}")
    }
}

impl OnairErrorTrait for SchedulerError {
    fn is_recoverable(&self) -> bool {
        SchedulerError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ExhaustedPool { .. } | Self::NoJunkContent { .. } => ErrorCategory::Catalog,
            Self::PlayerError { .. } => ErrorCategory::Playback,
            Self::InvalidTimezone { .. } | Self::ConfigError { .. } => ErrorCategory::Config,
            Self::InvalidHour { .. } | Self::InvalidTime { .. } | Self::InvalidRecurrence { .. } => {
                ErrorCategory::Scheduler
            }
        }
    }
}

impl OnairErrorTrait for CatalogError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Io { .. } => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Catalog,
        }
    }
}

/// Unified error type for the onair crate
#[derive(Error, Debug)]
pub enum Error {
    /// Scheduler and timing errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Catalog loading errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parse errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl OnairErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Scheduler(e) => OnairErrorTrait::is_recoverable(e),
            Self::Catalog(e) => e.is_recoverable(),
            Self::Io(_) => true,
            Self::Json(_) | Self::Toml(_) | Self::Config(_) | Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Scheduler(e) => e.category(),
            Self::Catalog(e) => e.category(),
            Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Catalog,
            Self::Toml(_) | Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let exhausted = Error::Scheduler(SchedulerError::exhausted("standard"));
        assert_eq!(exhausted.category(), ErrorCategory::Catalog);

        let player = Error::Scheduler(SchedulerError::player("decode failed"));
        assert_eq!(player.category(), ErrorCategory::Playback);

        let tz = Error::Scheduler(SchedulerError::invalid_timezone("Mars/Olympus"));
        assert_eq!(tz.category(), ErrorCategory::Config);
    }

    #[test]
    fn test_is_recoverable() {
        let player: Error = SchedulerError::player("gone").into();
        assert!(player.is_recoverable());

        let hour: Error = SchedulerError::invalid_hour(24).into();
        assert!(!hour.is_recoverable());
    }

    #[test]
    fn test_catalog_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let unified: Error = CatalogError::from(json_err).into();
        assert!(matches!(unified, Error::Catalog(_)));
        assert!(!unified.is_recoverable());
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let unified: Error = toml_err.into();
        assert_eq!(unified.category(), ErrorCategory::Config);
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("fade_out_ms must be positive");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "Config error: fade_out_ms must be positive");
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("Something went wrong");
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(ErrorCategory::Other.to_string(), "other");
    }
}
