//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Every candidate in a category is unusable, even after clearing its ledger
    ExhaustedPool {
        category: String,
    },

    /// No junk content exists for any eligible type
    NoJunkContent {
        junk_type: String,
    },

    /// Invalid hour value (must be 0-23)
    InvalidHour {
        hour: u32,
    },

    /// Unparsable or out-of-range time of day
    InvalidTime {
        value: String,
    },

    /// Unknown recurrence name
    InvalidRecurrence {
        value: String,
    },

    /// Invalid timezone identifier
    InvalidTimezone {
        tz: String,
    },

    /// Configuration error
    ConfigError {
        field: String,
        reason: String,
    },

    /// Player reported a failure
    PlayerError {
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExhaustedPool { category } => {
                write!(f, "No playable tracks left in category '{}'", category)
            }
            Self::NoJunkContent { junk_type } => {
                write!(f, "No junk tracks available for type '{}'", junk_type)
            }
            Self::InvalidHour { hour } => {
                write!(f, "Invalid hour '{}'. Must be 0-23", hour)
            }
            Self::InvalidTime { value } => {
                write!(f, "Invalid time '{}'. Expected HH:MM:SS", value)
            }
            Self::InvalidRecurrence { value } => {
                write!(f, "Invalid recurrence '{}'. Expected 'daily' or a weekday name", value)
            }
            Self::InvalidTimezone { tz } => {
                write!(f, "Invalid timezone: {}", tz)
            }
            Self::ConfigError { field, reason } => {
                write!(f, "Config error in '{}': {}", field, reason)
            }
            Self::PlayerError { reason } => {
                write!(f, "Player error: {}", reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an exhausted pool error
    pub fn exhausted(category: impl Into<String>) -> Self {
        Self::ExhaustedPool {
            category: category.into(),
        }
    }

    /// Create a missing junk error
    pub fn no_junk(junk_type: impl Into<String>) -> Self {
        Self::NoJunkContent {
            junk_type: junk_type.into(),
        }
    }

    /// Create an invalid hour error
    pub fn invalid_hour(hour: u32) -> Self {
        Self::InvalidHour { hour }
    }

    /// Create an invalid time error
    pub fn invalid_time(value: impl Into<String>) -> Self {
        Self::InvalidTime {
            value: value.into(),
        }
    }

    /// Create an invalid recurrence error
    pub fn invalid_recurrence(value: impl Into<String>) -> Self {
        Self::InvalidRecurrence {
            value: value.into(),
        }
    }

    /// Create an invalid timezone error
    pub fn invalid_timezone(tz: impl Into<String>) -> Self {
        Self::InvalidTimezone { tz: tz.into() }
    }

    /// Create a config error
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigError {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a player error
    pub fn player(reason: impl Into<String>) -> Self {
        Self::PlayerError {
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable
    ///
    /// Recoverable errors leave the station silent until the next callback
    /// or player notification; the others indicate bad input data.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ExhaustedPool { .. } | Self::NoJunkContent { .. } | Self::PlayerError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_pool_error() {
        let err = SchedulerError::exhausted("standard");
        assert!(err.to_string().contains("standard"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_invalid_hour_error() {
        let err = SchedulerError::invalid_hour(25);
        assert!(err.to_string().contains("25"));
        assert!(err.to_string().contains("0-23"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_invalid_time_error() {
        let err = SchedulerError::invalid_time("noon");
        assert!(err.to_string().contains("noon"));
        assert!(err.to_string().contains("HH:MM:SS"));
    }

    #[test]
    fn test_config_error() {
        let err = SchedulerError::config("timezone", "empty");
        assert_eq!(err.to_string(), "Config error in 'timezone': empty");
    }
}
