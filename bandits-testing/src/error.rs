use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

pub const IMPOSSIBLE_ERROR_MESSAGE: &str =
    "This should never happen, please file a bug report against bandits-testing";

#[derive(Clone, Debug, Error, Serialize)]
#[cfg_attr(test, derive(PartialEq))]
#[error(transparent)]
// As long as the struct member is private, we force people to use the `new` method
// and log the error.
pub struct Error(Arc<ErrorDetails>);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Arc::new(details))
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    pub fn log(&self) {
        self.0.log();
    }

    pub fn log_at_level(&self, prefix: &str, level: tracing::Level) {
        self.0.log_at_level(prefix, level);
    }
}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

#[derive(Debug, Error, Serialize)]
#[cfg_attr(test, derive(PartialEq))]
pub enum ErrorDetails {
    ArmOutOfRange {
        arm: usize,
        num_arms: usize,
    },
    Config {
        message: String,
    },
    InvalidParameter {
        name: String,
        message: String,
    },
    NoEmpiricalLeader,
    Serialization {
        message: String,
    },
    Simulation {
        message: String,
    },
    TrialTask {
        message: String,
    },
}

impl ErrorDetails {
    /// Defines the error level for logging this error
    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::ArmOutOfRange { .. } => tracing::Level::ERROR,
            ErrorDetails::Config { .. } => tracing::Level::ERROR,
            ErrorDetails::InvalidParameter { .. } => tracing::Level::WARN,
            ErrorDetails::NoEmpiricalLeader => tracing::Level::WARN,
            ErrorDetails::Serialization { .. } => tracing::Level::ERROR,
            ErrorDetails::Simulation { .. } => tracing::Level::ERROR,
            ErrorDetails::TrialTask { .. } => tracing::Level::ERROR,
        }
    }

    pub fn log_at_level(&self, prefix: &str, level: tracing::Level) {
        match level {
            tracing::Level::ERROR => tracing::error!("{prefix}{self}"),
            tracing::Level::WARN => tracing::warn!("{prefix}{self}"),
            tracing::Level::INFO => tracing::info!("{prefix}{self}"),
            tracing::Level::DEBUG => tracing::debug!("{prefix}{self}"),
            tracing::Level::TRACE => tracing::trace!("{prefix}{self}"),
        }
    }

    /// Log the error using the `tracing` library
    pub fn log(&self) {
        self.log_at_level("", self.level());
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetails::ArmOutOfRange { arm, num_arms } => {
                write!(
                    f,
                    "Arm index {arm} is out of range for an environment with {num_arms} arms"
                )
            }
            ErrorDetails::Config { message } => {
                write!(f, "Configuration error: {message}")
            }
            ErrorDetails::InvalidParameter { name, message } => {
                write!(f, "Invalid value for `{name}`: {message}")
            }
            ErrorDetails::NoEmpiricalLeader => {
                write!(
                    f,
                    "Cannot determine an empirical leader before any arm has been pulled"
                )
            }
            ErrorDetails::Serialization { message } => {
                write!(f, "Error serializing trial results: {message}")
            }
            ErrorDetails::Simulation { message } => {
                write!(f, "Simulation error: {message}")
            }
            ErrorDetails::TrialTask { message } => {
                write!(f, "Trial task failed: {message}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_is_transparent() {
        let error = Error::new(ErrorDetails::ArmOutOfRange {
            arm: 4,
            num_arms: 3,
        });
        assert_eq!(
            error.to_string(),
            "Arm index 4 is out of range for an environment with 3 arms"
        );
        assert_eq!(
            error.get_details(),
            &ErrorDetails::ArmOutOfRange {
                arm: 4,
                num_arms: 3
            }
        );
    }

    #[test]
    fn test_error_from_details() {
        let error: Error = ErrorDetails::InvalidParameter {
            name: "delta".to_string(),
            message: "must be in (0, 1), got 1.5".to_string(),
        }
        .into();
        assert_eq!(
            error.to_string(),
            "Invalid value for `delta`: must be in (0, 1), got 1.5"
        );
    }
}
