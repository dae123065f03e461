//! Error handling for the simulated acquisition core
//!
//! Only construction can fail. Runtime data loss (ring overflow) is not an
//! error value: it is reported through `WriteReport` and the buffer's
//! overflow counter.

use thiserror::Error;

/// Result type alias for acquisition core operations
pub type SimResult<T> = Result<T, SimError>;

/// Error type for all acquisition core operations
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum SimError {
    /// A buffer, source or collection was configured with unusable parameters.
    /// Non-recoverable: the caller must fix the parameters and construct again.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error
        reason: String,
    },
}

impl SimError {
    /// Build an `InvalidConfig` error from anything printable
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        SimError::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// True for configuration errors
    pub fn is_invalid_config(&self) -> bool {
        matches!(self, SimError::InvalidConfig { .. })
    }
}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::error::SimError::InvalidConfig {
            reason: format!($($arg)*),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = config_error!("channel count must be positive, got {}", 0);
        let display = format!("{}", error);
        assert!(display.contains("Invalid configuration"));
        assert!(display.contains("got 0"));
    }

    #[test]
    fn test_error_equality() {
        let error1 = SimError::invalid_config("test");
        let error2 = config_error!("test");
        assert_eq!(error1, error2);
        assert!(error1.is_invalid_config());
    }
}
