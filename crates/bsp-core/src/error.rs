//! Error handling for the BSP prompt framework
//!
//! Configuration problems are fatal and surface at construction time.
//! Channel problems are recoverable and are reported by the scheduler loop.

use thiserror::Error;

/// Result type alias for BSP Framework operations
pub type BspResult<T> = Result<T, BspError>;

/// Error type for all BSP prompt operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BspError {
    /// Invalid label, group, sequence or stream setup
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration error
        message: String,
    },

    /// Broadcast channel failed to publish a sample
    #[error("Channel error: {message}")]
    ChannelError {
        /// Transport-level failure description
        message: String,
    },

    /// Scheduler lifecycle misuse (runs are single-use)
    #[error("Lifecycle error: {message}")]
    LifecycleError {
        /// Description of the invalid transition
        message: String,
    },
}

impl BspError {
    /// Shorthand for [`BspError::ConfigurationError`]
    pub fn config(message: impl Into<String>) -> Self {
        BspError::ConfigurationError {
            message: message.into(),
        }
    }

    /// Shorthand for [`BspError::ChannelError`]
    pub fn channel(message: impl Into<String>) -> Self {
        BspError::ChannelError {
            message: message.into(),
        }
    }

    /// Shorthand for [`BspError::LifecycleError`]
    pub fn lifecycle(message: impl Into<String>) -> Self {
        BspError::LifecycleError {
            message: message.into(),
        }
    }
}
