//! Cluster Error Types
//!
//! Error handling for coordination store access, transport delivery, routing
//! and remote calls. Nothing in the runtime retries a failed call;
//! `is_retryable` only tells the caller whether a retry could succeed.

use hive_actors::ActorError;
use hive_codec::CodecError;
use hive_types::TypeError;
use thiserror::Error;

/// Main cluster error type
#[derive(Error, Debug, Clone)]
pub enum ClusterError {
    /// Envelope can never be delivered as addressed
    #[error("Structural error: {message}")]
    Structural { message: String },

    /// Envelope encode/decode failure
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport rejected or lost a message
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Operation did not complete in time
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Coordination store unreachable or refused the operation
    #[error("Coordination error: {message}")]
    Coordination { message: String },

    /// Remote handler answered with an error string
    #[error("Remote error from {method}: {message}")]
    Remote { method: String, message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// No destination could be resolved
    #[error("Unroutable: {reason}")]
    Unroutable { reason: String },
}

/// Result type alias for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

impl From<ActorError> for ClusterError {
    fn from(err: ActorError) -> Self {
        Self::Structural {
            message: err.to_string(),
        }
    }
}

impl From<TypeError> for ClusterError {
    fn from(err: TypeError) -> Self {
        Self::Unroutable {
            reason: err.to_string(),
        }
    }
}

impl ClusterError {
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn coordination(message: impl Into<String>) -> Self {
        Self::Coordination {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn unroutable(reason: impl Into<String>) -> Self {
        Self::Unroutable {
            reason: reason.into(),
        }
    }

    /// Check if a retry could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ClusterError::Transport { .. } => true,
            ClusterError::Timeout { .. } => true,
            ClusterError::Coordination { .. } => true,
            ClusterError::Unroutable { .. } => true,
            ClusterError::Structural { .. } => false,
            ClusterError::Codec(_) => false,
            ClusterError::Remote { .. } => false,
            ClusterError::Configuration { .. } => false,
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, ClusterError::Structural { .. } | ClusterError::Codec(_))
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ClusterError::Structural { .. } => "structural",
            ClusterError::Codec(_) => "codec",
            ClusterError::Transport { .. } => "transport",
            ClusterError::Timeout { .. } => "timeout",
            ClusterError::Coordination { .. } => "coordination",
            ClusterError::Remote { .. } => "remote",
            ClusterError::Configuration { .. } => "configuration",
            ClusterError::Unroutable { .. } => "unroutable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_errors_become_structural() {
        let err: ClusterError = ActorError::unknown_method("Foo", "Bar").into();
        assert!(err.is_structural());
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "structural");
    }

    #[test]
    fn test_timeout_is_retryable_but_not_retried() {
        let err = ClusterError::timeout("call game/Foo.Bar", 500);
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Timeout error: call game/Foo.Bar exceeded 500ms");
    }
}
