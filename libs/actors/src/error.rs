//! Actor runtime errors
//!
//! Structural errors (unknown actor, unknown method, argument mismatch) are
//! logged and the envelope is dropped; they never bring a worker down.

use hive_types::ArgError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActorError {
    #[error("Unknown actor '{name}'")]
    UnknownActor { name: String },

    #[error("Actor '{actor}' has no method '{method}'")]
    UnknownMethod { actor: String, method: String },

    #[error("Argument mismatch calling {actor}.{method}: {source}")]
    ArgumentMismatch {
        actor: String,
        method: String,
        #[source]
        source: ArgError,
    },

    #[error("Actor name '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("Invalid pool '{name}': {reason}")]
    InvalidPool { name: String, reason: String },

    #[error("Actor '{name}' is not running")]
    NotRunning { name: String },

    #[error("Handler {actor}.{method} panicked: {message}")]
    DispatchFault {
        actor: String,
        method: String,
        message: String,
    },
}

impl ActorError {
    pub fn unknown_actor(name: impl Into<String>) -> Self {
        Self::UnknownActor { name: name.into() }
    }

    pub fn unknown_method(actor: impl Into<String>, method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            actor: actor.into(),
            method: method.into(),
        }
    }

    pub fn invalid_pool(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPool {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Envelope could never be delivered as addressed
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::UnknownActor { .. } | Self::UnknownMethod { .. } | Self::ArgumentMismatch { .. }
        )
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::UnknownActor { .. }
            | Self::UnknownMethod { .. }
            | Self::ArgumentMismatch { .. } => "structural",
            Self::DuplicateName { .. } | Self::InvalidPool { .. } => "registration",
            Self::NotRunning { .. } => "lifecycle",
            Self::DispatchFault { .. } => "dispatch",
        }
    }
}

pub type Result<T> = std::result::Result<T, ActorError>;
