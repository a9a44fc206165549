// Central Error Type for the Queue Adapter

use crate::port::BrokerError;
use thiserror::Error;

/// Machine-readable error codes carried by every [`QueueError`]
pub mod code {
    pub const CONFIG: &str = "QUEUE.CONFIG";
    pub const CREDENTIALS: &str = "QUEUE.CREDENTIALS";
    pub const SERIALIZATION: &str = "QUEUE.SERIALIZATION";
    pub const PUSH: &str = "QUEUE.PUSH";
    pub const PULL: &str = "QUEUE.PULL";
}

/// Queue-level error type
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{message}: {source}")]
    Publish {
        message: String,
        #[source]
        source: BrokerError,
    },

    #[error("{message}: {source}")]
    Subscription {
        message: String,
        #[source]
        source: BrokerError,
    },
}

impl QueueError {
    pub fn publish(message: impl Into<String>, source: BrokerError) -> Self {
        QueueError::Publish {
            message: message.into(),
            source,
        }
    }

    pub fn subscription(message: impl Into<String>, source: BrokerError) -> Self {
        QueueError::Subscription {
            message: message.into(),
            source,
        }
    }

    /// Stable code for programmatic handling (e.g. `QUEUE.PUSH`)
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::Config(_) => code::CONFIG,
            QueueError::Credentials(_) => code::CREDENTIALS,
            QueueError::Serialization(_) => code::SERIALIZATION,
            QueueError::Publish { .. } => code::PUSH,
            QueueError::Subscription { .. } => code::PULL,
        }
    }

    /// Underlying broker failure, if this error wraps one
    pub fn broker_error(&self) -> Option<&BrokerError> {
        match self {
            QueueError::Publish { source, .. } | QueueError::Subscription { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

/// Result type alias using QueueError
pub type Result<T> = std::result::Result<T, QueueError>;
