use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Unknown webhook event type: {0}")]
    UnknownEventType(String),

    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// How the dispatcher should treat a failed processing attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeout, rate limit, 5xx: retry with backoff.
    Transient,
    /// Upstream rejected the operation; stop retrying, hand to recovery.
    Permanent,
    /// Malformed or incomplete event; never retried.
    Validation,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{class:?} failure: {message}")]
pub struct HandlerError {
    pub class: ErrorClass,
    pub message: String,
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { class: ErrorClass::Transient, message: message.into() }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self { class: ErrorClass::Permanent, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self { class: ErrorClass::Validation, message: message.into() }
    }

    pub fn is_retryable(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}
