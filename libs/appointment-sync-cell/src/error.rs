use thiserror::Error;

use office_assignment_cell::AssignmentError;
use shared_database::ApiError;
use shared_models::error::AppError;
use webhook_queue_cell::{ErrorClass, HandlerError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transient infrastructure error: {0}")]
    TransientInfra(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Reconciliation failure: {0}")]
    ReconciliationFailure(String),

    #[error("No office could be determined: {0}")]
    UnresolvedAssignment(String),

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientInfra(_) | SyncError::Ledger(_))
    }
}

impl From<ApiError> for SyncError {
    fn from(e: ApiError) -> Self {
        match e {
            e if e.is_transient() => SyncError::TransientInfra(e.to_string()),
            ApiError::NotConfigured(msg) => SyncError::Configuration(msg),
            other => SyncError::Store(other.to_string()),
        }
    }
}

impl From<AssignmentError> for SyncError {
    fn from(e: AssignmentError) -> Self {
        SyncError::Configuration(e.to_string())
    }
}

impl From<redis::RedisError> for SyncError {
    fn from(e: redis::RedisError) -> Self {
        SyncError::Ledger(e.to_string())
    }
}

impl From<SyncError> for HandlerError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Validation(msg) => HandlerError::validation(msg),
            e if e.is_transient() => HandlerError::transient(e.to_string()),
            other => HandlerError::permanent(other.to_string()),
        }
    }
}

impl From<HandlerError> for SyncError {
    fn from(e: HandlerError) -> Self {
        match e.class {
            ErrorClass::Validation => SyncError::Validation(e.message),
            ErrorClass::Transient => SyncError::TransientInfra(e.message),
            ErrorClass::Permanent => SyncError::Store(e.message),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Validation(msg) => AppError::ValidationError(msg),
            SyncError::TransientInfra(msg) => AppError::Unavailable(msg),
            SyncError::Store(msg) => AppError::ExternalService(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use webhook_queue_cell::ErrorClass;

    #[test]
    fn test_api_errors_are_classified() {
        assert_matches!(SyncError::from(ApiError::RateLimited("slow down".into())), SyncError::TransientInfra(_));
        assert_matches!(
            SyncError::from(ApiError::Client { status: 409, body: "conflict".into() }),
            SyncError::Store(_)
        );
        assert_matches!(SyncError::from(ApiError::NotConfigured("no url".into())), SyncError::Configuration(_));
    }

    #[test]
    fn test_handler_error_classes() {
        assert_eq!(HandlerError::from(SyncError::Validation("x".into())).class, ErrorClass::Validation);
        assert_eq!(HandlerError::from(SyncError::TransientInfra("x".into())).class, ErrorClass::Transient);
        assert_eq!(HandlerError::from(SyncError::Ledger("x".into())).class, ErrorClass::Transient);
        assert_eq!(HandlerError::from(SyncError::Store("x".into())).class, ErrorClass::Permanent);
    }
}
