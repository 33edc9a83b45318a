use messhub_core::RenewalEligibility;
use messhub_lifecycle::{AppError, Classifiable, ThrottledError};
use thiserror::Error;

/// A backend row that does not have the shape the domain expects.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{entity} response is not an object")]
    NotAnObject { entity: &'static str },

    #[error("{entity} response is missing required field '{field}'")]
    MissingField {
        entity: &'static str,
        field: &'static str,
    },

    #[error("{entity} response has a malformed field: {source}")]
    Malformed {
        entity: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{entity} field '{field}' is invalid: {reason}")]
    InvalidField {
        entity: &'static str,
        field: &'static str,
        reason: String,
    },

    #[error("{entity} '{id}' not found or no longer modifiable")]
    NoMatchingRow { entity: &'static str, id: String },
}

impl Classifiable for ValidationError {
    fn name(&self) -> &str {
        "ValidationError"
    }
}

/// What domain-service callers see. Raw backend errors never escape.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Retries exhausted (or validation failed) and the error was classified.
    /// The [`AppError`] is also the error source so store diagnostics can
    /// reach its technical detail.
    #[error("{0}")]
    App(#[source] AppError),

    /// Classification was skipped because a same-category error was just handled.
    #[error(transparent)]
    Throttled(#[from] ThrottledError),

    #[error("renewal request not allowed: {}", .0.message)]
    Ineligible(RenewalEligibility),
}

impl ServiceError {
    #[must_use]
    pub fn app_error(&self) -> Option<&AppError> {
        match self {
            ServiceError::App(err) => Some(err),
            _ => None,
        }
    }
}
