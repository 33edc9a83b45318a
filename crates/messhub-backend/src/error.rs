use messhub_core::KvError;
use messhub_lifecycle::Classifiable;
use thiserror::Error;

/// Backend code for "no rows returned" on a single-row request.
pub const NOT_FOUND_CODE: &str = "PGRST116";

/// Errors returned by the remote backend client.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status and an error envelope.
    #[error("backend error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        details: Option<String>,
        hint: Option<String>,
    },

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("network timeout: {operation} did not complete within {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("invalid backend URL '{0}'")]
    InvalidUrl(String),

    #[error("object storage error: {0}")]
    Storage(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("auth session missing; sign in first")]
    Unauthenticated,

    #[error(transparent)]
    KeyValue(#[from] KvError),
}

impl BackendError {
    /// True when a single-row request matched no rows.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::Api { code, .. } if code == NOT_FOUND_CODE)
    }

    pub(crate) fn deserialize(context: impl Into<String>, source: serde_json::Error) -> Self {
        BackendError::Deserialize {
            context: context.into(),
            source,
        }
    }
}

impl Classifiable for BackendError {
    fn name(&self) -> &str {
        match self {
            BackendError::Http(_) => "FetchError",
            BackendError::Api { status: 401 | 403, .. } => "AuthApiError",
            BackendError::Api { .. } => "BackendApiError",
            BackendError::Deserialize { .. } => "DeserializeError",
            BackendError::Timeout { .. } => "TimeoutError",
            BackendError::InvalidUrl(_) => "ConfigurationError",
            BackendError::Storage(_) => "ObjectStorageError",
            BackendError::Auth(_) => "AuthError",
            BackendError::Unauthenticated => "AuthSessionMissingError",
            BackendError::KeyValue(_) => "KeyValueError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messhub_lifecycle::{classify, ErrorType};

    fn api(status: u16, code: &str) -> BackendError {
        BackendError::Api {
            status,
            code: code.to_owned(),
            message: "boom".to_owned(),
            details: None,
            hint: None,
        }
    }

    #[test]
    fn not_found_is_recognized_by_code() {
        assert!(api(406, NOT_FOUND_CODE).is_not_found());
        assert!(!api(400, "22P02").is_not_found());
        assert!(!BackendError::Unauthenticated.is_not_found());
    }

    #[test]
    fn variants_land_in_expected_categories() {
        let cases = [
            (
                BackendError::Timeout {
                    operation: "select memberships".to_owned(),
                    after_ms: 5,
                },
                ErrorType::Network,
            ),
            (BackendError::Unauthenticated, ErrorType::Auth),
            (api(401, "PGRST301"), ErrorType::Auth),
            (api(500, "XX000"), ErrorType::Unknown),
            (BackendError::Storage("bucket missing".to_owned()), ErrorType::Unknown),
        ];
        for (err, expected) in cases {
            assert_eq!(classify(err.name(), &err.to_string()), expected, "{err}");
        }
    }
}
