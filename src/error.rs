/// Error type shared by the provider client, the cache, and the HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Provider '{0}' is not configured or supported.")]
    ProviderNotConfigured(String),
    #[error("Model '{model}' not found for provider '{provider}'.")]
    ModelNotFound { provider: String, model: String },
    #[error("Rate limited by provider '{provider}': {message}")]
    RateLimited { provider: String, message: String },
    #[error("Connection to {endpoint} failed: {message}")]
    ConnectionFailure { endpoint: String, message: String },
    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: String },
    #[error("Upstream error: status={status}, message={message}")]
    UpstreamStatus { status: u16, message: String },
    #[error("Cache fault: {0}")]
    CacheFault(String),
    #[error("Formatting error: {0}")]
    Formatting(String),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Fixed failure taxonomy surfaced by the streaming core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ProviderNotConfigured,
    ModelNotFound,
    RateLimited,
    ConnectionFailure,
    Timeout,
    UpstreamStatusFault,
    CacheFault,
    FormattingFault,
    UnexpectedFault,
}

impl RelayError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::ProviderNotConfigured(_) => ErrorKind::ProviderNotConfigured,
            RelayError::ModelNotFound { .. } => ErrorKind::ModelNotFound,
            RelayError::RateLimited { .. } => ErrorKind::RateLimited,
            RelayError::ConnectionFailure { .. } => ErrorKind::ConnectionFailure,
            RelayError::Timeout { .. } => ErrorKind::Timeout,
            RelayError::UpstreamStatus { .. } => ErrorKind::UpstreamStatusFault,
            RelayError::CacheFault(_) => ErrorKind::CacheFault,
            RelayError::Formatting(_) => ErrorKind::FormattingFault,
            RelayError::Config(_) | RelayError::InvalidRequest(_) | RelayError::Unexpected(_) => {
                ErrorKind::UnexpectedFault
            }
        }
    }

    /// Faults raised by the provider or the network path to it.
    #[must_use]
    pub fn is_provider_fault(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ModelNotFound
                | ErrorKind::RateLimited
                | ErrorKind::ConnectionFailure
                | ErrorKind::Timeout
                | ErrorKind::UpstreamStatusFault
        )
    }

    /// Text carried by the in-band `Error` event for this failure.
    ///
    /// Provider detail stays in the logs; the client gets a stable sentence.
    #[must_use]
    pub fn stream_message(&self, model: &str) -> String {
        match self {
            RelayError::ProviderNotConfigured(provider) => {
                format!("Provider '{provider}' is not configured or supported.")
            }
            RelayError::ModelNotFound { .. } => {
                format!("Error: The model '{model}' was not found or is inaccessible.")
            }
            RelayError::Timeout { .. } => {
                "Error: The request to the AI service timed out.".to_string()
            }
            RelayError::ConnectionFailure { endpoint, .. } => {
                format!("Error: Could not connect to the AI service ({endpoint}).")
            }
            RelayError::RateLimited { .. } => {
                "Error: AI service rate limit exceeded. Please try again later.".to_string()
            }
            RelayError::UpstreamStatus { status, .. } => {
                format!("Error: The AI service returned an error (Status {status}).")
            }
            RelayError::CacheFault(_) => {
                "Internal server error retrieving cached response.".to_string()
            }
            RelayError::Config(_)
            | RelayError::InvalidRequest(_)
            | RelayError::Formatting(_)
            | RelayError::Unexpected(_) => {
                "Error: An unexpected error occurred processing the AI response.".to_string()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

fn http_status_for(err: &RelayError) -> http::StatusCode {
    match err {
        RelayError::InvalidRequest(_) => http::StatusCode::UNPROCESSABLE_ENTITY,
        RelayError::ProviderNotConfigured(_) => http::StatusCode::BAD_REQUEST,
        e if e.is_provider_fault() => http::StatusCode::BAD_REQUEST,
        _ => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn client_detail(err: &RelayError) -> String {
    match err {
        RelayError::CacheFault(_) => "Internal server error related to caching.".to_string(),
        RelayError::ProviderNotConfigured(_)
        | RelayError::ModelNotFound { .. }
        | RelayError::InvalidRequest(_) => err.to_string(),
        e if e.is_provider_fault() => format!("API or Network error contacting provider: {e}"),
        _ => "Internal Server Error".to_string(),
    }
}

/// Format an error as `(status, {"detail": ...})` for the non-streaming endpoints.
#[must_use]
pub fn format_error(err: &RelayError) -> (http::StatusCode, serde_json::Value) {
    (
        http_status_for(err),
        serde_json::json!({ "detail": client_detail(err) }),
    )
}

impl axum::response::IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = RelayError::UpstreamStatus {
            status: 503,
            message: "busy".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::UpstreamStatusFault);
        assert!(err.is_provider_fault());
        assert_eq!(
            RelayError::CacheFault("x".to_string()).kind(),
            ErrorKind::CacheFault
        );
        assert!(!RelayError::CacheFault("x".to_string()).is_provider_fault());
    }

    #[test]
    fn test_stream_messages() {
        let not_found = RelayError::ModelNotFound {
            provider: "openai".to_string(),
            model: "gpt-x".to_string(),
        };
        assert_eq!(
            not_found.stream_message("gpt-x"),
            "Error: The model 'gpt-x' was not found or is inaccessible."
        );
        let status = RelayError::UpstreamStatus {
            status: 500,
            message: String::new(),
        };
        assert_eq!(
            status.stream_message("m"),
            "Error: The AI service returned an error (Status 500)."
        );
        let conn = RelayError::ConnectionFailure {
            endpoint: "http://127.0.0.1:9".to_string(),
            message: "refused".to_string(),
        };
        assert_eq!(
            conn.stream_message("m"),
            "Error: Could not connect to the AI service (http://127.0.0.1:9)."
        );
    }

    #[test]
    fn test_format_error_statuses() {
        let (status, body) = format_error(&RelayError::ProviderNotConfigured("xai".to_string()));
        assert_eq!(status, http::StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Provider 'xai' is not configured or supported.");

        let (status, body) = format_error(&RelayError::CacheFault("bad".to_string()));
        assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Internal server error related to caching.");

        let (status, _) = format_error(&RelayError::Timeout {
            endpoint: "x".to_string(),
        });
        assert_eq!(status, http::StatusCode::BAD_REQUEST);

        let (status, body) = format_error(&RelayError::Unexpected("boom".to_string()));
        assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Internal Server Error");
    }
}
