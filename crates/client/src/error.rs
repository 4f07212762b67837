//! Client error types

/// Error type for session client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Session is closed")]
    SessionClosed,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Presence storage error: {0}")]
    Storage(String),

    #[error("Session view is no longer running")]
    ViewClosed,
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_message_carries_server_body() {
        let err = ClientError::Api {
            status: 409,
            code: "SESSION_CLOSED".into(),
            message: "Session is closed".into(),
        };
        assert_eq!(
            err.to_string(),
            "Server returned 409 (SESSION_CLOSED): Session is closed"
        );
    }
}
