//! Error types for the shared protocol

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Envelope is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Envelope is missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid payload for '{kind}': {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
