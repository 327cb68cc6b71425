use thiserror::Error;

/// Failures while validating a payload that crossed the transport boundary.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("update is missing its session id")]
    MissingSessionId,
    #[error("session id must be a positive integer, got {0}")]
    InvalidSessionId(serde_json::Value),
    #[error("state payload is malformed: {0}")]
    MalformedState(#[source] serde_json::Error),
    #[error("new building payload is invalid: {0}")]
    InvalidNewBuilding(String),
}
