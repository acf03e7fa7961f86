use thiserror::Error;

/// Failures while parsing an inbound payload or projecting an envelope
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvelopeError {
    #[error("payload is empty")]
    EmptyPayload,

    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("payload must be a JSON object or a single-element array of one: {0}")]
    UnexpectedShape(String),

    #[error("message body is empty")]
    EmptyBody,

    #[error("message body is missing field {0}")]
    MissingField(&'static str),

    #[error("message is missing property {0}")]
    MissingProperty(&'static str),

    #[error("property {name} is not a valid timestamp: {value}")]
    InvalidTimestamp { name: &'static str, value: String },

    #[error("failed to serialize projection: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(e: serde_json::Error) -> Self {
        EnvelopeError::Serialization(e.to_string())
    }
}

/// Failure of a single outbound send
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("projection failed: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

/// Failure while applying a desired-property update
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationApplyError {
    #[error("desired properties are not valid JSON: {0}")]
    InvalidJson(String),

    #[error("desired properties must be a JSON object")]
    NotAnObject,

    #[error("unrecognised logging level: {0}")]
    UnknownLevel(String),
}

pub type EnvelopeResult<T> = std::result::Result<T, EnvelopeError>;
pub type RoutingResult<T> = std::result::Result<T, RoutingError>;
