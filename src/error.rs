use std::time::Duration;
use thiserror::Error;

/// Errors returned by enhancement operations.
///
/// Per-request variants (`Http`, `Network`, `Timeout`, `Decode`,
/// `Pairing*`) never reach callers of
/// [`BatchOrchestrator::enhance`](crate::BatchOrchestrator::enhance); they are
/// folded into the `Failed` phase and only surface through logs and
/// [`FailureKind`](crate::FailureKind).
#[derive(Error, Debug)]
pub enum EnhanceError {
    /// The batch has no inputs.
    #[error("No images selected")]
    NoInput,

    /// A selected file is not an image.
    #[error("Invalid file type for {name}: {media_type} is not an image")]
    InvalidMediaType { name: String, media_type: String },

    /// The enhancement service returned a non-success HTTP status.
    #[error("Enhancement service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// The request did not resolve within the configured timeout.
    #[error("Enhancement request timed out after {0:?}")]
    Timeout(Duration),

    /// The response body was not a well-formed archive.
    #[error("Failed to decode result archive: {0}")]
    Decode(String),

    /// The archive held more results than there were inputs.
    #[error("Archive contained {outputs} results for {inputs} inputs")]
    PairingOverflow { outputs: usize, inputs: usize },

    /// The archive held fewer results than inputs (strict pairing only).
    #[error("Archive contained only {outputs} results for {inputs} inputs")]
    PairingShortfall { outputs: usize, inputs: usize },

    /// Required configuration is missing or invalid.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The handle belongs to a batch that was reset or replaced.
    #[error("Output handle refers to a batch that is no longer active")]
    StaleHandle,

    /// No output exists at the given position.
    #[error("No enhanced output at index {0}")]
    OutputNotFound(usize),

    /// The active batch has no enhanced results to offer.
    #[error("No enhanced results available")]
    NoResults,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<zip::result::ZipError> for EnhanceError {
    fn from(err: zip::result::ZipError) -> Self {
        EnhanceError::Decode(err.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, EnhanceError>;
