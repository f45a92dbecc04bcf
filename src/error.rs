//! Error types for qrbatch operations

use thiserror::Error;

/// Result type alias using qrbatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for qrbatch operations
///
/// Cancellation is not represented here: a cancelled batch ends in
/// [`crate::sink::BatchState::Cancelled`], which is a normal outcome.
#[derive(Error, Debug)]
pub enum Error {
    /// Input string rejected before it reached the pipeline
    #[error("Invalid input '{input}': {reason}")]
    Validation {
        /// The offending input, trimmed
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// A single item could not be rendered as a QR code
    #[error("Failed to encode QR code for '{text}': {reason}")]
    Encoding {
        /// The string that could not be encoded
        text: String,
        /// Encoder diagnostic (e.g. capacity exceeded)
        reason: String,
    },

    /// Rendered image could not be decoded back
    #[error("Failed to decode QR code: {0}")]
    Decode(String),

    /// Any other failure while encoding or dispatching; aborts the batch
    #[error("Unexpected generation failure: {0}")]
    Unexpected(String),

    /// Logo could not be loaded or prepared
    #[error("Logo error: {0}")]
    Logo(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image processing error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build an encoding failure for `text`.
    pub fn encoding(text: impl Into<String>, reason: impl ToString) -> Self {
        Error::Encoding {
            text: text.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error only concerns a single item of a batch.
    pub fn is_per_item(&self) -> bool {
        matches!(self, Error::Encoding { .. } | Error::Validation { .. })
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Image(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {}", e))
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Config(format!("Invalid hex colour: {}", e))
    }
}
