use thiserror::Error;

/// A3S Transfer error types
#[derive(Error, Debug)]
pub enum OciError {
    /// Reference could not be parsed into registry/repository[:tag|@digest]
    #[error("Invalid reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    /// The platform credential store exists but could not be read
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    /// Manifest or blob does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Registry rejected the credentials (or lack of them)
    #[error("Unauthorized: {registry} - {message}")]
    Unauthorized { registry: String, message: String },

    /// Any other registry or transport failure
    #[error("Network error: {registry} - {message}")]
    Network { registry: String, message: String },

    /// Copying one layer failed
    #[error("Failed to transfer layer {digest} to {reference}: {source}")]
    Transfer {
        digest: String,
        reference: String,
        #[source]
        source: Box<OciError>,
    },

    /// Content did not match its descriptor
    #[error("Integrity error: {subject} expected {expected}, got {actual}")]
    Integrity {
        subject: String,
        expected: String,
        actual: String,
    },

    /// Descriptor carries no title annotation
    #[error("Layer {0} is not a file")]
    NotAFile(String),

    /// Title annotation would resolve outside the destination directory
    #[error("Invalid layer path: {0}")]
    InvalidPath(String),

    /// Operation canceled by the caller or by a failing sibling
    #[error("Operation canceled")]
    Canceled,

    /// Operation exceeded its deadline
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl OciError {
    /// True for errors caused by cancellation or an expired deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, OciError::Canceled | OciError::DeadlineExceeded(_))
    }

    /// Wrap a per-layer failure with the layer digest and destination.
    ///
    /// Cancellation passes through unchanged so callers can still match it.
    pub fn transfer(digest: impl Into<String>, reference: impl Into<String>, source: OciError) -> Self {
        if source.is_cancellation() {
            return source;
        }
        OciError::Transfer {
            digest: digest.into(),
            reference: reference.into(),
            source: Box::new(source),
        }
    }
}

impl From<serde_json::Error> for OciError {
    fn from(err: serde_json::Error) -> Self {
        OciError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for OciError {
    fn from(err: serde_yaml::Error) -> Self {
        OciError::SerializationError(err.to_string())
    }
}

/// Result type alias for A3S Transfer operations
pub type Result<T> = std::result::Result<T, OciError>;
