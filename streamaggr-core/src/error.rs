//! Error types for stream aggregation operations

use thiserror::Error;

/// Result type for stream aggregation operations
pub type AggrResult<T> = Result<T, AggrError>;

/// Error taxonomy shared by the lifecycle manager, the transformation
/// context and the feedback writer.
#[derive(Error, Debug)]
pub enum AggrError {
    /// The rule file or service configuration could not be parsed or is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A metric name that this pipeline marshaled itself failed to unmarshal.
    ///
    /// Callers must treat this as unrecoverable: the batch that produced it
    /// must not be processed any further.
    #[error("Internal consistency violation: {0}")]
    InternalConsistency(String),

    /// An aggregate output series could not be converted back into a row
    #[error("Feedback build error: {0}")]
    FeedbackBuild(String),

    /// The storage write path rejected a batch of rows
    #[error("Storage write error: {0}")]
    StorageWrite(String),

    /// Malformed metric name bytes
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AggrError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new internal consistency error
    pub fn internal_consistency<S: Into<String>>(message: S) -> Self {
        Self::InternalConsistency(message.into())
    }

    /// Create a new feedback build error
    pub fn feedback_build<S: Into<String>>(message: S) -> Self {
        Self::FeedbackBuild(message.into())
    }

    /// Create a new storage write error
    pub fn storage_write<S: Into<String>>(message: S) -> Self {
        Self::StorageWrite(message.into())
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode(message.into())
    }

    /// Whether the error signals a broken invariant rather than bad input.
    ///
    /// Only [`AggrError::InternalConsistency`] is fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AggrError::InternalConsistency(_))
    }

    /// Get the error category for monitoring/metrics
    pub fn category(&self) -> &'static str {
        match self {
            AggrError::Configuration(_) => "configuration",
            AggrError::InternalConsistency(_) => "internal_consistency",
            AggrError::FeedbackBuild(_) => "feedback_build",
            AggrError::StorageWrite(_) => "storage_write",
            AggrError::Decode(_) => "decode",
            AggrError::Io(_) => "io",
        }
    }
}
