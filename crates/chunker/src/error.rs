use thiserror::Error;

/// Result type for chunker operations
pub type Result<T> = std::result::Result<T, ChunkerError>;

/// Errors that can occur while configuring or running a token encoding
#[derive(Error, Debug)]
pub enum ChunkerError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested encoding could not be loaded
    #[error("Encoding '{name}' unavailable: {reason}")]
    EncodingUnavailable { name: String, reason: String },

    /// Tokenization failed at runtime
    #[error("Tokenization failed: {0}")]
    Tokenization(String),
}

impl ChunkerError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an encoding-unavailable error
    pub fn encoding_unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EncodingUnavailable {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a tokenization error
    pub fn tokenization(msg: impl Into<String>) -> Self {
        Self::Tokenization(msg.into())
    }
}
