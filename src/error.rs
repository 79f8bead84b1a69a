use std::path::PathBuf;
use thiserror::Error;

/// Main error type for sourcegate
#[derive(Error, Debug)]
pub enum SourcegateError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// A write carried vectors whose dimensionality differs from the partition's
    #[error("Dimension mismatch: partition holds {expected}-d vectors, got {actual}-d")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An add call violated its preconditions
    #[error("Invalid index batch: {0}")]
    InvalidBatch(String),

    /// A document whose format has no parser
    #[error("Unsupported document format '{extension}': {path}")]
    UnsupportedDocumentFormat { path: PathBuf, extension: String },

    /// Embedding service errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Chat/completion service errors
    #[error("Chat error: {0}")]
    Chat(String),

    /// User not found in the directory
    #[error("User not found: {id}")]
    UserNotFound { id: String },

    /// Caller is not allowed to perform the operation
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// Metadata record not found
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for sourcegate operations
pub type Result<T> = std::result::Result<T, SourcegateError>;
