use thiserror::Error;

/// Errors that can occur in lattix-textkge.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error (missing or unreadable vectors / triples file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed input file.
    #[error("format error: {0}")]
    Format(String),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Width, rank or batch size disagreement.
    #[error("shape mismatch for {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// No triple survived encoding.
    #[error("dataset is empty: no triple could be embedded from text")]
    EmptyDataset,

    /// Training error.
    #[error("training error: {0}")]
    Training(String),
}

/// Result type alias for lattix-textkge.
pub type Result<T> = std::result::Result<T, Error>;
