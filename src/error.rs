use thiserror::Error;

/// Custom error type for classifier fine-tuning operations.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// A data row could not be parsed into a record.
    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: u64, reason: String },

    /// Text could not be turned into token ids.
    #[error("Tokenization failed for record {id}: {reason}")]
    Tokenization { id: i64, reason: String },

    /// Configuration is invalid or could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input validation failed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tensor runtime or model operation failed.
    #[error("Model error: {message}")]
    Model {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization of reports, metrics or adapter metadata failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<candle_core::Error> for ClassifierError {
    fn from(err: candle_core::Error) -> Self {
        ClassifierError::Model {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for ClassifierError {
    fn from(err: serde_json::Error) -> Self {
        ClassifierError::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<csv::Error> for ClassifierError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        match err.kind() {
            csv::ErrorKind::UnequalLengths { expected_len, len, .. } => {
                ClassifierError::MalformedRecord {
                    line,
                    reason: format!("expected {} columns, found {}", expected_len, len),
                }
            }
            csv::ErrorKind::Io(_) => ClassifierError::Io(std::io::Error::other(err.to_string())),
            _ => ClassifierError::MalformedRecord {
                line,
                reason: err.to_string(),
            },
        }
    }
}

/// Convenience alias for results carrying a [`ClassifierError`].
pub type Result<T> = std::result::Result<T, ClassifierError>;
