//! Error types for fashion-tuner

use thiserror::Error;

/// Result type alias for tuner operations
pub type Result<T> = std::result::Result<T, TunerError>;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum TunerError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Optimization error: {0}")]
    OptimizationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Hyperparameter not found: {0}")]
    ParameterNotFound(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Model not compiled")]
    ModelNotCompiled,

    #[error("Plot error: {0}")]
    PlotError(String),
}

impl From<serde_json::Error> for TunerError {
    fn from(err: serde_json::Error) -> Self {
        TunerError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for TunerError {
    fn from(err: bincode::Error) -> Self {
        TunerError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for TunerError {
    fn from(err: ndarray::ShapeError) -> Self {
        TunerError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TunerError::DataError("bad magic".to_string());
        assert_eq!(err.to_string(), "Data error: bad magic");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TunerError = io_err.into();
        assert!(matches!(err, TunerError::IoError(_)));
    }

    #[test]
    fn test_invalid_parameter_display() {
        let err = TunerError::InvalidParameter {
            name: "factor".to_string(),
            value: "1".to_string(),
            reason: "must be at least 2".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: factor = 1, must be at least 2");
    }
}
