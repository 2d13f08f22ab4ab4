//! Error Handling Module
//!
//! Defines the error taxonomy of the siamese engine. Every public operation
//! returns [`Result`], and every error maps onto an HTTP-like status code so a
//! UI layer can render it without inspecting the variant.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for siamese engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Comparison called with the wrong number of images
    #[error("Exactly two images are required, got {0}")]
    InvalidImageCount(usize),

    /// Persisted model document is malformed
    #[error("Invalid structure: {0}")]
    InvalidDocument(String),

    /// Configuration rejected by validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pair label disagrees with its persisted record
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Training requested with too few pairs
    #[error("Not enough pairs to train: {count} available, at least {required} required")]
    NotEnoughPairs { count: usize, required: usize },

    /// A training run is already active
    #[error("Training already in progress")]
    TrainingInProgress,

    /// Explicit initialization of an already compiled model
    #[error("Model already initialized")]
    AlreadyInitialized,

    /// Positive/negative pair counts are too far apart
    #[error("Imbalanced data: {positive} positive vs {negative} negative pairs (max ratio {max_ratio})")]
    ImbalancedData {
        positive: usize,
        negative: usize,
        max_ratio: f64,
    },

    /// No pair snapshot under the configured key
    #[error("No stored training pairs under key '{0}'")]
    NoStoredPairs(String),

    /// Model file missing
    #[error("Model not found: {0}")]
    ModelNotFound(PathBuf),

    /// Image decode/resize failure
    #[error("Preprocessing error: {0}")]
    Preprocessing(String),

    /// Model construction failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Model still missing after lazy initialization
    #[error("Model not initialized")]
    NotInitialized,

    /// Failure inside the fit loop
    #[error("Training error: {0}")]
    Training(String),

    /// Failure while running inference
    #[error("Inference error: {0}")]
    Inference(String),

    /// Save/load failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// HTTP-like status code of this error
    pub fn status(&self) -> u16 {
        match self {
            EngineError::InvalidImageCount(_)
            | EngineError::InvalidDocument(_)
            | EngineError::Config(_)
            | EngineError::InvalidInput(_)
            | EngineError::NotEnoughPairs { .. }
            | EngineError::TrainingInProgress
            | EngineError::AlreadyInitialized
            | EngineError::ImbalancedData { .. } => 400,
            EngineError::NoStoredPairs(_) | EngineError::ModelNotFound(_) => 404,
            EngineError::Preprocessing(_)
            | EngineError::InitializationFailed(_)
            | EngineError::NotInitialized
            | EngineError::Training(_)
            | EngineError::Inference(_)
            | EngineError::Persistence(_)
            | EngineError::Io(_) => 500,
        }
    }

    /// Structured `{status, message}` form for UI consumers
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            status: self.status(),
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

impl From<image::ImageError> for EngineError {
    fn from(err: image::ImageError) -> Self {
        EngineError::Preprocessing(err.to_string())
    }
}

/// Serializable error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub message: String,
}

/// Convenience Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::NotEnoughPairs {
            count: 3,
            required: 4,
        };
        assert!(err.to_string().contains("Not enough pairs"));
        assert_eq!(
            EngineError::TrainingInProgress.to_string(),
            "Training already in progress"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(EngineError::InvalidImageCount(3).status(), 400);
        assert_eq!(EngineError::InvalidDocument("x".into()).status(), 400);
        assert_eq!(EngineError::NoStoredPairs("k".into()).status(), 404);
        assert_eq!(EngineError::Preprocessing("bad".into()).status(), 500);
        assert_eq!(EngineError::Training("nan".into()).status(), 500);
    }

    #[test]
    fn test_to_response() {
        let response = EngineError::InvalidDocument("missing siameseModel".into()).to_response();
        assert_eq!(response.status, 400);
        assert!(response.message.starts_with("Invalid structure"));
    }

    #[test]
    fn test_image_error_maps_to_preprocessing() {
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "truncated");
        let err: EngineError = image::ImageError::IoError(io).into();
        assert_eq!(err.status(), 500);
        assert!(matches!(err, EngineError::Preprocessing(_)));
    }
}
