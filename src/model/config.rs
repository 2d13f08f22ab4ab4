//! Engine Configuration Module
//!
//! One configuration record shared by preprocessing, model construction,
//! training, comparison and persistence. Every field has a default so a
//! partial JSON document is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::extractor::MIN_IMAGE_SIZE;
use crate::inference::DEFAULT_THRESHOLD;
use crate::utils::error::{EngineError, Result};
use crate::{FEATURE_SIZE, IMAGE_SIZE};

/// Optimizer used when compiling the siamese model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Adam,
    AdamW,
    Sgd,
}

impl std::fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "adam"),
            OptimizerKind::AdamW => write!(f, "adamw"),
            OptimizerKind::Sgd => write!(f, "sgd"),
        }
    }
}

/// Training loss
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    #[default]
    BinaryCrossentropy,
}

/// Metric reported per epoch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Accuracy,
}

/// Configuration of the siamese comparison engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SiameseConfig {
    /// Square input edge length in pixels
    pub image_size: usize,
    /// Embedding dimensionality of the feature extractor
    pub feature_size: usize,
    /// Apply augmentation when adding training pairs
    pub augmentation: bool,
    /// Number of training epochs
    pub epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// Fraction of pairs held out for validation, taken from the end
    pub validation_split: f64,
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
    pub loss: LossKind,
    pub metrics: Vec<MetricKind>,
    /// Scores strictly above this threshold mean "same animal"
    pub prediction_threshold: f32,
    pub task_name: String,
    /// Key of the pair snapshot in the key/value store
    pub storage_key: String,
    /// Minimum number of pairs before training is allowed
    pub min_training_pairs: usize,
    /// Largest tolerated positive/negative ratio (both directions)
    pub max_imbalance_ratio: f64,
    /// Seed for augmentation and epoch shuffling
    pub seed: u64,
}

impl Default for SiameseConfig {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
            feature_size: FEATURE_SIZE,
            augmentation: true,
            epochs: 100,
            batch_size: 4,
            validation_split: 0.2,
            optimizer: OptimizerKind::Adam,
            learning_rate: 0.0001,
            loss: LossKind::BinaryCrossentropy,
            metrics: vec![MetricKind::Accuracy],
            prediction_threshold: DEFAULT_THRESHOLD,
            task_name: "pet-siamese".to_string(),
            storage_key: "siamese_training_pairs".to_string(),
            min_training_pairs: 4,
            max_imbalance_ratio: 1.2,
            seed: 42,
        }
    }
}

impl SiameseConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.image_size < MIN_IMAGE_SIZE {
            return Err(EngineError::Config(format!(
                "image_size must be at least {}",
                MIN_IMAGE_SIZE
            )));
        }
        if self.feature_size == 0 {
            return Err(EngineError::Config("feature_size must be greater than 0".into()));
        }
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(EngineError::Config("epochs and batch_size must be greater than 0".into()));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(EngineError::Config("validation_split must be in range [0.0, 1.0)".into()));
        }
        if !(0.0..=1.0).contains(&self.prediction_threshold) {
            return Err(EngineError::Config("prediction_threshold must be in range [0.0, 1.0]".into()));
        }
        if self.learning_rate <= 0.0 {
            return Err(EngineError::Config("learning_rate must be positive".into()));
        }
        if self.max_imbalance_ratio < 1.0 {
            return Err(EngineError::Config("max_imbalance_ratio must be at least 1.0".into()));
        }
        if self.storage_key.is_empty() {
            return Err(EngineError::Config("storage_key must not be empty".into()));
        }
        Ok(())
    }

    /// Return a copy with the given per-call overrides applied
    pub fn with_overrides(&self, overrides: &ConfigOverrides) -> Self {
        let mut config = self.clone();
        if let Some(epochs) = overrides.epochs {
            config.epochs = epochs;
        }
        if let Some(batch_size) = overrides.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(split) = overrides.validation_split {
            config.validation_split = split;
        }
        if let Some(lr) = overrides.learning_rate {
            config.learning_rate = lr;
        }
        if let Some(threshold) = overrides.prediction_threshold {
            config.prediction_threshold = threshold;
        }
        if let Some(augmentation) = overrides.augmentation {
            config.augmentation = augmentation;
        }
        config
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file; missing fields use defaults
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Per-call overrides of a [`SiameseConfig`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub validation_split: Option<f64>,
    pub learning_rate: Option<f64>,
    pub prediction_threshold: Option<f32>,
    pub augmentation: Option<bool>,
}
