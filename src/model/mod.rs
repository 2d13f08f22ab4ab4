//! Model module for the siamese comparison network using the Burn framework
//!
//! This module provides:
//! - The convolutional feature extractor producing image embeddings
//! - The siamese network sharing one extractor between both inputs
//! - Engine configuration and per-call overrides
//! - Serializable topology and weight descriptions for export
//!
//! ## Architecture
//!
//! Both images pass through the same [`FeatureExtractor`]; the two embeddings
//! are concatenated and scored by a small dense head ending in a sigmoid.

pub mod config;
pub mod extractor;
pub mod siamese;
pub mod topology;

// Re-export main types for convenience
pub use config::{ConfigOverrides, OptimizerKind, SiameseConfig};
pub use extractor::{build_feature_extractor, FeatureExtractor, FeatureExtractorConfig};
pub use siamese::{
    build_siamese_model, CompiledSiamese, ModelState, SiameseNetwork, SiameseNetworkConfig,
    TrainingSpec,
};
pub use topology::{LayerSpec, ModelTopology, WeightSpec};
