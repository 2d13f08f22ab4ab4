//! Inference module: comparing two pet photos with the siamese network
//!
//! Comparison always runs on the inference (non-autodiff) copy of the model
//! and never augments its inputs.

pub mod comparison;

pub use comparison::{score_pair, ComparisonResult};

/// Default decision threshold on the similarity score
pub const DEFAULT_THRESHOLD: f32 = 0.7;

/// Number of images a comparison takes
pub const COMPARISON_IMAGE_COUNT: usize = 2;
