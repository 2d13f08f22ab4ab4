//! Training module for the siamese network
//!
//! This module provides:
//! - Admission guards and the single training slot
//! - The mini-batch fit loop with Keras-style validation split
//! - Per-epoch progress reporting

pub mod fit;
pub mod orchestrator;

use serde::{Deserialize, Serialize};

pub use fit::{fit, split_indices, EpochProgress, FitOptions, PairBatch, TrainingHistory};
pub use orchestrator::{
    check_balance, check_pair_count, TrainingOrchestrator, TrainingRun, TrainingStatus,
};

/// Result of a completed training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingReport {
    pub history: TrainingHistory,
    pub pair_count: usize,
    pub duration_secs: f64,
}
