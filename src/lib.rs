//! # Pet Siamese
//!
//! A Rust library that decides whether two pet photos show the same animal,
//! using a siamese convolutional network built with the Burn framework.
//!
//! ## Features
//!
//! - **Siamese CNN** with one feature extractor shared between both inputs
//! - **Incremental training** from user-labeled image pairs, gated on pair count and class balance
//! - **Portable export** of topology, weight specs and record bytes as JSON
//! - **Leak-checked tensors**: every tensor handed out is counted by a ledger
//!
//! ## Modules
//!
//! - `dataset`: Preprocessing, augmentation, the training pair store and the tensor ledger
//! - `model`: Feature extractor, siamese network and configuration
//! - `training`: Admission guards, training status and the fit loop
//! - `inference`: Score → verdict and confidence
//! - `persistence`: Export/import document, key/value snapshot and pair rehydration
//! - `engine`: The context object tying everything together
//! - `utils`: Errors, logging and helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pet_siamese::backend::{default_device, TrainingBackend};
//! use pet_siamese::{ImageSource, PairRecord, SiameseConfig, SiameseEngine};
//!
//! let engine = SiameseEngine::<TrainingBackend>::new(SiameseConfig::default(), default_device())?;
//! engine.add_pair(&cat_a, &cat_b, PairRecord::new("a.jpg", "b.jpg", true)).await?;
//! // ... more pairs
//! engine.start_training(None).await?;
//! let result = engine.compare(&[cat_a, cat_c]).await?;
//! ```

pub mod backend;
pub mod dataset;
pub mod engine;
pub mod inference;
pub mod model;
pub mod persistence;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{DataBalance, ImageSource, PairRecord, TensorLedger, TrainingPairStore};
pub use engine::{EngineEvent, SiameseEngine, StatusKind};
pub use inference::ComparisonResult;
pub use model::{ConfigOverrides, SiameseConfig, SiameseNetwork};
pub use persistence::{ExportDocument, FileFetcher, FileStore, MemoryFetcher, MemoryStore};
pub use training::{EpochProgress, TrainingReport, TrainingStatus};
pub use utils::error::{EngineError, ErrorResponse, Result};

/// Default square input size
pub const IMAGE_SIZE: usize = 224;

/// Default embedding dimensionality
pub const FEATURE_SIZE: usize = 256;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
