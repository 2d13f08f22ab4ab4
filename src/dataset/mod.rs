//! Dataset module: image preprocessing, augmentation and training pairs
//!
//! This module provides:
//! - Decoding and normalizing images into model inputs
//! - Probabilistic augmentation with an injectable RNG
//! - The in-memory training pair store and its class balance
//! - A ledger that counts live tensors

pub mod augmentation;
pub mod pairs;
pub mod preprocess;
pub mod tensor;

pub use augmentation::{AppliedAugmentations, AugmentationConfig, Augmenter};
pub use pairs::{DataBalance, PairLabel, PairRecord, TrainingPair, TrainingPairStore};
pub use preprocess::{ImageSource, PixelBuffer, Preprocessor, IMAGENET_MEAN, IMAGENET_STD};
pub use tensor::{ImageTensor, TensorLedger, Tracked};
