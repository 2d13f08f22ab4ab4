//! Training pair storage.
//!
//! The store keeps each in-memory [`TrainingPair`] next to the [`PairRecord`]
//! it was created from, in a single ordered vector. The persisted snapshot and
//! the tensors therefore always have the same length and order.

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use super::tensor::ImageTensor;
use crate::utils::error::{EngineError, Result};

/// Binary pair label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairLabel {
    Different = 0,
    Same = 1,
}

impl PairLabel {
    pub fn from_same(same: bool) -> Self {
        if same {
            PairLabel::Same
        } else {
            PairLabel::Different
        }
    }

    pub fn is_same(self) -> bool {
        self == PairLabel::Same
    }

    pub fn as_f32(self) -> f32 {
        self as u8 as f32
    }
}

/// Tensor-free, persistable description of a pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRecord {
    pub image1_url: String,
    pub image2_url: String,
    pub is_same_animal: bool,
}

impl PairRecord {
    pub fn new(image1_url: impl Into<String>, image2_url: impl Into<String>, same: bool) -> Self {
        Self {
            image1_url: image1_url.into(),
            image2_url: image2_url.into(),
            is_same_animal: same,
        }
    }

    pub fn label(&self) -> PairLabel {
        PairLabel::from_same(self.is_same_animal)
    }
}

/// Two preprocessed images and their label
#[derive(Debug)]
pub struct TrainingPair<B: Backend> {
    pub image1: ImageTensor<B>,
    pub image2: ImageTensor<B>,
    pub label: PairLabel,
}

impl<B: Backend> TrainingPair<B> {
    pub fn new(image1: ImageTensor<B>, image2: ImageTensor<B>, label: PairLabel) -> Self {
        Self {
            image1,
            image2,
            label,
        }
    }
}

/// Positive/negative pair counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBalance {
    pub positive: usize,
    pub negative: usize,
    pub total: usize,
}

impl DataBalance {
    /// True when neither class exceeds the other by more than `max_ratio`
    pub fn within_ratio(&self, max_ratio: f64) -> bool {
        let positive = self.positive as f64;
        let negative = self.negative as f64;
        !(positive > negative * max_ratio || negative > positive * max_ratio)
    }
}

#[derive(Debug)]
struct StoredPair<B: Backend> {
    pair: TrainingPair<B>,
    record: PairRecord,
}

/// Ordered in-memory collection of labeled pairs
#[derive(Debug)]
pub struct TrainingPairStore<B: Backend> {
    entries: Vec<StoredPair<B>>,
}

impl<B: Backend> Default for TrainingPairStore<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> TrainingPairStore<B> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn check_label(pair: &TrainingPair<B>, record: &PairRecord) -> Result<()> {
        if pair.label != record.label() {
            return Err(EngineError::InvalidInput(format!(
                "pair label {:?} does not match record (isSameAnimal = {})",
                pair.label, record.is_same_animal
            )));
        }
        Ok(())
    }

    /// Append a pair; its label must agree with the record
    pub fn add(&mut self, pair: TrainingPair<B>, record: PairRecord) -> Result<()> {
        Self::check_label(&pair, &record)?;
        self.entries.push(StoredPair { pair, record });
        Ok(())
    }

    pub fn balance(&self) -> DataBalance {
        let positive = self
            .entries
            .iter()
            .filter(|entry| entry.pair.label.is_same())
            .count();
        DataBalance {
            positive,
            negative: self.entries.len() - positive,
            total: self.entries.len(),
        }
    }

    /// Drop every pair and its tensors. Safe to call on an empty store.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Replace the whole content. Nothing changes unless every pair is valid.
    pub fn replace(&mut self, pairs: Vec<(TrainingPair<B>, PairRecord)>) -> Result<()> {
        for (pair, record) in &pairs {
            Self::check_label(pair, record)?;
        }
        self.entries = pairs
            .into_iter()
            .map(|(pair, record)| StoredPair { pair, record })
            .collect();
        Ok(())
    }

    /// Persistable records, same order as the pairs
    pub fn snapshot(&self) -> Vec<PairRecord> {
        self.entries.iter().map(|entry| entry.record.clone()).collect()
    }

    pub fn pairs(&self) -> impl Iterator<Item = &TrainingPair<B>> {
        self.entries.iter().map(|entry| &entry.pair)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
