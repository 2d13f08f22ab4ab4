//! Pair comparison: similarity score → verdict and confidence

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::dataset::tensor::{ImageTensor, TensorLedger};
use crate::model::siamese::SiameseNetwork;
use crate::utils::error::{EngineError, Result};

/// Outcome of comparing two pet photos
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    /// Sigmoid output of the siamese network, in [0, 1]
    pub similarity_score: f32,
    /// `similarity_score > threshold`
    pub same_animal: bool,
    /// Distance from the undecided midpoint, `|score - 0.5| * 2`
    pub confidence: f32,
}

impl ComparisonResult {
    pub fn from_score(score: f32, threshold: f32) -> Self {
        Self {
            similarity_score: score,
            same_animal: score > threshold,
            confidence: (score - 0.5).abs() * 2.0,
        }
    }
}

/// Run the network on one preprocessed pair and read back the score
///
/// The output tensor is tracked like every other tensor and released before
/// returning.
pub fn score_pair<B: Backend>(
    network: &SiameseNetwork<B>,
    image1: &ImageTensor<B>,
    image2: &ImageTensor<B>,
    ledger: &TensorLedger,
) -> Result<f32> {
    let output = ledger.track(network.forward(image1.tensor().clone(), image2.tensor().clone()));
    let score = output
        .to_vec()
        .first()
        .copied()
        .ok_or_else(|| EngineError::Inference("Model returned no score".to_string()))?;

    if !score.is_finite() {
        return Err(EngineError::Inference(format!("Non-finite score {}", score)));
    }
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::siamese::SiameseNetworkConfig;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-6, "{} != {}", a, b);
    }

    #[test]
    fn test_verdict_table() {
        let high = ComparisonResult::from_score(0.85, 0.7);
        assert!(high.same_animal);
        assert_close(high.confidence, 0.70);

        let low = ComparisonResult::from_score(0.3, 0.7);
        assert!(!low.same_animal);
        assert_close(low.confidence, 0.40);

        let undecided = ComparisonResult::from_score(0.5, 0.7);
        assert!(!undecided.same_animal);
        assert_close(undecided.confidence, 0.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(!ComparisonResult::from_score(0.7, 0.7).same_animal);
        assert!(ComparisonResult::from_score(0.6, 0.5).same_animal);
    }

    #[test]
    fn test_score_pair_releases_output() {
        let device = Default::default();
        let ledger = TensorLedger::new();
        let network = SiameseNetworkConfig::new(4).init::<TestBackend>(&device);

        let a = ledger.track(Tensor::<TestBackend, 4>::zeros([1, 8, 8, 3], &device));
        let b = ledger.track(Tensor::<TestBackend, 4>::ones([1, 8, 8, 3], &device));
        let score = score_pair(&network, &a, &b, &ledger).unwrap();

        assert!((0.0..=1.0).contains(&score));
        assert_eq!(ledger.live(), 2);
        drop((a, b));
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_result_json_field_names() {
        let json = serde_json::to_value(ComparisonResult::from_score(0.9, 0.7)).unwrap();
        assert!(json.get("similarityScore").is_some());
        assert_eq!(json["sameAnimal"], true);
    }
}
