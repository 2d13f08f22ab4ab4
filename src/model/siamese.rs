//! Siamese network: one shared feature extractor applied to both images,
//! followed by a dense decision head.

use burn::{
    config::Config,
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu},
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use super::config::{LossKind, MetricKind, OptimizerKind, SiameseConfig};
use super::extractor::{push_linear, FeatureExtractor, FeatureExtractorConfig};
use super::topology::{LayerSpec, ModelTopology, WeightSpec};
use crate::utils::error::{self, EngineError};

/// Units of the three hidden dense layers of the head
pub const HEAD_UNITS: [usize; 3] = [256, 128, 64];

/// Configuration for the siamese network
#[derive(Config, Debug)]
pub struct SiameseNetworkConfig {
    /// Embedding size produced by the shared extractor
    pub feature_size: usize,

    #[config(default = "0.3")]
    pub dropout1: f64,

    #[config(default = "0.2")]
    pub dropout2: f64,
}

impl SiameseNetworkConfig {
    /// Build the head around an existing extractor
    pub fn init_with<B: Backend>(
        &self,
        feature_extractor: FeatureExtractor<B>,
        device: &B::Device,
    ) -> SiameseNetwork<B> {
        let [h1, h2, h3] = HEAD_UNITS;
        SiameseNetwork {
            feature_extractor,
            dense1: LinearConfig::new(self.feature_size * 2, h1).init(device),
            dropout1: DropoutConfig::new(self.dropout1).init(),
            dense2: LinearConfig::new(h1, h2).init(device),
            dropout2: DropoutConfig::new(self.dropout2).init(),
            dense3: LinearConfig::new(h2, h3).init(device),
            output: LinearConfig::new(h3, 1).init(device),
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SiameseNetwork<B> {
        let extractor = FeatureExtractorConfig::new(self.feature_size).init(device);
        self.init_with(extractor, device)
    }
}

/// Two-input same/different classifier
#[derive(Module, Debug)]
pub struct SiameseNetwork<B: Backend> {
    pub feature_extractor: FeatureExtractor<B>,
    pub dense1: Linear<B>,
    pub dropout1: Dropout,
    pub dense2: Linear<B>,
    pub dropout2: Dropout,
    pub dense3: Linear<B>,
    pub output: Linear<B>,
}

impl<B: Backend> SiameseNetwork<B> {
    /// Raw scores before the sigmoid, shape [batch_size, 1]
    pub fn forward_logits(&self, images_a: Tensor<B, 4>, images_b: Tensor<B, 4>) -> Tensor<B, 2> {
        let embedding_a = self.feature_extractor.forward(images_a);
        let embedding_b = self.feature_extractor.forward(images_b);
        let x = Tensor::cat(vec![embedding_a, embedding_b], 1);

        let relu = Relu::new();
        let x = self.dropout1.forward(relu.forward(self.dense1.forward(x)));
        let x = self.dropout2.forward(relu.forward(self.dense2.forward(x)));
        let x = relu.forward(self.dense3.forward(x));
        self.output.forward(x)
    }

    /// Same-animal probability, shape [batch_size, 1]
    pub fn forward(&self, images_a: Tensor<B, 4>, images_b: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward_logits(images_a, images_b))
    }

    pub fn feature_size(&self) -> usize {
        self.feature_extractor.feature_size()
    }

    pub fn topology(&self) -> ModelTopology {
        let config = SiameseNetworkConfig::new(self.feature_size());
        let [h1, h2, h3] = HEAD_UNITS;
        let layers = vec![
            LayerSpec::new("input_a", "input"),
            LayerSpec::new("input_b", "input"),
            LayerSpec::new("feature_extractor", "shared_model"),
            LayerSpec::new("concatenate", "concatenate"),
            LayerSpec::dense("dense1", h1, "relu"),
            LayerSpec::dropout("dropout1", config.dropout1),
            LayerSpec::dense("dense2", h2, "relu"),
            LayerSpec::dropout("dropout2", config.dropout2),
            LayerSpec::dense("dense3", h3, "relu"),
            LayerSpec::dense("output", 1, "sigmoid"),
        ];

        ModelTopology {
            class_name: "SiameseNetwork".to_string(),
            config: serde_json::to_value(&config).unwrap_or_default(),
            layers,
        }
    }

    /// Shared extractor parameters first, then the head
    pub fn weight_specs(&self) -> Vec<WeightSpec> {
        let mut specs: Vec<WeightSpec> = self
            .feature_extractor
            .weight_specs()
            .into_iter()
            .map(|spec| WeightSpec {
                name: format!("feature_extractor.{}", spec.name),
                ..spec
            })
            .collect();
        push_linear(&mut specs, "dense1", &self.dense1);
        push_linear(&mut specs, "dense2", &self.dense2);
        push_linear(&mut specs, "dense3", &self.dense3);
        push_linear(&mut specs, "output", &self.output);
        specs
    }
}

/// How a compiled model is trained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSpec {
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
    pub loss: LossKind,
    pub metrics: Vec<MetricKind>,
}

impl TrainingSpec {
    pub fn from_config(config: &SiameseConfig) -> Self {
        Self {
            optimizer: config.optimizer,
            learning_rate: config.learning_rate,
            loss: config.loss,
            metrics: config.metrics.clone(),
        }
    }
}

/// Siamese network ready for training and comparison
#[derive(Debug, Clone)]
pub struct CompiledSiamese<B: Backend> {
    pub network: SiameseNetwork<B>,
    pub spec: TrainingSpec,
}

impl<B: Backend> CompiledSiamese<B> {
    pub fn feature_extractor(&self) -> &FeatureExtractor<B> {
        &self.network.feature_extractor
    }
}

/// Assemble and compile the siamese model around `feature_extractor`
pub fn build_siamese_model<B: Backend>(
    config: &SiameseConfig,
    feature_extractor: FeatureExtractor<B>,
) -> error::Result<CompiledSiamese<B>> {
    let feature_size = feature_extractor.feature_size();
    if feature_size != config.feature_size {
        return Err(EngineError::InitializationFailed(format!(
            "feature extractor produces {} features, configuration expects {}",
            feature_size, config.feature_size
        )));
    }

    let device = feature_extractor.embedding.weight.val().device();
    let network = SiameseNetworkConfig::new(feature_size).init_with(feature_extractor, &device);

    tracing::debug!(
        "Compiled siamese model: {} parameters, optimizer {}, lr {}",
        network.num_params(),
        config.optimizer,
        config.learning_rate
    );

    Ok(CompiledSiamese {
        network,
        spec: TrainingSpec::from_config(config),
    })
}

/// Lifecycle of the engine's model slot
#[derive(Debug, Default)]
pub enum ModelState<B: Backend> {
    #[default]
    Uninitialized,
    Building,
    Compiled(CompiledSiamese<B>),
}

impl<B: Backend> ModelState<B> {
    pub fn compiled(&self) -> Option<&CompiledSiamese<B>> {
        match self {
            ModelState::Compiled(model) => Some(model),
            _ => None,
        }
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self, ModelState::Compiled(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelState::Uninitialized => "uninitialized",
            ModelState::Building => "building",
            ModelState::Compiled(_) => "compiled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::extractor::build_feature_extractor;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn small_config() -> SiameseConfig {
        SiameseConfig {
            image_size: 16,
            feature_size: 8,
            ..Default::default()
        }
    }

    fn compiled() -> CompiledSiamese<TestBackend> {
        let device = Default::default();
        let config = small_config();
        let extractor = build_feature_extractor::<TestBackend>(&config, &device).unwrap();
        build_siamese_model(&config, extractor).unwrap()
    }

    #[test]
    fn test_output_is_probability() {
        let device = Default::default();
        let model = compiled();
        let a = Tensor::<TestBackend, 4>::random([3, 16, 16, 3], Distribution::Normal(0.0, 1.0), &device);
        let b = Tensor::<TestBackend, 4>::random([3, 16, 16, 3], Distribution::Normal(0.0, 1.0), &device);

        let scores = model.network.forward(a, b);
        assert_eq!(scores.dims(), [3, 1]);
        let values: Vec<f32> = scores.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_extractor_is_shared_between_inputs() {
        let device = Default::default();
        let model = compiled();
        let image = Tensor::<TestBackend, 4>::random([1, 16, 16, 3], Distribution::Default, &device);

        let from_network = model.network.feature_extractor.forward(image.clone());
        let from_slot = model.feature_extractor().forward(image);
        let a: Vec<f32> = from_network.into_data().to_vec().unwrap();
        let b: Vec<f32> = from_slot.into_data().to_vec().unwrap();
        assert_eq!(a, b);

        // Only one copy of the extractor's parameters
        let head: usize = [256 * 16 + 256, 256 * 128 + 128, 128 * 64 + 64, 64 + 1].iter().sum();
        assert_eq!(
            model.network.num_params(),
            model.feature_extractor().num_params() + head
        );
    }

    #[test]
    fn test_feature_size_mismatch_rejected() {
        let device = Default::default();
        let extractor = build_feature_extractor::<TestBackend>(&small_config(), &device).unwrap();
        let config = SiameseConfig {
            feature_size: 32,
            ..small_config()
        };
        let err = build_siamese_model(&config, extractor).unwrap_err();
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn test_weight_specs_prefix_extractor() {
        let model = compiled();
        let specs = model.network.weight_specs();
        assert_eq!(specs[0].name, "feature_extractor.block1.conv.weight");
        assert_eq!(specs.last().unwrap().name, "output.bias");
        let total: usize = specs.iter().map(WeightSpec::num_elements).sum();
        assert_eq!(total, model.network.num_params());
    }

    #[test]
    fn test_compilation_attaches_training_spec() {
        let model = compiled();
        assert_eq!(model.spec.optimizer, OptimizerKind::Adam);
        assert_eq!(model.spec.learning_rate, 1e-4);
        assert_eq!(model.spec.metrics, vec![MetricKind::Accuracy]);
    }

    #[test]
    fn test_model_state_labels() {
        let mut state: ModelState<TestBackend> = ModelState::default();
        assert_eq!(state.label(), "uninitialized");
        assert!(state.compiled().is_none());
        state = ModelState::Compiled(compiled());
        assert!(state.is_compiled());
    }
}
