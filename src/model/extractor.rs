//! Convolutional feature extractor
//!
//! Maps an NHWC image batch to a tanh-bounded embedding. The same instance is
//! applied to both inputs of the siamese network.

use burn::{
    config::Config,
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::tanh, backend::Backend, Tensor},
};

use super::config::SiameseConfig;
use super::topology::{LayerSpec, ModelTopology, WeightSpec};
use crate::dataset::tensor::ImageTensor;
use crate::utils::error::{self, EngineError};

/// Filters of the four convolution blocks
pub const CONV_FILTERS: [usize; 4] = [32, 64, 128, 256];
/// Dropout after conv blocks 1-3
pub const CONV_DROPOUT: [f64; 3] = [0.10, 0.15, 0.20];
/// Units of the hidden dense layer
pub const DENSE_UNITS: usize = 512;
/// Dropout after the hidden dense layer
pub const DENSE_DROPOUT: f64 = 0.30;

/// Smallest input edge that survives three 2×2 poolings
pub const MIN_IMAGE_SIZE: usize = 8;

/// Configuration for the feature extractor
#[derive(Config, Debug)]
pub struct FeatureExtractorConfig {
    /// Embedding dimensionality
    pub feature_size: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,
}

impl FeatureExtractorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FeatureExtractor<B> {
        let [f1, f2, f3, f4] = CONV_FILTERS;
        FeatureExtractor {
            block1: ConvBlock::new(self.in_channels, f1, Some(CONV_DROPOUT[0]), device),
            block2: ConvBlock::new(f1, f2, Some(CONV_DROPOUT[1]), device),
            block3: ConvBlock::new(f2, f3, Some(CONV_DROPOUT[2]), device),
            block4: ConvBlock::new(f3, f4, None, device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dense: LinearConfig::new(f4, DENSE_UNITS).init(device),
            dropout: DropoutConfig::new(DENSE_DROPOUT).init(),
            embedding: LinearConfig::new(DENSE_UNITS, self.feature_size).init(device),
        }
    }
}

/// Conv 3×3 (same) + ReLU, optionally followed by 2×2 max-pool and dropout
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub relu: Relu,
    pub pool: Option<MaxPool2d>,
    pub dropout: Option<Dropout>,
}

impl<B: Backend> ConvBlock<B> {
    /// Blocks with a dropout rate also pool; the last block does neither
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        dropout: Option<f64>,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        let pool = dropout.map(|_| MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init());

        Self {
            conv,
            relu: Relu::new(),
            pool,
            dropout: dropout.map(|rate| DropoutConfig::new(rate).init()),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.relu.forward(x);
        let x = match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        };
        match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        }
    }

    fn weight_specs(&self, prefix: &str, specs: &mut Vec<WeightSpec>) {
        push_param(specs, &format!("{}.conv.weight", prefix), &self.conv.weight);
        if let Some(bias) = &self.conv.bias {
            push_param(specs, &format!("{}.conv.bias", prefix), bias);
        }
    }
}

/// Image → embedding network
///
/// Architecture:
/// - 4 conv blocks with 32/64/128/256 filters
/// - max-pool + dropout (0.10/0.15/0.20) after blocks 1-3
/// - global average pooling
/// - dense 512 ReLU → dropout 0.30 → dense `feature_size` tanh
#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    pub block1: ConvBlock<B>,
    pub block2: ConvBlock<B>,
    pub block3: ConvBlock<B>,
    pub block4: ConvBlock<B>,
    pub global_pool: AdaptiveAvgPool2d,
    pub dense: Linear<B>,
    pub dropout: Dropout,
    pub embedding: Linear<B>,
}

impl<B: Backend> FeatureExtractor<B> {
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, height, width, 3]
    ///
    /// # Returns
    /// * Embeddings of shape [batch_size, feature_size], values in (-1, 1)
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        // NHWC -> NCHW
        let x = x.permute([0, 3, 1, 2]);

        let x = self.block1.forward(x);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);
        let x = self.block4.forward(x);

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dense.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout.forward(x);
        tanh(self.embedding.forward(x))
    }

    /// Embedding of a single preprocessed image as plain values
    pub fn embed(&self, image: &ImageTensor<B>) -> Vec<f32> {
        let embedding = self.forward(image.tensor().clone());
        embedding
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap_or_default()
    }

    /// Embedding dimensionality
    pub fn feature_size(&self) -> usize {
        self.embedding.weight.val().dims()[1]
    }

    pub fn topology(&self) -> ModelTopology {
        let config = FeatureExtractorConfig::new(self.feature_size());
        let mut layers = Vec::new();
        for (i, filters) in CONV_FILTERS.iter().enumerate() {
            layers.push(LayerSpec::conv(&format!("block{}.conv", i + 1), *filters));
            if let Some(rate) = CONV_DROPOUT.get(i) {
                layers.push(LayerSpec::new(&format!("block{}.pool", i + 1), "max_pool2d"));
                layers.push(LayerSpec::dropout(&format!("block{}.dropout", i + 1), *rate));
            }
        }
        layers.push(LayerSpec::new("global_pool", "global_average_pool2d"));
        layers.push(LayerSpec::dense("dense", DENSE_UNITS, "relu"));
        layers.push(LayerSpec::dropout("dropout", DENSE_DROPOUT));
        layers.push(LayerSpec::dense("embedding", self.feature_size(), "tanh"));

        ModelTopology {
            class_name: "FeatureExtractor".to_string(),
            config: serde_json::to_value(&config).unwrap_or_default(),
            layers,
        }
    }

    /// Parameter shapes in a stable order
    pub fn weight_specs(&self) -> Vec<WeightSpec> {
        let mut specs = Vec::new();
        self.block1.weight_specs("block1", &mut specs);
        self.block2.weight_specs("block2", &mut specs);
        self.block3.weight_specs("block3", &mut specs);
        self.block4.weight_specs("block4", &mut specs);
        push_linear(&mut specs, "dense", &self.dense);
        push_linear(&mut specs, "embedding", &self.embedding);
        specs
    }
}

pub(crate) fn push_param<B: Backend, const D: usize>(
    specs: &mut Vec<WeightSpec>,
    name: &str,
    param: &Param<Tensor<B, D>>,
) {
    specs.push(WeightSpec::float32(name, &param.val().dims()));
}

pub(crate) fn push_linear<B: Backend>(specs: &mut Vec<WeightSpec>, name: &str, linear: &Linear<B>) {
    push_param(specs, &format!("{}.weight", name), &linear.weight);
    if let Some(bias) = &linear.bias {
        push_param(specs, &format!("{}.bias", name), bias);
    }
}

/// Build the extractor for a configuration, rejecting unusable settings
pub fn build_feature_extractor<B: Backend>(
    config: &SiameseConfig,
    device: &B::Device,
) -> error::Result<FeatureExtractor<B>> {
    if config.feature_size == 0 {
        return Err(EngineError::InitializationFailed(
            "feature_size must be greater than 0".to_string(),
        ));
    }
    if config.image_size < MIN_IMAGE_SIZE {
        return Err(EngineError::InitializationFailed(format!(
            "image_size {} is below the minimum of {}",
            config.image_size, MIN_IMAGE_SIZE
        )));
    }

    Ok(FeatureExtractorConfig::new(config.feature_size).init(device))
}
