//! Fit loop for the siamese network
//!
//! Builds one batched view of the stored pairs, holds out the tail for
//! validation, then runs shuffled mini-batch epochs with the optimizer chosen
//! at compilation. Each epoch ends with a progress callback and a cooperative
//! yield so the rest of the engine stays responsive.

use burn::{
    module::AutodiffModule,
    nn::loss::BinaryCrossEntropyLossConfig,
    optim::{AdamConfig, AdamWConfig, GradientsParams, Optimizer, SgdConfig},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Numeric, Tensor, TensorData,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::pairs::TrainingPair;
use crate::dataset::tensor::{TensorLedger, Tracked};
use crate::model::config::{OptimizerKind, SiameseConfig};
use crate::model::siamese::{SiameseNetwork, TrainingSpec};
use crate::utils::error::{EngineError, Result};
use crate::utils::logging::TrainingLogger;

/// Metrics of one finished epoch (1-indexed)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochProgress {
    pub epoch: usize,
    pub total_epochs: usize,
    pub loss: f64,
    pub accuracy: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_accuracy: Option<f64>,
}

/// Per-epoch metrics of a whole run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochProgress>,
}

impl TrainingHistory {
    pub fn last(&self) -> Option<&EpochProgress> {
        self.epochs.last()
    }

    pub fn final_accuracy(&self) -> f64 {
        self.last().map(|e| e.accuracy).unwrap_or(0.0)
    }
}

/// Hyperparameters of one fit call
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f64,
    pub learning_rate: f64,
    pub seed: u64,
}

impl FitOptions {
    pub fn from_config(config: &SiameseConfig, spec: &TrainingSpec) -> Self {
        Self {
            epochs: config.epochs,
            batch_size: config.batch_size,
            validation_split: config.validation_split,
            learning_rate: spec.learning_rate,
            seed: config.seed,
        }
    }
}

/// All stored pairs stacked along the batch dimension
///
/// `images_a`/`images_b` are `[N, H, W, 3]`, `labels` is `[N, 1]`. The tensors
/// are fresh concatenations, so dropping the batch never touches the store.
#[derive(Debug)]
pub struct PairBatch<B: Backend> {
    pub images_a: Tracked<B, 4>,
    pub images_b: Tracked<B, 4>,
    pub labels: Tracked<B, 2>,
}

impl<B: Backend> PairBatch<B> {
    pub fn from_pairs<'a, I>(pairs: I, ledger: &TensorLedger) -> Result<Self>
    where
        I: IntoIterator<Item = &'a TrainingPair<B>>,
        B: 'a,
    {
        let mut images_a = Vec::new();
        let mut images_b = Vec::new();
        let mut labels = Vec::new();
        for pair in pairs {
            images_a.push(pair.image1.tensor().clone());
            images_b.push(pair.image2.tensor().clone());
            labels.push(pair.label.as_f32());
        }

        if labels.is_empty() {
            return Err(EngineError::Training("No pairs to batch".to_string()));
        }

        let dims = images_a[0].dims();
        if images_a.iter().chain(&images_b).any(|t| t.dims() != dims) {
            return Err(EngineError::Training(
                "stored pairs have mixed image sizes".to_string(),
            ));
        }

        let device = images_a[0].device();
        let count = labels.len();
        let labels = Tensor::<B, 2>::from_floats(TensorData::new(labels, [count, 1]), &device);

        Ok(Self {
            images_a: ledger.track(Tensor::cat(images_a, 0)),
            images_b: ledger.track(Tensor::cat(images_b, 0)),
            labels: ledger.track(labels),
        })
    }

    pub fn len(&self) -> usize {
        self.labels.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keras-style split: the first `floor(n * (1 - split))` samples train and
/// the rest are held out, keeping at least one sample for training
pub fn split_indices(count: usize, validation_split: f64) -> (Vec<usize>, Vec<usize>) {
    let boundary = ((count as f64) * (1.0 - validation_split)).floor() as usize;
    let boundary = boundary.max(1).min(count);
    ((0..boundary).collect(), (boundary..count).collect())
}

fn select_rows<B, const D: usize, K>(tensor: &Tensor<B, D, K>, rows: &[usize]) -> Tensor<B, D, K>
where
    B: Backend,
    K: Numeric<B>,
{
    let device = tensor.device();
    let indices: Vec<i64> = rows.iter().map(|&i| i as i64).collect();
    let index = Tensor::<B, 1, Int>::from_data(TensorData::new(indices, [rows.len()]), &device);
    tensor.clone().select(0, index)
}

/// Number of rows where `logit > 0` agrees with the 0/1 target
fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2, Int>) -> usize {
    let predictions = logits.greater_elem(0.0).int();
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

/// Train `network` on `batch`, dispatching on the compiled optimizer
pub async fn fit<B, F>(
    network: SiameseNetwork<B>,
    spec: &TrainingSpec,
    batch: &PairBatch<B>,
    options: &FitOptions,
    on_epoch: F,
) -> Result<(SiameseNetwork<B>, TrainingHistory)>
where
    B: AutodiffBackend,
    F: FnMut(&EpochProgress),
{
    match spec.optimizer {
        OptimizerKind::Adam => {
            let optimizer = AdamConfig::new().init::<B, SiameseNetwork<B>>();
            fit_with(network, optimizer, batch, options, on_epoch).await
        }
        OptimizerKind::AdamW => {
            let optimizer = AdamWConfig::new().init::<B, SiameseNetwork<B>>();
            fit_with(network, optimizer, batch, options, on_epoch).await
        }
        OptimizerKind::Sgd => {
            let optimizer = SgdConfig::new().init::<B, SiameseNetwork<B>>();
            fit_with(network, optimizer, batch, options, on_epoch).await
        }
    }
}

async fn fit_with<B, O, F>(
    mut network: SiameseNetwork<B>,
    mut optimizer: O,
    batch: &PairBatch<B>,
    options: &FitOptions,
    mut on_epoch: F,
) -> Result<(SiameseNetwork<B>, TrainingHistory)>
where
    B: AutodiffBackend,
    O: Optimizer<SiameseNetwork<B>, B>,
    F: FnMut(&EpochProgress),
{
    if options.batch_size == 0 || options.epochs == 0 {
        return Err(EngineError::Training(
            "epochs and batch_size must be greater than 0".to_string(),
        ));
    }
    if batch.is_empty() {
        return Err(EngineError::Training("Empty training batch".to_string()));
    }

    let (train_rows, val_rows) = split_indices(batch.len(), options.validation_split);
    tracing::info!(
        "Fitting on {} pairs ({} validation), {} epochs, batch size {}",
        train_rows.len(),
        val_rows.len(),
        options.epochs,
        options.batch_size
    );

    let images_a = batch.images_a.tensor();
    let images_b = batch.images_b.tensor();
    let targets = batch.labels.tensor().clone().int();
    let device = images_a.device();
    let loss_fn = BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init(&device);

    let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
    let mut logger = TrainingLogger::new(options.epochs);
    let mut history = TrainingHistory::default();

    for epoch in 0..options.epochs {
        logger.start_epoch(epoch);

        let mut shuffled = train_rows.clone();
        shuffled.shuffle(&mut rng);

        let mut epoch_loss = 0.0f64;
        let mut correct = 0usize;
        let mut seen = 0usize;
        let num_batches = shuffled.len().div_ceil(options.batch_size);

        for rows in shuffled.chunks(options.batch_size) {
            let a = select_rows(images_a, rows);
            let b = select_rows(images_b, rows);
            let y = select_rows(&targets, rows);

            let logits = network.forward_logits(a, b);
            let loss = loss_fn.forward(logits.clone(), y.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(EngineError::Training(format!(
                    "Loss diverged at epoch {}",
                    epoch + 1
                )));
            }
            epoch_loss += loss_value * rows.len() as f64;
            correct += count_correct(logits.inner(), y.inner());
            seen += rows.len();

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &network);
            network = optimizer.step(options.learning_rate, network, grads);
        }

        let (val_loss, val_accuracy) = if val_rows.is_empty() {
            (None, None)
        } else {
            let (loss, accuracy) = evaluate(&network, batch, &val_rows);
            (Some(loss), Some(accuracy))
        };

        let progress = EpochProgress {
            epoch: epoch + 1,
            total_epochs: options.epochs,
            loss: epoch_loss / seen.max(1) as f64,
            accuracy: correct as f64 / seen.max(1) as f64,
            val_loss,
            val_accuracy,
        };
        tracing::debug!("Epoch {} ran {} batches", epoch + 1, num_batches);
        logger.end_epoch(progress.loss, progress.accuracy, progress.val_accuracy);
        on_epoch(&progress);
        history.epochs.push(progress);

        tokio::task::yield_now().await;
    }

    logger.log_complete(history.final_accuracy());
    Ok((network, history))
}

/// Loss and accuracy on the held-out rows with the inference model
fn evaluate<B: AutodiffBackend>(
    network: &SiameseNetwork<B>,
    batch: &PairBatch<B>,
    rows: &[usize],
) -> (f64, f64) {
    let model = network.valid();
    let a = select_rows(&batch.images_a.tensor().clone().inner(), rows);
    let b = select_rows(&batch.images_b.tensor().clone().inner(), rows);
    let y = select_rows(&batch.labels.tensor().clone().inner().int(), rows);

    let logits = model.forward_logits(a, b);
    let loss = BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init(&logits.device())
        .forward(logits.clone(), y.clone());
    let loss_value: f64 = loss.into_scalar().elem();
    let correct = count_correct(logits, y);

    (loss_value, correct as f64 / rows.len() as f64)
}
