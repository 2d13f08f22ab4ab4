//! Engine context
//!
//! [`SiameseEngine`] owns everything the comparison workflow shares: the
//! configuration, the compiled model slot, the training pair store, the
//! tensor ledger and the event bus. Create one per application (or per test)
//! and pass it around; there is no global state.
//!
//! Locks are only held for short synchronous sections, never across an
//! `.await`.

pub mod events;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::broadcast;

use crate::dataset::pairs::{DataBalance, PairRecord, TrainingPair, TrainingPairStore};
use crate::dataset::preprocess::{ImageSource, Preprocessor};
use crate::dataset::tensor::TensorLedger;
use crate::inference::comparison::{score_pair, ComparisonResult};
use crate::inference::COMPARISON_IMAGE_COUNT;
use crate::model::config::{ConfigOverrides, SiameseConfig};
use crate::model::extractor::build_feature_extractor;
use crate::model::siamese::{build_siamese_model, CompiledSiamese, ModelState};
use crate::persistence::codec::{export_model, import_model, ExportDocument, ExportStats};
use crate::persistence::rehydrate::{rehydrate_pairs, FileFetcher, ImageFetcher};
use crate::persistence::store::{load_pair_records, save_pair_records, KeyValueStore, MemoryStore};
use crate::training::fit::{fit, FitOptions, PairBatch};
use crate::training::orchestrator::{check_balance, TrainingOrchestrator, TrainingStatus};
use crate::training::TrainingReport;
use crate::utils::error::{EngineError, Result};

pub use events::{EngineEvent, EventBus, StatusKind};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shared state of the siamese comparison workflow
pub struct SiameseEngine<B: AutodiffBackend> {
    config: RwLock<SiameseConfig>,
    model: Mutex<ModelState<B>>,
    pairs: Mutex<TrainingPairStore<B>>,
    ledger: TensorLedger,
    orchestrator: TrainingOrchestrator,
    events: EventBus,
    comparisons: AtomicU64,
    rng: Mutex<ChaCha8Rng>,
    kv: Box<dyn KeyValueStore>,
    fetcher: Box<dyn ImageFetcher>,
    device: B::Device,
}

impl<B: AutodiffBackend> SiameseEngine<B> {
    /// Engine with an in-memory key/value store and a local file fetcher
    pub fn new(config: SiameseConfig, device: B::Device) -> Result<Self> {
        config.validate()?;
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Ok(Self {
            config: RwLock::new(config),
            model: Mutex::new(ModelState::Uninitialized),
            pairs: Mutex::new(TrainingPairStore::new()),
            ledger: TensorLedger::new(),
            orchestrator: TrainingOrchestrator::new(),
            events: EventBus::new(),
            comparisons: AtomicU64::new(0),
            rng: Mutex::new(rng),
            kv: Box::new(MemoryStore::new()),
            fetcher: Box::new(FileFetcher::new()),
            device,
        })
    }

    pub fn with_store(mut self, store: impl KeyValueStore + 'static) -> Self {
        self.kv = Box::new(store);
        self
    }

    pub fn with_fetcher(mut self, fetcher: impl ImageFetcher + 'static) -> Self {
        self.fetcher = Box::new(fetcher);
        self
    }

    pub fn config(&self) -> SiameseConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_config(&self, config: SiameseConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }

    pub fn training_status(&self) -> TrainingStatus {
        self.orchestrator.status()
    }

    pub fn model_state(&self) -> &'static str {
        lock(&self.model).label()
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.model).is_compiled()
    }

    pub fn comparison_count(&self) -> u64 {
        self.comparisons.load(Ordering::SeqCst)
    }

    fn preprocessor(&self, config: &SiameseConfig) -> Preprocessor {
        Preprocessor::from_config(config, self.ledger.clone())
    }

    // ------------------------------------------------------------------
    // Model lifecycle
    // ------------------------------------------------------------------

    /// Build and compile the model; fails if it already exists
    pub async fn initialize(&self) -> Result<()> {
        self.build_model()
    }

    fn build_model(&self) -> Result<()> {
        {
            let mut state = lock(&self.model);
            if !matches!(*state, ModelState::Uninitialized) {
                return Err(EngineError::AlreadyInitialized);
            }
            *state = ModelState::Building;
        }

        let config = self.config();
        self.events.status(StatusKind::Initializing, "Building siamese model");

        let built = build_feature_extractor::<B>(&config, &self.device)
            .and_then(|extractor| build_siamese_model(&config, extractor));

        let mut state = lock(&self.model);
        match built {
            Ok(model) => {
                *state = ModelState::Compiled(model);
                self.events.status(StatusKind::Initializing, "Model ready");
                Ok(())
            }
            Err(e) => {
                *state = ModelState::Uninitialized;
                tracing::warn!("Model initialization failed: {}", e);
                Err(e)
            }
        }
    }

    /// Lazily initialize; an existing model is fine
    fn ensure_initialized(&self) -> Result<()> {
        match self.build_model() {
            Ok(()) | Err(EngineError::AlreadyInitialized) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn compiled(&self) -> Option<CompiledSiamese<B>> {
        lock(&self.model).compiled().cloned()
    }

    // ------------------------------------------------------------------
    // Training pairs
    // ------------------------------------------------------------------

    /// Preprocess both images (augmented when enabled) and store the pair
    pub async fn add_pair(
        &self,
        image1: &ImageSource,
        image2: &ImageSource,
        record: PairRecord,
    ) -> Result<DataBalance> {
        if self.orchestrator.is_training() {
            return Err(EngineError::TrainingInProgress);
        }
        let config = self.config();
        let preprocessor = self.preprocessor(&config);

        let (tensor1, tensor2) = {
            let mut rng = lock(&self.rng);
            let augment = config.augmentation;
            let tensor1 = preprocessor.preprocess::<B, _>(image1, augment, &mut *rng, &self.device)?;
            let tensor2 = preprocessor.preprocess::<B, _>(image2, augment, &mut *rng, &self.device)?;
            (tensor1, tensor2)
        };

        let pair = TrainingPair::new(tensor1, tensor2, record.label());
        let balance = {
            let mut pairs = lock(&self.pairs);
            pairs.add(pair, record)?;
            pairs.balance()
        };

        self.events.status(
            StatusKind::Adding,
            format!(
                "Pair added ({} same / {} different)",
                balance.positive, balance.negative
            ),
        );
        Ok(balance)
    }

    /// Fetch both images of `record` through the configured fetcher and add the pair
    pub async fn add_pair_from_record(&self, record: PairRecord) -> Result<DataBalance> {
        let image1 = self.fetcher.fetch(&record.image1_url)?;
        let image2 = self.fetcher.fetch(&record.image2_url)?;
        self.add_pair(&image1, &image2, record).await
    }

    pub fn balance(&self) -> DataBalance {
        lock(&self.pairs).balance()
    }

    pub fn pair_records(&self) -> Vec<PairRecord> {
        lock(&self.pairs).snapshot()
    }

    /// Drop every pair and the persisted snapshot
    pub async fn reset(&self) -> Result<()> {
        if self.orchestrator.is_training() {
            return Err(EngineError::TrainingInProgress);
        }
        lock(&self.pairs).clear();
        let key = self.config().storage_key;
        self.kv.remove(&key)?;
        self.events.status(StatusKind::Storage, "Training pairs cleared");
        Ok(())
    }

    /// Persist the pair-list snapshot under the configured key
    pub async fn save_pairs(&self) -> Result<usize> {
        let records = self.pair_records();
        let key = self.config().storage_key;
        save_pair_records(self.kv.as_ref(), &key, &records)?;
        self.events.status(
            StatusKind::Storage,
            format!("Saved {} training pairs", records.len()),
        );
        Ok(records.len())
    }

    /// Replace the in-memory pairs with the persisted snapshot
    pub async fn restore_pairs(&self) -> Result<usize> {
        let key = self.config().storage_key;
        let records = load_pair_records(self.kv.as_ref(), &key)?
            .ok_or(EngineError::NoStoredPairs(key))?;
        self.rehydrate(&records)
    }

    fn rehydrate(&self, records: &[PairRecord]) -> Result<usize> {
        if self.orchestrator.is_training() {
            return Err(EngineError::TrainingInProgress);
        }
        let config = self.config();
        let preprocessor = self.preprocessor(&config);
        let restored =
            rehydrate_pairs::<B>(records, self.fetcher.as_ref(), &preprocessor, &self.device)?;
        let count = restored.len();
        lock(&self.pairs).replace(restored)?;

        self.events.status(
            StatusKind::Storage,
            format!("Restored {} training pairs", count),
        );
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Training
    // ------------------------------------------------------------------

    /// Run the guards, then fit on every stored pair.
    ///
    /// The network is trained as a copy and committed at the end, so
    /// comparisons made meanwhile use the previous weights.
    pub async fn start_training(&self, overrides: Option<&ConfigOverrides>) -> Result<TrainingReport> {
        let config = match overrides {
            Some(overrides) => self.config().with_overrides(overrides),
            None => self.config(),
        };
        config.validate()?;

        let pair_count = lock(&self.pairs).len();
        let run = self.orchestrator.begin(pair_count, &config)?;
        self.events.status(StatusKind::Training, "Checking training preconditions");

        if let Err(e) = self.ensure_initialized() {
            let error = match e {
                EngineError::InitializationFailed(_) => e,
                other => EngineError::InitializationFailed(other.to_string()),
            };
            return Err(run.reject(error));
        }
        let Some(model) = self.compiled() else {
            return Err(run.reject(EngineError::InitializationFailed(
                "model unavailable after initialization".to_string(),
            )));
        };

        let balance = self.balance();
        if let Err(e) = check_balance(&balance, &config) {
            tracing::warn!("{}", e);
            return Err(run.reject(e));
        }

        let batch = {
            let pairs = lock(&self.pairs);
            PairBatch::from_pairs(pairs.pairs(), &self.ledger)
        };
        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => return Err(run.fail(e)),
        };

        self.events.status(
            StatusKind::Training,
            format!(
                "Training on {} pairs for {} epochs",
                batch.len(),
                config.epochs
            ),
        );

        let started = Instant::now();
        let spec = model.spec.clone();
        let options = FitOptions::from_config(&config, &spec);
        let result = fit(model.network, &spec, &batch, &options, |progress| {
            run.set_epoch(progress.epoch, progress.total_epochs);
            self.events.epoch(progress);
        })
        .await;
        drop(batch);

        let (network, history) = match result {
            Ok(trained) => trained,
            Err(e) => {
                let error = match e {
                    EngineError::Training(_) => e,
                    other => EngineError::Training(other.to_string()),
                };
                return Err(run.fail(error));
            }
        };

        *lock(&self.model) = ModelState::Compiled(CompiledSiamese { network, spec });
        run.complete(history.epochs.len());

        let report = TrainingReport {
            pair_count: balance.total,
            duration_secs: started.elapsed().as_secs_f64(),
            history,
        };
        self.events.status(
            StatusKind::Done,
            format!(
                "Training complete, accuracy {:.1}%",
                report.history.final_accuracy() * 100.0
            ),
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Comparison
    // ------------------------------------------------------------------

    /// Compare exactly two images with the committed model
    pub async fn compare(&self, images: &[ImageSource]) -> Result<ComparisonResult> {
        self.compare_with_threshold(images, None).await
    }

    pub async fn compare_with_threshold(
        &self,
        images: &[ImageSource],
        threshold: Option<f32>,
    ) -> Result<ComparisonResult> {
        if let Err(e) = self.ensure_initialized() {
            tracing::warn!("Lazy initialization failed: {}", e);
        }
        let network = self
            .compiled()
            .ok_or(EngineError::NotInitialized)?
            .network
            .valid();

        if images.len() != COMPARISON_IMAGE_COUNT {
            return Err(EngineError::InvalidImageCount(images.len()));
        }

        let config = self.config();
        let threshold = threshold.unwrap_or(config.prediction_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EngineError::InvalidInput(format!(
                "threshold {} outside [0, 1]",
                threshold
            )));
        }

        self.events.status(StatusKind::Comparison, "Comparing images");
        let tensors = self
            .preprocessor(&config)
            .preprocess_batch::<B::InnerBackend>(images, &self.device)?;
        let score = score_pair(&network, &tensors[0], &tensors[1], &self.ledger)?;
        drop(tensors);

        self.comparisons.fetch_add(1, Ordering::SeqCst);
        let result = ComparisonResult::from_score(score, threshold);
        self.events.status(
            StatusKind::Done,
            format!(
                "Score {:.3}: {} (confidence {:.2})",
                result.similarity_score,
                if result.same_animal { "same animal" } else { "different animals" },
                result.confidence
            ),
        );
        Ok(result)
    }

    /// Embedding of one image from the shared feature extractor
    pub async fn embed(&self, image: &ImageSource) -> Result<Vec<f32>> {
        self.ensure_initialized()?;
        let extractor = self
            .compiled()
            .ok_or(EngineError::NotInitialized)?
            .network
            .valid()
            .feature_extractor;

        let config = self.config();
        let mut tensors = self
            .preprocessor(&config)
            .preprocess_batch::<B::InnerBackend>(std::slice::from_ref(image), &self.device)?;
        let tensor = tensors.pop().ok_or(EngineError::Inference("no tensor".to_string()))?;
        Ok(extractor.embed(&tensor))
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Export the compiled model; the pair snapshot is saved alongside
    pub async fn export_model(&self) -> Result<ExportDocument> {
        let model = self.compiled().ok_or(EngineError::NotInitialized)?;
        let config = self.config();
        let stats = ExportStats {
            training_pairs: lock(&self.pairs).len(),
            comparisons: self.comparison_count(),
        };

        let document = export_model(&model, &config, stats)?;
        self.save_pairs().await?;
        self.events.status(StatusKind::Storage, "Model exported");
        Ok(document)
    }

    /// Replace the model with an imported one, then restore stored pairs if any.
    ///
    /// Returns the number of rehydrated pairs.
    pub async fn import_model(&self, document: &ExportDocument) -> Result<usize> {
        if self.orchestrator.is_training() {
            return Err(EngineError::TrainingInProgress);
        }

        let mut config = self.config();
        let previous_size = config.image_size;
        let model = import_model::<B>(document, &mut config, &self.device)?;
        config.validate()?;
        let key = config.storage_key.clone();
        let resized = config.image_size != previous_size;
        self.set_config(config);
        *lock(&self.model) = ModelState::Compiled(model);
        self.events.status(StatusKind::Storage, "Model imported");

        // Stored tensors were preprocessed for the old input size
        if resized {
            let mut pairs = lock(&self.pairs);
            if !pairs.is_empty() {
                tracing::warn!(
                    "Input size changed from {}, dropping {} in-memory pairs",
                    previous_size,
                    pairs.len()
                );
                pairs.clear();
            }
        }

        match load_pair_records(self.kv.as_ref(), &key)? {
            Some(records) => self.rehydrate(&records),
            None => {
                tracing::info!("No stored training pairs under '{}'", key);
                Ok(0)
            }
        }
    }
}
