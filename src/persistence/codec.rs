//! Export/import document for a trained siamese model
//!
//! The document carries both networks as `{modelTopology, weightSpecs,
//! weightData}` where `weightData` is the Burn named MessagePack record
//! serialized as a JSON array of bytes, plus metadata used to restore the configuration.

use std::path::Path;

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder},
    tensor::backend::Backend,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::model::config::SiameseConfig;
use crate::model::extractor::{FeatureExtractor, FeatureExtractorConfig, MIN_IMAGE_SIZE};
use crate::model::siamese::{CompiledSiamese, SiameseNetwork, SiameseNetworkConfig, TrainingSpec};
use crate::model::topology::{ModelTopology, WeightSpec};
use crate::utils::error::{EngineError, Result};

/// Name written into exported metadata
pub const MODEL_NAME: &str = "pet-siamese-network";

/// Descriptive fields of an export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub name: String,
    pub task_name: String,
    /// RFC 3339
    pub timestamp: String,
    pub image_size: usize,
    pub feature_size: usize,
    pub training_pairs_count: usize,
    pub comparison_count: u64,
}

/// One network: architecture, parameter shapes and raw record bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    pub model_topology: ModelTopology,
    #[serde(default)]
    pub weight_specs: Vec<WeightSpec>,
    pub weight_data: Vec<u8>,
}

/// Counters recorded alongside the weights
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub training_pairs: usize,
    pub comparisons: u64,
}

/// Complete export document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExportMetadata>,
    pub siamese_model: ModelArtifact,
    pub feature_extractor: ModelArtifact,
}

impl ExportDocument {
    /// Parse a document, reporting structural problems as `InvalidDocument`
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidDocument(format!("not JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        for part in ["siameseModel", "featureExtractor"] {
            let artifact = value
                .get(part)
                .filter(|v| v.is_object())
                .ok_or_else(|| EngineError::InvalidDocument(format!("missing {}", part)))?;
            for field in ["modelTopology", "weightData"] {
                if artifact.get(field).map_or(true, serde_json::Value::is_null) {
                    return Err(EngineError::InvalidDocument(format!(
                        "missing {}.{}",
                        part, field
                    )));
                }
            }
        }

        serde_json::from_value(value).map_err(|e| EngineError::InvalidDocument(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Burn record of `module` as bytes
pub fn encode_weights<B: Backend, M: Module<B>>(module: &M) -> Result<Vec<u8>> {
    let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<B>::record(&recorder, module.clone().into_record(), ())
        .map_err(|e| EngineError::Persistence(format!("Failed to encode weights: {:?}", e)))
}

/// Load record bytes into `module`
pub fn decode_weights<B: Backend, M: Module<B>>(
    module: M,
    bytes: Vec<u8>,
    device: &B::Device,
) -> Result<M> {
    let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
    let record = Recorder::<B>::load(&recorder, bytes, device)
        .map_err(|e| EngineError::InvalidDocument(format!("undecodable weight data: {:?}", e)))?;
    Ok(module.load_record(record))
}

/// Serialize a compiled model and its metadata
pub fn export_model<B: Backend>(
    model: &CompiledSiamese<B>,
    config: &SiameseConfig,
    stats: ExportStats,
) -> Result<ExportDocument> {
    let network = &model.network;
    let extractor = model.feature_extractor();

    let document = ExportDocument {
        metadata: Some(ExportMetadata {
            name: MODEL_NAME.to_string(),
            task_name: config.task_name.clone(),
            timestamp: Utc::now().to_rfc3339(),
            image_size: config.image_size,
            feature_size: network.feature_size(),
            training_pairs_count: stats.training_pairs,
            comparison_count: stats.comparisons,
        }),
        siamese_model: ModelArtifact {
            model_topology: network.topology(),
            weight_specs: network.weight_specs(),
            weight_data: encode_weights::<B, _>(network)?,
        },
        feature_extractor: ModelArtifact {
            model_topology: extractor.topology(),
            weight_specs: extractor.weight_specs(),
            weight_data: encode_weights::<B, _>(extractor)?,
        },
    };

    tracing::info!(
        "Exported model: {} + {} weight bytes",
        document.siamese_model.weight_data.len(),
        document.feature_extractor.weight_data.len()
    );
    Ok(document)
}

fn topology_config<C: serde::de::DeserializeOwned>(
    artifact: &ModelArtifact,
    class_name: &str,
) -> Result<C> {
    let topology = &artifact.model_topology;
    if topology.class_name != class_name {
        return Err(EngineError::InvalidDocument(format!(
            "expected {} topology, found {}",
            class_name, topology.class_name
        )));
    }
    serde_json::from_value(topology.config.clone())
        .map_err(|e| EngineError::InvalidDocument(format!("{} config: {}", class_name, e)))
}

fn check_specs(expected: &[WeightSpec], actual: &[WeightSpec], part: &str) -> Result<()> {
    if expected != actual {
        return Err(EngineError::InvalidDocument(format!(
            "{} weight specs do not match its topology",
            part
        )));
    }
    Ok(())
}

/// Decode `bytes` into a freshly initialized module, rejecting records whose
/// tensor shapes differ from what the topology builds
fn load_checked<B: Backend, M: Module<B>>(
    template: M,
    specs_of: impl Fn(&M) -> Vec<WeightSpec>,
    artifact: &ModelArtifact,
    part: &str,
    device: &B::Device,
) -> Result<M> {
    let built = specs_of(&template);
    let module = decode_weights(template, artifact.weight_data.clone(), device)?;
    check_specs(&built, &specs_of(&module), part)?;
    // Older exports may omit specs; the record itself is authoritative then
    if !artifact.weight_specs.is_empty() {
        check_specs(&artifact.weight_specs, &built, part)?;
    }
    Ok(module)
}

/// Rebuild a compiled model from a document.
///
/// Metadata is written back into `config` first so the rebuilt model and the
/// preprocessor agree on sizes.
pub fn import_model<B: Backend>(
    document: &ExportDocument,
    config: &mut SiameseConfig,
    device: &B::Device,
) -> Result<CompiledSiamese<B>> {
    if let Some(metadata) = &document.metadata {
        if metadata.image_size < MIN_IMAGE_SIZE {
            return Err(EngineError::InvalidDocument(format!(
                "imageSize {} is below the minimum of {}",
                metadata.image_size, MIN_IMAGE_SIZE
            )));
        }
        config.task_name = metadata.task_name.clone();
        config.image_size = metadata.image_size;
        config.feature_size = metadata.feature_size;
    }

    let extractor_config: FeatureExtractorConfig =
        topology_config(&document.feature_extractor, "FeatureExtractor")?;
    let network_config: SiameseNetworkConfig =
        topology_config(&document.siamese_model, "SiameseNetwork")?;

    if network_config.feature_size == 0 {
        return Err(EngineError::InvalidDocument("featureSize must be greater than 0".into()));
    }
    if extractor_config.feature_size != network_config.feature_size {
        return Err(EngineError::InvalidDocument(format!(
            "feature extractor emits {} features, siamese model expects {}",
            extractor_config.feature_size, network_config.feature_size
        )));
    }
    config.feature_size = network_config.feature_size;

    let extractor: FeatureExtractor<B> = load_checked(
        extractor_config.init(device),
        FeatureExtractor::weight_specs,
        &document.feature_extractor,
        "featureExtractor",
        device,
    )?;
    let network: SiameseNetwork<B> = load_checked(
        network_config.init(device),
        SiameseNetwork::weight_specs,
        &document.siamese_model,
        "siameseModel",
        device,
    )?;

    // The extractor artifact owns the shared slot
    let network = SiameseNetwork {
        feature_extractor: extractor,
        ..network
    };

    tracing::info!(
        "Imported model '{}' ({} parameters)",
        config.task_name,
        network.num_params()
    );

    Ok(CompiledSiamese {
        network,
        spec: TrainingSpec::from_config(config),
    })
}

/// Write a document as JSON
pub fn save_document(document: &ExportDocument, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, document.to_json()?)?;
    Ok(())
}

/// Read a document written by [`save_document`]
pub fn load_document(path: &Path) -> Result<ExportDocument> {
    if !path.exists() {
        return Err(EngineError::ModelNotFound(path.to_path_buf()));
    }
    let json = std::fs::read_to_string(path)?;
    ExportDocument::from_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::extractor::build_feature_extractor;
    use crate::model::siamese::build_siamese_model;
    use burn::tensor::{Distribution, Tensor};
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn small_config() -> SiameseConfig {
        SiameseConfig {
            image_size: 8,
            feature_size: 4,
            task_name: "codec-test".to_string(),
            ..Default::default()
        }
    }

    fn compiled(config: &SiameseConfig) -> CompiledSiamese<TestBackend> {
        let device = Default::default();
        let extractor = build_feature_extractor::<TestBackend>(config, &device).unwrap();
        build_siamese_model(config, extractor).unwrap()
    }

    fn scores(model: &CompiledSiamese<TestBackend>, a: &Tensor<TestBackend, 4>, b: &Tensor<TestBackend, 4>) -> Vec<f32> {
        model
            .network
            .forward(a.clone(), b.clone())
            .into_data()
            .to_vec()
            .unwrap()
    }

    #[test]
    fn test_export_import_preserves_scores() {
        let device = Default::default();
        let config = small_config();
        let model = compiled(&config);
        let stats = ExportStats { training_pairs: 6, comparisons: 2 };

        let document = export_model(&model, &config, stats).unwrap();
        let json = document.to_json().unwrap();

        let mut restored_config = SiameseConfig::default();
        let parsed = ExportDocument::from_json(&json).unwrap();
        let restored = import_model::<TestBackend>(&parsed, &mut restored_config, &device).unwrap();

        assert_eq!(restored_config.image_size, 8);
        assert_eq!(restored_config.feature_size, 4);
        assert_eq!(restored_config.task_name, "codec-test");

        let a = Tensor::random([2, 8, 8, 3], Distribution::Normal(0.0, 1.0), &device);
        let b = Tensor::random([2, 8, 8, 3], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(scores(&model, &a, &b), scores(&restored, &a, &b));
    }

    #[test]
    fn test_exact_field_names() {
        let config = small_config();
        let document = export_model(&compiled(&config), &config, ExportStats::default()).unwrap();
        let value = serde_json::to_value(&document).unwrap();

        let metadata = &value["metadata"];
        for key in [
            "name",
            "taskName",
            "timestamp",
            "imageSize",
            "featureSize",
            "trainingPairsCount",
            "comparisonCount",
        ] {
            assert!(metadata.get(key).is_some(), "missing metadata.{}", key);
        }
        for part in ["siameseModel", "featureExtractor"] {
            for key in ["modelTopology", "weightSpecs", "weightData"] {
                assert!(value[part].get(key).is_some(), "missing {}.{}", part, key);
            }
            assert!(value[part]["weightData"].as_array().unwrap().iter().all(|b| b.as_u64().unwrap() <= 255));
        }
        assert!(chrono::DateTime::parse_from_rfc3339(metadata["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_missing_parts_are_invalid_structure() {
        let err = ExportDocument::from_json(r#"{"siameseModel": {}}"#).unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(err.to_string().contains("Invalid structure"));

        let config = small_config();
        let document = export_model(&compiled(&config), &config, ExportStats::default()).unwrap();
        let mut value = serde_json::to_value(&document).unwrap();
        value["featureExtractor"]
            .as_object_mut()
            .unwrap()
            .remove("weightData");
        assert!(matches!(
            ExportDocument::from_value(value),
            Err(EngineError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_corrupt_weights_rejected() {
        let device = Default::default();
        let config = small_config();
        let mut document = export_model(&compiled(&config), &config, ExportStats::default()).unwrap();
        document.siamese_model.weight_data.truncate(16);

        let result = import_model::<TestBackend>(&document, &mut SiameseConfig::default(), &device);
        assert!(matches!(result, Err(EngineError::InvalidDocument(_))));

        let mut document = export_model(&compiled(&config), &config, ExportStats::default()).unwrap();
        document.feature_extractor.weight_data = vec![0xc1; 64];
        let result = import_model::<TestBackend>(&document, &mut SiameseConfig::default(), &device);
        assert_eq!(result.unwrap_err().status(), 400);
    }

    #[test]
    fn test_weights_from_other_feature_size_rejected() {
        let device = Default::default();
        let config = small_config();
        let mut document = export_model(&compiled(&config), &config, ExportStats::default()).unwrap();

        let wider = SiameseConfig { feature_size: 6, ..small_config() };
        let other = export_model(&compiled(&wider), &wider, ExportStats::default()).unwrap();
        document.feature_extractor.weight_data = other.feature_extractor.weight_data;
        document.feature_extractor.weight_specs.clear();

        let mut target = SiameseConfig::default();
        let result = import_model::<TestBackend>(&document, &mut target, &device);
        assert!(matches!(result, Err(EngineError::InvalidDocument(_))));
    }

    #[test]
    fn test_undersized_image_metadata_rejected() {
        let device = Default::default();
        let config = small_config();
        let mut document = export_model(&compiled(&config), &config, ExportStats::default()).unwrap();
        if let Some(metadata) = document.metadata.as_mut() {
            metadata.image_size = 2;
        }

        let mut target = SiameseConfig::default();
        let err = import_model::<TestBackend>(&document, &mut target, &device).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDocument(_)));
        assert_eq!(err.status(), 400);
        assert_eq!(target.image_size, SiameseConfig::default().image_size);
    }

    #[test]
    fn test_save_and_load_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models").join("pet.json");
        let config = small_config();
        let document = export_model(&compiled(&config), &config, ExportStats::default()).unwrap();

        save_document(&document, &path).unwrap();
        let loaded = load_document(&path).unwrap();
        assert_eq!(loaded, document);

        let missing = load_document(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(missing.status(), 404);
    }
}
