//! Rebuilding in-memory training pairs from persisted records

use std::collections::HashMap;
use std::path::PathBuf;

use burn::tensor::backend::Backend;

use crate::dataset::pairs::{PairRecord, TrainingPair};
use crate::dataset::preprocess::{ImageSource, Preprocessor};
use crate::utils::error::{EngineError, Result};

/// Resolves an image URL to something the preprocessor can decode
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<ImageSource>;
}

/// Local files, given as plain paths or `file://` URLs
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    base_dir: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `base_dir`
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, url: &str) -> PathBuf {
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

impl ImageFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<ImageSource> {
        let path = self.resolve(url);
        if !path.is_file() {
            return Err(EngineError::Preprocessing(format!(
                "Image '{}' not found at {}",
                url,
                path.display()
            )));
        }
        Ok(ImageSource::Path(path))
    }
}

/// Fixed URL → image table
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    images: HashMap<String, ImageSource>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, image: impl Into<ImageSource>) {
        self.images.insert(url.into(), image.into());
    }
}

impl ImageFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<ImageSource> {
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| EngineError::Preprocessing(format!("No image registered for '{}'", url)))
    }
}

/// Fetch and preprocess every record without augmentation.
///
/// All fetches happen before any tensor is created, and the preprocessing
/// batch is all-or-nothing, so a single bad record leaves nothing behind.
pub fn rehydrate_pairs<B: Backend>(
    records: &[PairRecord],
    fetcher: &dyn ImageFetcher,
    preprocessor: &Preprocessor,
    device: &B::Device,
) -> Result<Vec<(TrainingPair<B>, PairRecord)>> {
    let mut sources = Vec::with_capacity(records.len() * 2);
    for record in records {
        sources.push(fetcher.fetch(&record.image1_url)?);
        sources.push(fetcher.fetch(&record.image2_url)?);
    }

    let mut tensors = preprocessor.preprocess_batch::<B>(&sources, device)?.into_iter();
    let mut pairs = Vec::with_capacity(records.len());
    for record in records {
        let (Some(image1), Some(image2)) = (tensors.next(), tensors.next()) else {
            return Err(EngineError::Preprocessing(
                "Preprocessed fewer images than requested".to_string(),
            ));
        };
        pairs.push((TrainingPair::new(image1, image2, record.label()), record.clone()));
    }

    tracing::info!("Rehydrated {} training pairs", pairs.len());
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tensor::TensorLedger;
    use burn_ndarray::NdArray;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn image(shade: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(12, 10, Rgb([shade, 64, 200])))
    }

    #[test]
    fn test_rehydrate_preserves_order_and_labels() {
        let device = Default::default();
        let ledger = TensorLedger::new();
        let preprocessor = Preprocessor::new(8, ledger.clone());
        let mut fetcher = MemoryFetcher::new();
        for (i, url) in ["a", "b", "c"].iter().enumerate() {
            fetcher.insert(*url, image(i as u8 * 60));
        }

        let records = vec![PairRecord::new("a", "b", true), PairRecord::new("a", "c", false)];
        let pairs = rehydrate_pairs::<TestBackend>(&records, &fetcher, &preprocessor, &device).unwrap();

        assert_eq!(pairs.len(), 2);
        assert!(pairs[0].0.label.is_same());
        assert!(!pairs[1].0.label.is_same());
        assert_eq!(pairs[1].1, records[1]);
        assert_eq!(pairs[0].0.image1.dims(), [1, 8, 8, 3]);
        assert_eq!(ledger.live(), 4);
    }

    #[test]
    fn test_one_missing_image_aborts_batch() {
        let device = Default::default();
        let ledger = TensorLedger::new();
        let preprocessor = Preprocessor::new(8, ledger.clone());
        let mut fetcher = MemoryFetcher::new();
        fetcher.insert("a", image(10));

        let records = vec![PairRecord::new("a", "a", true), PairRecord::new("a", "gone", false)];
        let result = rehydrate_pairs::<TestBackend>(&records, &fetcher, &preprocessor, &device);

        assert!(result.is_err());
        assert_eq!(ledger.allocated(), 0);
    }

    #[test]
    fn test_file_fetcher_accepts_file_urls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pet.png");
        image(100).save(&path).unwrap();

        let fetcher = FileFetcher::new();
        let url = format!("file://{}", path.display());
        assert!(matches!(fetcher.fetch(&url).unwrap(), ImageSource::Path(p) if p == path));

        let relative = FileFetcher::with_base_dir(dir.path());
        assert!(relative.fetch("pet.png").is_ok());
        assert!(relative.fetch("other.png").is_err());
    }
}
