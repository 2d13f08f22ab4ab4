//! Image preprocessing for the siamese model.
//!
//! Decode → bilinear resize → float pixels → optional augmentation →
//! ImageNet normalization → `[1, H, W, 3]` tensor. All pixel work happens on
//! CPU buffers; a tensor is only created once every fallible step succeeded,
//! so the failure path never leaves a tensor behind.

use std::path::PathBuf;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::{imageops::FilterType, DynamicImage, ImageReader, RgbImage};
use rand::Rng;
use rayon::prelude::*;

use super::augmentation::{AppliedAugmentations, Augmenter};
use super::tensor::{ImageTensor, TensorLedger};
use crate::model::config::SiameseConfig;
use crate::utils::error::{EngineError, Result};

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Anything that can be turned into pixel data
#[derive(Clone, Debug)]
pub enum ImageSource {
    /// Already decoded image handle
    Decoded(DynamicImage),
    /// Encoded bytes (PNG, JPEG, ...)
    Encoded(Vec<u8>),
    /// Image file on disk
    Path(PathBuf),
}

impl ImageSource {
    /// Decode into an image handle
    pub fn decode(&self) -> Result<DynamicImage> {
        let image = match self {
            ImageSource::Decoded(image) => image.clone(),
            ImageSource::Encoded(bytes) => image::load_from_memory(bytes)?,
            ImageSource::Path(path) => ImageReader::open(path)
                .map_err(|e| {
                    EngineError::Preprocessing(format!("Failed to open '{}': {}", path.display(), e))
                })?
                .with_guessed_format()
                .map_err(|e| EngineError::Preprocessing(e.to_string()))?
                .decode()?,
        };

        if image.width() == 0 || image.height() == 0 {
            return Err(EngineError::Preprocessing(
                "Image has zero width or height".to_string(),
            ));
        }
        Ok(image)
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(image: DynamicImage) -> Self {
        ImageSource::Decoded(image)
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

/// Float RGB pixels in HWC order, values in `[0, 255]`
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl PixelBuffer {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height * 3],
        }
    }

    pub fn from_rgb(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width: width as usize,
            height: height as usize,
            data: image.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, c: usize) -> usize {
        (y * self.width + x) * 3 + c
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, c: usize) -> f32 {
        self.data[self.index(x, y, c)]
    }

    /// `(v / 255 - mean_c) / std_c`, layout unchanged (HWC)
    pub fn normalized(&self) -> Vec<f32> {
        self.data
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let c = i % 3;
                (v / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
            })
            .collect()
    }
}

/// Turns image sources into normalized model inputs
#[derive(Clone, Debug)]
pub struct Preprocessor {
    image_size: usize,
    augmenter: Augmenter,
    ledger: TensorLedger,
}

impl Preprocessor {
    pub fn new(image_size: usize, ledger: TensorLedger) -> Self {
        Self {
            image_size,
            augmenter: Augmenter::default(),
            ledger,
        }
    }

    pub fn from_config(config: &SiameseConfig, ledger: TensorLedger) -> Self {
        Self::new(config.image_size, ledger)
    }

    /// Decode and resize to the square model input, as float pixels
    pub fn pixels(&self, source: &ImageSource) -> Result<PixelBuffer> {
        if self.image_size == 0 {
            return Err(EngineError::Preprocessing("Target image size is 0".to_string()));
        }
        let image = source.decode()?;
        let size = self.image_size as u32;
        let resized = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
        Ok(PixelBuffer::from_rgb(&resized))
    }

    /// Normalized HWC values for one image, optionally augmented
    pub fn prepare<R: Rng + ?Sized>(
        &self,
        source: &ImageSource,
        augment: bool,
        rng: &mut R,
    ) -> Result<(Vec<f32>, AppliedAugmentations)> {
        let mut pixels = self.pixels(source)?;
        let applied = if augment {
            self.augmenter.augment(&mut pixels, rng)
        } else {
            AppliedAugmentations::default()
        };
        Ok((pixels.normalized(), applied))
    }

    /// Full pipeline producing a `[1, H, W, 3]` tensor
    pub fn preprocess<B: Backend, R: Rng + ?Sized>(
        &self,
        source: &ImageSource,
        augment: bool,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<ImageTensor<B>> {
        let (values, applied) = self.prepare(source, augment, rng)?;
        if !applied.is_identity() {
            tracing::debug!("Augmentations applied: {:?}", applied);
        }
        Ok(self.to_tensor(values, device))
    }

    /// Preprocess several images without augmentation.
    ///
    /// Pixel work runs in parallel; the first failure aborts the whole batch
    /// before any tensor is created.
    pub fn preprocess_batch<B: Backend>(
        &self,
        sources: &[ImageSource],
        device: &B::Device,
    ) -> Result<Vec<ImageTensor<B>>> {
        let prepared: Vec<Vec<f32>> = sources
            .par_iter()
            .map(|source| self.pixels(source).map(|pixels| pixels.normalized()))
            .collect::<Result<_>>()?;

        Ok(prepared
            .into_iter()
            .map(|values| self.to_tensor(values, device))
            .collect())
    }

    fn to_tensor<B: Backend>(&self, values: Vec<f32>, device: &B::Device) -> ImageTensor<B> {
        let size = self.image_size;
        let tensor =
            Tensor::<B, 4>::from_floats(TensorData::new(values, [1, size, size, 3]), device);
        self.ledger.track(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use image::{ImageBuffer, Rgb};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type TestBackend = NdArray;

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        let mut img = ImageBuffer::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 4 % 256) as u8, (y * 4 % 256) as u8, 128]);
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_output_shape_independent_of_source_resolution() {
        let device = Default::default();
        let ledger = TensorLedger::new();
        let preprocessor = Preprocessor::new(16, ledger);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        for (w, h) in [(64, 64), (100, 37), (5, 200), (16, 16)] {
            let source = ImageSource::from(create_test_image(w, h));
            let tensor = preprocessor
                .preprocess::<TestBackend, _>(&source, false, &mut rng, &device)
                .unwrap();
            assert_eq!(tensor.dims(), [1, 16, 16, 3]);

            let augmented = preprocessor
                .preprocess::<TestBackend, _>(&source, true, &mut rng, &device)
                .unwrap();
            assert_eq!(augmented.dims(), [1, 16, 16, 3]);
        }
    }

    #[test]
    fn test_deterministic_without_augmentation() {
        let device = Default::default();
        let preprocessor = Preprocessor::new(12, TensorLedger::new());
        let source = ImageSource::from(create_test_image(40, 30));

        let a = preprocessor
            .preprocess::<TestBackend, _>(&source, false, &mut ChaCha8Rng::seed_from_u64(1), &device)
            .unwrap();
        let b = preprocessor
            .preprocess::<TestBackend, _>(&source, false, &mut ChaCha8Rng::seed_from_u64(99), &device)
            .unwrap();

        let (va, vb) = (a.to_vec(), b.to_vec());
        assert_eq!(va.len(), vb.len());
        assert!(va.iter().zip(vb.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn test_imagenet_normalization() {
        let white = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(4, 4, Rgb([255, 255, 255])));
        let preprocessor = Preprocessor::new(4, TensorLedger::new());
        let pixels = preprocessor.pixels(&ImageSource::from(white)).unwrap();
        let values = pixels.normalized();

        for c in 0..3 {
            let expected = (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            assert!((values[c] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_decode_failure_creates_no_tensor() {
        let device = Default::default();
        let ledger = TensorLedger::new();
        let preprocessor = Preprocessor::new(8, ledger.clone());
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let garbage = ImageSource::Encoded(vec![0, 1, 2, 3, 4]);
        let result = preprocessor.preprocess::<TestBackend, _>(&garbage, false, &mut rng, &device);

        assert!(matches!(result, Err(EngineError::Preprocessing(_))));
        assert_eq!(ledger.allocated(), 0);
    }

    #[test]
    fn test_missing_file_is_preprocessing_error() {
        let preprocessor = Preprocessor::new(8, TensorLedger::new());
        let source = ImageSource::Path(PathBuf::from("/definitely/not/here.png"));
        let err = preprocessor.pixels(&source).unwrap_err();
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let device = Default::default();
        let ledger = TensorLedger::new();
        let preprocessor = Preprocessor::new(8, ledger.clone());

        let sources = vec![
            ImageSource::from(create_test_image(10, 10)),
            ImageSource::Encoded(vec![9, 9, 9]),
        ];
        assert!(preprocessor.preprocess_batch::<TestBackend>(&sources, &device).is_err());
        assert_eq!(ledger.allocated(), 0);

        let sources = vec![
            ImageSource::from(create_test_image(10, 10)),
            ImageSource::from(create_test_image(20, 5)),
        ];
        let tensors = preprocessor.preprocess_batch::<TestBackend>(&sources, &device).unwrap();
        assert_eq!(tensors.len(), 2);
        assert_eq!(ledger.live(), 2);
    }
}
