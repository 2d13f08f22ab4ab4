//! Data Augmentation Module for Siamese Training Pairs
//!
//! Probabilistic geometric and photometric transformations applied to the
//! float pixel buffer of a training image before normalization.
//!
//! # Augmentation Strategy
//!
//! - **Training pairs**: random augmentations when the pair is added
//! - **Comparison**: no augmentations (clean, deterministic inference)
//! - **Rehydrated pairs**: no augmentations
//!
//! Steps run in a fixed order and each one draws its own gate from the RNG, so
//! every step fires with its configured probability independently of the
//! others. The RNG is injected by the caller which keeps runs reproducible.

use rand::Rng;

use super::preprocess::PixelBuffer;

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq)]
pub struct AugmentationConfig {
    /// Probability of applying horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Probability of applying vertical flip (0.0 - 1.0)
    pub vertical_flip_prob: f32,
    /// Probability of applying rotation
    pub rotation_prob: f32,
    /// Maximum rotation angle in degrees (applies ±rotation_degrees)
    pub rotation_degrees: f32,
    /// Probability of applying translation
    pub translation_prob: f32,
    /// Maximum shift in pixels per axis (applies ±max_translation)
    pub max_translation: i32,
    /// Probability of applying brightness adjustment
    pub brightness_prob: f32,
    /// Brightness adjustment range as a fraction of full scale (±brightness_delta)
    pub brightness_delta: f32,
    /// Probability of applying contrast adjustment
    pub contrast_prob: f32,
    /// Contrast adjustment range (1.0 ± contrast_delta)
    pub contrast_delta: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.1,
            rotation_prob: 0.2,
            rotation_degrees: 15.0,
            translation_prob: 0.2,
            max_translation: 5,
            brightness_prob: 0.2,
            brightness_delta: 0.1,
            contrast_prob: 0.2,
            contrast_delta: 0.15,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            vertical_flip_prob: 0.0,
            rotation_prob: 0.0,
            rotation_degrees: 0.0,
            translation_prob: 0.0,
            max_translation: 0,
            brightness_prob: 0.0,
            brightness_delta: 0.0,
            contrast_prob: 0.0,
            contrast_delta: 0.0,
        }
    }
}

/// Which steps fired on one call, with their sampled parameters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppliedAugmentations {
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    /// Rotation angle in degrees
    pub rotation: Option<f32>,
    /// (dx, dy) in pixels
    pub translation: Option<(i32, i32)>,
    /// Additive shift as a fraction of full scale
    pub brightness: Option<f32>,
    /// Multiplicative factor around the mean
    pub contrast: Option<f32>,
}

impl AppliedAugmentations {
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// Applies random transformations to pixel buffers
#[derive(Clone, Debug, Default)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Run the augmentation pipeline in place
    pub fn augment<R: Rng + ?Sized>(
        &self,
        pixels: &mut PixelBuffer,
        rng: &mut R,
    ) -> AppliedAugmentations {
        let cfg = &self.config;
        let mut applied = AppliedAugmentations::default();

        if rng.gen::<f32>() < cfg.horizontal_flip_prob {
            flip_horizontal(pixels);
            applied.horizontal_flip = true;
        }

        if rng.gen::<f32>() < cfg.vertical_flip_prob {
            flip_vertical(pixels);
            applied.vertical_flip = true;
        }

        if rng.gen::<f32>() < cfg.rotation_prob {
            let angle = rng.gen_range(-cfg.rotation_degrees..=cfg.rotation_degrees);
            *pixels = rotate(pixels, angle);
            applied.rotation = Some(angle);
        }

        if rng.gen::<f32>() < cfg.translation_prob {
            let dx = rng.gen_range(-cfg.max_translation..=cfg.max_translation);
            let dy = rng.gen_range(-cfg.max_translation..=cfg.max_translation);
            *pixels = translate(pixels, dx, dy);
            applied.translation = Some((dx, dy));
        }

        if rng.gen::<f32>() < cfg.brightness_prob {
            let delta = rng.gen_range(-cfg.brightness_delta..=cfg.brightness_delta);
            adjust_brightness(pixels, delta);
            applied.brightness = Some(delta);
        }

        if rng.gen::<f32>() < cfg.contrast_prob {
            let factor = rng.gen_range(1.0 - cfg.contrast_delta..=1.0 + cfg.contrast_delta);
            adjust_contrast(pixels, factor);
            applied.contrast = Some(factor);
        }

        applied
    }
}

fn flip_horizontal(pixels: &mut PixelBuffer) {
    let (w, h) = (pixels.width, pixels.height);
    for y in 0..h {
        for x in 0..w / 2 {
            for c in 0..3 {
                let (a, b) = (pixels.index(x, y, c), pixels.index(w - 1 - x, y, c));
                pixels.data.swap(a, b);
            }
        }
    }
}

fn flip_vertical(pixels: &mut PixelBuffer) {
    let (w, h) = (pixels.width, pixels.height);
    for y in 0..h / 2 {
        for x in 0..w {
            for c in 0..3 {
                let (a, b) = (pixels.index(x, y, c), pixels.index(x, h - 1 - y, c));
                pixels.data.swap(a, b);
            }
        }
    }
}

/// Rotate around the center, bilinear sampling, zero fill
fn rotate(pixels: &PixelBuffer, angle_degrees: f32) -> PixelBuffer {
    if angle_degrees.abs() < 1e-3 {
        return pixels.clone();
    }

    let angle_rad = angle_degrees.to_radians();
    let (cos_a, sin_a) = (angle_rad.cos(), angle_rad.sin());
    let cx = (pixels.width as f32 - 1.0) / 2.0;
    let cy = (pixels.height as f32 - 1.0) / 2.0;

    let mut output = PixelBuffer::zeros(pixels.width, pixels.height);
    for y in 0..pixels.height {
        for x in 0..pixels.width {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;

            let src_x = cx + dx * cos_a + dy * sin_a;
            let src_y = cy - dx * sin_a + dy * cos_a;

            for c in 0..3 {
                let value = bilinear_sample(pixels, src_x, src_y, c);
                let idx = output.index(x, y, c);
                output.data[idx] = value;
            }
        }
    }
    output
}

fn bilinear_sample(pixels: &PixelBuffer, x: f32, y: f32, c: usize) -> f32 {
    let (width, height) = (pixels.width, pixels.height);
    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return 0.0;
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let v00 = pixels.get(x0, y0, c);
    let v10 = pixels.get(x1, y0, c);
    let v01 = pixels.get(x0, y1, c);
    let v11 = pixels.get(x1, y1, c);

    v00 * (1.0 - fx) * (1.0 - fy) + v10 * fx * (1.0 - fy) + v01 * (1.0 - fx) * fy + v11 * fx * fy
}

/// Shift content by (dx, dy), zero fill
fn translate(pixels: &PixelBuffer, dx: i32, dy: i32) -> PixelBuffer {
    let mut output = PixelBuffer::zeros(pixels.width, pixels.height);
    for y in 0..pixels.height {
        for x in 0..pixels.width {
            let src_x = x as i64 - dx as i64;
            let src_y = y as i64 - dy as i64;
            if src_x < 0
                || src_y < 0
                || src_x >= pixels.width as i64
                || src_y >= pixels.height as i64
            {
                continue;
            }
            for c in 0..3 {
                let idx = output.index(x, y, c);
                output.data[idx] = pixels.get(src_x as usize, src_y as usize, c);
            }
        }
    }
    output
}

fn adjust_brightness(pixels: &mut PixelBuffer, delta: f32) {
    let shift = delta * 255.0;
    for v in pixels.data.iter_mut() {
        *v = (*v + shift).clamp(0.0, 255.0);
    }
}

fn adjust_contrast(pixels: &mut PixelBuffer, factor: f32) {
    if pixels.data.is_empty() {
        return;
    }
    let mean = pixels.data.iter().map(|&v| v as f64).sum::<f64>() / pixels.data.len() as f64;
    let mean = mean as f32;
    for v in pixels.data.iter_mut() {
        *v = (mean + factor * (*v - mean)).clamp(0.0, 255.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn gradient(width: usize, height: usize) -> PixelBuffer {
        let mut pixels = PixelBuffer::zeros(width, height);
        for y in 0..height {
            for x in 0..width {
                let idx = pixels.index(x, y, 0);
                pixels.data[idx] = (x * 10) as f32;
                let idx = pixels.index(x, y, 1);
                pixels.data[idx] = (y * 10) as f32;
                let idx = pixels.index(x, y, 2);
                pixels.data[idx] = 128.0;
            }
        }
        pixels
    }

    #[test]
    fn test_default_probabilities() {
        let config = AugmentationConfig::default();
        assert_eq!(config.horizontal_flip_prob, 0.5);
        assert_eq!(config.vertical_flip_prob, 0.1);
        assert_eq!(config.rotation_prob, 0.2);
        assert_eq!(config.rotation_degrees, 15.0);
        assert_eq!(config.max_translation, 5);
    }

    #[test]
    fn test_none_is_identity() {
        let augmenter = Augmenter::new(AugmentationConfig::none());
        let original = gradient(8, 8);
        let mut pixels = original.clone();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..50 {
            let applied = augmenter.augment(&mut pixels, &mut rng);
            assert!(applied.is_identity());
        }
        assert_eq!(pixels, original);
    }

    #[test]
    fn test_flip_frequencies() {
        let augmenter = Augmenter::default();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let trials = 1000;

        let mut counts = [0usize; 6];
        for _ in 0..trials {
            let mut pixels = gradient(4, 4);
            let applied = augmenter.augment(&mut pixels, &mut rng);
            counts[0] += applied.horizontal_flip as usize;
            counts[1] += applied.vertical_flip as usize;
            counts[2] += applied.rotation.is_some() as usize;
            counts[3] += applied.translation.is_some() as usize;
            counts[4] += applied.brightness.is_some() as usize;
            counts[5] += applied.contrast.is_some() as usize;
        }

        let freq = |n: usize| n as f64 / trials as f64;
        assert!((freq(counts[0]) - 0.5).abs() < 0.06, "hflip {}", freq(counts[0]));
        assert!((freq(counts[1]) - 0.1).abs() < 0.04, "vflip {}", freq(counts[1]));
        for (i, &count) in counts.iter().enumerate().skip(2) {
            assert!((freq(count) - 0.2).abs() < 0.05, "step {} freq {}", i, freq(count));
        }
    }

    #[test]
    fn test_sampled_parameters_in_range() {
        let augmenter = Augmenter::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for _ in 0..500 {
            let mut pixels = gradient(6, 6);
            let applied = augmenter.augment(&mut pixels, &mut rng);
            if let Some(angle) = applied.rotation {
                assert!((-15.0..=15.0).contains(&angle));
            }
            if let Some((dx, dy)) = applied.translation {
                assert!((-5..=5).contains(&dx) && (-5..=5).contains(&dy));
            }
            if let Some(delta) = applied.brightness {
                assert!((-0.1..=0.1).contains(&delta));
            }
            if let Some(factor) = applied.contrast {
                assert!((0.85..=1.15).contains(&factor));
            }
            assert!(pixels.data.iter().all(|v| (0.0..=255.0).contains(v)));
        }
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let augmenter = Augmenter::default();
        let mut a = gradient(8, 8);
        let mut b = gradient(8, 8);

        let applied_a = augmenter.augment(&mut a, &mut ChaCha8Rng::seed_from_u64(11));
        let applied_b = augmenter.augment(&mut b, &mut ChaCha8Rng::seed_from_u64(11));

        assert_eq!(applied_a, applied_b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_flip_horizontal() {
        let mut pixels = gradient(4, 2);
        flip_horizontal(&mut pixels);
        assert_eq!(pixels.get(0, 0, 0), 30.0);
        assert_eq!(pixels.get(3, 0, 0), 0.0);
    }

    #[test]
    fn test_translate_zero_fills() {
        let pixels = gradient(4, 4);
        let shifted = translate(&pixels, 1, 0);
        assert_eq!(shifted.get(0, 0, 2), 0.0);
        assert_eq!(shifted.get(1, 0, 0), pixels.get(0, 0, 0));
    }

    #[test]
    fn test_contrast_preserves_mean_of_flat_image() {
        let mut pixels = PixelBuffer::zeros(3, 3);
        pixels.data.iter_mut().for_each(|v| *v = 100.0);
        adjust_contrast(&mut pixels, 1.15);
        assert!(pixels.data.iter().all(|&v| (v - 100.0).abs() < 1e-4));
    }

    #[test]
    fn test_brightness_adjustment() {
        let mut pixels = gradient(4, 4);
        let before = pixels.get(1, 1, 2);
        adjust_brightness(&mut pixels, 0.1);
        assert!((pixels.get(1, 1, 2) - (before + 25.5)).abs() < 1e-4);
    }
}
