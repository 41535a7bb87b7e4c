//! Probabilistic image augmentation.
//!
//! For every (original, index) pair a pipeline is sampled category by
//! category: a category gate draw, then one draw per transform. Categories
//! run in the order geometric, color, weather, noise, blur. Geometric
//! transforms carry the boxes along; the rest only touch pixels.

mod geometric;
mod photometric;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use image::RgbImage;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::error::LabelkitError;
use crate::model::{AugmentationSettings, BoundingBox, Category, ImageAnnotation, NormBox};
use geometric::PixelRect;

/// Boxes smaller than this (in square pixels) after a transform are dropped.
pub const MIN_BOX_AREA: f64 = 1.0;

/// Failure while augmenting a single image.
#[derive(Debug, Error)]
pub enum AugmentError {
    #[error(transparent)]
    Load(#[from] LabelkitError),

    #[error("JPEG round trip failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("image {0} has no pixels")]
    Empty(String),
}

/// A single augmentation step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transform {
    HorizontalFlip,
    VerticalFlip,
    Rotate,
    ShiftScaleRotate,
    ElasticTransform,
    GridDistortion,
    OpticalDistortion,
    BrightnessContrast,
    HueSaturation,
    RgbShift,
    Clahe,
    ChannelShuffle,
    Gamma,
    Fog,
    Rain,
    SunFlare,
    Shadow,
    GaussianNoise,
    IsoNoise,
    JpegCompression,
    Posterize,
    Equalize,
    Blur,
    GaussianBlur,
    MotionBlur,
    MedianBlur,
    GlassBlur,
}

impl Transform {
    pub fn category(&self) -> Category {
        use Transform::*;
        match self {
            HorizontalFlip | VerticalFlip | Rotate | ShiftScaleRotate | ElasticTransform
            | GridDistortion | OpticalDistortion => Category::Geometric,
            BrightnessContrast | HueSaturation | RgbShift | Clahe | ChannelShuffle | Gamma => {
                Category::Color
            }
            Fog | Rain | SunFlare | Shadow => Category::Weather,
            GaussianNoise | IsoNoise | JpegCompression | Posterize | Equalize => Category::Noise,
            Blur | GaussianBlur | MotionBlur | MedianBlur | GlassBlur => Category::Blur,
        }
    }

    /// Transforms of one category with their configured probabilities.
    pub fn candidates(settings: &AugmentationSettings, category: Category) -> Vec<(Transform, f64)> {
        use Transform::*;
        match category {
            Category::Geometric => {
                let g = &settings.geometric;
                vec![
                    (HorizontalFlip, g.hflip_prob),
                    (VerticalFlip, g.vflip_prob),
                    (Rotate, g.rotate_prob),
                    (ShiftScaleRotate, g.shift_scale_rotate_prob),
                    (ElasticTransform, g.elastic_transform_prob),
                    (GridDistortion, g.grid_distortion_prob),
                    (OpticalDistortion, g.optical_distortion_prob),
                ]
            }
            Category::Color => {
                let c = &settings.color;
                vec![
                    (BrightnessContrast, c.brightness_contrast_prob),
                    (HueSaturation, c.hue_saturation_prob),
                    (RgbShift, c.rgb_shift_prob),
                    (Clahe, c.clahe_prob),
                    (ChannelShuffle, c.channel_shuffle_prob),
                    (Gamma, c.gamma_prob),
                ]
            }
            Category::Weather => {
                let w = &settings.weather;
                vec![
                    (Fog, w.fog_prob),
                    (Rain, w.rain_prob),
                    (SunFlare, w.sunflare_prob),
                    (Shadow, w.shadow_prob),
                ]
            }
            Category::Noise => {
                let n = &settings.noise;
                vec![
                    (GaussianNoise, n.gaussian_noise_prob),
                    (IsoNoise, n.iso_noise_prob),
                    (JpegCompression, n.jpeg_compression_prob),
                    (Posterize, n.posterize_prob),
                    (Equalize, n.equalize_prob),
                ]
            }
            Category::Blur => {
                let b = &settings.blur;
                vec![
                    (Blur, b.blur_prob),
                    (GaussianBlur, b.gaussian_blur_prob),
                    (MotionBlur, b.motion_blur_prob),
                    (MedianBlur, b.median_blur_prob),
                    (GlassBlur, b.glass_blur_prob),
                ]
            }
        }
    }
}

/// Result of augmenting one (original, index) pair.
#[derive(Clone, Debug, PartialEq)]
pub enum AugmentItem {
    Generated(ImageAnnotation),
    /// No transform was sampled, or the original has no boxes.
    Skipped,
    /// Every box was lost to the transforms.
    Discarded,
}

/// Counts for one augmentation batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AugmentReport {
    pub originals: usize,
    pub requested: usize,
    pub generated: usize,
    pub skipped: usize,
    pub discarded: usize,
    pub failed: usize,
}

impl AugmentReport {
    pub fn record(&mut self, item: &AugmentItem) {
        match item {
            AugmentItem::Generated(_) => self.generated += 1,
            AugmentItem::Skipped => self.skipped += 1,
            AugmentItem::Discarded => self.discarded += 1,
        }
    }
}

impl fmt::Display for AugmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} augmented images from {} originals ({} skipped, {} discarded, {} failed)",
            self.generated, self.originals, self.skipped, self.discarded, self.failed
        )
    }
}

/// Augmented entries keyed by their new path, plus counts.
#[derive(Clone, Debug, Default)]
pub struct AugmentOutcome {
    pub entries: BTreeMap<String, ImageAnnotation>,
    pub report: AugmentReport,
}

/// Samples and applies augmentation pipelines.
#[derive(Clone, Debug)]
pub struct Augmenter {
    settings: AugmentationSettings,
    seed: Option<u64>,
}

impl Default for Augmenter {
    fn default() -> Self {
        Self {
            settings: AugmentationSettings::default(),
            seed: None,
        }
    }
}

impl Augmenter {
    /// Creates an augmenter after validating `settings`.
    pub fn new(settings: AugmentationSettings) -> Result<Self, LabelkitError> {
        settings.validate()?;
        Ok(Self {
            settings,
            seed: None,
        })
    }

    /// Fixes the seed so output is reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Replaces the fixed seed; `None` draws a fresh seed per batch.
    pub fn set_seed(&mut self, seed: Option<u64>) {
        self.seed = seed;
    }

    pub fn settings(&self) -> &AugmentationSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: AugmentationSettings) -> Result<(), LabelkitError> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    /// The seed a batch should use: the fixed seed, or a fresh random one.
    pub fn batch_seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| rand::rng().random())
    }

    /// Draws a pipeline. Disabled categories consume no randomness.
    pub fn sample_pipeline<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Transform> {
        let mut pipeline = Vec::new();
        for category in Category::ALL {
            if !self.settings.is_enabled(category) {
                continue;
            }
            if !draw(rng, self.settings.category_probability(category)) {
                continue;
            }
            for (transform, p) in Transform::candidates(&self.settings, category) {
                if draw(rng, p) {
                    pipeline.push(transform);
                }
            }
        }
        pipeline
    }

    /// Augments every original that has boxes `num_augmentations` times.
    ///
    /// Per-image failures are logged and counted; the batch always runs to
    /// the end.
    pub fn augment_batch(
        &self,
        originals: &[ImageAnnotation],
        num_augmentations: usize,
    ) -> AugmentOutcome {
        self.augment_batch_until(originals, num_augmentations, || false)
    }

    /// Like [`Augmenter::augment_batch`], but checks `stop` before each
    /// item and returns what was generated so far once it reports true.
    pub fn augment_batch_until<F>(
        &self,
        originals: &[ImageAnnotation],
        num_augmentations: usize,
        stop: F,
    ) -> AugmentOutcome
    where
        F: Fn() -> bool,
    {
        let seed = self.batch_seed();
        let mut outcome = AugmentOutcome::default();
        let annotated: Vec<&ImageAnnotation> =
            originals.iter().filter(|img| img.has_boxes()).collect();
        outcome.report.originals = annotated.len();
        outcome.report.requested = annotated.len() * num_augmentations;

        info!(
            "augmenting {} images x {} (seed {})",
            annotated.len(),
            num_augmentations,
            seed
        );

        'originals: for original in annotated {
            let mut pixels = None;
            for index in 0..num_augmentations {
                if stop() {
                    info!("augmentation stopped early");
                    break 'originals;
                }
                match self.augment_cached(original, index, seed, &mut pixels) {
                    Ok(item) => {
                        outcome.report.record(&item);
                        if let AugmentItem::Generated(annotation) = item {
                            outcome
                                .entries
                                .insert(annotation.image_path.clone(), annotation);
                        }
                    }
                    Err(err) => {
                        warn!(
                            "augmentation {} of {} failed: {}",
                            index, original.image_path, err
                        );
                        outcome.report.failed += 1;
                    }
                }
            }
        }

        info!("{}", outcome.report);
        outcome
    }

    /// Augments one (original, index) pair with the RNG derived from `seed`.
    pub fn augment_image(
        &self,
        original: &ImageAnnotation,
        index: usize,
        seed: u64,
    ) -> Result<AugmentItem, AugmentError> {
        self.augment_cached(original, index, seed, &mut None)
    }

    fn augment_cached(
        &self,
        original: &ImageAnnotation,
        index: usize,
        seed: u64,
        pixels: &mut Option<RgbImage>,
    ) -> Result<AugmentItem, AugmentError> {
        if !original.has_boxes() {
            return Ok(AugmentItem::Skipped);
        }

        let mut rng = item_rng(seed, &original.image_path, index);
        let pipeline = self.sample_pipeline(&mut rng);
        if pipeline.is_empty() {
            return Ok(AugmentItem::Skipped);
        }

        if pixels.is_none() {
            *pixels = Some(original.load_rgb()?);
        }
        let Some(source) = pixels.as_ref() else {
            return Ok(AugmentItem::Skipped);
        };

        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return Err(AugmentError::Empty(original.image_path.clone()));
        }

        let mut image = source.clone();
        let mut rects: Vec<Option<PixelRect>> = original
            .boxes
            .iter()
            .map(|b| Some(b.bbox_norm.to_pixel_xyxy(width, height)))
            .collect();

        for transform in &pipeline {
            self.apply(*transform, &mut image, &mut rects, &mut rng)?;
        }

        let (out_w, out_h) = image.dimensions();
        let boxes = surviving_boxes(&original.boxes, &rects, out_w, out_h);
        if boxes.is_empty() {
            debug!(
                "augmentation {} of {} lost every box; discarded",
                index, original.image_path
            );
            return Ok(AugmentItem::Discarded);
        }

        Ok(AugmentItem::Generated(ImageAnnotation::synthetic(
            augmented_path(&original.image_path, index),
            original.image_path.clone(),
            image,
            boxes,
        )))
    }

    fn apply(
        &self,
        transform: Transform,
        image: &mut RgbImage,
        rects: &mut [Option<PixelRect>],
        rng: &mut StdRng,
    ) -> Result<(), AugmentError> {
        let limit = self.settings.geometric.rotate_limit;
        match transform {
            Transform::HorizontalFlip => geometric::hflip(image, rects),
            Transform::VerticalFlip => geometric::vflip(image, rects),
            Transform::Rotate => geometric::rotate(image, rects, limit, rng),
            Transform::ShiftScaleRotate => geometric::shift_scale_rotate(image, rects, limit, rng),
            Transform::ElasticTransform => geometric::elastic(image, rects, rng),
            Transform::GridDistortion => geometric::grid_distortion(image, rects, rng),
            Transform::OpticalDistortion => geometric::optical_distortion(image, rects, rng),
            Transform::BrightnessContrast => photometric::brightness_contrast(image, rng),
            Transform::HueSaturation => photometric::hue_saturation(image, rng),
            Transform::RgbShift => photometric::rgb_shift(image, rng),
            Transform::Clahe => photometric::clahe(image, rng),
            Transform::ChannelShuffle => photometric::channel_shuffle(image, rng),
            Transform::Gamma => photometric::gamma(image, rng),
            Transform::Fog => photometric::fog(image, rng),
            Transform::Rain => photometric::rain(image, rng),
            Transform::SunFlare => photometric::sun_flare(image, rng),
            Transform::Shadow => photometric::shadow(image, rng),
            Transform::GaussianNoise => photometric::gaussian_noise(image, rng),
            Transform::IsoNoise => photometric::iso_noise(image, rng),
            Transform::JpegCompression => photometric::jpeg_compression(image, rng)?,
            Transform::Posterize => photometric::posterize(image, rng),
            Transform::Equalize => photometric::equalize(image),
            Transform::Blur => photometric::box_blur(image, rng),
            Transform::GaussianBlur => photometric::gaussian_blur(image, rng),
            Transform::MotionBlur => photometric::motion_blur(image, rng),
            Transform::MedianBlur => photometric::median_blur(image, rng),
            Transform::GlassBlur => photometric::glass_blur(image, rng),
        }
        Ok(())
    }
}

fn draw<R: Rng + ?Sized>(rng: &mut R, p: f64) -> bool {
    rng.random_range(0.0..1.0) < p
}

/// Rebuilds boxes from transformed rectangles, dropping any that left the
/// frame or shrank below [`MIN_BOX_AREA`].
fn surviving_boxes(
    originals: &[BoundingBox],
    rects: &[Option<PixelRect>],
    width: u32,
    height: u32,
) -> Vec<BoundingBox> {
    let (w, h) = (width as f64, height as f64);
    originals
        .iter()
        .zip(rects)
        .filter_map(|(bbox, rect)| {
            let clipped = rect.as_ref()?.clip(w, h);
            if clipped.area() < MIN_BOX_AREA {
                return None;
            }
            let mut moved = bbox.clone();
            moved.bbox_norm = NormBox::from_xyxy_clipped(&clipped.to_normalized(w, h));
            moved.refresh_pixels(width, height);
            Some(moved)
        })
        .collect()
}

/// `<dir>/<stem>_aug_<index>.<ext>`; the extension falls back to `png`.
pub fn augmented_path(original: &str, index: usize) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string());
    let file_name = format!("{}_aug_{}.{}", stem, index, ext);

    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(file_name).to_string_lossy().into_owned(),
        _ => file_name,
    }
}

/// Independent RNG per (seed, path, index).
fn item_rng(seed: u64, path: &str, index: usize) -> StdRng {
    // FNV-1a over the path keeps the mix stable across runs and platforms.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in path.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    let index_mix = (index as u64).wrapping_add(1).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    StdRng::seed_from_u64(seed ^ hash ^ index_mix)
}
