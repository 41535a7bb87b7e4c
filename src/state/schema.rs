//! On-disk shape of the recovery file.
//!
//! Augmentation settings are stored flat, one key per probability plus an
//! `enabled_transforms` map keyed by category, so older files with missing
//! keys still load with defaults. Pixel buffers are never written; a
//! synthetic entry keeps only its `augmented_from` tag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{
    AppData, AugmentationSettings, BoundingBox, Category, ImageAnnotation, ImageKind, ImageSource,
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_RESIZE_RESOLUTION,
};

/// Current recovery file version.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StateFile {
    pub(crate) version: u32,

    #[serde(default)]
    images: BTreeMap<String, ImageRecord>,

    #[serde(default)]
    classes: Vec<String>,

    #[serde(default)]
    model_path: Option<String>,

    #[serde(default = "default_confidence_threshold")]
    confidence_threshold: f32,

    #[serde(default)]
    resize_output_enabled: bool,

    #[serde(default = "default_resize_resolution")]
    resize_output_resolution: String,

    #[serde(default)]
    augmentation_settings: FlatSettings,
}

fn default_confidence_threshold() -> f32 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_resize_resolution() -> String {
    DEFAULT_RESIZE_RESOLUTION.to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageRecord {
    #[serde(default)]
    width: u32,

    #[serde(default)]
    height: u32,

    #[serde(default)]
    boxes: Vec<BoundingBox>,

    #[serde(default)]
    processed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    augmented_from: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct FlatSettings {
    geometric_transforms_prob: f64,
    color_transforms_prob: f64,
    weather_transforms_prob: f64,
    noise_transforms_prob: f64,
    blur_transforms_prob: f64,

    hflip_prob: f64,
    vflip_prob: f64,
    rotate_prob: f64,
    rotate_limit: f64,
    shift_scale_rotate_prob: f64,
    elastic_transform_prob: f64,
    grid_distortion_prob: f64,
    optical_distortion_prob: f64,

    brightness_contrast_prob: f64,
    hue_saturation_prob: f64,
    rgb_shift_prob: f64,
    clahe_prob: f64,
    channel_shuffle_prob: f64,
    gamma_prob: f64,

    fog_prob: f64,
    rain_prob: f64,
    sunflare_prob: f64,
    shadow_prob: f64,

    gaussian_noise_prob: f64,
    iso_noise_prob: f64,
    jpeg_compression_prob: f64,
    posterize_prob: f64,
    equalize_prob: f64,

    blur_prob: f64,
    gaussian_blur_prob: f64,
    motion_blur_prob: f64,
    median_blur_prob: f64,
    glass_blur_prob: f64,

    enabled_transforms: BTreeMap<String, bool>,
}

impl Default for FlatSettings {
    fn default() -> Self {
        Self::from(&AugmentationSettings::default())
    }
}

impl From<&AugmentationSettings> for FlatSettings {
    fn from(s: &AugmentationSettings) -> Self {
        let (g, c, w, n, b) = (&s.geometric, &s.color, &s.weather, &s.noise, &s.blur);
        Self {
            geometric_transforms_prob: g.probability,
            color_transforms_prob: c.probability,
            weather_transforms_prob: w.probability,
            noise_transforms_prob: n.probability,
            blur_transforms_prob: b.probability,
            hflip_prob: g.hflip_prob,
            vflip_prob: g.vflip_prob,
            rotate_prob: g.rotate_prob,
            rotate_limit: g.rotate_limit,
            shift_scale_rotate_prob: g.shift_scale_rotate_prob,
            elastic_transform_prob: g.elastic_transform_prob,
            grid_distortion_prob: g.grid_distortion_prob,
            optical_distortion_prob: g.optical_distortion_prob,
            brightness_contrast_prob: c.brightness_contrast_prob,
            hue_saturation_prob: c.hue_saturation_prob,
            rgb_shift_prob: c.rgb_shift_prob,
            clahe_prob: c.clahe_prob,
            channel_shuffle_prob: c.channel_shuffle_prob,
            gamma_prob: c.gamma_prob,
            fog_prob: w.fog_prob,
            rain_prob: w.rain_prob,
            sunflare_prob: w.sunflare_prob,
            shadow_prob: w.shadow_prob,
            gaussian_noise_prob: n.gaussian_noise_prob,
            iso_noise_prob: n.iso_noise_prob,
            jpeg_compression_prob: n.jpeg_compression_prob,
            posterize_prob: n.posterize_prob,
            equalize_prob: n.equalize_prob,
            blur_prob: b.blur_prob,
            gaussian_blur_prob: b.gaussian_blur_prob,
            motion_blur_prob: b.motion_blur_prob,
            median_blur_prob: b.median_blur_prob,
            glass_blur_prob: b.glass_blur_prob,
            enabled_transforms: Category::ALL
                .iter()
                .map(|c| (c.key().to_string(), s.is_enabled(*c)))
                .collect(),
        }
    }
}

impl From<FlatSettings> for AugmentationSettings {
    fn from(f: FlatSettings) -> Self {
        let mut s = AugmentationSettings::default();

        s.geometric.probability = f.geometric_transforms_prob;
        s.geometric.hflip_prob = f.hflip_prob;
        s.geometric.vflip_prob = f.vflip_prob;
        s.geometric.rotate_prob = f.rotate_prob;
        s.geometric.rotate_limit = f.rotate_limit;
        s.geometric.shift_scale_rotate_prob = f.shift_scale_rotate_prob;
        s.geometric.elastic_transform_prob = f.elastic_transform_prob;
        s.geometric.grid_distortion_prob = f.grid_distortion_prob;
        s.geometric.optical_distortion_prob = f.optical_distortion_prob;

        s.color.probability = f.color_transforms_prob;
        s.color.brightness_contrast_prob = f.brightness_contrast_prob;
        s.color.hue_saturation_prob = f.hue_saturation_prob;
        s.color.rgb_shift_prob = f.rgb_shift_prob;
        s.color.clahe_prob = f.clahe_prob;
        s.color.channel_shuffle_prob = f.channel_shuffle_prob;
        s.color.gamma_prob = f.gamma_prob;

        s.weather.probability = f.weather_transforms_prob;
        s.weather.fog_prob = f.fog_prob;
        s.weather.rain_prob = f.rain_prob;
        s.weather.sunflare_prob = f.sunflare_prob;
        s.weather.shadow_prob = f.shadow_prob;

        s.noise.probability = f.noise_transforms_prob;
        s.noise.gaussian_noise_prob = f.gaussian_noise_prob;
        s.noise.iso_noise_prob = f.iso_noise_prob;
        s.noise.jpeg_compression_prob = f.jpeg_compression_prob;
        s.noise.posterize_prob = f.posterize_prob;
        s.noise.equalize_prob = f.equalize_prob;

        s.blur.probability = f.blur_transforms_prob;
        s.blur.blur_prob = f.blur_prob;
        s.blur.gaussian_blur_prob = f.gaussian_blur_prob;
        s.blur.motion_blur_prob = f.motion_blur_prob;
        s.blur.median_blur_prob = f.median_blur_prob;
        s.blur.glass_blur_prob = f.glass_blur_prob;

        for category in Category::ALL {
            if let Some(enabled) = f.enabled_transforms.get(category.key()) {
                s.set_enabled(category, *enabled);
            }
        }
        s
    }
}

impl StateFile {
    pub(crate) fn from_app(app: &AppData) -> Self {
        let images = app
            .images
            .iter()
            .map(|(path, image)| {
                (
                    path.clone(),
                    ImageRecord {
                        width: image.width,
                        height: image.height,
                        boxes: image.boxes.clone(),
                        processed: image.processed,
                        augmented_from: image.augmented_from().map(str::to_string),
                    },
                )
            })
            .collect();

        Self {
            version: STATE_VERSION,
            images,
            classes: app.classes.clone(),
            model_path: app.model_path.clone(),
            confidence_threshold: app.confidence_threshold,
            resize_output_enabled: app.resize_output_enabled,
            resize_output_resolution: app.resize_output_resolution.clone(),
            augmentation_settings: FlatSettings::from(&app.augmentation_settings),
        }
    }

    pub(crate) fn into_app(self) -> AppData {
        let images = self
            .images
            .into_iter()
            .map(|(path, record)| {
                let kind = match record.augmented_from {
                    Some(augmented_from) => ImageKind::Synthetic { augmented_from },
                    None => ImageKind::Original,
                };
                let image = ImageAnnotation {
                    image_path: path.clone(),
                    width: record.width,
                    height: record.height,
                    boxes: record.boxes,
                    processed: record.processed,
                    kind,
                    source: ImageSource::OnDisk,
                };
                (path, image)
            })
            .collect();

        AppData {
            images,
            classes: self.classes,
            model_path: self.model_path,
            confidence_threshold: self.confidence_threshold,
            resize_output_enabled: self.resize_output_enabled,
            resize_output_resolution: self.resize_output_resolution,
            augmentation_settings: self.augmentation_settings.into(),
        }
    }
}

/// Parses recovery file bytes without the version check.
pub fn from_state_slice(bytes: &[u8]) -> Result<AppData, serde_json::Error> {
    let state: StateFile = serde_json::from_slice(bytes)?;
    Ok(state.into_app())
}

/// Serializes `app` the way the recovery file stores it.
pub fn to_state_string(app: &AppData) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&StateFile::from_app(app))
}
