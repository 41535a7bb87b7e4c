//! Augmentation settings and output resolution.
//!
//! Settings are grouped per category. Each category carries an `enabled`
//! switch, a category gate `probability` and one probability per transform.
//! Every probability is an independent Bernoulli draw in `[0, 1]`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LabelkitError;

/// The five augmentation categories, in pipeline order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Geometric,
    Color,
    Weather,
    Noise,
    Blur,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Geometric,
        Category::Color,
        Category::Weather,
        Category::Noise,
        Category::Blur,
    ];

    /// Key used in the persisted `enabled_transforms` map.
    pub fn key(&self) -> &'static str {
        match self {
            Category::Geometric => "geometric",
            Category::Color => "color",
            Category::Weather => "weather",
            Category::Noise => "noise",
            Category::Blur => "blur",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeometricSettings {
    pub enabled: bool,
    pub probability: f64,
    pub hflip_prob: f64,
    pub vflip_prob: f64,
    pub rotate_prob: f64,
    /// Maximum absolute rotation in degrees.
    pub rotate_limit: f64,
    pub shift_scale_rotate_prob: f64,
    pub elastic_transform_prob: f64,
    pub grid_distortion_prob: f64,
    pub optical_distortion_prob: f64,
}

impl Default for GeometricSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: 0.5,
            hflip_prob: 0.5,
            vflip_prob: 0.5,
            rotate_prob: 0.3,
            rotate_limit: 30.0,
            shift_scale_rotate_prob: 0.3,
            elastic_transform_prob: 0.1,
            grid_distortion_prob: 0.1,
            optical_distortion_prob: 0.1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColorSettings {
    pub enabled: bool,
    pub probability: f64,
    pub brightness_contrast_prob: f64,
    pub hue_saturation_prob: f64,
    pub rgb_shift_prob: f64,
    pub clahe_prob: f64,
    pub channel_shuffle_prob: f64,
    pub gamma_prob: f64,
}

impl Default for ColorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: 0.5,
            brightness_contrast_prob: 0.5,
            hue_saturation_prob: 0.3,
            rgb_shift_prob: 0.3,
            clahe_prob: 0.3,
            channel_shuffle_prob: 0.1,
            gamma_prob: 0.3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeatherSettings {
    pub enabled: bool,
    pub probability: f64,
    pub fog_prob: f64,
    pub rain_prob: f64,
    pub sunflare_prob: f64,
    pub shadow_prob: f64,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: 0.3,
            fog_prob: 0.3,
            rain_prob: 0.2,
            sunflare_prob: 0.1,
            shadow_prob: 0.2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoiseSettings {
    pub enabled: bool,
    pub probability: f64,
    pub gaussian_noise_prob: f64,
    pub iso_noise_prob: f64,
    pub jpeg_compression_prob: f64,
    pub posterize_prob: f64,
    pub equalize_prob: f64,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: 0.3,
            gaussian_noise_prob: 0.3,
            iso_noise_prob: 0.3,
            jpeg_compression_prob: 0.3,
            posterize_prob: 0.2,
            equalize_prob: 0.2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlurSettings {
    pub enabled: bool,
    pub probability: f64,
    pub blur_prob: f64,
    pub gaussian_blur_prob: f64,
    pub motion_blur_prob: f64,
    pub median_blur_prob: f64,
    pub glass_blur_prob: f64,
}

impl Default for BlurSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: 0.3,
            blur_prob: 0.3,
            gaussian_blur_prob: 0.3,
            motion_blur_prob: 0.2,
            median_blur_prob: 0.2,
            glass_blur_prob: 0.1,
        }
    }
}

/// Full augmentation configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AugmentationSettings {
    pub geometric: GeometricSettings,
    pub color: ColorSettings,
    pub weather: WeatherSettings,
    pub noise: NoiseSettings,
    pub blur: BlurSettings,
}

impl AugmentationSettings {
    /// Settings with every category switched off.
    pub fn all_disabled() -> Self {
        let mut settings = Self::default();
        for category in Category::ALL {
            settings.set_enabled(category, false);
        }
        settings
    }

    pub fn is_enabled(&self, category: Category) -> bool {
        match category {
            Category::Geometric => self.geometric.enabled,
            Category::Color => self.color.enabled,
            Category::Weather => self.weather.enabled,
            Category::Noise => self.noise.enabled,
            Category::Blur => self.blur.enabled,
        }
    }

    pub fn set_enabled(&mut self, category: Category, enabled: bool) {
        match category {
            Category::Geometric => self.geometric.enabled = enabled,
            Category::Color => self.color.enabled = enabled,
            Category::Weather => self.weather.enabled = enabled,
            Category::Noise => self.noise.enabled = enabled,
            Category::Blur => self.blur.enabled = enabled,
        }
    }

    /// Category gate probability.
    pub fn category_probability(&self, category: Category) -> f64 {
        match category {
            Category::Geometric => self.geometric.probability,
            Category::Color => self.color.probability,
            Category::Weather => self.weather.probability,
            Category::Noise => self.noise.probability,
            Category::Blur => self.blur.probability,
        }
    }

    /// True if at least one category is enabled.
    pub fn any_enabled(&self) -> bool {
        Category::ALL.iter().any(|c| self.is_enabled(*c))
    }

    /// Every probability with its field name, for validation and reporting.
    pub fn probabilities(&self) -> Vec<(&'static str, f64)> {
        let g = &self.geometric;
        let c = &self.color;
        let w = &self.weather;
        let n = &self.noise;
        let b = &self.blur;
        vec![
            ("geometric.probability", g.probability),
            ("geometric.hflip_prob", g.hflip_prob),
            ("geometric.vflip_prob", g.vflip_prob),
            ("geometric.rotate_prob", g.rotate_prob),
            ("geometric.shift_scale_rotate_prob", g.shift_scale_rotate_prob),
            ("geometric.elastic_transform_prob", g.elastic_transform_prob),
            ("geometric.grid_distortion_prob", g.grid_distortion_prob),
            ("geometric.optical_distortion_prob", g.optical_distortion_prob),
            ("color.probability", c.probability),
            ("color.brightness_contrast_prob", c.brightness_contrast_prob),
            ("color.hue_saturation_prob", c.hue_saturation_prob),
            ("color.rgb_shift_prob", c.rgb_shift_prob),
            ("color.clahe_prob", c.clahe_prob),
            ("color.channel_shuffle_prob", c.channel_shuffle_prob),
            ("color.gamma_prob", c.gamma_prob),
            ("weather.probability", w.probability),
            ("weather.fog_prob", w.fog_prob),
            ("weather.rain_prob", w.rain_prob),
            ("weather.sunflare_prob", w.sunflare_prob),
            ("weather.shadow_prob", w.shadow_prob),
            ("noise.probability", n.probability),
            ("noise.gaussian_noise_prob", n.gaussian_noise_prob),
            ("noise.iso_noise_prob", n.iso_noise_prob),
            ("noise.jpeg_compression_prob", n.jpeg_compression_prob),
            ("noise.posterize_prob", n.posterize_prob),
            ("noise.equalize_prob", n.equalize_prob),
            ("blur.probability", b.probability),
            ("blur.blur_prob", b.blur_prob),
            ("blur.gaussian_blur_prob", b.gaussian_blur_prob),
            ("blur.motion_blur_prob", b.motion_blur_prob),
            ("blur.median_blur_prob", b.median_blur_prob),
            ("blur.glass_blur_prob", b.glass_blur_prob),
        ]
    }

    /// Checks every probability is in `[0, 1]` and the rotation limit is in
    /// `[0, 180]` degrees.
    pub fn validate(&self) -> Result<(), LabelkitError> {
        for (field, value) in self.probabilities() {
            if !(0.0..=1.0).contains(&value) {
                return Err(LabelkitError::InvalidSetting {
                    field: field.to_string(),
                    value,
                    message: "probability must be in [0, 1]".to_string(),
                });
            }
        }

        let limit = self.geometric.rotate_limit;
        if !(0.0..=180.0).contains(&limit) {
            return Err(LabelkitError::InvalidSetting {
                field: "geometric.rotate_limit".to_string(),
                value: limit,
                message: "rotation limit must be in [0, 180] degrees".to_string(),
            });
        }

        Ok(())
    }
}

/// Target output size in pixels, parsed from `"WxH"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(640, 640)
    }
}

impl FromStr for Resolution {
    type Err = LabelkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LabelkitError::InvalidResolution(s.to_string());

        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;

        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self::new(width, height))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
