//! Engine configuration file.
//!
//! ```yaml
//! state_dir: .labelkit
//! autosave_interval_secs: 30
//! num_augmentations: 2
//! seed: 42
//! workers: 4
//! train_fraction: 0.8
//! confidence_threshold: 0.25
//! resize_output_enabled: true
//! resize_output_resolution: 640x640
//! augmentation:
//!   weather:
//!     enabled: false
//! ```
//!
//! Every key is optional. Unknown keys are an error so typos do not pass
//! silently.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LabelkitError;
use crate::export::DEFAULT_TRAIN_FRACTION;
use crate::model::{
    AugmentationSettings, Resolution, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_RESIZE_RESOLUTION,
};
use crate::state::DEFAULT_AUTOSAVE_INTERVAL;

/// Directory used for session state when nothing else is configured.
pub const DEFAULT_STATE_DIR: &str = ".labelkit";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub state_dir: PathBuf,
    pub autosave_interval_secs: u64,
    pub num_augmentations: usize,
    pub seed: Option<u64>,
    /// Background worker threads; at least one is always started.
    pub workers: usize,
    pub train_fraction: f64,
    pub confidence_threshold: f32,
    pub resize_output_enabled: bool,
    pub resize_output_resolution: String,
    pub augmentation: AugmentationSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            autosave_interval_secs: DEFAULT_AUTOSAVE_INTERVAL.as_secs(),
            num_augmentations: 0,
            seed: None,
            workers: 2,
            train_fraction: DEFAULT_TRAIN_FRACTION,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            resize_output_enabled: false,
            resize_output_resolution: DEFAULT_RESIZE_RESOLUTION.to_string(),
            augmentation: AugmentationSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Reads and validates a YAML config file.
    pub fn from_path(path: &Path) -> Result<Self, LabelkitError> {
        let text = fs::read_to_string(path).map_err(LabelkitError::Io)?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, LabelkitError> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|source| LabelkitError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, LabelkitError> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), LabelkitError> {
        self.augmentation.validate()?;
        self.resize_output_resolution.parse::<Resolution>()?;

        if !(self.train_fraction > 0.0 && self.train_fraction <= 1.0) {
            return Err(LabelkitError::InvalidSetting {
                field: "train_fraction".to_string(),
                value: self.train_fraction,
                message: "must be in (0, 1]".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(LabelkitError::InvalidSetting {
                field: "confidence_threshold".to_string(),
                value: f64::from(self.confidence_threshold),
                message: "must be in [0, 1]".to_string(),
            });
        }
        Ok(())
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }
}

/// Fuzz-only entrypoint for config parsing.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_config(input: &str) -> Result<(), LabelkitError> {
    let _ = EngineConfig::parse(input, Path::new("<fuzz>"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: EngineConfig = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.autosave_interval(), Duration::from_secs(30));
    }

    #[test]
    fn nested_settings_merge_with_defaults() {
        let yaml = "num_augmentations: 3\naugmentation:\n  weather:\n    enabled: false\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(config.num_augmentations, 3);
        assert!(!config.augmentation.weather.enabled);
        assert_eq!(config.augmentation.weather.fog_prob, 0.3);
        assert!(config.augmentation.blur.enabled);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_yaml::from_str::<EngineConfig>("num_augmentation: 3\n").is_err());
        assert!(serde_yaml::from_str::<EngineConfig>("augmentation:\n  blur:\n    blur_p: 1\n")
            .is_err());
    }

    #[test]
    fn file_with_bad_values_fails_validation() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("labelkit.yaml");
        fs::write(&path, "resize_output_resolution: 640by640\n").expect("write config");
        assert!(matches!(
            EngineConfig::from_path(&path),
            Err(LabelkitError::InvalidResolution(_))
        ));

        fs::write(&path, "train_fraction: 0\n").expect("write config");
        assert!(matches!(
            EngineConfig::from_path(&path),
            Err(LabelkitError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn malformed_yaml_reports_path() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("labelkit.yaml");
        fs::write(&path, "workers: [").expect("write config");
        match EngineConfig::from_path(&path) {
            Err(LabelkitError::ConfigParse { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected ConfigParse, got {other:?}"),
        }
    }
}
