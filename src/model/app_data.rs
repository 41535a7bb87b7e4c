use std::collections::BTreeMap;

use super::annotation::ImageAnnotation;
use super::settings::{AugmentationSettings, Resolution};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_RESIZE_RESOLUTION: &str = "640x640";

/// Everything a labelling session owns.
#[derive(Clone, Debug, PartialEq)]
pub struct AppData {
    /// Images keyed by path.
    pub images: BTreeMap<String, ImageAnnotation>,

    /// Class names; the position is the class id.
    pub classes: Vec<String>,

    pub model_path: Option<String>,
    pub confidence_threshold: f32,
    pub resize_output_enabled: bool,
    pub resize_output_resolution: String,
    pub augmentation_settings: AugmentationSettings,
}

impl Default for AppData {
    fn default() -> Self {
        Self {
            images: BTreeMap::new(),
            classes: Vec::new(),
            model_path: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            resize_output_enabled: false,
            resize_output_resolution: DEFAULT_RESIZE_RESOLUTION.to_string(),
            augmentation_settings: AugmentationSettings::default(),
        }
    }
}

impl AppData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of boxes across all images.
    pub fn box_count(&self) -> usize {
        self.images.values().map(|img| img.boxes.len()).sum()
    }

    pub fn synthetic_count(&self) -> usize {
        self.images.values().filter(|img| img.is_synthetic()).count()
    }

    /// The parsed output resolution, if the stored string is valid.
    pub fn output_resolution(&self) -> Option<Resolution> {
        self.resize_output_resolution.parse().ok()
    }

    /// Returns true if every box references a known class or is unassigned.
    pub fn class_ids_are_consistent(&self) -> bool {
        let n = self.classes.len();
        self.images
            .values()
            .flat_map(|img| img.boxes.iter())
            .all(|b| b.class_id.is_valid_for(n))
    }
}
