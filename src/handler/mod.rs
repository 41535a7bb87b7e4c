//! Mutation facade over [`AppData`].
//!
//! [`DataHandler`] borrows the session's data mutably for the duration of an
//! operation. Operations naming an image that is not in the session are
//! logged and treated as no-ops.

mod scan;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use log::{debug, info, warn};

use crate::detect::{normalize_detections, Detection};
use crate::error::LabelkitError;
use crate::export::UniqueNamer;
use crate::model::{
    AppData, AugmentationSettings, BoundingBox, ClassId, ImageAnnotation, ImageSource, PixelBox,
    Resolution,
};

pub use scan::{collect_image_files, has_image_extension, IMAGE_EXTENSIONS};

/// Outcome of [`DataHandler::import_classes`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassImportReport {
    pub imported: Vec<String>,
    pub skipped_blank: usize,
    pub skipped_duplicate: usize,
}

impl fmt::Display for ClassImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Imported {} classes ({} duplicates, {} blank lines skipped)",
            self.imported.len(),
            self.skipped_duplicate,
            self.skipped_blank
        )?;
        for name in &self.imported {
            writeln!(f, "  + {}", name)?;
        }
        Ok(())
    }
}

/// Outcome of [`DataHandler::purge_session_entries`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub synthetic_removed: usize,
    pub missing_removed: usize,
}

impl PurgeReport {
    pub fn total(&self) -> usize {
        self.synthetic_removed + self.missing_removed
    }
}

impl fmt::Display for PurgeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "removed {} augmented and {} missing entries",
            self.synthetic_removed, self.missing_removed
        )
    }
}

/// Outcome of [`DataHandler::flush_synthetic_images`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub dropped: usize,
}

/// Mutable view over a session's [`AppData`].
pub struct DataHandler<'a> {
    data: &'a mut AppData,
    classes_locked: bool,
}

impl<'a> DataHandler<'a> {
    pub fn new(data: &'a mut AppData) -> Self {
        Self {
            data,
            classes_locked: false,
        }
    }

    /// While locked, operations that rewrite existing class ids are
    /// refused and change nothing.
    pub fn with_classes_locked(mut self, locked: bool) -> Self {
        self.classes_locked = locked;
        self
    }

    fn class_ids_locked(&self, operation: &str) -> bool {
        if self.classes_locked {
            warn!("{} refused: class ids are locked while a batch runs", operation);
        }
        self.classes_locked
    }

    pub fn data(&self) -> &AppData {
        self.data
    }

    /// Registers image paths without loading them. Paths already present,
    /// and repeats within `paths`, are ignored. Returns the paths added.
    pub fn add_image_paths<I, S>(&mut self, paths: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = Vec::new();
        for path in paths {
            let path = path.into();
            if path.is_empty() || self.data.images.contains_key(&path) {
                continue;
            }
            self.data
                .images
                .insert(path.clone(), ImageAnnotation::new(path.clone()));
            added.push(path);
        }
        debug!("registered {} new image paths", added.len());
        added
    }

    /// Paths of images with at least one box, sorted.
    pub fn get_annotated_image_paths(&self) -> Vec<String> {
        self.data
            .images
            .values()
            .filter(|img| img.has_boxes())
            .map(|img| img.image_path.clone())
            .collect()
    }

    pub fn has_annotations(&self) -> bool {
        self.data.images.values().any(ImageAnnotation::has_boxes)
    }

    /// Rewrites every box with class `old` to `new`. Returns the number of
    /// boxes changed; a `new` id outside the class list changes nothing.
    pub fn remap_class_id(&mut self, old: ClassId, new: ClassId) -> usize {
        if self.class_ids_locked("remap_class_id") {
            return 0;
        }
        if !new.is_valid_for(self.data.classes.len()) {
            warn!("class id {} is out of range; nothing remapped", new);
            return 0;
        }
        let mut changed = 0;
        for bbox in self.boxes_mut() {
            if bbox.class_id == old {
                bbox.class_id = new;
                changed += 1;
            }
        }
        changed
    }

    /// Merges augmented entries. An existing original is never replaced; an
    /// entry without a synthetic origin is rejected. Returns the number of
    /// entries merged.
    pub fn add_augmented_data(&mut self, entries: BTreeMap<String, ImageAnnotation>) -> usize {
        let mut merged = 0;
        for (path, annotation) in entries {
            if !annotation.is_synthetic() {
                warn!("refusing to merge {}: not tagged as augmented", path);
                continue;
            }
            if let Some(existing) = self.data.images.get(&path) {
                if !existing.is_synthetic() {
                    warn!("refusing to overwrite original image {}", path);
                    continue;
                }
            }
            self.data.images.insert(path, annotation);
            merged += 1;
        }
        info!("merged {} augmented images", merged);
        merged
    }

    // Classes

    /// Appends a class. Blank and duplicate names are rejected.
    pub fn add_class(&mut self, name: &str) -> Result<ClassId, LabelkitError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LabelkitError::InvalidClassName(name.to_string()));
        }
        if self.data.classes.iter().any(|c| c == name) {
            return Err(LabelkitError::DuplicateClass(name.to_string()));
        }
        self.data.classes.push(name.to_string());
        Ok(ClassId::from_index(self.data.classes.len() - 1))
    }

    /// Removes a class. Its boxes become unassigned and every higher id
    /// shifts down by one. Returns the removed id, or `None` if the class is
    /// unknown or class ids are locked.
    pub fn remove_class(&mut self, name: &str) -> Option<ClassId> {
        if self.class_ids_locked("remove_class") {
            return None;
        }
        let index = self.data.classes.iter().position(|c| c == name)?;
        self.data.classes.remove(index);

        let removed = ClassId::from_index(index);
        for bbox in self.boxes_mut() {
            if bbox.class_id == removed {
                bbox.class_id = ClassId::UNASSIGNED;
            } else if bbox.class_id > removed {
                bbox.class_id = ClassId::new(bbox.class_id.as_i32() - 1);
            }
        }
        info!("removed class '{}' (id {})", name, removed);
        Some(removed)
    }

    /// Appends each non-blank name not already present.
    pub fn import_classes<I, S>(&mut self, names: I) -> ClassImportReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = ClassImportReport::default();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                report.skipped_blank += 1;
            } else if self.data.classes.iter().any(|c| c == name) {
                report.skipped_duplicate += 1;
            } else {
                self.data.classes.push(name.to_string());
                report.imported.push(name.to_string());
            }
        }
        report
    }

    /// Appends detector class names not yet present, preserving the existing
    /// order. Returns the names added.
    pub fn merge_model_classes(&mut self, names: &[String]) -> Vec<String> {
        let mut added = Vec::new();
        for name in names {
            if !name.trim().is_empty() && !self.data.classes.contains(name) {
                self.data.classes.push(name.clone());
                added.push(name.clone());
            }
        }
        if !added.is_empty() {
            info!("added {} classes from the model", added.len());
        }
        added
    }

    // Boxes

    /// Replaces an image's boxes with detector output and marks it
    /// processed. Returns the number of boxes stored, or `None` for an
    /// unknown path.
    pub fn apply_detections(
        &mut self,
        path: &str,
        width: u32,
        height: u32,
        detections: &[Detection],
        detector_classes: &[String],
    ) -> Option<usize> {
        let threshold = self.data.confidence_threshold;
        let boxes = normalize_detections(
            detections,
            detector_classes,
            &self.data.classes,
            threshold,
            width,
            height,
        );

        let image = self.image_mut(path)?;
        image.width = width;
        image.height = height;
        image.boxes = boxes;
        image.processed = true;
        Some(image.boxes.len())
    }

    /// Adds a hand-drawn box with no class. Returns its index, or `None` if
    /// the path is unknown or the image dimensions are not loaded.
    pub fn add_drawn_box(&mut self, path: &str, box_px: PixelBox) -> Option<usize> {
        let image = self.image_mut(path)?;
        let Some(bbox) =
            BoundingBox::from_pixels(ClassId::UNASSIGNED, box_px, image.width, image.height)
        else {
            warn!("cannot add a box to {}: dimensions not loaded", path);
            return None;
        };
        image.boxes.push(bbox);
        Some(image.boxes.len() - 1)
    }

    /// Sets the class of one box. Ids outside the class list are refused.
    pub fn assign_class(&mut self, path: &str, box_index: usize, class_id: ClassId) -> bool {
        if !class_id.is_valid_for(self.data.classes.len()) {
            warn!("class id {} is out of range", class_id);
            return false;
        }
        match self
            .image_mut(path)
            .and_then(|img| img.boxes.get_mut(box_index))
        {
            Some(bbox) => {
                bbox.class_id = class_id;
                true
            }
            None => false,
        }
    }

    pub fn delete_box(&mut self, path: &str, box_index: usize) -> bool {
        match self.image_mut(path) {
            Some(image) if box_index < image.boxes.len() => {
                image.boxes.remove(box_index);
                true
            }
            _ => false,
        }
    }

    pub fn delete_image(&mut self, path: &str) -> bool {
        let removed = self.data.images.remove(path).is_some();
        if !removed {
            debug!("delete_image: {} is not in the session", path);
        }
        removed
    }

    /// Removes every image. Classes and settings stay.
    pub fn clear_images(&mut self) -> usize {
        let count = self.data.images.len();
        self.data.images.clear();
        count
    }

    // Dimensions

    pub fn set_image_dimensions(&mut self, path: &str, width: u32, height: u32) -> bool {
        match self.image_mut(path) {
            Some(image) => {
                image.set_dimensions(width, height);
                true
            }
            None => false,
        }
    }

    /// Returns the image's dimensions, reading the file header on first use.
    pub fn ensure_dimensions(&mut self, path: &str) -> Result<(u32, u32), LabelkitError> {
        let image = self
            .data
            .images
            .get_mut(path)
            .ok_or_else(|| LabelkitError::UnknownImage { path: path.into() })?;

        if !image.has_dimensions() {
            let (width, height) = image.read_dimensions()?;
            image.set_dimensions(width, height);
        }
        Ok((image.width, image.height))
    }

    // Session hygiene

    /// Paths of original images whose backing file exists.
    pub fn original_image_paths(&self, exists: impl Fn(&Path) -> bool) -> Vec<String> {
        self.data
            .images
            .values()
            .filter(|img| !img.is_synthetic() && exists(img.path()))
            .map(|img| img.image_path.clone())
            .collect()
    }

    /// Removes augmented entries and entries whose file no longer exists.
    pub fn purge_session_entries(&mut self, exists: impl Fn(&Path) -> bool) -> PurgeReport {
        let mut report = PurgeReport::default();
        self.data.images.retain(|path, image| {
            if image.is_synthetic() {
                report.synthetic_removed += 1;
                false
            } else if !exists(Path::new(path)) {
                report.missing_removed += 1;
                false
            } else {
                true
            }
        });

        if report.total() > 0 {
            info!("session purge: {}", report);
        }
        report
    }

    /// Writes every in-memory buffer into `dir` and re-keys the entry under
    /// its new path. Synthetic entries with no pixels anywhere are dropped.
    pub fn flush_synthetic_images(&mut self, dir: &Path) -> Result<FlushReport, LabelkitError> {
        std::fs::create_dir_all(dir).map_err(|source| LabelkitError::ExportIo {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut report = FlushReport::default();
        let pending: Vec<String> = self
            .data
            .images
            .values()
            .filter(|img| {
                img.is_synthetic()
                    && (matches!(img.source, ImageSource::InMemory(_)) || !img.path().is_file())
            })
            .map(|img| img.image_path.clone())
            .collect();

        let mut namer = UniqueNamer::avoiding_dir(dir)?;
        for key in pending {
            let Some(image) = self.data.images.get_mut(&key) else {
                continue;
            };
            if !matches!(image.source, ImageSource::InMemory(_)) {
                warn!("dropping augmented entry {}: no pixel data", key);
                self.data.images.remove(&key);
                report.dropped += 1;
                continue;
            }

            // The entry stays under its old key until the write succeeds.
            let new_key = image.flush_to(dir.join(namer.assign(&key)))?;
            if let Some(image) = self.data.images.remove(&key) {
                self.data.images.insert(new_key, image);
            }
            report.written += 1;
        }
        Ok(report)
    }

    // Settings

    pub fn set_confidence_threshold(&mut self, threshold: f32) {
        self.data.confidence_threshold = if threshold.is_finite() {
            threshold.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    pub fn set_resize_output(
        &mut self,
        enabled: bool,
        resolution: &str,
    ) -> Result<Resolution, LabelkitError> {
        let parsed: Resolution = resolution.parse()?;
        self.data.resize_output_enabled = enabled;
        self.data.resize_output_resolution = parsed.to_string();
        Ok(parsed)
    }

    pub fn set_model_path(&mut self, model_path: Option<String>) {
        self.data.model_path = model_path;
    }

    pub fn set_augmentation_settings(
        &mut self,
        settings: AugmentationSettings,
    ) -> Result<(), LabelkitError> {
        settings.validate()?;
        self.data.augmentation_settings = settings;
        Ok(())
    }

    fn image_mut(&mut self, path: &str) -> Option<&mut ImageAnnotation> {
        let image = self.data.images.get_mut(path);
        if image.is_none() {
            debug!("{} is not in the session", path);
        }
        image
    }

    fn boxes_mut(&mut self) -> impl Iterator<Item = &mut BoundingBox> {
        self.data
            .images
            .values_mut()
            .flat_map(|img| img.boxes.iter_mut())
    }
}
