//! Single owner of a labelling session.
//!
//! A [`Session`] holds the [`AppData`], its [`StateManager`] and the
//! [`Augmenter`] configured from the data's settings. Background batches get
//! snapshots; their events come back here and are applied on the thread
//! that owns the session. While any batch is in flight, class edits are
//! refused so results never land against a shifted class list.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::augment::Augmenter;
use crate::detect::Detector;
use crate::error::LabelkitError;
use crate::export::{export_dataset, ExportReport, ExportRequest};
use crate::handler::{DataHandler, PurgeReport};
use crate::model::{AppData, AugmentationSettings, ImageAnnotation};
use crate::state::StateManager;
use crate::worker::{BatchEvent, BatchHandle, BatchSummary, DetectionResult, WorkerPool};

/// Per-class box count in a [`SessionSummary`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClassSummary {
    pub id: usize,
    pub name: String,
    pub boxes: usize,
}

/// Counts describing a session, for `inspect`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSummary {
    pub images: usize,
    pub originals: usize,
    pub synthetic: usize,
    pub processed: usize,
    pub annotated: usize,
    pub boxes: usize,
    pub unassigned_boxes: usize,
    pub classes: Vec<ClassSummary>,
    pub confidence_threshold: f32,
    pub resize_output: Option<String>,
    pub model_path: Option<String>,
    pub state_file: String,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session")?;
        writeln!(
            f,
            "  images:     {} ({} original, {} augmented, {} processed)",
            self.images, self.originals, self.synthetic, self.processed
        )?;
        writeln!(f, "  annotated:  {}", self.annotated)?;
        writeln!(
            f,
            "  boxes:      {} ({} unassigned)",
            self.boxes, self.unassigned_boxes
        )?;
        writeln!(f, "  confidence: {:.2}", self.confidence_threshold)?;
        match &self.resize_output {
            Some(resolution) => writeln!(f, "  resize:     {}", resolution)?,
            None => writeln!(f, "  resize:     off")?,
        }
        if let Some(model) = &self.model_path {
            writeln!(f, "  model:      {}", model)?;
        }
        writeln!(f, "  state file: {}", self.state_file)?;

        writeln!(f)?;
        writeln!(f, "Classes ({})", self.classes.len())?;
        for class in &self.classes {
            writeln!(f, "  {:>3}  {:<24} {}", class.id, class.name, class.boxes)?;
        }
        Ok(())
    }
}

pub struct Session {
    data: AppData,
    state: StateManager,
    augmenter: Augmenter,
    seed: Option<u64>,
    batches_in_flight: usize,
}

impl Session {
    /// Starts an empty session.
    pub fn new(state: StateManager) -> Self {
        Self {
            data: AppData::new(),
            state,
            augmenter: Augmenter::default(),
            seed: None,
            batches_in_flight: 0,
        }
    }

    /// Loads the recovery file if there is one and purges augmented and
    /// missing entries. Without a recovery file the session starts empty.
    pub fn restore(state: StateManager) -> Result<(Self, Option<PurgeReport>), LabelkitError> {
        let mut session = Self::new(state);
        let Some(mut data) = session.state.load_state()? else {
            return Ok((session, None));
        };

        let report = DataHandler::new(&mut data).purge_session_entries(|p| p.is_file());
        session.augmenter.set_settings(data.augmentation_settings.clone())?;
        session.data = data;
        if report.total() > 0 {
            session.state.mark_dirty();
        }
        info!(
            "restored session with {} images ({})",
            session.data.images.len(),
            report
        );
        Ok((session, Some(report)))
    }

    /// Fixes the seed used for augmentation and the train/val split.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.set_seed(seed);
        self
    }

    pub fn set_seed(&mut self, seed: Option<u64>) {
        self.seed = seed;
        self.augmenter.set_seed(seed);
    }

    pub fn data(&self) -> &AppData {
        &self.data
    }

    pub fn augmenter(&self) -> &Augmenter {
        &self.augmenter
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn is_busy(&self) -> bool {
        self.batches_in_flight > 0
    }

    /// Runs `f` against the data and marks the session dirty. While a batch
    /// is in flight the handler refuses to rewrite class ids; use
    /// [`Session::edit_classes`] to get an error instead.
    pub fn edit<R>(&mut self, f: impl FnOnce(&mut DataHandler<'_>) -> R) -> R {
        let busy = self.is_busy();
        let result = f(&mut DataHandler::new(&mut self.data).with_classes_locked(busy));
        self.state.mark_dirty();
        result
    }

    /// Like [`Session::edit`], for operations that change class ids.
    /// Refused while a batch is running.
    pub fn edit_classes<R>(
        &mut self,
        f: impl FnOnce(&mut DataHandler<'_>) -> R,
    ) -> Result<R, LabelkitError> {
        if self.is_busy() {
            return Err(LabelkitError::SessionBusy);
        }
        Ok(self.edit(f))
    }

    /// Validates and stores new augmentation settings.
    pub fn set_augmentation_settings(
        &mut self,
        settings: AugmentationSettings,
    ) -> Result<(), LabelkitError> {
        self.augmenter.set_settings(settings.clone())?;
        DataHandler::new(&mut self.data).set_augmentation_settings(settings)?;
        self.state.mark_dirty();
        Ok(())
    }

    // Background batches

    /// Runs `detector` over every original image not yet processed.
    pub fn submit_detection(
        &mut self,
        pool: &WorkerPool,
        detector: Arc<dyn Detector>,
    ) -> BatchHandle<DetectionResult> {
        let snapshot: Vec<ImageAnnotation> = self
            .data
            .images
            .values()
            .filter(|img| !img.is_synthetic() && !img.processed)
            .cloned()
            .collect();
        debug!("submitting detection over {} images", snapshot.len());
        self.batches_in_flight += 1;
        pool.submit_detection(detector, snapshot, self.data.confidence_threshold)
    }

    /// Generates `num_augmentations` variants of every annotated original.
    pub fn submit_augmentation(
        &mut self,
        pool: &WorkerPool,
        num_augmentations: usize,
    ) -> BatchHandle<ImageAnnotation> {
        let snapshot: Vec<ImageAnnotation> = self
            .data
            .images
            .values()
            .filter(|img| !img.is_synthetic() && img.has_boxes())
            .cloned()
            .collect();
        self.batches_in_flight += 1;
        pool.submit_augmentation(self.augmenter.clone(), snapshot, num_augmentations)
    }

    /// Applies one event from a detection batch. Returns the summary once
    /// the batch has finished.
    pub fn apply_detection_event(
        &mut self,
        event: BatchEvent<DetectionResult>,
    ) -> Option<BatchSummary> {
        match event {
            BatchEvent::Item(result) => {
                let mut handler = DataHandler::new(&mut self.data);
                handler.merge_model_classes(&result.detector_classes);
                let stored = handler.apply_detections(
                    &result.image_path,
                    result.width,
                    result.height,
                    &result.detections,
                    &result.detector_classes,
                );
                if stored.is_none() {
                    debug!("{} left the session before detection finished", result.image_path);
                }
                self.state.mark_dirty();
                None
            }
            other => self.finish_on(other),
        }
    }

    /// Applies one event from an augmentation batch.
    pub fn apply_augmentation_event(
        &mut self,
        event: BatchEvent<ImageAnnotation>,
    ) -> Option<BatchSummary> {
        match event {
            BatchEvent::Item(annotation) => {
                let entry = BTreeMap::from([(annotation.image_path.clone(), annotation)]);
                DataHandler::new(&mut self.data).add_augmented_data(entry);
                self.state.mark_dirty();
                None
            }
            other => self.finish_on(other),
        }
    }

    fn finish_on<T>(&mut self, event: BatchEvent<T>) -> Option<BatchSummary> {
        match event {
            BatchEvent::Failed { item, message } => {
                debug!("batch item {} failed: {}", item, message);
                None
            }
            BatchEvent::Progress { done, total } => {
                debug!("batch progress {}/{}", done, total);
                None
            }
            BatchEvent::Finished(summary) => {
                self.batches_in_flight = self.batches_in_flight.saturating_sub(1);
                Some(summary)
            }
            BatchEvent::Item(_) => None,
        }
    }

    // Export and persistence

    /// Exports the session. Augmented entries generated on the way stay in
    /// the session until the next restore.
    pub fn export(&mut self, request: &ExportRequest) -> Result<ExportReport, LabelkitError> {
        let request = if request.seed.is_none() && self.seed.is_some() {
            request.clone().with_seed(self.seed)
        } else {
            request.clone()
        };
        let report = export_dataset(&mut self.data, &self.augmenter, &request)?;
        self.state.mark_dirty();
        Ok(report)
    }

    pub fn save(&mut self) -> Result<(), LabelkitError> {
        self.state.save_state(&self.data)
    }

    pub fn auto_save(&mut self) -> Result<bool, LabelkitError> {
        self.state.auto_save_if_needed(&self.data)
    }

    /// Deletes the recovery file and starts over with empty data.
    pub fn reset(&mut self) -> Result<(), LabelkitError> {
        if self.is_busy() {
            return Err(LabelkitError::SessionBusy);
        }
        self.state.clear_state()?;
        self.data = AppData::new();
        self.augmenter.set_settings(self.data.augmentation_settings.clone())?;
        Ok(())
    }

    pub fn summary(&self) -> SessionSummary {
        let mut per_class = vec![0usize; self.data.classes.len()];
        let mut unassigned_boxes = 0;
        for bbox in self.data.images.values().flat_map(|img| img.boxes.iter()) {
            match bbox.class_id.index() {
                Some(index) if index < per_class.len() => per_class[index] += 1,
                _ => unassigned_boxes += 1,
            }
        }

        let images = self.data.images.values();
        SessionSummary {
            images: self.data.images.len(),
            originals: images.clone().filter(|img| !img.is_synthetic()).count(),
            synthetic: self.data.synthetic_count(),
            processed: images.clone().filter(|img| img.processed).count(),
            annotated: images.filter(|img| img.has_boxes()).count(),
            boxes: self.data.box_count(),
            unassigned_boxes,
            classes: self
                .data
                .classes
                .iter()
                .zip(per_class)
                .enumerate()
                .map(|(id, (name, boxes))| ClassSummary {
                    id,
                    name: name.clone(),
                    boxes,
                })
                .collect(),
            confidence_threshold: self.data.confidence_threshold,
            resize_output: self
                .data
                .resize_output_enabled
                .then(|| self.data.resize_output_resolution.clone()),
            model_path: self.data.model_path.clone(),
            state_file: self.state.state_path().display().to_string(),
        }
    }

    /// Original images whose file still exists.
    pub fn original_image_paths(&mut self) -> Vec<String> {
        DataHandler::new(&mut self.data).original_image_paths(Path::is_file)
    }
}
