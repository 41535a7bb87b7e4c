//! Dataset export.
//!
//! [`export_dataset`] runs the whole pipeline against a session's data:
//! optional augmentation, optional letterbox resize, a shuffled train/val
//! split and finally one of the format writers in [`yolo`], [`coco`] or
//! [`voc`]. The writers share the box filter, file naming and image copy
//! helpers defined here so the three layouts agree on what gets exported.
//!
//! Only images with at least one box are exported. Unassigned boxes
//! (class `-1`) never reach any output.

pub mod coco;
pub mod voc;
pub mod yolo;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::augment::{AugmentReport, Augmenter};
use crate::error::LabelkitError;
use crate::handler::DataHandler;
use crate::model::{AppData, BoundingBox, ImageAnnotation, ImageSource, Resolution};
use crate::resize::resize_with_letterboxing;
use crate::worker::CancelToken;

/// Share of the shuffled images that goes to the training split.
pub const DEFAULT_TRAIN_FRACTION: f64 = 0.8;

/// Directory (under the export root) that receives letterboxed copies.
pub const RESIZED_DIR: &str = "resized_images";

/// Supported output layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Yolo,
    Coco,
    Voc,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Yolo => "yolo",
            ExportFormat::Coco => "coco",
            ExportFormat::Voc => "voc",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = LabelkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yolo" => Ok(ExportFormat::Yolo),
            "coco" => Ok(ExportFormat::Coco),
            "voc" | "pascal-voc" | "pascal_voc" => Ok(ExportFormat::Voc),
            _ => Err(LabelkitError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Read-only input shared by the writers.
#[derive(Clone, Copy, Debug)]
pub struct DatasetView<'a> {
    pub images: &'a BTreeMap<String, ImageAnnotation>,
    pub classes: &'a [String],
}

impl<'a> DatasetView<'a> {
    pub fn new(images: &'a BTreeMap<String, ImageAnnotation>, classes: &'a [String]) -> Self {
        Self { images, classes }
    }

    pub fn of(app: &'a AppData) -> Self {
        Self::new(&app.images, &app.classes)
    }
}

/// Which half of the split an image belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitName {
    Train,
    Val,
}

impl SplitName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitName::Train => "train",
            SplitName::Val => "val",
        }
    }
}

/// Disjoint train and validation image paths.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<String>,
    pub val: Vec<String>,
}

impl Split {
    /// Every path tagged with its split, train first.
    pub fn iter(&self) -> impl Iterator<Item = (SplitName, &str)> {
        self.train
            .iter()
            .map(|p| (SplitName::Train, p.as_str()))
            .chain(self.val.iter().map(|p| (SplitName::Val, p.as_str())))
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.val.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shuffles `paths` and cuts them at `floor(len * train_fraction)`.
///
/// If the cut leaves train empty while val is not, the sides are swapped.
pub fn split_train_val(paths: &[String], train_fraction: f64, seed: Option<u64>) -> Split {
    let mut shuffled = paths.to_vec();
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };
    shuffled.shuffle(&mut rng);

    let fraction = train_fraction.clamp(0.0, 1.0);
    let cut = ((shuffled.len() as f64) * fraction).floor() as usize;
    let val = shuffled.split_off(cut.min(shuffled.len()));
    let mut split = Split {
        train: shuffled,
        val,
    };

    if split.train.is_empty() && !split.val.is_empty() {
        std::mem::swap(&mut split.train, &mut split.val);
    }
    split
}

/// Counts produced by a single writer run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub images: usize,
    pub train_images: usize,
    pub val_images: usize,
    pub boxes: usize,
    pub boxes_unassigned: usize,
    pub boxes_invalid: usize,
    pub images_skipped: usize,
}

impl WriteStats {
    pub(crate) fn record_image(&mut self, split: SplitName) {
        self.images += 1;
        match split {
            SplitName::Train => self.train_images += 1,
            SplitName::Val => self.val_images += 1,
        }
    }
}

/// Boxes of `image` that may be written, paired with their class index.
///
/// Unassigned boxes are skipped silently; ids outside the class list are
/// dropped with a warning.
pub(crate) fn exportable_boxes<'b>(
    image: &'b ImageAnnotation,
    num_classes: usize,
    stats: &mut WriteStats,
) -> Vec<(usize, &'b BoundingBox)> {
    let mut kept = Vec::with_capacity(image.boxes.len());
    for bbox in &image.boxes {
        if !bbox.class_id.is_assigned() {
            stats.boxes_unassigned += 1;
            continue;
        }
        match bbox.class_id.index() {
            Some(index) if index < num_classes => kept.push((index, bbox)),
            _ => {
                warn!(
                    "{}: dropping box with unknown class id {}",
                    image.image_path, bbox.class_id
                );
                stats.boxes_invalid += 1;
            }
        }
    }
    stats.boxes += kept.len();
    kept
}

/// Hands out file names whose stems are unique within one export.
///
/// Label and annotation files are named after the stem, so `cat.jpg` and
/// `cat.png` must not both keep the stem `cat`.
#[derive(Debug, Default)]
pub(crate) struct UniqueNamer {
    taken: HashSet<String>,
}

impl UniqueNamer {
    /// A namer that also steers clear of every stem already present in `dir`.
    pub(crate) fn avoiding_dir(dir: &Path) -> Result<Self, LabelkitError> {
        let io_err = |source| LabelkitError::ExportIo {
            path: dir.to_path_buf(),
            source,
        };
        let mut namer = Self::default();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if let Some(stem) = Path::new(&entry.file_name()).file_stem() {
                namer.taken.insert(stem.to_string_lossy().into_owned());
            }
        }
        Ok(namer)
    }

    /// The file name of `path`, with the stem suffixed `_1`, `_2`, ... if
    /// that stem is already used.
    pub(crate) fn assign(&mut self, path: &str) -> String {
        let path = Path::new(path);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

        let mut candidate = stem.clone();
        let mut n = 1;
        while self.taken.contains(&candidate) {
            candidate = format!("{}_{}", stem, n);
            n += 1;
        }
        self.taken.insert(candidate.clone());
        match ext {
            Some(ext) => format!("{}.{}", candidate, ext),
            None => candidate,
        }
    }
}

/// Writes the pixels of `image` to `destination`.
///
/// Returns `Ok(false)` when the source has no pixels; the caller skips the
/// item. Failures writing the destination are returned.
pub(crate) fn write_image(image: &ImageAnnotation, destination: &Path) -> Result<bool, LabelkitError> {
    match image.write_pixels_to(destination) {
        Ok(()) => Ok(true),
        Err(LabelkitError::MissingPixels { path }) => {
            warn!("skipping {}: source image is missing", path.display());
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Known dimensions of `image`, or the ones read from its header.
///
/// `None` (after a warning) when they cannot be determined.
pub(crate) fn resolve_dimensions(image: &ImageAnnotation) -> Option<(u32, u32)> {
    if image.has_dimensions() {
        return Some((image.width, image.height));
    }
    match image.read_dimensions() {
        Ok(dims) => Some(dims),
        Err(err) => {
            warn!("skipping {}: {}", image.image_path, err);
            None
        }
    }
}

pub(crate) fn create_dir(path: &Path) -> Result<(), LabelkitError> {
    fs::create_dir_all(path).map_err(|source| LabelkitError::ExportIo {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), LabelkitError> {
    fs::write(path, contents).map_err(|source| LabelkitError::ExportIo {
        path: path.to_path_buf(),
        source,
    })
}

/// What to export and where.
#[derive(Clone, Debug)]
pub struct ExportRequest {
    pub format: ExportFormat,
    pub output_dir: PathBuf,
    /// Augmented variants generated per annotated original; 0 disables.
    pub num_augmentations: usize,
    /// Fixes the augmentation and split randomness.
    pub seed: Option<u64>,
    pub train_fraction: f64,
    pub cancel: CancelToken,
}

impl ExportRequest {
    pub fn new(format: ExportFormat, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            format,
            output_dir: output_dir.into(),
            num_augmentations: 0,
            seed: None,
            train_fraction: DEFAULT_TRAIN_FRACTION,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_augmentations(mut self, num_augmentations: usize) -> Self {
        self.num_augmentations = num_augmentations;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_train_fraction(mut self, train_fraction: f64) -> Self {
        self.train_fraction = train_fraction;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Summary of an [`export_dataset`] run.
#[derive(Clone, Debug)]
pub struct ExportReport {
    pub format: ExportFormat,
    pub output_dir: PathBuf,
    pub augmentation: Option<AugmentReport>,
    pub augmented_merged: usize,
    pub resized: Option<Resolution>,
    pub resize_failed: usize,
    pub stats: WriteStats,
}

impl fmt::Display for ExportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Exported {} images ({} train, {} val) as {} to {}",
            self.stats.images,
            self.stats.train_images,
            self.stats.val_images,
            self.format,
            self.output_dir.display()
        )?;
        writeln!(f, "  boxes written: {}", self.stats.boxes)?;
        if self.stats.boxes_unassigned > 0 {
            writeln!(f, "  unassigned boxes left out: {}", self.stats.boxes_unassigned)?;
        }
        if self.stats.boxes_invalid > 0 {
            writeln!(f, "  boxes with unknown class dropped: {}", self.stats.boxes_invalid)?;
        }
        if let Some(augmentation) = &self.augmentation {
            writeln!(
                f,
                "  augmentation: {} ({} merged)",
                augmentation, self.augmented_merged
            )?;
        }
        if let Some(resolution) = self.resized {
            writeln!(f, "  letterboxed to {}", resolution)?;
        }
        let skipped = self.stats.images_skipped + self.resize_failed;
        if skipped > 0 {
            writeln!(f, "  images skipped: {}", skipped)?;
        }
        Ok(())
    }
}

/// Runs the export pipeline over `app`.
///
/// Augmented variants are merged into `app` before writing, so they remain
/// in the session afterwards. Validation happens before anything is
/// written; an output I/O failure aborts the run and leaves the files
/// already written in place.
pub fn export_dataset(
    app: &mut AppData,
    augmenter: &Augmenter,
    request: &ExportRequest,
) -> Result<ExportReport, LabelkitError> {
    let resolution = if app.resize_output_enabled {
        Some(app.resize_output_resolution.parse::<Resolution>()?)
    } else {
        None
    };
    if !request.train_fraction.is_finite()
        || request.train_fraction <= 0.0
        || request.train_fraction > 1.0
    {
        return Err(LabelkitError::InvalidSetting {
            field: "train_fraction".to_string(),
            value: request.train_fraction,
            message: "must be in (0, 1]".to_string(),
        });
    }
    if !DataHandler::new(app).has_annotations() {
        return Err(LabelkitError::NothingToExport);
    }
    create_dir(&request.output_dir)?;

    let mut report = ExportReport {
        format: request.format,
        output_dir: request.output_dir.clone(),
        augmentation: None,
        augmented_merged: 0,
        resized: resolution,
        resize_failed: 0,
        stats: WriteStats::default(),
    };

    if request.num_augmentations > 0 {
        let originals: Vec<ImageAnnotation> = app
            .images
            .values()
            .filter(|img| !img.is_synthetic() && img.has_boxes())
            .cloned()
            .collect();
        let augmenter = match request.seed {
            Some(seed) => augmenter.clone().with_seed(seed),
            None => augmenter.clone(),
        };
        let outcome = augmenter.augment_batch_until(&originals, request.num_augmentations, || {
            request.cancel.is_cancelled()
        });
        request.cancel.check()?;
        report.augmented_merged = DataHandler::new(app).add_augmented_data(outcome.entries);
        report.augmentation = Some(outcome.report);
    }

    let resized_images;
    let images = match resolution {
        Some(target) => {
            let dir = request.output_dir.join(RESIZED_DIR);
            let (images, failed) = letterbox_annotated(&app.images, target, &dir, &request.cancel)?;
            report.resize_failed = failed;
            resized_images = images;
            &resized_images
        }
        None => &app.images,
    };

    let annotated: Vec<String> = images
        .values()
        .filter(|img| img.has_boxes())
        .map(|img| img.image_path.clone())
        .collect();
    let split = split_train_val(&annotated, request.train_fraction, request.seed);
    info!(
        "exporting {} images as {} ({} train, {} val)",
        split.len(),
        request.format,
        split.train.len(),
        split.val.len()
    );

    let view = DatasetView::new(images, &app.classes);
    report.stats = match request.format {
        ExportFormat::Yolo => yolo::write_yolo(view, &request.output_dir, &split, &request.cancel)?,
        ExportFormat::Coco => coco::write_coco(view, &request.output_dir, &split, &request.cancel)?,
        ExportFormat::Voc => voc::write_voc(view, &request.output_dir, &split, &request.cancel)?,
    };

    info!(
        "export finished: {} images, {} boxes",
        report.stats.images, report.stats.boxes
    );
    Ok(report)
}

/// Letterboxes every annotated image into `dir` and returns the resized
/// entries keyed by their new path, plus the number that failed to load.
fn letterbox_annotated(
    images: &BTreeMap<String, ImageAnnotation>,
    target: Resolution,
    dir: &Path,
    cancel: &CancelToken,
) -> Result<(BTreeMap<String, ImageAnnotation>, usize), LabelkitError> {
    create_dir(dir)?;

    let mut namer = UniqueNamer::default();
    let mut resized = BTreeMap::new();
    let mut failed = 0;

    for image in images.values().filter(|img| img.has_boxes()) {
        cancel.check()?;

        let pixels = match image.load_rgb() {
            Ok(pixels) => pixels,
            Err(err) => {
                warn!("skipping resize of {}: {}", image.image_path, err);
                failed += 1;
                continue;
            }
        };

        let (canvas, boxes) = resize_with_letterboxing(&pixels, target, &image.boxes);
        let destination = dir.join(namer.assign(&image.image_path));
        canvas
            .save(&destination)
            .map_err(|source| LabelkitError::ImageEncode {
                path: destination.clone(),
                source,
            })?;
        debug!("letterboxed {} -> {}", image.image_path, destination.display());

        let path = destination.to_string_lossy().into_owned();
        let mut entry = ImageAnnotation {
            image_path: path.clone(),
            width: target.width,
            height: target.height,
            boxes,
            processed: true,
            kind: image.kind.clone(),
            source: ImageSource::OnDisk,
        };
        entry.refresh_box_pixels();
        resized.insert(path, entry);
    }

    info!("letterboxed {} images to {}", resized.len(), target);
    Ok((resized, failed))
}
