//! Bounded background pool for detection and augmentation batches.
//!
//! A batch takes owned snapshots, runs its items one after another in input
//! order on a pool thread, and reports through a channel. The owner of the
//! session data drains the channel and applies results on its own thread.
//! Cancellation is cooperative: the flag is checked between items and
//! results already sent stay valid.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use log::{debug, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::augment::{AugmentItem, Augmenter};
use crate::detect::{Detection, Detector};
use crate::error::LabelkitError;
use crate::model::ImageAnnotation;

/// Shared cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once the flag is set.
    pub fn check(&self) -> Result<(), LabelkitError> {
        if self.is_cancelled() {
            Err(LabelkitError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Totals reported when a batch ends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

/// Message from a running batch.
#[derive(Debug)]
pub enum BatchEvent<T> {
    Item(T),
    Failed { item: String, message: String },
    Progress { done: usize, total: usize },
    Finished(BatchSummary),
}

/// Receiving end of a submitted batch.
pub struct BatchHandle<T> {
    cancel: CancelToken,
    events: Receiver<BatchEvent<T>>,
}

impl<T> BatchHandle<T> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn events(&self) -> &Receiver<BatchEvent<T>> {
        &self.events
    }

    /// Blocks until the batch finishes, collecting every item.
    pub fn wait(self) -> (Vec<T>, BatchSummary) {
        let mut items = Vec::new();
        let mut summary = BatchSummary::default();
        for event in self.events.iter() {
            match event {
                BatchEvent::Item(item) => items.push(item),
                BatchEvent::Finished(done) => {
                    summary = done;
                    break;
                }
                BatchEvent::Failed { .. } | BatchEvent::Progress { .. } => {}
            }
        }
        (items, summary)
    }
}

/// Output of detection on one image.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    pub image_path: String,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
    pub detector_classes: Vec<String>,
}

/// Fixed-size pool of background threads.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self, LabelkitError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("labelkit-worker-{}", i))
            .build()?;
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `detector` over each image snapshot in order.
    pub fn submit_detection(
        &self,
        detector: Arc<dyn Detector>,
        images: Vec<ImageAnnotation>,
        confidence_threshold: f32,
    ) -> BatchHandle<DetectionResult> {
        let detector_classes = detector.class_names();
        self.submit(images, move |image, tx| {
            let (width, height) = if image.has_dimensions() {
                (image.width, image.height)
            } else {
                image.read_dimensions().map_err(|e| e.to_string())?
            };
            let detections = detector
                .detect(Path::new(&image.image_path), confidence_threshold)
                .map_err(|e| e.to_string())?;
            send(
                tx,
                BatchEvent::Item(DetectionResult {
                    image_path: image.image_path,
                    width,
                    height,
                    detections,
                    detector_classes: detector_classes.clone(),
                }),
            );
            Ok(1)
        })
    }

    /// Generates `num_augmentations` variants of each original in order.
    pub fn submit_augmentation(
        &self,
        augmenter: Augmenter,
        originals: Vec<ImageAnnotation>,
        num_augmentations: usize,
    ) -> BatchHandle<ImageAnnotation> {
        let seed = augmenter.batch_seed();
        let jobs: Vec<(ImageAnnotation, usize)> = originals
            .into_iter()
            .filter(ImageAnnotation::has_boxes)
            .flat_map(|img| (0..num_augmentations).map(move |i| (img.clone(), i)))
            .collect();

        self.submit(jobs, move |(original, index), tx| {
            match augmenter
                .augment_image(&original, index, seed)
                .map_err(|e| e.to_string())?
            {
                AugmentItem::Generated(annotation) => {
                    send(tx, BatchEvent::Item(annotation));
                    Ok(1)
                }
                AugmentItem::Skipped | AugmentItem::Discarded => Ok(0),
            }
        })
    }

    /// Spawns one sequential batch. `run` returns how many items it emitted
    /// (0 counts as skipped) or a failure message.
    fn submit<J, T, F>(&self, jobs: Vec<J>, run: F) -> BatchHandle<T>
    where
        J: Labelled + Send + 'static,
        T: Send + 'static,
        F: Fn(J, &Sender<BatchEvent<T>>) -> Result<usize, String> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let cancel = CancelToken::new();
        let token = cancel.clone();

        self.pool.spawn(move || {
            let total = jobs.len();
            let mut summary = BatchSummary {
                total,
                ..BatchSummary::default()
            };
            debug!("batch of {} items started", total);

            for (done, job) in jobs.into_iter().enumerate() {
                if token.is_cancelled() {
                    summary.cancelled = true;
                    break;
                }

                let label = job.label();
                match run(job, &tx) {
                    Ok(0) => summary.skipped += 1,
                    Ok(_) => summary.completed += 1,
                    Err(message) => {
                        warn!("{}: {}", label, message);
                        summary.failed += 1;
                        send(
                            &tx,
                            BatchEvent::Failed {
                                item: label,
                                message,
                            },
                        );
                    }
                }
                if !send(
                    &tx,
                    BatchEvent::Progress {
                        done: done + 1,
                        total,
                    },
                ) {
                    // Receiver gone; nobody is listening.
                    summary.cancelled = true;
                    break;
                }
            }

            info!(
                "batch finished: {} done, {} failed, {} skipped{}",
                summary.completed,
                summary.failed,
                summary.skipped,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
            send(&tx, BatchEvent::Finished(summary));
        });

        BatchHandle { cancel, events: rx }
    }
}

/// Name used for an item in failure messages.
trait Labelled {
    fn label(&self) -> String;
}

impl Labelled for ImageAnnotation {
    fn label(&self) -> String {
        self.image_path.clone()
    }
}

impl Labelled for (ImageAnnotation, usize) {
    fn label(&self) -> String {
        format!("{} #{}", self.0.image_path, self.1)
    }
}

fn send<T>(tx: &Sender<BatchEvent<T>>, event: BatchEvent<T>) -> bool {
    tx.send(event).is_ok()
}
