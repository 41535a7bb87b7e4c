//! Detector collaborator interface.
//!
//! Inference itself lives outside the engine. A [`Detector`] reports raw
//! detections in its own class index space; [`normalize_detections`] turns
//! them into [`BoundingBox`]es keyed by the session's class list.

use std::path::Path;

use thiserror::Error;

use crate::model::{normalized_to_pixel, BoundingBox, ClassId, NormBox, PixelBox};

/// Failure reported by a detector for one image.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DetectorError {
    pub message: String,
}

impl DetectorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One raw detection.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Index into [`Detector::class_names`].
    pub class_id: i32,
    pub bbox_norm: NormBox,
    /// Pixel corners as reported by the detector; recomputed by the engine.
    pub bbox_pixels: Option<PixelBox>,
    pub confidence: f32,
}

/// An object detector.
pub trait Detector: Send + Sync {
    /// Names of the classes the model predicts, indexed by detection class id.
    fn class_names(&self) -> Vec<String>;

    /// Runs inference on one image, returning detections at or above
    /// `confidence_threshold`.
    fn detect(
        &self,
        image_path: &Path,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectorError>;
}

/// Converts raw detections into boxes for an image of the given size.
///
/// Coordinates are clamped into `[0, 1]` and pixel caches recomputed.
/// Detector class indices are mapped to session ids by name; names missing
/// from `app_classes` map to [`ClassId::UNASSIGNED`]. Detections below the
/// threshold are dropped.
pub fn normalize_detections(
    detections: &[Detection],
    detector_classes: &[String],
    app_classes: &[String],
    confidence_threshold: f32,
    width: u32,
    height: u32,
) -> Vec<BoundingBox> {
    detections
        .iter()
        .filter(|d| d.confidence.is_finite() && d.confidence >= confidence_threshold)
        .map(|d| {
            let class_id = usize::try_from(d.class_id)
                .ok()
                .and_then(|i| detector_classes.get(i))
                .and_then(|name| app_classes.iter().position(|c| c == name))
                .map(ClassId::from_index)
                .unwrap_or(ClassId::UNASSIGNED);

            let bbox_norm = d.bbox_norm.clamped();
            BoundingBox {
                class_id,
                bbox_norm,
                bbox_pixels: normalized_to_pixel(bbox_norm, width, height),
                confidence: Some(d.confidence),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn detection(class_id: i32, confidence: f32) -> Detection {
        Detection {
            class_id,
            bbox_norm: NormBox::new(0.5, 0.5, 0.2, 0.2),
            bbox_pixels: None,
            confidence,
        }
    }

    #[test]
    fn maps_detector_classes_by_name() {
        let detector = names(&["dog", "cat"]);
        let app = names(&["cat", "bird", "dog"]);
        let boxes = normalize_detections(
            &[detection(0, 0.9), detection(1, 0.8), detection(7, 0.9)],
            &detector,
            &app,
            0.25,
            100,
            100,
        );
        let ids: Vec<i32> = boxes.iter().map(|b| b.class_id.as_i32()).collect();
        assert_eq!(ids, vec![2, 0, -1]);
    }

    #[test]
    fn drops_low_confidence_and_clamps() {
        let mut wild = detection(0, 0.5);
        wild.bbox_norm = NormBox::new(1.4, -0.2, 0.3, 2.0);
        let boxes = normalize_detections(
            &[detection(0, 0.1), wild],
            &names(&["a"]),
            &names(&["a"]),
            0.25,
            200,
            100,
        );
        assert_eq!(boxes.len(), 1);
        assert!(boxes[0].bbox_norm.is_in_range());
        assert!(boxes[0].bbox_pixels.is_some());
        assert_eq!(boxes[0].confidence, Some(0.5));
    }
}
