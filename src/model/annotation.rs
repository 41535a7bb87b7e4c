//! Per-image annotation state: boxes, origin and pixel source.

use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::geometry::{normalized_to_pixel, pixel_to_normalized, NormBox, PixelBox};
use super::ids::ClassId;
use crate::error::LabelkitError;

/// One detected or hand-drawn object region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Class index, or `-1` when unassigned.
    pub class_id: ClassId,

    /// Canonical resolution-independent box.
    pub bbox_norm: NormBox,

    /// Pixel cache for the image's current dimensions. `None` until the
    /// dimensions are known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox_pixels: Option<PixelBox>,

    /// Detector confidence; absent for hand-drawn boxes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl BoundingBox {
    /// Creates a box from a normalized box, clamping it into `[0, 1]`.
    pub fn new(class_id: impl Into<ClassId>, bbox_norm: NormBox) -> Self {
        Self {
            class_id: class_id.into(),
            bbox_norm: bbox_norm.clamped(),
            bbox_pixels: None,
            confidence: None,
        }
    }

    /// Creates a box from pixel corners on an image of the given size.
    ///
    /// Returns `None` if either dimension is zero.
    pub fn from_pixels(
        class_id: impl Into<ClassId>,
        box_px: PixelBox,
        img_w: u32,
        img_h: u32,
    ) -> Option<Self> {
        let bbox_norm = pixel_to_normalized(box_px, img_w, img_h)?;
        let mut bbox = Self::new(class_id, bbox_norm);
        bbox.refresh_pixels(img_w, img_h);
        Some(bbox)
    }

    /// Adds a detector confidence.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Recomputes the pixel cache for new image dimensions.
    pub fn refresh_pixels(&mut self, img_w: u32, img_h: u32) {
        self.bbox_pixels = normalized_to_pixel(self.bbox_norm, img_w, img_h);
    }
}

/// Whether an entry is a real image or a generated variant of one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ImageKind {
    #[default]
    Original,
    Synthetic {
        augmented_from: String,
    },
}

/// Where an entry's pixels live.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ImageSource {
    /// The file at `image_path`.
    #[default]
    OnDisk,
    /// A buffer not yet written anywhere.
    InMemory(RgbImage),
}

/// One image and its label state.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageAnnotation {
    /// Unique key within `AppData::images`.
    pub image_path: String,

    /// Width in pixels, 0 until first load.
    pub width: u32,

    /// Height in pixels, 0 until first load.
    pub height: u32,

    pub boxes: Vec<BoundingBox>,

    /// True once a detector has run on this image.
    pub processed: bool,

    pub kind: ImageKind,

    pub source: ImageSource,
}

impl ImageAnnotation {
    /// Registers an original image without loading it.
    pub fn new(image_path: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            width: 0,
            height: 0,
            boxes: Vec::new(),
            processed: false,
            kind: ImageKind::Original,
            source: ImageSource::OnDisk,
        }
    }

    /// Creates a synthetic entry whose pixels are held in memory.
    pub fn synthetic(
        image_path: impl Into<String>,
        augmented_from: impl Into<String>,
        image: RgbImage,
        boxes: Vec<BoundingBox>,
    ) -> Self {
        let (width, height) = image.dimensions();
        let mut annotation = Self {
            image_path: image_path.into(),
            width,
            height,
            boxes,
            processed: true,
            kind: ImageKind::Synthetic {
                augmented_from: augmented_from.into(),
            },
            source: ImageSource::InMemory(image),
        };
        annotation.refresh_box_pixels();
        annotation
    }

    /// Path of the original this entry was generated from, if any.
    pub fn augmented_from(&self) -> Option<&str> {
        match &self.kind {
            ImageKind::Original => None,
            ImageKind::Synthetic { augmented_from } => Some(augmented_from),
        }
    }

    #[inline]
    pub fn is_synthetic(&self) -> bool {
        matches!(self.kind, ImageKind::Synthetic { .. })
    }

    #[inline]
    pub fn has_boxes(&self) -> bool {
        !self.boxes.is_empty()
    }

    #[inline]
    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    #[inline]
    pub fn path(&self) -> &Path {
        Path::new(&self.image_path)
    }

    /// Sets the dimensions and refreshes every box's pixel cache.
    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.refresh_box_pixels();
    }

    /// Recomputes every box's pixel cache from its normalized box.
    pub fn refresh_box_pixels(&mut self) {
        let (width, height) = (self.width, self.height);
        for bbox in &mut self.boxes {
            bbox.refresh_pixels(width, height);
        }
    }

    /// Reads the dimensions from the in-memory buffer or the file header.
    pub fn read_dimensions(&self) -> Result<(u32, u32), LabelkitError> {
        let (width, height) = match &self.source {
            ImageSource::InMemory(image) => image.dimensions(),
            ImageSource::OnDisk => {
                let size = imagesize::size(self.path()).map_err(|source| {
                    LabelkitError::ImageDimensionRead {
                        path: self.path().to_path_buf(),
                        source,
                    }
                })?;
                (
                    u32::try_from(size.width).unwrap_or(0),
                    u32::try_from(size.height).unwrap_or(0),
                )
            }
        };

        if width == 0 || height == 0 {
            return Err(LabelkitError::ZeroDimensions {
                path: self.path().to_path_buf(),
            });
        }
        Ok((width, height))
    }

    /// Decodes the pixels as RGB, from memory or from disk.
    pub fn load_rgb(&self) -> Result<RgbImage, LabelkitError> {
        match &self.source {
            ImageSource::InMemory(image) => Ok(image.clone()),
            ImageSource::OnDisk => {
                let decoded =
                    image::open(self.path()).map_err(|source| LabelkitError::ImageDecode {
                        path: self.path().to_path_buf(),
                        source,
                    })?;
                Ok(decoded.to_rgb8())
            }
        }
    }

    /// Writes the pixels to `destination`: encodes an in-memory buffer, or
    /// copies the backing file.
    pub fn write_pixels_to(&self, destination: &Path) -> Result<(), LabelkitError> {
        match &self.source {
            ImageSource::InMemory(image) => {
                image
                    .save(destination)
                    .map_err(|source| LabelkitError::ImageEncode {
                        path: destination.to_path_buf(),
                        source,
                    })
            }
            ImageSource::OnDisk => {
                if !self.path().is_file() {
                    return Err(LabelkitError::MissingPixels {
                        path: self.path().to_path_buf(),
                    });
                }
                std::fs::copy(self.path(), destination)
                    .map(|_| ())
                    .map_err(|source| LabelkitError::ExportIo {
                        path: destination.to_path_buf(),
                        source,
                    })
            }
        }
    }

    /// Writes an in-memory buffer to `destination` and switches the entry
    /// to [`ImageSource::OnDisk`] under that path. Returns the new path.
    pub fn flush_to(&mut self, destination: PathBuf) -> Result<String, LabelkitError> {
        self.write_pixels_to(&destination)?;
        self.image_path = destination.to_string_lossy().into_owned();
        self.source = ImageSource::OnDisk;
        Ok(self.image_path.clone())
    }
}
