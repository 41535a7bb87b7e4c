//! Annotation data model.
//!
//! Boxes are stored in normalized center form and cached in pixel corner
//! form for the owning image's dimensions. The typed float geometry in
//! [`bbox`] and [`coord`] is used for resize and augmentation math.

pub mod annotation;
pub mod app_data;
pub mod bbox;
pub mod coord;
pub mod geometry;
pub mod ids;
pub mod settings;
mod space;

pub use annotation::{BoundingBox, ImageAnnotation, ImageKind, ImageSource};
pub use app_data::{AppData, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_RESIZE_RESOLUTION};
pub use bbox::BBoxXYXY;
pub use coord::Coord;
pub use geometry::{normalized_to_pixel, pixel_to_normalized, NormBox, PixelBox};
pub use ids::ClassId;
pub use settings::{
    AugmentationSettings, BlurSettings, Category, ColorSettings, GeometricSettings,
    NoiseSettings, Resolution, WeatherSettings,
};
pub use space::{Normalized, Pixel};
