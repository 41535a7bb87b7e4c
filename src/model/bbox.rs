//! Floating-point bounding boxes in corner (XYXY) form.
//!
//! These are the working representation for geometric math (letterboxing,
//! flips, rotations, distortions). The stored representation on a
//! [`BoundingBox`](super::BoundingBox) is the normalized center form.

use super::coord::Coord;
use super::{Normalized, Pixel};

/// An axis-aligned bounding box in XYXY format (xmin, ymin, xmax, ymax).
///
/// The constructor does not enforce `min <= max`; use [`is_ordered`] and
/// [`clip`] where it matters.
///
/// [`is_ordered`]: BBoxXYXY::is_ordered
/// [`clip`]: BBoxXYXY::clip
#[derive(Clone, Copy, PartialEq)]
pub struct BBoxXYXY<TSpace> {
    pub min: Coord<TSpace>,
    pub max: Coord<TSpace>,
}

impl<TSpace> BBoxXYXY<TSpace> {
    /// Creates a new bounding box from min and max corners.
    #[inline]
    pub fn new(min: Coord<TSpace>, max: Coord<TSpace>) -> Self {
        Self { min, max }
    }

    /// Creates a new bounding box from explicit coordinates.
    #[inline]
    pub fn from_xyxy(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            min: Coord::new(xmin, ymin),
            max: Coord::new(xmax, ymax),
        }
    }

    /// Creates a box from center, width and height.
    #[inline]
    pub fn from_cxcywh(cx: f64, cy: f64, w: f64, h: f64) -> Self {
        Self::from_xyxy(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    /// Returns `(cx, cy, w, h)`.
    #[inline]
    pub fn to_cxcywh(&self) -> (f64, f64, f64, f64) {
        (
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
            self.width(),
            self.height(),
        )
    }

    #[inline]
    pub fn xmin(&self) -> f64 {
        self.min.x
    }

    #[inline]
    pub fn ymin(&self) -> f64 {
        self.min.y
    }

    #[inline]
    pub fn xmax(&self) -> f64 {
        self.max.x
    }

    #[inline]
    pub fn ymax(&self) -> f64 {
        self.max.y
    }

    /// Width of the box; negative if the box is malformed.
    #[inline]
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    /// Height of the box; negative if the box is malformed.
    #[inline]
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    /// Area of the box, or zero for a malformed box.
    #[inline]
    pub fn area(&self) -> f64 {
        if self.is_ordered() {
            self.width() * self.height()
        } else {
            0.0
        }
    }

    /// Returns true if all coordinates are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// Returns true if `min <= max` on both axes.
    #[inline]
    pub fn is_ordered(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y
    }

    /// Clips the box to `[0, max_x] x [0, max_y]`.
    pub fn clip(&self, max_x: f64, max_y: f64) -> Self {
        Self::from_xyxy(
            self.min.x.clamp(0.0, max_x),
            self.min.y.clamp(0.0, max_y),
            self.max.x.clamp(0.0, max_x),
            self.max.y.clamp(0.0, max_y),
        )
    }

    /// The four corners, clockwise from the top-left.
    pub fn corners(&self) -> [Coord<TSpace>; 4] {
        [
            Coord::new(self.min.x, self.min.y),
            Coord::new(self.max.x, self.min.y),
            Coord::new(self.max.x, self.max.y),
            Coord::new(self.min.x, self.max.y),
        ]
    }

    /// Smallest axis-aligned box containing every point, or `None` if there
    /// are no finite points.
    pub fn envelope<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Coord<TSpace>>,
    {
        let mut bounds: Option<(f64, f64, f64, f64)> = None;
        for point in points.into_iter().filter(Coord::is_finite) {
            bounds = Some(match bounds {
                None => (point.x, point.y, point.x, point.y),
                Some((x0, y0, x1, y1)) => (
                    x0.min(point.x),
                    y0.min(point.y),
                    x1.max(point.x),
                    y1.max(point.y),
                ),
            });
        }
        bounds.map(|(x0, y0, x1, y1)| Self::from_xyxy(x0, y0, x1, y1))
    }
}

impl<TSpace> std::fmt::Debug for BBoxXYXY<TSpace> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BBoxXYXY")
            .field("xmin", &self.min.x)
            .field("ymin", &self.min.y)
            .field("xmax", &self.max.x)
            .field("ymax", &self.max.y)
            .finish()
    }
}

impl<TSpace> Default for BBoxXYXY<TSpace> {
    fn default() -> Self {
        Self::from_xyxy(0.0, 0.0, 0.0, 0.0)
    }
}

impl BBoxXYXY<Pixel> {
    /// Converts pixel coordinates to normalized coordinates.
    pub fn to_normalized(&self, image_width: f64, image_height: f64) -> BBoxXYXY<Normalized> {
        BBoxXYXY::from_xyxy(
            self.min.x / image_width,
            self.min.y / image_height,
            self.max.x / image_width,
            self.max.y / image_height,
        )
    }
}

impl BBoxXYXY<Normalized> {
    /// Converts normalized coordinates to pixel coordinates.
    pub fn to_pixel(&self, image_width: f64, image_height: f64) -> BBoxXYXY<Pixel> {
        BBoxXYXY::from_xyxy(
            self.min.x * image_width,
            self.min.y * image_height,
            self.max.x * image_width,
            self.max.y * image_height,
        )
    }
}
