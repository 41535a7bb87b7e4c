//! Pixel <-> normalized bounding box conversion.
//!
//! A box is stored in normalized center form ([`NormBox`]) and cached in
//! integer pixel corner form ([`PixelBox`]) for the current image size.

use serde::{Deserialize, Serialize};

use super::bbox::BBoxXYXY;
use super::{Normalized, Pixel};

/// Normalized `(cx, cy, w, h)`, each a fraction of the image size.
///
/// Persisted as a four-element array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct NormBox {
    pub cx: f64,
    pub cy: f64,
    pub w: f64,
    pub h: f64,
}

impl NormBox {
    #[inline]
    pub fn new(cx: f64, cy: f64, w: f64, h: f64) -> Self {
        Self { cx, cy, w, h }
    }

    /// Clamps every component into `[0, 1]`; non-finite values become 0.
    pub fn clamped(&self) -> Self {
        let clamp = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self::new(clamp(self.cx), clamp(self.cy), clamp(self.w), clamp(self.h))
    }

    /// Returns true if every component is finite and inside `[0, 1]`.
    pub fn is_in_range(&self) -> bool {
        [self.cx, self.cy, self.w, self.h]
            .iter()
            .all(|v| v.is_finite() && (0.0..=1.0).contains(v))
    }

    /// Corner form in normalized space.
    #[inline]
    pub fn to_xyxy(&self) -> BBoxXYXY<Normalized> {
        BBoxXYXY::from_cxcywh(self.cx, self.cy, self.w, self.h)
    }

    /// Builds a normalized box from corners, clipping them to the unit
    /// square first so the result never leaves `[0, 1]`.
    pub fn from_xyxy_clipped(bbox: &BBoxXYXY<Normalized>) -> Self {
        let (cx, cy, w, h) = bbox.clip(1.0, 1.0).to_cxcywh();
        Self::new(cx, cy, w.max(0.0), h.max(0.0)).clamped()
    }

    /// Corner form in pixel space for an image of the given size.
    pub fn to_pixel_xyxy(&self, img_w: u32, img_h: u32) -> BBoxXYXY<Pixel> {
        self.to_xyxy().to_pixel(img_w as f64, img_h as f64)
    }
}

impl From<[f64; 4]> for NormBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<NormBox> for [f64; 4] {
    fn from(b: NormBox) -> Self {
        [b.cx, b.cy, b.w, b.h]
    }
}

/// Integer pixel corners `(x_min, y_min, x_max, y_max)`.
///
/// Persisted as a four-element array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct PixelBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl PixelBox {
    #[inline]
    pub fn new(x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    #[inline]
    pub fn width(&self) -> i32 {
        self.x_max - self.x_min
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.y_max - self.y_min
    }

    #[inline]
    pub fn to_xyxy(&self) -> BBoxXYXY<Pixel> {
        BBoxXYXY::from_xyxy(
            self.x_min as f64,
            self.y_min as f64,
            self.x_max as f64,
            self.y_max as f64,
        )
    }
}

impl From<[i32; 4]> for PixelBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<PixelBox> for [i32; 4] {
    fn from(b: PixelBox) -> Self {
        [b.x_min, b.y_min, b.x_max, b.y_max]
    }
}

/// Converts a pixel corner box to normalized center form.
///
/// Returns `None` if either image dimension is zero.
pub fn pixel_to_normalized(box_px: PixelBox, img_w: u32, img_h: u32) -> Option<NormBox> {
    if img_w == 0 || img_h == 0 {
        return None;
    }

    let (w, h) = (img_w as f64, img_h as f64);
    let x0 = box_px.x_min.min(box_px.x_max) as f64;
    let x1 = box_px.x_min.max(box_px.x_max) as f64;
    let y0 = box_px.y_min.min(box_px.y_max) as f64;
    let y1 = box_px.y_min.max(box_px.y_max) as f64;

    Some(
        NormBox::new(
            (x0 + x1) / (2.0 * w),
            (y0 + y1) / (2.0 * h),
            (x1 - x0) / w,
            (y1 - y0) / h,
        )
        .clamped(),
    )
}

/// Converts a normalized center box to integer pixel corners.
///
/// Coordinates are rounded to the nearest pixel and clamped to
/// `[0, img_w - 1]` / `[0, img_h - 1]`. A box that collapses to zero extent
/// is widened to one pixel. Returns `None` if either dimension is zero.
pub fn normalized_to_pixel(bbox_norm: NormBox, img_w: u32, img_h: u32) -> Option<PixelBox> {
    if img_w == 0 || img_h == 0 {
        return None;
    }

    let corners = bbox_norm.to_pixel_xyxy(img_w, img_h);
    let max_x = img_w as i32 - 1;
    let max_y = img_h as i32 - 1;

    let round = |v: f64, max: i32| -> i32 {
        if v.is_finite() {
            (v.round() as i64).clamp(0, max as i64) as i32
        } else {
            0
        }
    };

    let (x_min, x_max) = ensure_extent(
        round(corners.xmin(), max_x),
        round(corners.xmax(), max_x),
        max_x,
    );
    let (y_min, y_max) = ensure_extent(
        round(corners.ymin(), max_y),
        round(corners.ymax(), max_y),
        max_y,
    );

    Some(PixelBox::new(x_min, y_min, x_max, y_max))
}

fn ensure_extent(lo: i32, hi: i32, max: i32) -> (i32, i32) {
    let (lo, hi) = (lo.min(hi), lo.max(hi));
    if hi > lo {
        (lo, hi)
    } else if lo < max {
        (lo, lo + 1)
    } else if lo > 0 {
        (lo - 1, lo)
    } else {
        // Single-pixel axis: nothing wider fits.
        (0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimensions_fail() {
        let px = PixelBox::new(0, 0, 10, 10);
        assert!(pixel_to_normalized(px, 0, 100).is_none());
        assert!(pixel_to_normalized(px, 100, 0).is_none());
        assert!(normalized_to_pixel(NormBox::new(0.5, 0.5, 0.1, 0.1), 0, 10).is_none());
    }

    #[test]
    fn pixel_to_normalized_uses_center_form() {
        let norm = pixel_to_normalized(PixelBox::new(10, 20, 30, 60), 100, 200).expect("dims ok");
        assert!((norm.cx - 0.2).abs() < 1e-12);
        assert!((norm.cy - 0.2).abs() < 1e-12);
        assert!((norm.w - 0.2).abs() < 1e-12);
        assert!((norm.h - 0.2).abs() < 1e-12);
    }

    #[test]
    fn normalized_to_pixel_rounds_and_clamps() {
        let px = normalized_to_pixel(NormBox::new(0.95, 0.5, 0.2, 0.2), 100, 100).expect("dims ok");
        assert_eq!(px, PixelBox::new(85, 40, 99, 60));
    }

    #[test]
    fn degenerate_box_gets_one_pixel_extent() {
        let px = normalized_to_pixel(NormBox::new(0.5, 0.5, 0.0, 0.0), 100, 100).expect("dims ok");
        assert_eq!(px.width(), 1);
        assert_eq!(px.height(), 1);

        let edge = normalized_to_pixel(NormBox::new(1.0, 1.0, 0.0, 0.0), 100, 100).expect("dims ok");
        assert_eq!(edge, PixelBox::new(98, 98, 99, 99));
    }

    #[test]
    fn roundtrip_within_one_pixel() {
        let original = PixelBox::new(13, 7, 211, 140);
        let norm = pixel_to_normalized(original, 320, 240).expect("dims ok");
        let back = normalized_to_pixel(norm, 320, 240).expect("dims ok");
        assert!((back.x_min - original.x_min).abs() <= 1);
        assert!((back.y_min - original.y_min).abs() <= 1);
        assert!((back.x_max - original.x_max).abs() <= 1);
        assert!((back.y_max - original.y_max).abs() <= 1);
    }

    #[test]
    fn norm_box_persists_as_array() {
        let json = serde_json::to_string(&NormBox::new(0.5, 0.25, 0.1, 0.2)).expect("serialize");
        assert_eq!(json, "[0.5,0.25,0.1,0.2]");
        let back: NormBox = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, NormBox::new(0.5, 0.25, 0.1, 0.2));
    }

    #[test]
    fn clipped_corners_stay_in_unit_square() {
        let corners = BBoxXYXY::<Normalized>::from_xyxy(-0.1, 0.2, 0.4, 1.3);
        let norm = NormBox::from_xyxy_clipped(&corners);
        assert!(norm.is_in_range());
        assert!((norm.cx - 0.2).abs() < 1e-12);
        assert!((norm.h - 0.8).abs() < 1e-12);
    }
}
