//! Letterbox resizing.
//!
//! The image is scaled uniformly to fit inside the target and centered on a
//! neutral gray canvas. Boxes follow the same scale and offset.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::model::{BBoxXYXY, BoundingBox, NormBox, Pixel, Resolution};

/// Canvas fill for the padded border.
pub const PAD_COLOR: Rgb<u8> = Rgb([114, 114, 114]);

/// Scale and padding applied by a letterbox resize.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f64,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub pad_left: u32,
    pub pad_top: u32,
    pub target: Resolution,
}

impl Letterbox {
    /// Computes the fit of a `src_w x src_h` image into `target`.
    pub fn fit(src_w: u32, src_h: u32, target: Resolution) -> Self {
        let (tw, th) = (target.width as f64, target.height as f64);
        let scale = (tw / src_w.max(1) as f64).min(th / src_h.max(1) as f64);

        let scaled_width = ((src_w as f64 * scale).round() as u32).clamp(1, target.width);
        let scaled_height = ((src_h as f64 * scale).round() as u32).clamp(1, target.height);

        Self {
            scale,
            scaled_width,
            scaled_height,
            pad_left: (target.width - scaled_width) / 2,
            pad_top: (target.height - scaled_height) / 2,
            target,
        }
    }

    /// Maps a normalized box on the source image onto the canvas.
    pub fn map_box(&self, bbox_norm: NormBox, src_w: u32, src_h: u32) -> NormBox {
        let src: BBoxXYXY<Pixel> = bbox_norm.to_pixel_xyxy(src_w, src_h);
        let (dx, dy) = (self.pad_left as f64, self.pad_top as f64);

        let mapped: BBoxXYXY<Pixel> = BBoxXYXY::new(
            src.min.scale(self.scale, self.scale).translate(dx, dy),
            src.max.scale(self.scale, self.scale).translate(dx, dy),
        );
        let normalized =
            mapped.to_normalized(self.target.width as f64, self.target.height as f64);
        NormBox::from_xyxy_clipped(&normalized)
    }
}

/// Resizes `image` onto a `target` canvas, keeping the aspect ratio, and
/// remaps `boxes` onto the canvas.
///
/// An image already at the target size is returned unchanged with its boxes.
pub fn resize_with_letterboxing(
    image: &RgbImage,
    target: Resolution,
    boxes: &[BoundingBox],
) -> (RgbImage, Vec<BoundingBox>) {
    let (src_w, src_h) = image.dimensions();
    if (src_w, src_h) == (target.width, target.height) {
        return (image.clone(), boxes.to_vec());
    }

    let fit = Letterbox::fit(src_w, src_h, target);
    let scaled = imageops::resize(
        image,
        fit.scaled_width,
        fit.scaled_height,
        FilterType::Triangle,
    );

    let mut canvas = RgbImage::from_pixel(target.width, target.height, PAD_COLOR);
    imageops::replace(
        &mut canvas,
        &scaled,
        i64::from(fit.pad_left),
        i64::from(fit.pad_top),
    );

    let adjusted = boxes
        .iter()
        .map(|bbox| {
            let mut mapped = bbox.clone();
            mapped.bbox_norm = fit.map_box(bbox.bbox_norm, src_w, src_h);
            mapped.refresh_pixels(target.width, target.height);
            mapped
        })
        .collect();

    (canvas, adjusted)
}
