#![allow(dead_code)]

use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use labelkit::model::{AppData, BoundingBox, ClassId, ImageAnnotation, NormBox};

/// An image whose pixel at `(x, y)` encodes its own coordinates, so moves
/// are easy to check.
pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 128]))
}

pub fn write_png(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    gradient_image(width, height)
        .save(path)
        .expect("write png file");
}

/// Registers an on-disk image in `app` with the given boxes.
pub fn add_image(app: &mut AppData, path: &Path, width: u32, height: u32, boxes: Vec<BoundingBox>) {
    write_png(path, width, height);
    let key = path.to_string_lossy().into_owned();
    let mut image = ImageAnnotation::new(key.clone());
    image.set_dimensions(width, height);
    image.boxes = boxes;
    image.refresh_box_pixels();
    app.images.insert(key, image);
}

pub fn bbox(class_id: i32, cx: f64, cy: f64, w: f64, h: f64) -> BoundingBox {
    BoundingBox::new(ClassId::new(class_id), NormBox::new(cx, cy, w, h))
}
