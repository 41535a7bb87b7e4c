//! Transforms that move pixels. Each one moves the boxes with them.
//!
//! Boxes are handled in continuous pixel space, `[0, w] x [0, h]`. Affine
//! transforms map box corners and take their envelope; dense distortions
//! take the envelope of every output pixel whose source lies in the box.
//! A box that leaves the frame entirely becomes `None`.

use image::imageops;
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use rand::Rng;

use crate::model::{BBoxXYXY, Coord, Pixel};

pub(crate) type PixelRect = BBoxXYXY<Pixel>;

/// Fill for regions uncovered by a transform.
const FILL: Rgb<u8> = Rgb([0, 0, 0]);

const SHIFT_LIMIT: f64 = 0.0625;
const SCALE_LIMIT: f64 = 0.1;
const ELASTIC_GRID: usize = 5;
const ELASTIC_ALPHA: f64 = 0.03;
const GRID_STEPS: usize = 5;
const GRID_DISTORT_LIMIT: f64 = 0.3;
const OPTICAL_DISTORT_LIMIT: f64 = 0.3;

/// Row-major 2x3 affine map, `(x, y) -> (a x + b y + c, d x + e y + f)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Affine {
    m: [f64; 6],
}

impl Affine {
    pub(crate) fn translate(tx: f64, ty: f64) -> Self {
        Self {
            m: [1.0, 0.0, tx, 0.0, 1.0, ty],
        }
    }

    pub(crate) fn scale(s: f64) -> Self {
        Self {
            m: [s, 0.0, 0.0, 0.0, s, 0.0],
        }
    }

    /// Rotation by `degrees`, counter-clockwise on screen.
    pub(crate) fn rotate(degrees: f64) -> Self {
        let (sin, cos) = (-degrees.to_radians()).sin_cos();
        Self {
            m: [cos, -sin, 0.0, sin, cos, 0.0],
        }
    }

    /// `self` applied after `other`.
    pub(crate) fn then_after(&self, other: &Affine) -> Self {
        let [a, b, c, d, e, f] = self.m;
        let [p, q, r, s, t, u] = other.m;
        Self {
            m: [
                a * p + b * s,
                a * q + b * t,
                a * r + b * u + c,
                d * p + e * s,
                d * q + e * t,
                d * r + e * u + f,
            ],
        }
    }

    /// Rotation and uniform scale about `(cx, cy)`, then a shift.
    pub(crate) fn about_center(cx: f64, cy: f64, degrees: f64, scale: f64, dx: f64, dy: f64) -> Self {
        Affine::translate(cx + dx, cy + dy)
            .then_after(&Affine::rotate(degrees))
            .then_after(&Affine::scale(scale))
            .then_after(&Affine::translate(-cx, -cy))
    }

    pub(crate) fn apply(&self, p: Coord<Pixel>) -> Coord<Pixel> {
        let [a, b, c, d, e, f] = self.m;
        Coord::new(a * p.x + b * p.y + c, d * p.x + e * p.y + f)
    }

    fn to_projection(self) -> Option<Projection> {
        let [a, b, c, d, e, f] = self.m;
        Projection::from_matrix([
            a as f32, b as f32, c as f32, d as f32, e as f32, f as f32, 0.0, 0.0, 1.0,
        ])
    }
}

pub(crate) fn hflip(image: &mut RgbImage, boxes: &mut [Option<PixelRect>]) {
    let w = image.width() as f64;
    imageops::flip_horizontal_in_place(image);
    for rect in boxes.iter_mut().flatten() {
        *rect = PixelRect::from_xyxy(w - rect.xmax(), rect.ymin(), w - rect.xmin(), rect.ymax());
    }
}

pub(crate) fn vflip(image: &mut RgbImage, boxes: &mut [Option<PixelRect>]) {
    let h = image.height() as f64;
    imageops::flip_vertical_in_place(image);
    for rect in boxes.iter_mut().flatten() {
        *rect = PixelRect::from_xyxy(rect.xmin(), h - rect.ymax(), rect.xmax(), h - rect.ymin());
    }
}

/// Random rotation within `±limit` degrees about the center.
pub(crate) fn rotate<R: Rng + ?Sized>(
    image: &mut RgbImage,
    boxes: &mut [Option<PixelRect>],
    limit: f64,
    rng: &mut R,
) {
    let degrees = symmetric(rng, limit);
    let (cx, cy) = center(image);
    apply_affine(image, boxes, Affine::about_center(cx, cy, degrees, 1.0, 0.0, 0.0));
}

/// Random shift, scale and rotation combined into one affine map.
pub(crate) fn shift_scale_rotate<R: Rng + ?Sized>(
    image: &mut RgbImage,
    boxes: &mut [Option<PixelRect>],
    limit: f64,
    rng: &mut R,
) {
    let (w, h) = (image.width() as f64, image.height() as f64);
    let dx = symmetric(rng, SHIFT_LIMIT) * w;
    let dy = symmetric(rng, SHIFT_LIMIT) * h;
    let scale = 1.0 + symmetric(rng, SCALE_LIMIT);
    let degrees = symmetric(rng, limit);
    let (cx, cy) = center(image);
    apply_affine(
        image,
        boxes,
        Affine::about_center(cx, cy, degrees, scale, dx, dy),
    );
}

pub(crate) fn apply_affine(image: &mut RgbImage, boxes: &mut [Option<PixelRect>], affine: Affine) {
    let Some(projection) = affine.to_projection() else {
        return;
    };
    *image = warp(image, &projection, Interpolation::Bilinear, FILL);

    let (w, h) = (image.width() as f64, image.height() as f64);
    for slot in boxes.iter_mut() {
        if let Some(rect) = *slot {
            *slot = PixelRect::envelope(rect.corners().into_iter().map(|c| affine.apply(c)))
                .map(|env| env.clip(w, h))
                .filter(|env| env.area() > 0.0);
        }
    }
}

/// Smooth random displacement field interpolated from a coarse grid.
pub(crate) fn elastic<R: Rng + ?Sized>(
    image: &mut RgbImage,
    boxes: &mut [Option<PixelRect>],
    rng: &mut R,
) {
    let (w, h) = (image.width() as f64, image.height() as f64);
    let alpha = ELASTIC_ALPHA * w.min(h);
    let nodes = ELASTIC_GRID + 1;
    let field: Vec<(f64, f64)> = (0..nodes * nodes)
        .map(|_| (symmetric(rng, alpha), symmetric(rng, alpha)))
        .collect();

    let cell_w = w / ELASTIC_GRID as f64;
    let cell_h = h / ELASTIC_GRID as f64;
    let displacement = |x: f64, y: f64| -> (f64, f64) {
        let gx = (x / cell_w).clamp(0.0, ELASTIC_GRID as f64);
        let gy = (y / cell_h).clamp(0.0, ELASTIC_GRID as f64);
        let ix = (gx.floor() as usize).min(ELASTIC_GRID - 1);
        let iy = (gy.floor() as usize).min(ELASTIC_GRID - 1);
        let (tx, ty) = (gx - ix as f64, gy - iy as f64);
        let at = |i: usize, j: usize| field[j * nodes + i];
        let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;
        let (p00, p10, p01, p11) = (at(ix, iy), at(ix + 1, iy), at(ix, iy + 1), at(ix + 1, iy + 1));
        (
            lerp(lerp(p00.0, p10.0, tx), lerp(p01.0, p11.0, tx), ty),
            lerp(lerp(p00.1, p10.1, tx), lerp(p01.1, p11.1, tx), ty),
        )
    };

    *image = remap(image, boxes, |x, y| {
        let (dx, dy) = displacement(x, y);
        (x + dx, y + dy)
    });
}

/// Separable piecewise-linear stretch of grid cells.
pub(crate) fn grid_distortion<R: Rng + ?Sized>(
    image: &mut RgbImage,
    boxes: &mut [Option<PixelRect>],
    rng: &mut R,
) {
    let (w, h) = (image.width() as f64, image.height() as f64);
    let xs = distorted_steps(rng, w);
    let ys = distorted_steps(rng, h);
    *image = remap(image, boxes, |x, y| {
        (piecewise(&xs, w, x), piecewise(&ys, h, y))
    });
}

/// Radial barrel or pincushion distortion about the center.
pub(crate) fn optical_distortion<R: Rng + ?Sized>(
    image: &mut RgbImage,
    boxes: &mut [Option<PixelRect>],
    rng: &mut R,
) {
    let k = symmetric(rng, OPTICAL_DISTORT_LIMIT);
    let (cx, cy) = center(image);
    let radius = cx.max(cy).max(1.0);
    *image = remap(image, boxes, |x, y| {
        let (nx, ny) = ((x - cx) / radius, (y - cy) / radius);
        let factor = 1.0 + k * (nx * nx + ny * ny);
        (cx + nx * factor * radius, cy + ny * factor * radius)
    });
}

/// Source positions of `GRID_STEPS + 1` evenly spaced output nodes.
fn distorted_steps<R: Rng + ?Sized>(rng: &mut R, extent: f64) -> Vec<f64> {
    let widths: Vec<f64> = (0..GRID_STEPS)
        .map(|_| 1.0 + symmetric(rng, GRID_DISTORT_LIMIT))
        .collect();
    let total: f64 = widths.iter().sum();

    let mut nodes = Vec::with_capacity(GRID_STEPS + 1);
    let mut acc = 0.0;
    nodes.push(0.0);
    for width in widths {
        acc += width;
        nodes.push(acc / total * extent);
    }
    nodes
}

fn piecewise(nodes: &[f64], extent: f64, v: f64) -> f64 {
    let steps = nodes.len() - 1;
    let cell = extent / steps as f64;
    let pos = (v / cell).clamp(0.0, steps as f64);
    let i = (pos.floor() as usize).min(steps - 1);
    let t = pos - i as f64;
    nodes[i] + (nodes[i + 1] - nodes[i]) * t
}

/// Builds a new image by sampling `image` at `source_of(output_point)` and
/// rebuilds each box as the extent of output pixels drawn from inside it.
fn remap<F>(image: &RgbImage, boxes: &mut [Option<PixelRect>], source_of: F) -> RgbImage
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let (w, h) = image.dimensions();
    let mut out = RgbImage::from_pixel(w, h, FILL);
    let mut extents: Vec<Option<(u32, u32, u32, u32)>> = vec![None; boxes.len()];

    for y in 0..h {
        for x in 0..w {
            let (sx, sy) = source_of(x as f64 + 0.5, y as f64 + 0.5);
            if let Some(px) = sample_bilinear(image, sx - 0.5, sy - 0.5) {
                out.put_pixel(x, y, px);
            }

            for (rect, extent) in boxes.iter().zip(extents.iter_mut()) {
                let Some(rect) = rect else { continue };
                if sx >= rect.xmin() && sx <= rect.xmax() && sy >= rect.ymin() && sy <= rect.ymax()
                {
                    *extent = Some(match *extent {
                        None => (x, y, x, y),
                        Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                    });
                }
            }
        }
    }

    for (slot, extent) in boxes.iter_mut().zip(extents) {
        if slot.is_some() {
            *slot = extent.map(|(x0, y0, x1, y1)| {
                PixelRect::from_xyxy(x0 as f64, y0 as f64, x1 as f64 + 1.0, y1 as f64 + 1.0)
            });
        }
    }
    out
}

fn sample_bilinear(image: &RgbImage, x: f64, y: f64) -> Option<Rgb<u8>> {
    let (w, h) = image.dimensions();
    if !(x.is_finite() && y.is_finite()) || x < -0.5 || y < -0.5 {
        return None;
    }
    if x > w as f64 - 0.5 || y > h as f64 - 0.5 {
        return None;
    }

    let x = x.clamp(0.0, (w - 1) as f64);
    let y = y.clamp(0.0, (h - 1) as f64);
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (tx, ty) = (x - x0 as f64, y - y0 as f64);

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - tx) + p10[c] as f64 * tx;
        let bottom = p01[c] as f64 * (1.0 - tx) + p11[c] as f64 * tx;
        *value = (top * (1.0 - ty) + bottom * ty).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

fn center(image: &RgbImage) -> (f64, f64) {
    (image.width() as f64 / 2.0, image.height() as f64 / 2.0)
}

pub(crate) fn symmetric<R: Rng + ?Sized>(rng: &mut R, limit: f64) -> f64 {
    if limit > 0.0 {
        rng.random_range(-limit..=limit)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Option<PixelRect> {
        Some(PixelRect::from_xyxy(x0, y0, x1, y1))
    }

    #[test]
    fn hflip_mirrors_boxes() {
        let mut image = RgbImage::new(100, 50);
        let mut boxes = vec![rect(10.0, 5.0, 30.0, 25.0)];
        hflip(&mut image, &mut boxes);
        assert_eq!(boxes[0], rect(70.0, 5.0, 90.0, 25.0));
    }

    #[test]
    fn vflip_twice_is_identity() {
        let mut image = RgbImage::from_fn(8, 6, |x, y| Rgb([x as u8, y as u8, 0]));
        let original = image.clone();
        let mut boxes = vec![rect(1.0, 1.0, 4.0, 2.0)];
        vflip(&mut image, &mut boxes);
        assert_eq!(boxes[0], rect(1.0, 4.0, 4.0, 5.0));
        vflip(&mut image, &mut boxes);
        assert_eq!(image, original);
        assert_eq!(boxes[0], rect(1.0, 1.0, 4.0, 2.0));
    }

    #[test]
    fn quarter_turn_swaps_box_extent() {
        let affine = Affine::about_center(50.0, 50.0, 90.0, 1.0, 0.0, 0.0);
        let mut image = RgbImage::new(100, 100);
        let mut boxes = vec![rect(40.0, 20.0, 60.0, 30.0)];
        apply_affine(&mut image, &mut boxes, affine);

        let out = boxes[0].expect("box survives");
        assert!((out.width() - 10.0).abs() < 1e-6);
        assert!((out.height() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn composition_applies_right_to_left() {
        let shift_then_scale = Affine::scale(2.0).then_after(&Affine::translate(1.0, 0.0));
        let p = shift_then_scale.apply(Coord::new(1.0, 1.0));
        assert_eq!((p.x, p.y), (4.0, 2.0));
    }

    #[test]
    fn box_shifted_out_of_frame_is_dropped() {
        let mut image = RgbImage::new(20, 20);
        let mut boxes = vec![rect(0.0, 0.0, 5.0, 5.0), rect(10.0, 10.0, 20.0, 20.0)];
        apply_affine(&mut image, &mut boxes, Affine::translate(-8.0, 0.0));
        assert!(boxes[0].is_none());
        assert_eq!(boxes[1], rect(2.0, 10.0, 12.0, 20.0));
    }

    #[test]
    fn dense_distortions_keep_boxes_in_frame() {
        let mut rng = StdRng::seed_from_u64(7);
        for op in 0..3 {
            let mut image = RgbImage::from_pixel(64, 48, Rgb([200, 100, 50]));
            let mut boxes = vec![rect(16.0, 12.0, 48.0, 36.0)];
            match op {
                0 => elastic(&mut image, &mut boxes, &mut rng),
                1 => grid_distortion(&mut image, &mut boxes, &mut rng),
                _ => optical_distortion(&mut image, &mut boxes, &mut rng),
            }
            let out = boxes[0].expect("central box survives");
            assert!(out.xmin() >= 0.0 && out.ymin() >= 0.0);
            assert!(out.xmax() <= 64.0 && out.ymax() <= 48.0);
            assert!(out.area() > 0.0);
        }
    }

    #[test]
    fn grid_steps_span_full_extent() {
        let mut rng = StdRng::seed_from_u64(3);
        let nodes = distorted_steps(&mut rng, 100.0);
        assert_eq!(nodes.len(), GRID_STEPS + 1);
        assert_eq!(nodes[0], 0.0);
        assert!((nodes[GRID_STEPS] - 100.0).abs() < 1e-9);
        assert!(nodes.windows(2).all(|pair| pair[1] > pair[0]));
        assert_eq!(piecewise(&nodes, 100.0, 0.0), 0.0);
    }
}
