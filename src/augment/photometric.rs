//! Pixel-only transforms: color, weather, noise and blur.
//!
//! None of these move content, so boxes are left alone.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};
use imageproc::filter::{median_filter, separable_filter_equal};
use imageproc::point::Point;
use rand::seq::SliceRandom;
use rand::Rng;

use super::geometric::symmetric;

const CLAHE_TILES: u32 = 8;

#[inline]
fn to_u8(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Applies `f` to every channel value through a lookup table.
fn map_values(image: &mut RgbImage, f: impl Fn(f64) -> f64) {
    let lut: Vec<u8> = (0..=255u8).map(|v| to_u8(f(v as f64))).collect();
    for px in image.pixels_mut() {
        for c in px.0.iter_mut() {
            *c = lut[*c as usize];
        }
    }
}

/// Standard normal sample (Box-Muller).
fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

#[inline]
fn luma(px: &Rgb<u8>) -> f64 {
    0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64
}

// Color

pub(crate) fn brightness_contrast<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let brightness = symmetric(rng, 0.2);
    let contrast = 1.0 + symmetric(rng, 0.2);
    map_values(image, |v| ((v / 255.0 - 0.5) * contrast + 0.5 + brightness) * 255.0);
}

pub(crate) fn hue_saturation<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let hue_shift = symmetric(rng, 20.0);
    let sat_scale = 1.0 + symmetric(rng, 0.3);
    let val_scale = 1.0 + symmetric(rng, 0.2);

    for px in image.pixels_mut() {
        let (h, s, v) = rgb_to_hsv(*px);
        let h = (h + hue_shift).rem_euclid(360.0);
        let s = (s * sat_scale).clamp(0.0, 1.0);
        let v = (v * val_scale).clamp(0.0, 1.0);
        *px = hsv_to_rgb(h, s, v);
    }
}

pub(crate) fn rgb_shift<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let shift = [
        symmetric(rng, 20.0),
        symmetric(rng, 20.0),
        symmetric(rng, 20.0),
    ];
    for px in image.pixels_mut() {
        for (c, delta) in px.0.iter_mut().zip(shift) {
            *c = to_u8(*c as f64 + delta);
        }
    }
}

/// Contrast-limited adaptive histogram equalization on luma.
pub(crate) fn clahe<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let clip_limit: f64 = rng.random_range(1.0..=4.0);
    let (w, h) = image.dimensions();
    let tiles_x = CLAHE_TILES.min(w).max(1) as usize;
    let tiles_y = CLAHE_TILES.min(h).max(1) as usize;
    let tile_w = w as f64 / tiles_x as f64;
    let tile_h = h as f64 / tiles_y as f64;

    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = (tx as f64 * tile_w) as u32;
            let x1 = (((tx + 1) as f64 * tile_w) as u32).max(x0 + 1).min(w);
            let y0 = (ty as f64 * tile_h) as u32;
            let y1 = (((ty + 1) as f64 * tile_h) as u32).max(y0 + 1).min(h);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[to_u8(luma(image.get_pixel(x, y))) as usize] += 1;
                }
            }
            let count = (x1 - x0) * (y1 - y0);
            luts[ty * tiles_x + tx] = clipped_equalization(&hist, count, clip_limit);
        }
    }

    let cell = |pos: f64, size: f64, tiles: usize| -> (usize, usize, f64) {
        let g = (pos / size - 0.5).clamp(0.0, (tiles - 1) as f64);
        let i0 = g.floor() as usize;
        let i1 = (i0 + 1).min(tiles - 1);
        (i0, i1, g - i0 as f64)
    };

    for (x, y, px) in image.enumerate_pixels_mut() {
        let l = to_u8(luma(px)) as usize;
        let (ix0, ix1, fx) = cell(x as f64 + 0.5, tile_w, tiles_x);
        let (iy0, iy1, fy) = cell(y as f64 + 0.5, tile_h, tiles_y);
        let at = |i: usize, j: usize| luts[j * tiles_x + i][l] as f64;
        let top = at(ix0, iy0) * (1.0 - fx) + at(ix1, iy0) * fx;
        let bottom = at(ix0, iy1) * (1.0 - fx) + at(ix1, iy1) * fx;
        let target = top * (1.0 - fy) + bottom * fy;

        if l == 0 {
            *px = Rgb([to_u8(target); 3]);
        } else {
            let gain = target / l as f64;
            for c in px.0.iter_mut() {
                *c = to_u8(*c as f64 * gain);
            }
        }
    }
}

fn clipped_equalization(hist: &[u32; 256], count: u32, clip_limit: f64) -> [u8; 256] {
    let limit = ((clip_limit * count as f64 / 256.0) as u32).max(1);
    let mut clipped = *hist;
    let mut excess = 0u32;
    for bin in clipped.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let bonus = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in clipped.iter_mut().enumerate() {
        *bin += bonus + u32::from(i < remainder);
    }
    equalization_lut(&clipped, count)
}

fn equalization_lut(hist: &[u32; 256], count: u32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    let cdf_min = hist.iter().copied().find(|&b| b > 0).unwrap_or(0);
    if count <= cdf_min {
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }

    let mut cdf = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        let scaled = (cdf.saturating_sub(cdf_min)) as f64 / (count - cdf_min) as f64;
        lut[i] = to_u8(scaled * 255.0);
    }
    lut
}

pub(crate) fn channel_shuffle<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let mut order = [0usize, 1, 2];
    order.shuffle(rng);
    for px in image.pixels_mut() {
        let src = px.0;
        px.0 = [src[order[0]], src[order[1]], src[order[2]]];
    }
}

pub(crate) fn gamma<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let gamma: f64 = rng.random_range(0.8..=1.2);
    map_values(image, |v| (v / 255.0).powf(gamma) * 255.0);
}

// Weather

pub(crate) fn fog<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let density: f64 = rng.random_range(0.1..=0.3);
    let height = image.height().max(1) as f64;
    for (_, y, px) in image.enumerate_pixels_mut() {
        // Thicker toward the top of the frame.
        let t = density * (1.0 - 0.5 * y as f64 / height);
        for c in px.0.iter_mut() {
            *c = to_u8(*c as f64 * (1.0 - t) + 230.0 * t);
        }
    }
}

pub(crate) fn rain<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let (w, h) = image.dimensions();
    let drops = ((w as usize * h as usize) / 800).clamp(1, 2000);
    let length = (h as f32 / 20.0).max(2.0);
    let slant = symmetric(rng, 10.0) as f32;
    let color = Rgb([200, 200, 200]);

    for _ in 0..drops {
        let x = rng.random_range(0.0..w as f32);
        let y = rng.random_range(0.0..h as f32);
        draw_line_segment_mut(image, (x, y), (x + slant, y + length), color);
    }
    map_values(image, |v| v * 0.9);
}

pub(crate) fn sun_flare<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let (w, h) = image.dimensions();
    let cx = rng.random_range(0.0..=w as f64);
    let cy = rng.random_range(0.0..=h as f64 / 2.0);
    let radius = (w.min(h) as f64 * rng.random_range(0.1..=0.3)).max(1.0);
    let intensity = 0.6;

    for (x, y, px) in image.enumerate_pixels_mut() {
        let d = ((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2)).sqrt();
        let falloff = (1.0 - d / radius).max(0.0).powi(2) * intensity;
        if falloff > 0.0 {
            for c in px.0.iter_mut() {
                *c = to_u8(*c as f64 + (255.0 - *c as f64) * falloff);
            }
        }
    }
}

pub(crate) fn shadow<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let (w, h) = image.dimensions();
    if w < 2 || h < 3 {
        return;
    }
    let (wi, hi) = (w as i32, h as i32);
    let x0 = rng.random_range(0..wi - 1);
    let x1 = rng.random_range(x0 + 1..wi);
    let top = rng.random_range(hi / 2..hi - 1);
    let top2 = rng.random_range(hi / 2..hi - 1);
    let bottom = hi - 1;

    let polygon = [
        Point::new(x0, top),
        Point::new(x1, top2),
        Point::new(x1, bottom),
        Point::new(x0, bottom),
    ];
    let mut mask = GrayImage::new(w, h);
    draw_polygon_mut(&mut mask, &polygon, Luma([255]));

    let factor: f64 = rng.random_range(0.5..=0.8);
    for (x, y, px) in image.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] > 0 {
            for c in px.0.iter_mut() {
                *c = to_u8(*c as f64 * factor);
            }
        }
    }
}

// Noise

pub(crate) fn gaussian_noise<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let variance: f64 = rng.random_range(10.0..=50.0);
    let sigma = variance.sqrt();
    for px in image.pixels_mut() {
        for c in px.0.iter_mut() {
            *c = to_u8(*c as f64 + gaussian(rng) * sigma);
        }
    }
}

/// Sensor-style noise: shared luminance grain plus small per-channel shifts.
pub(crate) fn iso_noise<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let intensity: f64 = rng.random_range(0.1..=0.5);
    let color_shift: f64 = rng.random_range(0.01..=0.05);
    for px in image.pixels_mut() {
        let grain = gaussian(rng) * intensity * 25.0;
        for c in px.0.iter_mut() {
            *c = to_u8(*c as f64 + grain + gaussian(rng) * color_shift * 255.0);
        }
    }
}

pub(crate) fn jpeg_compression<R: Rng + ?Sized>(
    image: &mut RgbImage,
    rng: &mut R,
) -> Result<(), image::ImageError> {
    let quality: u8 = rng.random_range(50..=99);
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, quality).encode_image(&*image)?;
    *image = image::load_from_memory_with_format(&encoded, ImageFormat::Jpeg)?.to_rgb8();
    Ok(())
}

pub(crate) fn posterize<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let bits: u32 = rng.random_range(4..=7);
    let mask = 0xFFu8 << (8 - bits);
    for px in image.pixels_mut() {
        for c in px.0.iter_mut() {
            *c &= mask;
        }
    }
}

/// Per-channel histogram equalization.
pub(crate) fn equalize(image: &mut RgbImage) {
    let count = image.width() * image.height();
    let mut hists = [[0u32; 256]; 3];
    for px in image.pixels() {
        for (hist, v) in hists.iter_mut().zip(px.0) {
            hist[v as usize] += 1;
        }
    }
    let luts = hists.map(|hist| equalization_lut(&hist, count));
    for px in image.pixels_mut() {
        for (c, lut) in px.0.iter_mut().zip(&luts) {
            *c = lut[*c as usize];
        }
    }
}

// Blur

pub(crate) fn box_blur<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let size = odd_kernel(rng, 3, 7);
    let kernel = vec![1.0f32 / size as f32; size];
    *image = separable_filter_equal(&*image, &kernel);
}

pub(crate) fn gaussian_blur<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let sigma: f32 = rng.random_range(0.5..=1.5);
    *image = imageops::blur(&*image, sigma);
}

/// Averages along a random line through each pixel.
pub(crate) fn motion_blur<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let size = odd_kernel(rng, 3, 7) as i64;
    let angle = rng.random_range(0.0..std::f64::consts::PI);
    let (dy, dx) = angle.sin_cos();
    let half = size / 2;
    let (w, h) = image.dimensions();
    let source = image.clone();

    let taps: Vec<(i64, i64)> = (-half..=half)
        .map(|t| ((t as f64 * dx).round() as i64, (t as f64 * dy).round() as i64))
        .collect();

    for (x, y, px) in image.enumerate_pixels_mut() {
        let mut acc = [0.0f64; 3];
        for (ox, oy) in &taps {
            let sx = (x as i64 + ox).clamp(0, w as i64 - 1) as u32;
            let sy = (y as i64 + oy).clamp(0, h as i64 - 1) as u32;
            let sample = source.get_pixel(sx, sy);
            for (a, v) in acc.iter_mut().zip(sample.0) {
                *a += v as f64;
            }
        }
        let n = taps.len() as f64;
        *px = Rgb(acc.map(|a| to_u8(a / n)));
    }
}

pub(crate) fn median_blur<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    let radius: u32 = rng.random_range(1..=2);
    *image = median_filter(&*image, radius, radius);
}

/// Gaussian blur, local pixel swaps, then blur again.
pub(crate) fn glass_blur<R: Rng + ?Sized>(image: &mut RgbImage, rng: &mut R) {
    const MAX_DELTA: i64 = 4;
    let (w, h) = image.dimensions();
    let mut blurred = imageops::blur(&*image, 0.7);

    for y in (0..h as i64).rev() {
        for x in (0..w as i64).rev() {
            let nx = (x + rng.random_range(-MAX_DELTA..=MAX_DELTA)).clamp(0, w as i64 - 1);
            let ny = (y + rng.random_range(-MAX_DELTA..=MAX_DELTA)).clamp(0, h as i64 - 1);
            let a = *blurred.get_pixel(x as u32, y as u32);
            let b = *blurred.get_pixel(nx as u32, ny as u32);
            blurred.put_pixel(x as u32, y as u32, b);
            blurred.put_pixel(nx as u32, ny as u32, a);
        }
    }
    *image = imageops::blur(&blurred, 0.7);
}

fn odd_kernel<R: Rng + ?Sized>(rng: &mut R, min: usize, max: usize) -> usize {
    let size = rng.random_range(min..=max);
    if size % 2 == 0 {
        size + 1
    } else {
        size
    }
}

fn rgb_to_hsv(px: Rgb<u8>) -> (f64, f64, f64) {
    let [r, g, b] = px.0.map(|c| c as f64 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> Rgb<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    Rgb([
        to_u8((r + m) * 255.0),
        to_u8((g + m) * 255.0),
        to_u8((b + m) * 255.0),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gradient() -> RgbImage {
        RgbImage::from_fn(32, 24, |x, y| Rgb([(x * 8) as u8, (y * 10) as u8, 128]))
    }

    #[test]
    fn hsv_roundtrip_is_stable() {
        for px in [Rgb([255, 0, 0]), Rgb([12, 200, 90]), Rgb([128, 128, 128])] {
            let (h, s, v) = rgb_to_hsv(px);
            assert_eq!(hsv_to_rgb(h, s, v), px);
        }
    }

    #[test]
    fn posterize_clears_low_bits() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut image = RgbImage::from_pixel(4, 4, Rgb([0xFF, 0x0F, 0x81]));
        posterize(&mut image, &mut rng);
        let px = image.get_pixel(0, 0);
        assert_eq!(px[0] & 0x01, 0);
        assert!(px[1] <= 0x0F);
    }

    #[test]
    fn equalize_stretches_narrow_range() {
        let mut image = RgbImage::from_fn(16, 1, |x, _| Rgb([100 + x as u8, 100, 100]));
        equalize(&mut image);
        assert_eq!(image.get_pixel(0, 0)[0], 0);
        assert_eq!(image.get_pixel(15, 0)[0], 255);
    }

    #[test]
    fn channel_shuffle_permutes_values() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut image = RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]));
        channel_shuffle(&mut image, &mut rng);
        let mut values = image.get_pixel(1, 1).0;
        values.sort_unstable();
        assert_eq!(values, [1, 2, 3]);
    }

    #[test]
    fn every_transform_keeps_dimensions() {
        let mut rng = StdRng::seed_from_u64(42);
        let ops: Vec<fn(&mut RgbImage, &mut StdRng)> = vec![
            brightness_contrast,
            hue_saturation,
            rgb_shift,
            clahe,
            channel_shuffle,
            gamma,
            fog,
            rain,
            sun_flare,
            shadow,
            gaussian_noise,
            iso_noise,
            posterize,
            box_blur,
            gaussian_blur,
            motion_blur,
            median_blur,
            glass_blur,
        ];
        for op in ops {
            let mut image = gradient();
            op(&mut image, &mut rng);
            assert_eq!(image.dimensions(), (32, 24));
        }

        let mut image = gradient();
        jpeg_compression(&mut image, &mut rng).expect("jpeg roundtrip");
        assert_eq!(image.dimensions(), (32, 24));
    }

    #[test]
    fn tiny_images_survive_clahe_and_shadow() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut image = RgbImage::from_pixel(1, 1, Rgb([50, 60, 70]));
        clahe(&mut image, &mut rng);
        shadow(&mut image, &mut rng);
        assert_eq!(image.dimensions(), (1, 1));
    }
}
