//! Training-set augmentation.
//!
//! One face crop is replicated `count` times and each replica goes through the
//! same fixed chain of stages with freshly drawn parameters:
//!
//! 1. horizontal flip (p = 0.5)
//! 2. affine about the centre: rotation, shear, uniform scale
//! 3. additive gaussian noise
//! 4. multiplicative brightness
//! 5. linear contrast around mid-grey
//!
//! Stages run in that order, each on the previous stage's output.

use image::{imageops, DynamicImage, ImageBuffer, Pixel};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use imageproc::noise::gaussian_noise_mut;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Number of variants generated per enrolled student.
pub const DEFAULT_AUGMENTATION_COUNT: usize = 100;

/// Pivot for linear contrast (centre of the 8-bit range).
const CONTRAST_CENTER: f32 = 127.5;

/// Produces training variants of a face crop.
pub trait Augmenter {
    /// Return exactly `count` variants of `image`, each with the same
    /// dimensions and channel layout.
    fn produce(&mut self, image: &DynamicImage, count: usize) -> Vec<DynamicImage>;
}

/// Sampling ranges for each stage. Ranges are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentParams {
    pub flip_probability: f64,
    pub rotate_degrees: (f32, f32),
    pub shear_degrees: (f32, f32),
    pub scale: (f32, f32),
    /// Standard deviation of the additive noise, in 8-bit intensity units.
    pub noise_stddev: (f64, f64),
    pub brightness: (f32, f32),
    pub contrast: (f32, f32),
}

impl Default for AugmentParams {
    fn default() -> Self {
        Self {
            flip_probability: 0.5,
            rotate_degrees: (-25.0, 25.0),
            shear_degrees: (-10.0, 10.0),
            scale: (0.8, 1.2),
            noise_stddev: (0.0, 0.05 * 255.0),
            brightness: (0.8, 1.2),
            contrast: (0.75, 1.5),
        }
    }
}

/// Parameters drawn for a single replica.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplicaParams {
    pub flip: bool,
    pub rotate_degrees: f32,
    pub shear_degrees: f32,
    pub scale: f32,
    pub noise_stddev: f64,
    pub noise_seed: u64,
    pub brightness: f32,
    pub contrast: f32,
}

impl ReplicaParams {
    /// Parameters that leave the image unchanged.
    pub fn identity() -> Self {
        Self {
            flip: false,
            rotate_degrees: 0.0,
            shear_degrees: 0.0,
            scale: 1.0,
            noise_stddev: 0.0,
            noise_seed: 0,
            brightness: 1.0,
            contrast: 1.0,
        }
    }
}

impl AugmentParams {
    /// Draw one replica's parameters, each independently.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ReplicaParams {
        ReplicaParams {
            flip: rng.gen_bool(self.flip_probability.clamp(0.0, 1.0)),
            rotate_degrees: rng.gen_range(self.rotate_degrees.0..=self.rotate_degrees.1),
            shear_degrees: rng.gen_range(self.shear_degrees.0..=self.shear_degrees.1),
            scale: rng.gen_range(self.scale.0..=self.scale.1),
            noise_stddev: rng.gen_range(self.noise_stddev.0..=self.noise_stddev.1),
            noise_seed: rng.gen(),
            brightness: rng.gen_range(self.brightness.0..=self.brightness.1),
            contrast: rng.gen_range(self.contrast.0..=self.contrast.1),
        }
    }
}

/// The stochastic augmentation pipeline.
pub struct RandomAugmenter {
    params: AugmentParams,
    rng: StdRng,
}

impl RandomAugmenter {
    /// Pipeline seeded from OS entropy.
    pub fn new(params: AugmentParams) -> Self {
        Self {
            params,
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible pipeline: the same seed yields the same variants.
    pub fn seeded(params: AugmentParams, seed: u64) -> Self {
        Self {
            params,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn params(&self) -> &AugmentParams {
        &self.params
    }
}

impl Augmenter for RandomAugmenter {
    fn produce(&mut self, image: &DynamicImage, count: usize) -> Vec<DynamicImage> {
        tracing::debug!(
            count,
            width = image.width(),
            height = image.height(),
            "generating augmented variants"
        );
        (0..count)
            .map(|_| {
                let replica = self.params.sample(&mut self.rng);
                apply(image, &replica)
            })
            .collect()
    }
}

/// Run the full stage chain on `image` with fixed parameters.
///
/// 8-bit luma, luma-alpha, RGB and RGBA keep their layout. Other layouts
/// (16-bit, float) are converted to 8-bit RGB first.
pub fn apply(image: &DynamicImage, replica: &ReplicaParams) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(apply_buffer(buf, replica)),
        DynamicImage::ImageLumaA8(buf) => DynamicImage::ImageLumaA8(apply_buffer(buf, replica)),
        DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(apply_buffer(buf, replica)),
        DynamicImage::ImageRgba8(buf) => DynamicImage::ImageRgba8(apply_buffer(buf, replica)),
        other => DynamicImage::ImageRgb8(apply_buffer(&other.to_rgb8(), replica)),
    }
}

fn apply_buffer<P>(buf: &ImageBuffer<P, Vec<u8>>, replica: &ReplicaParams) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + Send + Sync + 'static,
{
    let flipped = if replica.flip {
        imageops::flip_horizontal(buf)
    } else {
        buf.clone()
    };

    let mut out = affine(&flipped, replica);

    if replica.noise_stddev > 0.0 {
        gaussian_noise_mut(&mut out, 0.0, replica.noise_stddev, replica.noise_seed);
    }

    map_intensity(&mut out, |v| v * replica.brightness);
    map_intensity(&mut out, |v| CONTRAST_CENTER + replica.contrast * (v - CONTRAST_CENTER));

    out
}

/// Forward matrix (row-major 3x3) for rotation, x-shear and scale about the
/// image centre: `T(c) · R · Sh · S · T(-c)`.
fn affine_matrix(width: u32, height: u32, replica: &ReplicaParams) -> [f32; 9] {
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let (sin, cos) = replica.rotate_degrees.to_radians().sin_cos();
    let shear = replica.shear_degrees.to_radians().tan();
    let s = replica.scale;

    let a = s * cos;
    let b = s * (cos * shear - sin);
    let c = s * sin;
    let d = s * (sin * shear + cos);

    [
        a, b, cx - (a * cx + b * cy),
        c, d, cy - (c * cx + d * cy),
        0.0, 0.0, 1.0,
    ]
}

fn affine<P>(buf: &ImageBuffer<P, Vec<u8>>, replica: &ReplicaParams) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + Send + Sync + 'static,
{
    let matrix = affine_matrix(buf.width(), buf.height(), replica);
    match Projection::from_matrix(matrix) {
        Some(projection) => warp(buf, &projection, Interpolation::Bilinear, black()),
        None => {
            tracing::warn!(?replica, "degenerate affine transform; skipping stage");
            buf.clone()
        }
    }
}

fn black<P: Pixel<Subpixel = u8>>() -> P {
    let zeros = [0u8; 4];
    *P::from_slice(&zeros[..P::CHANNEL_COUNT as usize])
}

/// Apply `f` to every colour channel (alpha untouched), saturating to 0..=255.
fn map_intensity<P, F>(buf: &mut ImageBuffer<P, Vec<u8>>, f: F)
where
    P: Pixel<Subpixel = u8>,
    F: Fn(f32) -> f32,
{
    for pixel in buf.pixels_mut() {
        pixel.apply_without_alpha(|v| f(v as f32).round().clamp(0.0, 255.0) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_produce_exact_count() {
        let mut aug = RandomAugmenter::seeded(AugmentParams::default(), 7);
        let img = DynamicImage::ImageRgb8(gradient(48, 64));
        let out = aug.produce(&img, DEFAULT_AUGMENTATION_COUNT);
        assert_eq!(out.len(), 100);
        for variant in &out {
            assert_eq!((variant.width(), variant.height()), (48, 64));
            assert!(matches!(variant, DynamicImage::ImageRgb8(_)));
        }
    }

    #[test]
    fn test_produce_zero_count() {
        let mut aug = RandomAugmenter::seeded(AugmentParams::default(), 1);
        let img = DynamicImage::ImageRgb8(gradient(8, 8));
        assert!(aug.produce(&img, 0).is_empty());
    }

    #[test]
    fn test_channel_layout_preserved() {
        let mut aug = RandomAugmenter::seeded(AugmentParams::default(), 3);

        let luma = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 12, Luma([90])));
        assert!(aug.produce(&luma, 3).iter().all(|v| matches!(v, DynamicImage::ImageLuma8(_))));

        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 12, Rgba([9, 8, 7, 255])));
        assert!(aug.produce(&rgba, 3).iter().all(|v| matches!(v, DynamicImage::ImageRgba8(_))));
    }

    #[test]
    fn test_sixteen_bit_converted_to_rgb8() {
        let img = DynamicImage::ImageRgb16(image::ImageBuffer::from_pixel(6, 6, Rgb([1000u16, 2000, 3000])));
        let out = apply(&img, &ReplicaParams::identity());
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
        assert_eq!((out.width(), out.height()), (6, 6));
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let img = DynamicImage::ImageRgb8(gradient(16, 16));
        let a = RandomAugmenter::seeded(AugmentParams::default(), 42).produce(&img, 5);
        let b = RandomAugmenter::seeded(AugmentParams::default(), 42).produce(&img, 5);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.as_bytes(), y.as_bytes());
        }
    }

    #[test]
    fn test_replicas_differ() {
        let img = DynamicImage::ImageRgb8(gradient(32, 32));
        let out = RandomAugmenter::seeded(AugmentParams::default(), 11).produce(&img, 4);
        assert_ne!(out[0].as_bytes(), out[1].as_bytes());
    }

    #[test]
    fn test_samples_within_ranges() {
        let params = AugmentParams::default();
        let mut rng = StdRng::seed_from_u64(5);
        let mut flips = 0;
        for _ in 0..1000 {
            let r = params.sample(&mut rng);
            assert!((-25.0..=25.0).contains(&r.rotate_degrees));
            assert!((-10.0..=10.0).contains(&r.shear_degrees));
            assert!((0.8..=1.2).contains(&r.scale));
            assert!((0.0..=0.05 * 255.0).contains(&r.noise_stddev));
            assert!((0.8..=1.2).contains(&r.brightness));
            assert!((0.75..=1.5).contains(&r.contrast));
            if r.flip {
                flips += 1;
            }
        }
        // p = 0.5 over 1000 draws
        assert!((400..=600).contains(&flips), "flips = {flips}");
    }

    #[test]
    fn test_identity_keeps_interior() {
        let src = gradient(20, 20);
        let out = apply(&DynamicImage::ImageRgb8(src.clone()), &ReplicaParams::identity()).to_rgb8();
        for y in 0..19 {
            for x in 0..19 {
                assert_eq!(out.get_pixel(x, y), src.get_pixel(x, y), "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_flip_mirrors() {
        let mut src = GrayImage::new(10, 10);
        src.put_pixel(1, 4, Luma([255]));
        let replica = ReplicaParams { flip: true, ..ReplicaParams::identity() };
        let out = apply(&DynamicImage::ImageLuma8(src), &replica).to_luma8();
        assert_eq!(out.get_pixel(8, 4), &Luma([255]));
        assert_eq!(out.get_pixel(1, 4), &Luma([0]));
    }

    #[test]
    fn test_brightness_saturates() {
        let mut buf = GrayImage::from_pixel(4, 4, Luma([240]));
        map_intensity(&mut buf, |v| v * 1.2);
        assert!(buf.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_contrast_pivots_on_mid_grey() {
        let mut buf = GrayImage::from_fn(3, 1, |x, _| Luma([[100u8, 128, 155][x as usize]]));
        map_intensity(&mut buf, |v| CONTRAST_CENTER + 1.5 * (v - CONTRAST_CENTER));
        // 127.5 + 1.5 * (100 - 127.5) = 86.25; 128 → 128.25; 155 → 168.75
        assert_eq!(buf.get_pixel(0, 0).0[0], 86);
        assert_eq!(buf.get_pixel(1, 0).0[0], 128);
        assert_eq!(buf.get_pixel(2, 0).0[0], 169);
    }

    #[test]
    fn test_alpha_untouched_by_intensity() {
        let mut buf = RgbaImage::from_pixel(2, 2, Rgba([100, 100, 100, 200]));
        map_intensity(&mut buf, |v| v * 2.0);
        assert_eq!(buf.get_pixel(0, 0), &Rgba([200, 200, 200, 200]));
    }

    #[test]
    fn test_affine_matrix_identity() {
        let m = affine_matrix(40, 30, &ReplicaParams::identity());
        let expected = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        for (got, want) in m.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6, "{m:?}");
        }
    }

    #[test]
    fn test_affine_matrix_keeps_centre_fixed() {
        let replica = ReplicaParams {
            rotate_degrees: 20.0,
            shear_degrees: -7.0,
            scale: 1.15,
            ..ReplicaParams::identity()
        };
        let m = affine_matrix(40, 30, &replica);
        let (cx, cy) = (20.0f32, 15.0f32);
        let x = m[0] * cx + m[1] * cy + m[2];
        let y = m[3] * cx + m[4] * cy + m[5];
        assert!((x - cx).abs() < 1e-3 && (y - cy).abs() < 1e-3);
    }
}
