//! Synthetic scenes shared by the integration tests.
//!
//! A scene is a continuous intensity field: soft-edged discs and boxes over a
//! ramp and a wave texture that makes every neighbourhood distinct.
//! Rendering samples it per pixel, so a rotated view is an exact rotation of
//! the same content rather than a resampled copy.

#![allow(dead_code)]

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

enum Shape {
    Disc { cx: f32, cy: f32, r: f32, amp: f32 },
    Box { x0: f32, y0: f32, x1: f32, y1: f32, amp: f32 },
}

struct Wave {
    kx: f32,
    ky: f32,
    phase: f32,
    amp: f32,
}

pub struct Scene {
    width: u32,
    height: u32,
    shapes: Vec<Shape>,
    waves: Vec<Wave>,
}

fn coverage(signed_distance: f32) -> f32 {
    // linear edge about 1.5 px wide
    (signed_distance / 1.5 + 0.5).clamp(0.0, 1.0)
}

fn random_amplitude(rng: &mut StdRng) -> f32 {
    let magnitude = rng.gen_range(35.0..75.0);
    if rng.gen_bool(0.5) {
        magnitude
    } else {
        -magnitude
    }
}

impl Scene {
    pub fn random(seed: u64, width: u32, height: u32) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let (w, h) = (width as f32, height as f32);
        let mut shapes = Vec::new();

        for _ in 0..(width * height / 700) {
            let amp = random_amplitude(&mut rng);
            shapes.push(Shape::Disc {
                cx: rng.gen_range(0.0..w),
                cy: rng.gen_range(0.0..h),
                r: rng.gen_range(5.0..14.0),
                amp,
            });
        }
        for _ in 0..(width * height / 2500) {
            let x0 = rng.gen_range(0.0..w);
            let y0 = rng.gen_range(0.0..h);
            let amp = random_amplitude(&mut rng);
            shapes.push(Shape::Box {
                x0,
                y0,
                x1: x0 + rng.gen_range(8.0..30.0),
                y1: y0 + rng.gen_range(8.0..30.0),
                amp,
            });
        }

        let waves = (0..8)
            .map(|_| {
                let direction: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
                let wavelength: f32 = rng.gen_range(12.0..40.0);
                let k = std::f32::consts::TAU / wavelength;
                Wave {
                    kx: k * direction.cos(),
                    ky: k * direction.sin(),
                    phase: rng.gen_range(0.0..std::f32::consts::TAU),
                    amp: 5.0,
                }
            })
            .collect();

        Self {
            width,
            height,
            shapes,
            waves,
        }
    }

    pub fn intensity(&self, x: f32, y: f32) -> f32 {
        let mut value = 128.0 + 0.05 * x + 0.03 * y;
        for wave in &self.waves {
            value += wave.amp * (wave.kx * x + wave.ky * y + wave.phase).sin();
        }
        for shape in &self.shapes {
            match *shape {
                Shape::Disc { cx, cy, r, amp } => {
                    let d = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt();
                    if d < r + 1.0 {
                        value += amp * coverage(r - d);
                    }
                }
                Shape::Box { x0, y0, x1, y1, amp } => {
                    if x > x0 - 1.0 && x < x1 + 1.0 && y > y0 - 1.0 && y < y1 + 1.0 {
                        let inside = (x - x0).min(x1 - x).min(y - y0).min(y1 - y);
                        value += amp * coverage(inside);
                    }
                }
            }
        }
        value.clamp(0.0, 255.0)
    }

    pub fn render(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([self.intensity(x as f32, y as f32).round() as u8])
        })
    }

    /// The scene turned clockwise on screen by `degrees` about the image centre
    pub fn render_rotated(&self, degrees: f32) -> GrayImage {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let cx = self.width as f32 / 2.0;
        let cy = self.height as f32 / 2.0;
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            // inverse rotation takes the output pixel back into the scene
            let sx = cx + cos * dx + sin * dy;
            let sy = cy - sin * dx + cos * dy;
            Luma([self.intensity(sx, sy).round() as u8])
        })
    }
}

/// A bright page on a dark, slightly noisy table.
pub fn page_photo(
    width: u32,
    height: u32,
    page: (u32, u32, u32, u32),
    seed: u64,
) -> DynamicImage {
    let (left, top, right, bottom) = page;
    let mut rng = StdRng::seed_from_u64(seed);
    let img = RgbImage::from_fn(width, height, |x, y| {
        let base: i32 = if x >= left && x < right && y >= top && y < bottom {
            235
        } else {
            35
        };
        let v = (base + rng.gen_range(-8..=8)).clamp(0, 255) as u8;
        Rgb([v, v, v.saturating_sub(5)])
    });
    DynamicImage::ImageRgb8(img)
}
