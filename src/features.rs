//! Oriented keypoints with rotation-steered binary descriptors.
//!
//! Keypoints are FAST-9 corners ranked by their Harris response after
//! non-maximum suppression, and oriented by the intensity centroid of the
//! surrounding 31×31 disc. Corners whose patch is too flat or too symmetric to
//! orient are dropped. Each descriptor is 256 comparisons between 5×5 box
//! means at point pairs of a fixed pattern, rotated by the keypoint
//! orientation before sampling, so descriptors of the same feature match
//! across rotations.

use std::collections::HashMap;

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use imageproc::integral_image::{integral_image, sum_image_pixels};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::geometry::normalize_degrees;

pub const DESCRIPTOR_BITS: usize = 256;
const DESCRIPTOR_WORDS: usize = DESCRIPTOR_BITS / 64;

/// Half the side of the 31×31 patch a keypoint is described by
const HALF_PATCH: i32 = 15;
/// Half the side of the box averaged at each test point
const HALF_BOX: i32 = 2;
/// Test points stay inside this radius so their boxes stay inside the patch
const PATTERN_RADIUS: f32 = (HALF_PATCH - HALF_BOX) as f32;
/// Shortest distance between the two points of a test
const MIN_PAIR_LENGTH: f32 = 4.0;
/// Two tests closer than this at both ends measure the same thing
const MIN_PAIR_SEPARATION: f32 = 2.0;
/// Keypoints closer than this to an edge are dropped so every sample is in bounds
const EDGE_MARGIN: u32 = HALF_PATCH as u32 + 1;
const PATTERN_SEED: u64 = 0x5eed_0f_0b;

const HARRIS_HALF_BLOCK: i32 = 3;
const HARRIS_K: f32 = 0.04;
/// Mean absolute deviation below which a patch is treated as flat
const MIN_PATCH_DEVIATION: f64 = 4.0;
/// Centroid offset, as a fraction of the patch radius, needed to trust an orientation
const MIN_ORIENTATION_STRENGTH: f64 = 0.1;

type IntegralImage = ImageBuffer<Luma<u64>, Vec<u64>>;

/// A detected interest point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Orientation in degrees, `[0, 360)`, measured from +x toward +y
    pub angle: f32,
    /// Harris corner response
    pub response: f32,
}

/// 256-bit binary descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Descriptor([u64; DESCRIPTOR_WORDS]);

impl Descriptor {
    pub fn from_words(words: [u64; DESCRIPTOR_WORDS]) -> Self {
        Self(words)
    }

    pub fn hamming_distance(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    fn set_bit(&mut self, index: usize) {
        self.0[index / 64] |= 1 << (index % 64);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub keypoint: Keypoint,
    pub descriptor: Descriptor,
}

/// Nearest train feature for one query feature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    pub query_index: usize,
    pub train_index: usize,
    pub distance: u32,
}

#[derive(Debug, Clone, Copy)]
struct TestPair {
    a: (f32, f32),
    b: (f32, f32),
}

impl TestPair {
    fn length(&self) -> f32 {
        distance(self.a, self.b)
    }

    /// Whether both ends lie near the ends of `other`, in either order
    fn overlaps(&self, other: &TestPair) -> bool {
        let near = |p, q| distance(p, q) < MIN_PAIR_SEPARATION;
        (near(self.a, other.a) && near(self.b, other.b))
            || (near(self.a, other.b) && near(self.b, other.a))
    }
}

fn distance(p: (f32, f32), q: (f32, f32)) -> f32 {
    ((p.0 - q.0).powi(2) + (p.1 - q.1).powi(2)).sqrt()
}

#[derive(Debug, Clone, Copy)]
struct Corner {
    x: u32,
    y: u32,
    harris: f32,
}

/// Detects keypoints and computes their descriptors.
///
/// The comparison pattern is generated from a fixed seed, so descriptors from
/// different extractor instances are comparable.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    pattern: Vec<TestPair>,
    max_keypoints: usize,
    fast_threshold: u8,
    smoothing_sigma: f32,
}

impl FeatureExtractor {
    pub fn new(max_keypoints: usize, fast_threshold: u8, smoothing_sigma: f32) -> Self {
        Self {
            pattern: test_pattern(PATTERN_SEED),
            max_keypoints,
            fast_threshold,
            smoothing_sigma,
        }
    }

    /// Detect up to `max_keypoints` features, strongest corners first
    pub fn detect(&self, image: &GrayImage) -> Vec<Feature> {
        let (width, height) = image.dimensions();
        if width <= 2 * EDGE_MARGIN || height <= 2 * EDGE_MARGIN {
            return Vec::new();
        }

        let fast = corners_fast9(image, self.fast_threshold);
        let fast_count = fast.len();
        let corners: Vec<Corner> = fast
            .into_iter()
            .filter(|c| {
                c.x >= EDGE_MARGIN
                    && c.y >= EDGE_MARGIN
                    && c.x < width - EDGE_MARGIN
                    && c.y < height - EDGE_MARGIN
            })
            .map(|c| Corner {
                x: c.x,
                y: c.y,
                harris: harris_response(image, c.x, c.y),
            })
            // edges and flat spots score zero or below
            .filter(|c| c.harris > 0.0)
            .collect();

        let mut corners = suppress_non_maxima(corners);
        corners.sort_by(|a, b| b.harris.total_cmp(&a.harris));

        let smoothed = if self.smoothing_sigma > 0.0 {
            gaussian_blur_f32(image, self.smoothing_sigma)
        } else {
            image.clone()
        };
        let integral = integral_image::<_, u64>(&smoothed);

        let features: Vec<Feature> = corners
            .iter()
            .filter_map(|corner| {
                let angle = orientation(image, corner.x, corner.y)?;
                let keypoint = Keypoint {
                    x: corner.x as f32,
                    y: corner.y as f32,
                    angle,
                    response: corner.harris,
                };
                Some(Feature {
                    keypoint,
                    descriptor: self.describe(&integral, &keypoint),
                })
            })
            .take(self.max_keypoints)
            .collect();

        debug!(
            width,
            height,
            fast = fast_count,
            kept = features.len(),
            "Features detected"
        );
        features
    }

    fn describe(&self, integral: &IntegralImage, keypoint: &Keypoint) -> Descriptor {
        let (sin, cos) = keypoint.angle.to_radians().sin_cos();
        let steer = |(px, py): (f32, f32)| {
            (
                keypoint.x + cos * px - sin * py,
                keypoint.y + sin * px + cos * py,
            )
        };

        let mut descriptor = Descriptor::default();
        for (bit, pair) in self.pattern.iter().enumerate() {
            let (ax, ay) = steer(pair.a);
            let (bx, by) = steer(pair.b);
            if box_sample(integral, ax, ay) < box_sample(integral, bx, by) {
                descriptor.set_bit(bit);
            }
        }
        descriptor
    }
}

/// Test pairs drawn inside the pattern disc, skipping short pairs and pairs
/// that repeat an earlier test.
fn test_pattern(seed: u64) -> Vec<TestPair> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut point = || loop {
        let x = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        let y = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        if x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS {
            return (x, y);
        }
    };

    let mut pattern: Vec<TestPair> = Vec::with_capacity(DESCRIPTOR_BITS);
    while pattern.len() < DESCRIPTOR_BITS {
        let candidate = TestPair {
            a: point(),
            b: point(),
        };
        if candidate.length() < MIN_PAIR_LENGTH {
            continue;
        }
        if pattern.iter().any(|p| p.overlaps(&candidate)) {
            continue;
        }
        pattern.push(candidate);
    }
    pattern
}

/// Harris corner response over a 7×7 block of Sobel gradients
fn harris_response(image: &GrayImage, x: u32, y: u32) -> f32 {
    let p = |px: i32, py: i32| image.get_pixel(px as u32, py as u32)[0] as f32;
    let (mut sxx, mut syy, mut sxy) = (0.0f32, 0.0f32, 0.0f32);

    for dy in -HARRIS_HALF_BLOCK..=HARRIS_HALF_BLOCK {
        for dx in -HARRIS_HALF_BLOCK..=HARRIS_HALF_BLOCK {
            let cx = x as i32 + dx;
            let cy = y as i32 + dy;
            let gx = (p(cx + 1, cy - 1) + 2.0 * p(cx + 1, cy) + p(cx + 1, cy + 1))
                - (p(cx - 1, cy - 1) + 2.0 * p(cx - 1, cy) + p(cx - 1, cy + 1));
            let gy = (p(cx - 1, cy + 1) + 2.0 * p(cx, cy + 1) + p(cx + 1, cy + 1))
                - (p(cx - 1, cy - 1) + 2.0 * p(cx, cy - 1) + p(cx + 1, cy - 1));
            sxx += gx * gx;
            syy += gy * gy;
            sxy += gx * gy;
        }
    }

    let det = sxx * syy - sxy * sxy;
    let trace = sxx + syy;
    det - HARRIS_K * trace * trace
}

/// Keep corners whose Harris response beats every adjacent corner.
///
/// Equal neighbours are resolved toward the first in row-major order.
fn suppress_non_maxima(corners: Vec<Corner>) -> Vec<Corner> {
    let responses: HashMap<(u32, u32), f32> =
        corners.iter().map(|c| ((c.x, c.y), c.harris)).collect();

    corners
        .into_iter()
        .filter(|c| {
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = c.x as i64 + dx;
                    let ny = c.y as i64 + dy;
                    if nx < 0 || ny < 0 {
                        continue;
                    }
                    let Some(&other) = responses.get(&(nx as u32, ny as u32)) else {
                        continue;
                    };
                    let earlier = (ny, nx) < (c.y as i64, c.x as i64);
                    if other > c.harris || (other == c.harris && earlier) {
                        return false;
                    }
                }
            }
            true
        })
        .collect()
}

/// Orientation of the intensity centroid of the patch disc, in degrees.
///
/// `None` when the patch is too flat or its centroid too close to the centre
/// for the angle to survive noise.
fn orientation(image: &GrayImage, x: u32, y: u32) -> Option<f32> {
    let r = HALF_PATCH;
    let mut offsets = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                let intensity = image.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0];
                offsets.push((dx, dy, intensity as f64));
            }
        }
    }

    let n = offsets.len() as f64;
    let mean = offsets.iter().map(|o| o.2).sum::<f64>() / n;
    let deviation: f64 = offsets.iter().map(|o| (o.2 - mean).abs()).sum();
    if deviation / n < MIN_PATCH_DEVIATION {
        return None;
    }

    let (m10, m01) = offsets.iter().fold((0.0, 0.0), |(m10, m01), &(dx, dy, i)| {
        (m10 + dx as f64 * (i - mean), m01 + dy as f64 * (i - mean))
    });
    let strength = (m10 * m10 + m01 * m01).sqrt() / (deviation * r as f64);
    if strength < MIN_ORIENTATION_STRENGTH {
        return None;
    }

    Some(normalize_degrees(m01.atan2(m10).to_degrees()) as f32)
}

/// Mean of the 5×5 box centred on an integer pixel
fn box_mean(integral: &IntegralImage, x: u32, y: u32) -> f32 {
    let half = HALF_BOX as u32;
    let side = 2 * half + 1;
    let sum = sum_image_pixels(integral, x - half, y - half, x + half, y + half)[0];
    sum as f32 / (side * side) as f32
}

/// Box mean at a sub-pixel position, blended bilinearly from the four
/// surrounding integer boxes.
fn box_sample(integral: &IntegralImage, x: f32, y: f32) -> f32 {
    // the integral image is one larger than the source in each direction
    let (width, height) = (integral.width() - 1, integral.height() - 1);
    let half = HALF_BOX as f32;
    let x = x.clamp(half, (width - 1) as f32 - half - 1.0);
    let y = y.clamp(half, (height - 1) as f32 - half - 1.0);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let top = box_mean(integral, x0, y0) * (1.0 - fx) + box_mean(integral, x0 + 1, y0) * fx;
    let bottom =
        box_mean(integral, x0, y0 + 1) * (1.0 - fx) + box_mean(integral, x0 + 1, y0 + 1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Match every query descriptor to its nearest train descriptor.
///
/// One-directional: several query features may share a train feature.
pub fn match_features(query: &[Feature], train: &[Feature]) -> Vec<FeatureMatch> {
    if train.is_empty() {
        return Vec::new();
    }

    query
        .iter()
        .enumerate()
        .filter_map(|(query_index, q)| {
            train
                .iter()
                .enumerate()
                .map(|(train_index, t)| FeatureMatch {
                    query_index,
                    train_index,
                    distance: q.descriptor.hamming_distance(&t.descriptor),
                })
                .min_by_key(|m| m.distance)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
    use imageproc::rect::Rect;

    fn blocks() -> GrayImage {
        let mut img = GrayImage::from_pixel(120, 120, Luma([40]));
        draw_filled_rect_mut(&mut img, Rect::at(30, 30).of_size(25, 40), Luma([220]));
        draw_filled_rect_mut(&mut img, Rect::at(70, 50).of_size(30, 20), Luma([140]));
        img
    }

    #[test]
    fn test_hamming_distance() {
        let a = Descriptor::from_words([0, 0, 0, 0]);
        let b = Descriptor::from_words([0b1011, 0, u64::MAX, 1]);
        assert_eq!(a.hamming_distance(&b), 3 + 64 + 1);
        assert_eq!(b.hamming_distance(&b), 0);
    }

    #[test]
    fn test_pattern_is_deterministic_and_decorrelated() {
        let a = test_pattern(PATTERN_SEED);
        let b = test_pattern(PATTERN_SEED);
        assert_eq!(a.len(), DESCRIPTOR_BITS);
        for (i, (p, q)) in a.iter().zip(b.iter()).enumerate() {
            assert_eq!(p.a, q.a);
            assert_eq!(p.b, q.b);
            for (x, y) in [p.a, p.b] {
                assert!(x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS);
            }
            assert!(p.length() >= MIN_PAIR_LENGTH);
            assert!(a[..i].iter().all(|earlier| !earlier.overlaps(p)));
        }
    }

    #[test]
    fn test_harris_separates_corner_from_edge() {
        let mut img = GrayImage::from_pixel(40, 40, Luma([30]));
        draw_filled_rect_mut(&mut img, Rect::at(20, 20).of_size(20, 20), Luma([200]));
        assert!(harris_response(&img, 20, 20) > 0.0);
        // straight edge, far from the corner
        assert!(harris_response(&img, 20, 32) <= 0.0);
        // flat
        assert_eq!(harris_response(&img, 8, 8), 0.0);
    }

    #[test]
    fn test_non_maximum_suppression_keeps_local_peak() {
        let corners = vec![
            Corner { x: 10, y: 10, harris: 5.0 },
            Corner { x: 11, y: 10, harris: 9.0 },
            Corner { x: 12, y: 11, harris: 7.0 },
            Corner { x: 30, y: 30, harris: 1.0 },
            Corner { x: 40, y: 40, harris: 2.0 },
            Corner { x: 41, y: 40, harris: 2.0 },
        ];
        let kept: Vec<(u32, u32)> = suppress_non_maxima(corners)
            .iter()
            .map(|c| (c.x, c.y))
            .collect();
        assert_eq!(kept, vec![(11, 10), (30, 30), (40, 40)]);
    }

    #[test]
    fn test_orientation_points_toward_bright_side() {
        let mut img = GrayImage::from_pixel(64, 64, Luma([0]));
        draw_filled_rect_mut(&mut img, Rect::at(33, 0).of_size(31, 64), Luma([255]));
        let angle = orientation(&img, 32, 32).unwrap();
        assert!(angle < 1.0 || angle > 359.0, "angle {}", angle);

        let mut img = GrayImage::from_pixel(64, 64, Luma([0]));
        draw_filled_rect_mut(&mut img, Rect::at(0, 33).of_size(64, 31), Luma([255]));
        let angle = orientation(&img, 32, 32).unwrap();
        assert!((angle - 90.0).abs() < 1.0, "angle {}", angle);
    }

    #[test]
    fn test_orientation_rejects_flat_and_symmetric_patches() {
        let flat = GrayImage::from_pixel(64, 64, Luma([128]));
        assert_eq!(orientation(&flat, 32, 32), None);

        let mut blob = GrayImage::from_pixel(64, 64, Luma([20]));
        draw_filled_circle_mut(&mut blob, (32, 32), 6, Luma([220]));
        assert_eq!(orientation(&blob, 32, 32), None);
    }

    #[test]
    fn test_box_sample_averages_neighbourhood() {
        let mut img = GrayImage::from_pixel(20, 20, Luma([0]));
        img.put_pixel(10, 10, Luma([250]));
        let integral = integral_image::<_, u64>(&img);
        assert_eq!(box_sample(&integral, 10.0, 10.0), 10.0);
        assert_eq!(box_sample(&integral, 14.0, 10.0), 0.0);
        assert_eq!(box_sample(&integral, 10.5, 10.0), 10.0);
        assert_eq!(box_sample(&integral, 12.5, 10.0), 5.0);
    }

    #[test]
    fn test_detects_corners_away_from_edges() {
        let extractor = FeatureExtractor::new(10_000, 20, 2.0);
        let features = extractor.detect(&blocks());
        assert!(!features.is_empty());
        for f in &features {
            let x = f.keypoint.x;
            assert!(x >= EDGE_MARGIN as f32 && x < (120 - EDGE_MARGIN) as f32);
            assert!((0.0..360.0).contains(&f.keypoint.angle));
            assert!(f.keypoint.response > 0.0);
        }
        let responses: Vec<f32> = features.iter().map(|f| f.keypoint.response).collect();
        assert!(responses.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_keypoint_cap() {
        let extractor = FeatureExtractor::new(3, 20, 2.0);
        assert!(extractor.detect(&blocks()).len() <= 3);
    }

    #[test]
    fn test_flat_or_tiny_image_has_no_features() {
        let extractor = FeatureExtractor::new(100, 20, 2.0);
        assert!(extractor.detect(&GrayImage::from_pixel(100, 100, Luma([128]))).is_empty());
        assert!(extractor.detect(&GrayImage::new(20, 20)).is_empty());
    }

    #[test]
    fn test_identical_images_match_exactly() {
        let extractor = FeatureExtractor::new(10_000, 20, 2.0);
        let features = extractor.detect(&blocks());
        let matches = match_features(&features, &features);
        assert_eq!(matches.len(), features.len());
        assert!(matches.iter().all(|m| m.distance == 0));
    }

    #[test]
    fn test_match_with_empty_train_set() {
        let extractor = FeatureExtractor::new(10_000, 20, 2.0);
        let features = extractor.detect(&blocks());
        assert!(match_features(&features, &[]).is_empty());
    }
}
