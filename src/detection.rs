use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::median_filter;
use imageproc::geometry::{approximate_polygon_dp, contour_area};
use imageproc::morphology::dilate;
use imageproc::rect::Rect;
use imageproc::template_matching::find_extremes;
use tracing::{debug, info, instrument};

use crate::contour::Contour;
use crate::coordinate::ImageDimensions;
use crate::error::{Error, Result};
use crate::transform::crop_rect;

/// Tuning constants for the region-of-interest pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct RoiConfig {
    /// Landscape processing size; portrait images use it transposed
    pub processing_width: u32,
    pub processing_height: u32,
    pub median_radius: u32,
    /// Side of the square windows sampled around the darkest and brightest pixels
    pub sample_size: u32,
    pub dark_weight: f64,
    pub image_weight: f64,
    pub bright_weight: f64,
    pub border_width: u32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// L1 radius of the dilation; 1 is a 3×3 cross
    pub dilation_radius: u8,
    /// Maximum deviation of the simplified polygon from the traced border
    pub polygon_epsilon: f64,
    /// Smallest accepted contour area, in processing-resolution pixels
    pub min_area: f64,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            processing_width: 640,
            processing_height: 480,
            median_radius: 17,
            sample_size: 10,
            dark_weight: 0.5,
            image_weight: 0.2,
            bright_weight: 0.3,
            border_width: 5,
            canny_low: 10.0,
            canny_high: 20.0,
            dilation_radius: 1,
            polygon_epsilon: 50.0,
            min_area: 320.0 * 240.0,
        }
    }
}

impl RoiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.processing_width == 0 || self.processing_height == 0 {
            return Err(Error::invalid_argument(
                "processing_size",
                format!("{}x{}", self.processing_width, self.processing_height),
                "processing size must be non-zero",
            ));
        }
        let short_side = self.processing_width.min(self.processing_height);
        if self.sample_size == 0 || self.sample_size > short_side {
            return Err(Error::invalid_argument(
                "sample_size",
                self.sample_size,
                format!("must be between 1 and {}", short_side),
            ));
        }
        if self.canny_low < 0.0 || self.canny_high < self.canny_low {
            return Err(Error::invalid_argument(
                "canny_thresholds",
                format!("{}/{}", self.canny_low, self.canny_high),
                "thresholds must be non-negative with low <= high",
            ));
        }
        if self.polygon_epsilon <= 0.0 {
            return Err(Error::invalid_argument(
                "polygon_epsilon",
                self.polygon_epsilon,
                "must be positive",
            ));
        }
        if [self.dark_weight, self.image_weight, self.bright_weight]
            .iter()
            .any(|w| *w < 0.0)
        {
            return Err(Error::invalid_argument(
                "threshold_weights",
                format!(
                    "{}/{}/{}",
                    self.dark_weight, self.image_weight, self.bright_weight
                ),
                "weights must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Intensity samples behind the binarization threshold
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSample {
    pub dark_window: Rect,
    pub bright_window: Rect,
    pub dark_mean: f64,
    pub image_mean: f64,
    pub bright_mean: f64,
    pub threshold: f64,
}

/// Processing size for an image, oriented like the image itself
pub fn processing_size(source: ImageDimensions, config: &RoiConfig) -> ImageDimensions {
    let long = config.processing_width.max(config.processing_height);
    let short = config.processing_width.min(config.processing_height);
    if source.is_landscape() {
        ImageDimensions::new(long, short)
    } else {
        ImageDimensions::new(short, long)
    }
}

/// Channel 0 of the image, resized to `size` and median filtered
pub fn reduce(image: &DynamicImage, size: ImageDimensions, median_radius: u32) -> GrayImage {
    let channel = match image {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        other => {
            let rgb = other.to_rgb8();
            GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                Luma([rgb.get_pixel(x, y)[0]])
            })
        }
    };

    let resized = imageops::resize(&channel, size.width, size.height, FilterType::Triangle);
    median_filter(&resized, median_radius, median_radius)
}

/// Square window of side `size` around `center`, shifted to stay inside the image
pub fn sample_window(center: (u32, u32), image_size: (u32, u32), size: u32) -> Rect {
    let (width, height) = image_size;
    let half = size / 2;

    let clamp_axis = |c: u32, extent: u32| -> (u32, u32) {
        if extent <= size {
            return (0, extent.max(1));
        }
        let c = c.clamp(half, extent - (size - half));
        (c - half, size)
    };

    let (left, window_width) = clamp_axis(center.0, width);
    let (top, window_height) = clamp_axis(center.1, height);
    Rect::at(left as i32, top as i32).of_size(window_width, window_height)
}

/// Mean intensity inside `rect`, which must lie within the image
pub fn window_mean(image: &GrayImage, rect: Rect) -> f64 {
    let mut sum = 0u64;
    for y in rect.top()..=rect.bottom() {
        for x in rect.left()..=rect.right() {
            sum += image.get_pixel(x as u32, y as u32)[0] as u64;
        }
    }
    sum as f64 / (rect.width() as u64 * rect.height() as u64) as f64
}

pub fn image_mean(image: &GrayImage) -> f64 {
    let pixel_count = image.width() as u64 * image.height() as u64;
    if pixel_count == 0 {
        return 0.0;
    }
    let sum: u64 = image.pixels().map(|p| p[0] as u64).sum();
    sum as f64 / pixel_count as f64
}

/// Weighted blend of the darkest window, the whole image and the brightest window.
///
/// The page is expected to be brighter than its background, so the dark
/// extreme carries the largest weight to keep shadows out of the foreground.
pub fn adaptive_threshold(reduced: &GrayImage, config: &RoiConfig) -> ThresholdSample {
    let extremes = find_extremes(reduced);
    let size = reduced.dimensions();

    let dark_window = sample_window(extremes.min_value_location, size, config.sample_size);
    let bright_window = sample_window(extremes.max_value_location, size, config.sample_size);

    let dark_mean = window_mean(reduced, dark_window);
    let bright_mean = window_mean(reduced, bright_window);
    let image_mean = image_mean(reduced);

    let threshold = config.dark_weight * dark_mean
        + config.image_weight * image_mean
        + config.bright_weight * bright_mean;

    ThresholdSample {
        dark_window,
        bright_window,
        dark_mean,
        image_mean,
        bright_mean,
        threshold,
    }
}

/// Pixels strictly brighter than `threshold` become foreground (255)
pub fn binarize(reduced: &GrayImage, threshold: f64) -> GrayImage {
    GrayImage::from_fn(reduced.width(), reduced.height(), |x, y| {
        if reduced.get_pixel(x, y)[0] as f64 > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Blacken a `width` pixel frame so borders touching the edge still close
pub fn frame_border(mut binary: GrayImage, width: u32) -> GrayImage {
    let (w, h) = binary.dimensions();
    for (x, y, pixel) in binary.enumerate_pixels_mut() {
        if x < width || y < width || x + width >= w || y + width >= h {
            *pixel = Luma([0]);
        }
    }
    binary
}

/// Canny edges, dilated to close small gaps in the page outline
pub fn edge_map(binary: &GrayImage, config: &RoiConfig) -> GrayImage {
    let edges = canny(binary, config.canny_low, config.canny_high);
    dilate(&edges, Norm::L1, config.dilation_radius)
}

/// Trace every border in `edges` and keep the ones enclosing at least
/// `min_area` pixels.
///
/// The area comes from the raw trace; the stored points are the simplified
/// polygon.
pub fn trace_contours(edges: &GrayImage, config: &RoiConfig) -> Vec<Contour> {
    let dimensions = ImageDimensions::new(edges.width(), edges.height());

    find_contours::<i32>(edges)
        .into_iter()
        .filter(|raw| !raw.points.is_empty())
        .filter_map(|raw| {
            let area = contour_area(&raw.points);
            if area < config.min_area {
                return None;
            }
            let simplified = approximate_polygon_dp(&raw.points, config.polygon_epsilon, true);
            let points: Vec<[i32; 2]> = simplified.iter().map(|p| [p.x, p.y]).collect();
            Some(Contour::from_points(&points, dimensions, Some(area)))
        })
        .collect()
}

/// Finds candidate page boundaries in photographs.
#[derive(Debug, Clone, Default)]
pub struct RoiDetector {
    config: RoiConfig,
}

impl RoiDetector {
    pub fn new(config: RoiConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RoiConfig {
        &self.config
    }

    /// Detect candidate contours, expressed in the source image's pixels.
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn detect_contours(&self, image: &DynamicImage) -> Vec<Contour> {
        let source = ImageDimensions::of(image);
        if source.width == 0 || source.height == 0 {
            return Vec::new();
        }
        let size = processing_size(source, &self.config);

        let edges = {
            let reduced = reduce(image, size, self.config.median_radius);
            let sample = adaptive_threshold(&reduced, &self.config);
            debug!(
                dark = sample.dark_mean,
                whole = sample.image_mean,
                bright = sample.bright_mean,
                threshold = sample.threshold,
                "Adaptive threshold computed"
            );
            let binary = frame_border(
                binarize(&reduced, sample.threshold),
                self.config.border_width,
            );
            edge_map(&binary, &self.config)
        };

        let contours: Vec<Contour> = trace_contours(&edges, &self.config)
            .iter()
            .map(|c| c.scale_with(source))
            .collect();

        info!(
            processing_width = size.width,
            processing_height = size.height,
            count = contours.len(),
            "Contours detected"
        );
        contours
    }

    /// The detected contour with the largest area, or an empty contour
    pub fn largest_contour(&self, image: &DynamicImage) -> Contour {
        self.detect_contours(image)
            .into_iter()
            .max_by(|a, b| a.area().total_cmp(&b.area()))
            .unwrap_or_else(Contour::empty)
    }

    /// Crop to the bounding box of the largest contour.
    ///
    /// Returns an unmodified copy of the image when nothing was detected.
    pub fn crop_to_largest_contour(&self, image: &DynamicImage) -> DynamicImage {
        match self.largest_contour(image).bounding_box() {
            Some(rect) => {
                debug!(
                    left = rect.left(),
                    top = rect.top(),
                    width = rect.width(),
                    height = rect.height(),
                    "Cropping to largest contour"
                );
                crop_rect(image, rect)
            }
            None => {
                info!("No page contour found, keeping the full image");
                image.clone()
            }
        }
    }
}
