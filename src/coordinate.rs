use std::hash::{Hash, Hasher};

use image::DynamicImage;

/// Fixed-point resolution used to compare proportional positions.
const PROPORTION_RESOLUTION: f64 = 1_000_000.0;

/// Size and pixel layout of the image a coordinate was captured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
    pub channel_count: u8,
    pub bits_per_pixel: u16,
}

impl ImageDimensions {
    /// Dimensions of a single channel 8-bit image
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            channel_count: 1,
            bits_per_pixel: 8,
        }
    }

    pub fn of(image: &DynamicImage) -> Self {
        let color = image.color();
        Self {
            width: image.width(),
            height: image.height(),
            channel_count: color.channel_count(),
            bits_per_pixel: color.bits_per_pixel(),
        }
    }

    pub fn is_landscape(&self) -> bool {
        self.width >= self.height
    }
}

impl From<&DynamicImage> for ImageDimensions {
    fn from(image: &DynamicImage) -> Self {
        Self::of(image)
    }
}

/// Quantized proportional position, the identity of a [`ProportionalCoordinate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProportionalKey {
    x: i64,
    y: i64,
}

/// A pixel location that remembers the image size it was captured at.
///
/// Two coordinates are equal when they sit at the same proportional position,
/// whatever resolution they were captured at: `(50, 25)` in a 100×100 image
/// equals `(100, 50)` in a 200×200 image.
#[derive(Debug, Clone, Copy)]
pub struct ProportionalCoordinate {
    dimensions: ImageDimensions,
    x: i32,
    y: i32,
}

impl ProportionalCoordinate {
    pub fn new(dimensions: ImageDimensions, x: i32, y: i32) -> Self {
        Self { dimensions, x, y }
    }

    pub fn dimensions(&self) -> ImageDimensions {
        self.dimensions
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn proportional_x(&self) -> f64 {
        self.x as f64 / self.dimensions.width as f64
    }

    pub fn proportional_y(&self) -> f64 {
        self.y as f64 / self.dimensions.height as f64
    }

    pub fn key(&self) -> ProportionalKey {
        ProportionalKey {
            x: (self.proportional_x() * PROPORTION_RESOLUTION).round() as i64,
            y: (self.proportional_y() * PROPORTION_RESOLUTION).round() as i64,
        }
    }

    /// Project this coordinate onto an image of a different size.
    ///
    /// Pixel values are truncated toward zero, so re-basing through a coarser
    /// resolution loses precision.
    pub fn scale_to(&self, target: ImageDimensions) -> Self {
        // multiply before dividing so integer-multiple rescales stay exact
        let x = (target.width as f64 * self.x as f64 / self.dimensions.width as f64) as i32;
        let y = (target.height as f64 * self.y as f64 / self.dimensions.height as f64) as i32;
        Self::new(target, x, y)
    }

    pub fn to_array(&self) -> [i32; 2] {
        [self.x, self.y]
    }
}

impl PartialEq for ProportionalCoordinate {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ProportionalCoordinate {}

impl Hash for ProportionalCoordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}
