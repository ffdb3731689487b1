use image::{DynamicImage, GrayImage, Luma};
use imageproc::integral_image::{integral_image, integral_squared_image, sum_image_pixels};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

pub const DOCUMENT_WINDOW: u32 = 51;
pub const DOCUMENT_K: f64 = 0.2;
/// Dynamic range of the standard deviation, as a fraction of the channel mean
pub const DOCUMENT_R_FRACTION: f64 = 0.3;

/// Mean and population standard deviation of one image channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Interleaved 8-bit samples of `image` together with its channel count.
fn interleaved_samples(image: &DynamicImage) -> (Vec<u8>, usize) {
    match image.color().channel_count() {
        1 => (image.to_luma8().into_raw(), 1),
        2 => (image.to_luma_alpha8().into_raw(), 2),
        3 => (image.to_rgb8().into_raw(), 3),
        _ => (image.to_rgba8().into_raw(), 4),
    }
}

/// Per-channel statistics, in the channel order of the image's colour type
pub fn mean_std_dev(image: &DynamicImage) -> Vec<ChannelStats> {
    let (samples, channels) = interleaved_samples(image);
    let pixel_count = samples.len() / channels;
    if pixel_count == 0 {
        return vec![
            ChannelStats {
                mean: 0.0,
                std_dev: 0.0
            };
            channels
        ];
    }

    let mut sums = vec![0u64; channels];
    let mut squares = vec![0u64; channels];
    for pixel in samples.chunks_exact(channels) {
        for (c, &value) in pixel.iter().enumerate() {
            sums[c] += value as u64;
            squares[c] += (value as u64) * (value as u64);
        }
    }

    let n = pixel_count as f64;
    sums.iter()
        .zip(&squares)
        .map(|(&sum, &square)| {
            let mean = sum as f64 / n;
            let variance = (square as f64 / n - mean * mean).max(0.0);
            ChannelStats {
                mean,
                std_dev: variance.sqrt(),
            }
        })
        .collect()
}

/// Index of the channel with the largest standard deviation.
///
/// Ties go to the later channel. An empty slice yields 0.
pub fn index_of_biggest_std_dev(stats: &[ChannelStats]) -> usize {
    let mut biggest = 0;
    for (i, channel) in stats.iter().enumerate().skip(1) {
        if channel.std_dev >= stats[biggest].std_dev {
            biggest = i;
        }
    }
    biggest
}

/// One channel of `image` as a grayscale buffer.
pub fn extract_channel(image: &DynamicImage, index: usize) -> Result<GrayImage> {
    let (samples, channels) = interleaved_samples(image);
    if index >= channels {
        return Err(Error::invalid_argument(
            "channel",
            index,
            format!("image has {} channels", channels),
        ));
    }
    let plane: Vec<u8> = samples.iter().skip(index).step_by(channels).copied().collect();
    GrayImage::from_raw(image.width(), image.height(), plane).ok_or_else(|| {
        Error::invalid_argument("channel", index, "channel plane does not match image size")
    })
}

/// Sauvola local thresholding.
///
/// A pixel becomes white when it is brighter than `m * (1 + k * (s / r - 1))`,
/// where `m` and `s` are the mean and standard deviation of the `window`-sized
/// neighbourhood, clipped at the image border.
pub fn sauvola(gray: &GrayImage, window: u32, k: f64, r: f64) -> Result<GrayImage> {
    if window == 0 {
        return Err(Error::invalid_argument("window", window, "must be positive"));
    }
    if r <= 0.0 {
        return Err(Error::invalid_argument("r", r, "must be positive"));
    }

    let (width, height) = gray.dimensions();
    let mut output = GrayImage::new(width, height);
    if width == 0 || height == 0 {
        return Ok(output);
    }

    let sums = integral_image::<_, u64>(gray);
    let squares = integral_squared_image::<_, u64>(gray);
    let half = window / 2;

    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let left = x.saturating_sub(half);
        let top = y.saturating_sub(half);
        let right = (x + half).min(width - 1);
        let bottom = (y + half).min(height - 1);

        let n = ((right - left + 1) * (bottom - top + 1)) as f64;
        let sum = sum_image_pixels(&sums, left, top, right, bottom)[0] as f64;
        let sum_sq = sum_image_pixels(&squares, left, top, right, bottom)[0] as f64;
        let mean = sum / n;
        let std_dev = (sum_sq / n - mean * mean).max(0.0).sqrt();

        let threshold = mean * (1.0 + k * (std_dev / r - 1.0));
        let value = gray.get_pixel(x, y)[0] as f64;
        *pixel = Luma([if value > threshold { 255 } else { 0 }]);
    }

    Ok(output)
}

/// Binarize a photographed document.
///
/// Works on the channel with the most contrast, with the Sauvola range
/// tied to that channel's brightness.
#[instrument(skip_all, fields(width = image.width(), height = image.height()))]
pub fn binarize_document(image: &DynamicImage) -> Result<GrayImage> {
    let stats = mean_std_dev(image);
    let index = index_of_biggest_std_dev(&stats);
    let channel = extract_channel(image, index)?;
    let mean = stats.get(index).map(|s| s.mean).unwrap_or(0.0);
    // a black image has no range to speak of
    let r = (mean * DOCUMENT_R_FRACTION).max(f64::EPSILON);

    debug!(channel = index, mean, r, "Sauvola parameters");
    sauvola(&channel, DOCUMENT_WINDOW, DOCUMENT_K, r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_mean_std_dev_per_channel() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([0, 100, 50]));
        img.put_pixel(1, 0, Rgb([200, 100, 50]));
        let stats = mean_std_dev(&DynamicImage::ImageRgb8(img));

        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0].mean, 100.0);
        assert_eq!(stats[0].std_dev, 100.0);
        assert_eq!(stats[1].std_dev, 0.0);
        assert_eq!(stats[2].mean, 50.0);
    }

    #[test]
    fn test_biggest_std_dev_ties_go_to_later_channel() {
        let s = |std_dev| ChannelStats { mean: 0.0, std_dev };
        assert_eq!(index_of_biggest_std_dev(&[s(1.0), s(5.0), s(2.0)]), 1);
        assert_eq!(index_of_biggest_std_dev(&[s(5.0), s(5.0), s(2.0)]), 1);
        assert_eq!(index_of_biggest_std_dev(&[s(3.0), s(3.0), s(3.0), s(3.0)]), 3);
        assert_eq!(index_of_biggest_std_dev(&[]), 0);
    }

    #[test]
    fn test_extract_channel() {
        let img = RgbImage::from_pixel(3, 2, Rgb([1, 2, 3]));
        let green = extract_channel(&DynamicImage::ImageRgb8(img.clone()), 1).unwrap();
        assert!(green.pixels().all(|p| p[0] == 2));
        assert!(extract_channel(&DynamicImage::ImageRgb8(img), 3).is_err());
    }

    #[test]
    fn test_sauvola_separates_ink_from_paper() {
        let mut gray = GrayImage::from_pixel(80, 80, Luma([200]));
        for y in 30..50 {
            for x in 10..70 {
                gray.put_pixel(x, y, Luma([40]));
            }
        }
        let binary = sauvola(&gray, 51, 0.2, 128.0).unwrap();

        assert_eq!(binary.get_pixel(40, 40)[0], 0);
        assert_eq!(binary.get_pixel(40, 5)[0], 255);
        assert_eq!(binary.get_pixel(5, 75)[0], 255);
    }

    #[test]
    fn test_sauvola_rejects_bad_parameters() {
        let gray = GrayImage::new(4, 4);
        assert!(sauvola(&gray, 0, 0.2, 128.0).is_err());
        assert!(sauvola(&gray, 5, 0.2, 0.0).is_err());
    }

    #[test]
    fn test_binarize_document_uses_high_contrast_channel() {
        // text only visible in the red channel
        let mut img = RgbImage::from_pixel(60, 60, Rgb([220, 90, 90]));
        for y in 25..35 {
            for x in 5..55 {
                img.put_pixel(x, y, Rgb([20, 90, 90]));
            }
        }
        let binary = binarize_document(&DynamicImage::ImageRgb8(img)).unwrap();

        assert_eq!(binary.dimensions(), (60, 60));
        assert_eq!(binary.get_pixel(30, 30)[0], 0);
        assert_eq!(binary.get_pixel(30, 5)[0], 255);
    }
}
