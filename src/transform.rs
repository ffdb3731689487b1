use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use imageproc::rect::Rect;
use nalgebra::Matrix3;
use tracing::{debug, warn};

use crate::geometry::{compute_output_bounds, transform_point};

/// Premultiply alpha: RGB values are multiplied by alpha
fn premultiply_alpha(img: &RgbaImage) -> Vec<[f64; 4]> {
    img.pixels()
        .map(|pixel| {
            let alpha = pixel[3] as f64 / 255.0;
            [
                pixel[0] as f64 * alpha,
                pixel[1] as f64 * alpha,
                pixel[2] as f64 * alpha,
                pixel[3] as f64,
            ]
        })
        .collect()
}

/// Unpremultiply alpha: divide RGB by alpha
fn unpremultiply_alpha(premultiplied: [f64; 4]) -> Rgba<u8> {
    let alpha = premultiplied[3];
    if alpha < 1.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let alpha_norm = alpha / 255.0;
    let r = (premultiplied[0] / alpha_norm).clamp(0.0, 255.0) as u8;
    let g = (premultiplied[1] / alpha_norm).clamp(0.0, 255.0) as u8;
    let b = (premultiplied[2] / alpha_norm).clamp(0.0, 255.0) as u8;
    let a = alpha.clamp(0.0, 255.0) as u8;

    Rgba([r, g, b, a])
}

/// Cubic interpolation kernel (Catmull-Rom)
fn cubic_weight(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;

    [
        -0.5 * t3 + t2 - 0.5 * t,
        1.5 * t3 - 2.5 * t2 + 1.0,
        -1.5 * t3 + 2.0 * t2 + 0.5 * t,
        0.5 * t3 - 0.5 * t2,
    ]
}

/// Bicubic interpolation at a given position
fn bicubic_interpolate(
    premultiplied: &[[f64; 4]],
    width: u32,
    height: u32,
    x: f64,
    y: f64,
) -> [f64; 4] {
    let x_floor = x.floor() as i32;
    let y_floor = y.floor() as i32;

    let wx = cubic_weight(x - x.floor());
    let wy = cubic_weight(y - y.floor());

    let mut result = [0.0; 4];

    for (j, weight_y) in wy.iter().enumerate() {
        for (i, weight_x) in wx.iter().enumerate() {
            let px = (x_floor + i as i32 - 1).clamp(0, width as i32 - 1) as u32;
            let py = (y_floor + j as i32 - 1).clamp(0, height as i32 - 1) as u32;
            let idx = (py * width + px) as usize;

            let weight = weight_x * weight_y;
            for (c, channel) in result.iter_mut().enumerate() {
                *channel += premultiplied[idx][c] * weight;
            }
        }
    }

    result
}

/// Apply an affine transformation to an image using inverse mapping.
///
/// The output canvas is the bounding box of the transformed image; pixels
/// whose pre-image falls outside the source are transparent.
pub fn apply_affine_transform(img: &RgbaImage, forward_matrix: &Matrix3<f64>) -> RgbaImage {
    let (src_width, src_height) = img.dimensions();
    if src_width == 0 || src_height == 0 {
        return img.clone();
    }

    let (new_width, new_height, offset_x, offset_y) =
        compute_output_bounds(forward_matrix, src_width, src_height);

    // Ensure reasonable dimensions
    let new_width = new_width.max(1).min(src_width * 3);
    let new_height = new_height.max(1).min(src_height * 3);

    debug!(
        src_width,
        src_height, new_width, new_height, offset_x, offset_y, "Applying affine transform"
    );

    let inverse_matrix = match forward_matrix.try_inverse() {
        Some(inv) => inv,
        None => {
            warn!("Transform matrix is singular, returning original image");
            return img.clone();
        }
    };

    let premultiplied = premultiply_alpha(img);
    let mut output = RgbaImage::new(new_width, new_height);

    for (out_x, out_y, pixel) in output.enumerate_pixels_mut() {
        let dst_x = out_x as f64 + offset_x;
        let dst_y = out_y as f64 + offset_y;
        let (src_x, src_y) = transform_point(&inverse_matrix, dst_x, dst_y);

        // keep a one pixel margin for the interpolation footprint
        if src_x >= -1.0
            && src_x <= src_width as f64
            && src_y >= -1.0
            && src_y <= src_height as f64
        {
            let interpolated =
                bicubic_interpolate(&premultiplied, src_width, src_height, src_x, src_y);
            *pixel = unpremultiply_alpha(interpolated);
        }
    }

    output
}

/// Crop `rect` out of `img`, clamped to the image bounds.
///
/// Returns an unmodified copy when the clamped rectangle is empty.
pub fn crop_rect(img: &DynamicImage, rect: Rect) -> DynamicImage {
    let (width, height) = img.dimensions();
    let left = rect.left().clamp(0, width as i32) as u32;
    let top = rect.top().clamp(0, height as i32) as u32;
    let right = (rect.right() + 1).clamp(0, width as i32) as u32;
    let bottom = (rect.bottom() + 1).clamp(0, height as i32) as u32;

    if right <= left || bottom <= top {
        return img.clone();
    }

    img.crop_imm(left, top, right - left, bottom - top)
}
