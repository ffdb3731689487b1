use ab_glyph::{FontRef, PxScale};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_cross_mut, draw_line_segment_mut, draw_text_mut};

use crate::contour::Contour;
use crate::error::{Error, Result};

const FONT_BYTES: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

pub const LABEL_RED: Rgba<u8> = Rgba([220, 40, 40, 255]);
pub const LABEL_GREEN: Rgba<u8> = Rgba([40, 180, 60, 255]);
pub const CONTOUR_COLOR: Rgba<u8> = Rgba([255, 0, 255, 255]);

/// Draws diagnostic text onto images
#[derive(Debug, Clone)]
pub struct Annotator {
    font: FontRef<'static>,
}

impl Annotator {
    pub fn new() -> Result<Self> {
        let font = FontRef::try_from_slice(FONT_BYTES).map_err(|e| Error::Font(e.to_string()))?;
        Ok(Self { font })
    }

    /// Text height for an image, roughly one twenty-fifth of its height
    pub fn scale_for(image: &RgbaImage) -> f32 {
        (image.height() as f32 / 25.0).clamp(12.0, 96.0)
    }

    /// Draw `lines` top-down from the upper left corner
    pub fn draw_lines(&self, image: &mut RgbaImage, lines: &[String], color: Rgba<u8>) {
        let scale = Self::scale_for(image);
        let margin = (scale / 2.0) as i32;
        let line_height = (scale * 1.2) as i32;

        for (i, line) in lines.iter().enumerate() {
            let y = margin + i as i32 * line_height;
            draw_text_mut(image, color, margin, y, PxScale::from(scale), &self.font, line);
        }
    }
}

/// Outline every contour on a copy of `image`
pub fn draw_contours(image: &DynamicImage, contours: &[Contour]) -> RgbaImage {
    let mut canvas = image.to_rgba8();

    for contour in contours {
        let points: Vec<(f32, f32)> = contour
            .points()
            .iter()
            .map(|p| (p.x() as f32, p.y() as f32))
            .collect();

        match points.as_slice() {
            [] => {}
            [only] => draw_cross_mut(&mut canvas, CONTOUR_COLOR, only.0 as i32, only.1 as i32),
            _ => {
                for pair in points.windows(2) {
                    draw_line_segment_mut(&mut canvas, pair[0], pair[1], CONTOUR_COLOR);
                }
                if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
                    draw_line_segment_mut(&mut canvas, last, first, CONTOUR_COLOR);
                }
            }
        }
    }

    canvas
}
