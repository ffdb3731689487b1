use std::collections::HashSet;

use imageproc::rect::Rect;

use crate::coordinate::{ImageDimensions, ProportionalCoordinate};

/// A candidate page boundary: unique points plus the area they enclose.
///
/// Points keep their insertion order so the contour can be drawn as a
/// polygon; duplicates (by proportional position) are dropped on construction.
#[derive(Debug, Clone, Default)]
pub struct Contour {
    points: Vec<ProportionalCoordinate>,
    dimensions: Option<ImageDimensions>,
    area: Option<f64>,
}

impl Contour {
    /// Contour with no points and a known area of zero
    pub fn empty() -> Self {
        Self {
            points: Vec::new(),
            dimensions: None,
            area: Some(0.0),
        }
    }

    /// Build a contour from coordinates that already carry their dimensions
    pub fn from_coordinates(points: impl IntoIterator<Item = ProportionalCoordinate>) -> Self {
        Self {
            points: unique(points),
            dimensions: None,
            area: None,
        }
    }

    /// Build a contour from raw pixel points captured at `dimensions`
    pub fn from_points(
        points: &[[i32; 2]],
        dimensions: ImageDimensions,
        area: Option<f64>,
    ) -> Self {
        let coordinates = points
            .iter()
            .map(|&[x, y]| ProportionalCoordinate::new(dimensions, x, y));
        Self {
            points: unique(coordinates),
            dimensions: Some(dimensions),
            area,
        }
    }

    pub fn points(&self) -> &[ProportionalCoordinate] {
        &self.points
    }

    pub fn points_array(&self) -> Vec<[i32; 2]> {
        self.points.iter().map(|p| p.to_array()).collect()
    }

    pub fn dimensions(&self) -> Option<ImageDimensions> {
        self.dimensions
    }

    pub fn has_area(&self) -> bool {
        self.area.is_some()
    }

    /// Enclosed area in pixels of the contour's own dimensions, 0 when unknown
    pub fn area(&self) -> f64 {
        self.area.unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Rescale the contour onto an image of size `target`.
    ///
    /// The area is multiplied by the width factor times the height factor.
    /// This is not the shoelace area of the remapped points, which can differ
    /// once truncation has moved them.
    pub fn scale_with(&self, target: ImageDimensions) -> Self {
        let source = self
            .dimensions
            .or_else(|| self.points.first().map(|p| p.dimensions()));

        let area = match (self.area, source) {
            (Some(area), Some(source)) => {
                let width_factor = target.width as f64 / source.width as f64;
                let height_factor = target.height as f64 / source.height as f64;
                Some(area * width_factor * height_factor)
            }
            (area, None) => area,
            (None, Some(_)) => None,
        };

        Self {
            points: unique(self.points.iter().map(|p| p.scale_to(target))),
            dimensions: Some(target),
            area,
        }
    }

    /// Axis-aligned bounding box of the pixel points, `None` when empty
    pub fn bounding_box(&self) -> Option<Rect> {
        let first = self.points.first()?;
        let (mut min_x, mut min_y) = (first.x(), first.y());
        let (mut max_x, mut max_y) = (min_x, min_y);

        for p in &self.points[1..] {
            min_x = min_x.min(p.x());
            max_x = max_x.max(p.x());
            min_y = min_y.min(p.y());
            max_y = max_y.max(p.y());
        }

        let width = (max_x - min_x + 1) as u32;
        let height = (max_y - min_y + 1) as u32;
        Some(Rect::at(min_x, min_y).of_size(width, height))
    }
}

fn unique(points: impl IntoIterator<Item = ProportionalCoordinate>) -> Vec<ProportionalCoordinate> {
    let mut seen = HashSet::new();
    points.into_iter().filter(|p| seen.insert(p.key())).collect()
}
