use nalgebra::{Matrix3, Vector3};

/// Wrap an angle in degrees into `[0, 360)`
pub fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Rotation about `center` by `angle_degrees`.
///
/// Image coordinates have y pointing down, so a positive angle turns the
/// content counter-clockwise on screen.
pub fn rotation_about_center(angle_degrees: f64, center: (f64, f64)) -> Matrix3<f64> {
    let (sin, cos) = angle_degrees.to_radians().sin_cos();
    let (cx, cy) = center;

    let translate_to_origin = Matrix3::new(
        1.0, 0.0, -cx,
        0.0, 1.0, -cy,
        0.0, 0.0, 1.0,
    );

    let rotation = Matrix3::new(
        cos, sin, 0.0,
        -sin, cos, 0.0,
        0.0, 0.0, 1.0,
    );

    let translate_back = Matrix3::new(
        1.0, 0.0, cx,
        0.0, 1.0, cy,
        0.0, 0.0, 1.0,
    );

    translate_back * rotation * translate_to_origin
}

/// Rotation about the image center, shifted so the rotated image lands
/// entirely inside the returned canvas.
///
/// Returns the matrix and the canvas `(width, height)`.
pub fn rotation_fitted_to_canvas(
    angle_degrees: f64,
    width: u32,
    height: u32,
) -> (Matrix3<f64>, u32, u32) {
    let center = (width as f64 / 2.0, height as f64 / 2.0);
    let rotation = rotation_about_center(angle_degrees, center);
    let (new_width, new_height, min_x, min_y) = compute_output_bounds(&rotation, width, height);

    let shift = Matrix3::new(
        1.0, 0.0, -min_x,
        0.0, 1.0, -min_y,
        0.0, 0.0, 1.0,
    );

    (shift * rotation, new_width, new_height)
}

/// Transform a point using the affine matrix
pub fn transform_point(matrix: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let p = Vector3::new(x, y, 1.0);
    let result = matrix * p;
    (result.x / result.z, result.y / result.z)
}

/// Compute the bounding box of the transformed image
pub fn compute_output_bounds(
    matrix: &Matrix3<f64>,
    width: u32,
    height: u32,
) -> (u32, u32, f64, f64) {
    let corners = [
        (0.0, 0.0),
        (width as f64, 0.0),
        (0.0, height as f64),
        (width as f64, height as f64),
    ];

    let transformed: Vec<(f64, f64)> = corners
        .iter()
        .map(|&(x, y)| transform_point(matrix, x, y))
        .collect();

    let min_x = transformed.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_x = transformed.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = transformed.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = transformed.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

    // shave float noise so an identity transform keeps its exact size
    let new_width = (max_x - min_x - 1e-9).ceil() as u32;
    let new_height = (max_y - min_y - 1e-9).ceil() as u32;

    (new_width, new_height, min_x, min_y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(-30.0), 330.0);
        assert_eq!(normalize_degrees(360.0), 0.0);
        assert_eq!(normalize_degrees(725.0), 5.0);
        assert!(normalize_degrees(-1e-20) < 360.0);
    }

    #[test]
    fn test_zero_rotation_is_identity() {
        let matrix = rotation_about_center(0.0, (50.0, 50.0));
        let (x, y) = transform_point(&matrix, 12.0, 34.0);
        assert!((x - 12.0).abs() < 1e-9);
        assert!((y - 34.0).abs() < 1e-9);
    }

    #[test]
    fn test_positive_angle_turns_counter_clockwise_on_screen() {
        // a point right of center moves up (smaller y) for +90
        let matrix = rotation_about_center(90.0, (50.0, 50.0));
        let (x, y) = transform_point(&matrix, 60.0, 50.0);
        assert!((x - 50.0).abs() < 1e-9);
        assert!((y - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_quarter_turn_swaps_canvas() {
        let (matrix, width, height) = rotation_fitted_to_canvas(90.0, 200, 100);
        assert_eq!((width, height), (100, 200));

        let (_, _, min_x, min_y) = compute_output_bounds(&matrix, 200, 100);
        assert!(min_x.abs() < 1e-9);
        assert!(min_y.abs() < 1e-9);
    }

    #[test]
    fn test_oblique_canvas_grows() {
        let (_, width, height) = rotation_fitted_to_canvas(330.0, 400, 300);
        assert!(width > 400);
        assert!(height > 300);
        // 400 cos30 + 300 sin30 = 496.4, 400 sin30 + 300 cos30 = 459.8
        assert_eq!((width, height), (497, 460));
    }
}
