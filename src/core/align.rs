use crate::core::detection::Point;
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate, Interpolation};

/// Rotates a cropped face so the eye line becomes horizontal.
///
/// The rotation angle is the angle of the left-eye to right-eye vector and
/// the rotation center is the midpoint of the two eyes, both in the crop's
/// pixel coordinates. Output dimensions equal the input's; pixels rotated out
/// of bounds are discarded and vacated pixels fill black. Exactly horizontal
/// eyes produce a zero rotation, i.e. the input unchanged.
pub fn align_face(face: &RgbImage, left_eye: Point, right_eye: Point) -> RgbImage {
    let dx = right_eye.x - left_eye.x;
    let dy = right_eye.y - left_eye.y;
    let angle = dy.atan2(dx);
    let center = left_eye.midpoint(right_eye);

    tracing::debug!(
        angle_deg = angle.to_degrees(),
        center_x = center.x,
        center_y = center.y,
        "aligning face crop"
    );

    // imageproc rotates content clockwise for positive theta (screen
    // coordinates), so cancelling the eye tilt takes the negated angle.
    rotate(
        face,
        (center.x, center.y),
        -angle,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_face(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn horizontal_eyes_are_identity() {
        let face = gradient_face(100, 100);
        let aligned = align_face(&face, Point::new(40.0, 50.0), Point::new(60.0, 50.0));
        assert_eq!(aligned, face);
    }

    #[test]
    fn tilted_eyes_keep_dimensions() {
        let face = gradient_face(120, 90);
        let aligned = align_face(&face, Point::new(30.0, 40.0), Point::new(80.0, 55.0));
        assert_eq!(aligned.dimensions(), (120, 90));
        assert_ne!(aligned, face);
    }

    #[test]
    fn alignment_is_deterministic() {
        let face = gradient_face(100, 100);
        let a = align_face(&face, Point::new(30.0, 42.0), Point::new(70.0, 58.0));
        let b = align_face(&face, Point::new(30.0, 42.0), Point::new(70.0, 58.0));
        assert_eq!(a, b);
    }
}
