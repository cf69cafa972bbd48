/// 2D point type.
pub type Point2 = nalgebra::Point2<f64>;

/// 2D vector type.
pub type Vector2 = nalgebra::Vector2<f64>;

/// Global geometric tolerance for floating-point comparisons.
pub const TOLERANCE: f64 = 1e-10;

/// Distance a point is nudged past a boundary so that it lands strictly
/// inside the next region. Boundary tie-breaking during segmentation is
/// sensitive to this magnitude.
pub const TINY_MOVE: f64 = 1e-8;

/// Unit direction vector for an azimuthal angle.
#[must_use]
pub fn direction(phi: f64) -> Vector2 {
    Vector2::new(phi.cos(), phi.sin())
}

/// Linear interpolation: `origin + dir * t`.
#[must_use]
pub fn point_at(origin: &Point2, dir: &Vector2, t: f64) -> Point2 {
    Point2::new(origin.x + dir.x * t, origin.y + dir.y * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_at_interpolation() {
        let origin = Point2::new(1.0, 2.0);
        let dir = Vector2::new(4.0, 6.0);
        let pt = point_at(&origin, &dir, 0.5);
        assert!((pt.x - 3.0).abs() < 1e-12);
        assert!((pt.y - 5.0).abs() < 1e-12);
    }

    #[test]
    fn direction_is_unit_length() {
        let d = direction(std::f64::consts::FRAC_PI_3);
        assert!((d.norm() - 1.0).abs() < 1e-12);
    }
}
