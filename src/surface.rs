use crate::math::{direction, point_at, Point2, TOLERANCE};

/// Unique identifier for a surface, assigned by the caller.
pub type SurfaceId = i32;

/// Behaviour of a track at the outermost surfaces of the geometry.
///
/// Surfaces with `None` do not contribute to the global bounding box;
/// `Reflective` and `Vacuum` surfaces do, and set the boundary-condition
/// bit of the edge they touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryType {
    Reflective,
    Vacuum,
    None,
}

/// The algebraic primitive a surface evaluates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceKind {
    /// General plane `a*x + b*y + c = 0`.
    Plane { a: f64, b: f64, c: f64 },
    /// Plane perpendicular to the x-axis at `x`.
    XPlane { x: f64 },
    /// Plane perpendicular to the y-axis at `y`.
    YPlane { y: f64 },
    /// Circle centered on `(x, y)` with the given radius.
    Circle { x: f64, y: f64, radius: f64 },
}

/// An oriented algebraic primitive partitioning the plane into two
/// halfspaces. The sign of [`Surface::evaluate`] classifies which side of
/// the surface a point lies on; circles evaluate negative inside.
#[derive(Debug, Clone)]
pub struct Surface {
    id: SurfaceId,
    kind: SurfaceKind,
    boundary: BoundaryType,
}

impl Surface {
    #[must_use]
    pub fn new(id: SurfaceId, kind: SurfaceKind, boundary: BoundaryType) -> Self {
        Self { id, kind, boundary }
    }

    #[must_use]
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> &SurfaceKind {
        &self.kind
    }

    #[must_use]
    pub fn boundary(&self) -> BoundaryType {
        self.boundary
    }

    /// Signed evaluation of the surface equation at a point.
    #[must_use]
    pub fn evaluate(&self, point: &Point2) -> f64 {
        match self.kind {
            SurfaceKind::Plane { a, b, c } => a * point.x + b * point.y + c,
            SurfaceKind::XPlane { x } => point.x - x,
            SurfaceKind::YPlane { y } => point.y - y,
            SurfaceKind::Circle { x, y, radius } => {
                let dx = point.x - x;
                let dy = point.y - y;
                dx * dx + dy * dy - radius * radius
            }
        }
    }

    /// Minimum x-coordinate reached by the surface, or `-inf` if unbounded.
    #[must_use]
    pub fn x_min(&self) -> f64 {
        match self.kind {
            SurfaceKind::Plane { .. } | SurfaceKind::YPlane { .. } => f64::NEG_INFINITY,
            SurfaceKind::XPlane { x } => x,
            SurfaceKind::Circle { x, radius, .. } => x - radius,
        }
    }

    /// Maximum x-coordinate reached by the surface, or `+inf` if unbounded.
    #[must_use]
    pub fn x_max(&self) -> f64 {
        match self.kind {
            SurfaceKind::Plane { .. } | SurfaceKind::YPlane { .. } => f64::INFINITY,
            SurfaceKind::XPlane { x } => x,
            SurfaceKind::Circle { x, radius, .. } => x + radius,
        }
    }

    /// Minimum y-coordinate reached by the surface, or `-inf` if unbounded.
    #[must_use]
    pub fn y_min(&self) -> f64 {
        match self.kind {
            SurfaceKind::Plane { .. } | SurfaceKind::XPlane { .. } => f64::NEG_INFINITY,
            SurfaceKind::YPlane { y } => y,
            SurfaceKind::Circle { y, radius, .. } => y - radius,
        }
    }

    /// Maximum y-coordinate reached by the surface, or `+inf` if unbounded.
    #[must_use]
    pub fn y_max(&self) -> f64 {
        match self.kind {
            SurfaceKind::Plane { .. } | SurfaceKind::XPlane { .. } => f64::INFINITY,
            SurfaceKind::YPlane { y } => y,
            SurfaceKind::Circle { y, radius, .. } => y + radius,
        }
    }

    /// Distance from `point` to the surface along the direction `phi`.
    ///
    /// Returns the smallest strictly positive distance together with the
    /// intersection point, or `None` if the ray never reaches the surface.
    /// Circles solve the full quadratic and keep the minimum positive root.
    #[must_use]
    pub fn intersection(&self, point: &Point2, phi: f64) -> Option<(f64, Point2)> {
        match self.kind {
            SurfaceKind::Plane { a, b, c } => plane_intersection(a, b, c, point, phi),
            SurfaceKind::XPlane { x } => plane_intersection(1.0, 0.0, -x, point, phi),
            SurfaceKind::YPlane { y } => plane_intersection(0.0, 1.0, -y, point, phi),
            SurfaceKind::Circle { x, y, radius } => {
                let dir = direction(phi);
                // Substitute the parametric ray into the circle equation:
                // (px + t*dx - x)^2 + (py + t*dy - y)^2 = r^2
                let fx = point.x - x;
                let fy = point.y - y;
                let b = 2.0 * (fx * dir.x + fy * dir.y);
                let c = fx * fx + fy * fy - radius * radius;
                let discriminant = b * b - 4.0 * c;
                if discriminant < 0.0 {
                    return None;
                }
                let disc_sqrt = discriminant.sqrt();
                let t0 = (-b - disc_sqrt) / 2.0;
                let t1 = (-b + disc_sqrt) / 2.0;
                let t = if t0 > 0.0 {
                    t0
                } else if t1 > 0.0 {
                    t1
                } else {
                    return None;
                };
                Some((t, point_at(point, &dir, t)))
            }
        }
    }
}

/// Ray-plane distance for `a*x + b*y + c = 0`, `None` when parallel.
fn plane_intersection(a: f64, b: f64, c: f64, point: &Point2, phi: f64) -> Option<(f64, Point2)> {
    let dir = direction(phi);
    let denom = a * dir.x + b * dir.y;
    if denom.abs() < TOLERANCE {
        return None;
    }
    let t = -(a * point.x + b * point.y + c) / denom;
    if t > 0.0 {
        Some((t, point_at(point, &dir, t)))
    } else {
        None
    }
}
