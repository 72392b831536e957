// THEORY:
// A camera looks at the road at an angle, so equal pixel distances do not mean
// equal metres. The `perspective` module maps a user-drawn quadrilateral on the
// road onto an axis-aligned square (the "canonical plane"). Inside that square a
// displacement is proportional to real distance along the quadrilateral's edges,
// which is what the speed estimator needs.
//
// The mapping is a 3x3 homography with h33 fixed to 1, solved from the four point
// correspondences as an 8x8 linear system.

use crate::core_modules::geometry::Point;
use crate::error::ConfigError;
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

/// Side length of the canonical square, in canonical units.
pub const DEFAULT_CANONICAL_SIDE: f64 = 500.0;

/// Projective mapping from image coordinates to the canonical plane.
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveTransform {
    matrix: Matrix3<f64>,
    side: f64,
}

impl PerspectiveTransform {
    /// Maps `quad` (top-left, top-right, bottom-right, bottom-left) onto the
    /// square `[0, side] x [0, side]` with the same corner order.
    pub fn to_square(quad: &[Point; 4], side: f64) -> Result<Self, ConfigError> {
        if !side.is_finite() || side <= 0.0 {
            return Err(ConfigError::InvalidCanonicalSide(side));
        }
        let dst = [
            Point::new(0.0, 0.0),
            Point::new(side, 0.0),
            Point::new(side, side),
            Point::new(0.0, side),
        ];
        if has_collinear_corners(quad) {
            return Err(ConfigError::DegenerateQuadrilateral);
        }
        let matrix = solve_homography(quad, &dst).ok_or(ConfigError::DegenerateQuadrilateral)?;
        Ok(Self { matrix, side })
    }

    pub fn side(&self) -> f64 {
        self.side
    }

    /// Projects an image point into the canonical plane.
    pub fn apply(&self, p: Point) -> Point {
        let v = self.matrix * Vector3::new(p.x, p.y, 1.0);
        Point::new(v.x / v.z, v.y / v.z)
    }
}

fn has_collinear_corners(quad: &[Point; 4]) -> bool {
    let scale = quad
        .iter()
        .flat_map(|a| quad.iter().map(move |b| a.distance(b)))
        .fold(0.0_f64, f64::max);
    if scale == 0.0 {
        return true;
    }
    (0..4).any(|skip| {
        let tri: Vec<&Point> = quad
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != skip)
            .map(|(_, p)| p)
            .collect();
        let cross = (tri[1].x - tri[0].x) * (tri[2].y - tri[0].y)
            - (tri[1].y - tri[0].y) * (tri[2].x - tri[0].x);
        cross.abs() <= 1e-9 * scale * scale
    })
}

fn solve_homography(src: &[Point; 4], dst: &[Point; 4]) -> Option<Matrix3<f64>> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let r = i * 2;
        // u = (h11 x + h12 y + h13) / (h31 x + h32 y + 1)
        a[(r, 0)] = s.x;
        a[(r, 1)] = s.y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -s.x * d.x;
        a[(r, 7)] = -s.y * d.x;
        b[r] = d.x;
        // v = (h21 x + h22 y + h23) / (h31 x + h32 y + 1)
        a[(r + 1, 3)] = s.x;
        a[(r + 1, 4)] = s.y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -s.x * d.y;
        a[(r + 1, 7)] = -s.y * d.y;
        b[r + 1] = d.y;
    }

    let h = a.lu().solve(&b)?;
    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let matrix = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    if matrix.determinant().abs() < 1e-12 {
        return None;
    }
    Some(matrix)
}
