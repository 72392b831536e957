// THEORY:
// The `geometry` module holds the stateless building blocks every higher layer
// leans on. Nothing here remembers anything between calls: a point is either in
// a polygon or not, a centroid is either on a line or not. Keeping these pure
// makes the event engine a thin state machine over well-tested predicates.
//
// All coordinates are image pixels as `f64`. Centroids are not rounded.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// A 2D point in image or canonical-plane coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Semantic role of a line in wrong-way detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineRole {
    Entry,
    Exit,
}

impl LineRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineRole::Entry => "entry",
            LineRole::Exit => "exit",
        }
    }
}

/// A validated line segment with a proximity tolerance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Line {
    pub name: String,
    pub start: Point,
    pub end: Point,
    pub offset: f64,
    pub role: Option<LineRole>,
}

impl Line {
    /// Builds a line, rejecting coincident endpoints and negative tolerances.
    /// `index` is only used to label the error.
    pub fn new(
        index: usize,
        name: String,
        start: Point,
        end: Point,
        offset: f64,
        role: Option<LineRole>,
    ) -> Result<Self, ConfigError> {
        if !start.is_finite() || !end.is_finite() {
            return Err(ConfigError::NonFiniteLine { index });
        }
        if start == end {
            return Err(ConfigError::DegenerateLine { index });
        }
        if !offset.is_finite() || offset < 0.0 {
            return Err(ConfigError::InvalidOffset { index, offset });
        }
        Ok(Self {
            name,
            start,
            end,
            offset,
            role,
        })
    }

    pub fn is_vertical(&self) -> bool {
        self.start.x == self.end.x
    }

    /// Proximity to the infinite line through the segment.
    ///
    /// For a non-vertical line this is the vertical gap between `p` and the line
    /// evaluated at `p.x`; for a vertical line it is the horizontal gap.
    pub fn is_near(&self, p: Point) -> bool {
        if self.is_vertical() {
            (p.x - self.start.x).abs() <= self.offset
        } else {
            let m = (self.end.y - self.start.y) / (self.end.x - self.start.x);
            let b = self.start.y - m * self.start.x;
            (p.y - (m * p.x + b)).abs() <= self.offset
        }
    }

    /// Whether `p` projects inside the segment's extent rather than its extension.
    pub fn is_within_segment(&self, p: Point) -> bool {
        if self.is_vertical() {
            within(p.y, self.start.y, self.end.y)
        } else {
            within(p.x, self.start.x, self.end.x)
        }
    }

    /// Both tests together: the centroid touches this segment.
    pub fn is_crossed_by(&self, p: Point) -> bool {
        self.is_near(p) && self.is_within_segment(p)
    }
}

fn within(v: f64, a: f64, b: f64) -> bool {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    lo <= v && v <= hi
}

/// A simple polygon with at least three vertices, in boundary order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polygon {
    vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Result<Self, ConfigError> {
        if vertices.len() < 3 {
            return Err(ConfigError::TooFewVertices {
                count: vertices.len(),
            });
        }
        if vertices.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::NonFinitePolygon);
        }
        Ok(Self { vertices })
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub fn contains(&self, p: Point) -> bool {
        point_in_polygon(p, &self.vertices)
    }
}

/// Crossing-number point-in-polygon test.
///
/// An edge with `p1.x == p2.x` toggles without computing an intersection, so a
/// point lying exactly on a vertical edge is treated as left of it.
pub fn point_in_polygon(p: Point, poly: &[Point]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut p1 = poly[0];
    for i in 1..=n {
        let p2 = poly[i % n];
        if p.y > p1.y.min(p2.y) && p.y <= p1.y.max(p2.y) && p.x <= p1.x.max(p2.x) {
            // p1.y != p2.y here: the strict/inclusive bounds above exclude flat edges.
            if p1.x == p2.x {
                inside = !inside;
            } else {
                let x_inters = (p.y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y) + p1.x;
                if p.x <= x_inters {
                    inside = !inside;
                }
            }
        }
        p1 = p2;
    }
    inside
}
