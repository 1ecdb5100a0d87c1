use crate::utils::transform::{project, Homography};
use crate::EPS;
use geo::{Area, Coord, LineString, Polygon};
use itertools::Itertools;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Explicit 4-vertex region.
///
/// Vertices go around the region in order (top-left, top-right, bottom-right, bottom-left for
/// an unrotated box in image coordinates).
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub vertices: [Vector2<f32>; 4],
}

impl Quad {
    pub fn new(vertices: [Vector2<f32>; 4]) -> Self {
        Self { vertices }
    }

    /// Corners of a rotated rectangle with the given center, full extent and rotation.
    ///
    pub fn from_rotated_rect(center: Vector2<f32>, width: f32, height: f32, rotation: f32) -> Self {
        let (s, c) = rotation.sin_cos();
        let hw = width / 2.0;
        let hh = height / 2.0;
        let offsets = [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)];
        Self {
            vertices: offsets.map(|(x, y)| center + Vector2::new(c * x - s * y, s * x + c * y)),
        }
    }

    pub fn center(&self) -> Vector2<f32> {
        self.vertices.iter().fold(Vector2::zeros(), |acc, v| acc + v) / 4.0
    }

    /// Consecutive edges as `(start, end)` pairs, closing the loop
    ///
    pub fn edges(&self) -> impl Iterator<Item = (Vector2<f32>, Vector2<f32>)> + '_ {
        self.vertices.iter().copied().circular_tuple_windows::<(_, _)>()
    }

    /// Signed area, positive for the vertex order used by the tracker (clockwise
    /// in image coordinates, counter-clockwise in a y-up frame).
    ///
    pub fn signed_area(&self) -> f32 {
        self.edges()
            .map(|(a, b)| a.x * b.y - b.x * a.y)
            .sum::<f32>()
            / 2.0
    }

    pub fn area(&self) -> f32 {
        Polygon::from(self).unsigned_area() as f32
    }

    /// Axis-aligned bounds as `(min, max)`
    ///
    pub fn bounds(&self) -> (Vector2<f32>, Vector2<f32>) {
        self.vertices.iter().fold(
            (
                Vector2::new(f32::MAX, f32::MAX),
                Vector2::new(f32::MIN, f32::MIN),
            ),
            |(lo, hi), v| (lo.inf(v), hi.sup(v)),
        )
    }

    pub fn diagonal(&self) -> f32 {
        let (lo, hi) = self.bounds();
        (hi - lo).norm()
    }

    /// Cross product of consecutive edges at every vertex
    ///
    fn turns(&self) -> impl Iterator<Item = f32> + '_ {
        let v = &self.vertices;
        (0..v.len()).map(move |i| {
            let (a, b, c) = (v[i], v[(i + 1) % v.len()], v[(i + 2) % v.len()]);
            (b - a).perp(&(c - b))
        })
    }

    /// All vertices coincide or lie on one line
    ///
    pub fn is_collapsed(&self) -> bool {
        self.turns().all(|cross| cross.abs() < EPS * EPS)
    }

    /// Strictly convex and non-degenerate
    ///
    pub fn is_convex(&self) -> bool {
        let mut sign = 0.0_f32;
        for cross in self.turns() {
            if !cross.is_finite() || cross.abs() < EPS * EPS {
                return false;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Half-plane test against every edge, with the edges pushed outwards by `expansion`.
    ///
    pub fn contains_expanded(&self, p: &Vector2<f32>, expansion: f32) -> bool {
        let orientation = self.signed_area().signum();
        self.edges().all(|(a, b)| {
            let e = b - a;
            let len = e.norm();
            if len < EPS {
                return true;
            }
            let inward = e.perp(&(p - a)) / len * orientation;
            inward >= -expansion
        })
    }

    pub fn transformed(&self, h: &Homography) -> Self {
        Self {
            vertices: self.vertices.map(|v| project(h, &v)),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.vertices
            .iter()
            .all(|v| v.x.is_finite() && v.y.is_finite())
    }
}

impl From<&Quad> for Polygon<f64> {
    fn from(q: &Quad) -> Self {
        Polygon::new(
            LineString::new(
                q.vertices
                    .iter()
                    .map(|v| Coord {
                        x: v.x as f64,
                        y: v.y as f64,
                    })
                    .collect(),
            ),
            vec![],
        )
    }
}
