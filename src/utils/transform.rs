use crate::EPS;
use nalgebra::{Matrix3, SMatrix, SVector, Vector2, Vector3};

/// Planar projective transform, `h[(2, 2)]` is kept at `1` where possible
pub type Homography = Matrix3<f32>;

/// Applies the homography to a point.
///
/// The projective division is guarded, so points mapped to infinity come back as large
/// but finite coordinates instead of `NaN`.
///
pub fn project(h: &Homography, p: &Vector2<f32>) -> Vector2<f32> {
    let v = h * Vector3::new(p.x, p.y, 1.0);
    let w = if v.z.abs() < EPS {
        EPS.copysign(v.z)
    } else {
        v.z
    };
    Vector2::new(v.x / w, v.y / w)
}

/// Displacement induced by the homography at `p`
///
pub fn flow_at(h: &Homography, p: &Vector2<f32>) -> Vector2<f32> {
    project(h, p) - p
}

/// Inverse normalized so that the bottom-right element is `1`
///
pub fn invert(h: &Homography) -> Option<Homography> {
    let inv = h.try_inverse()?;
    let z = inv[(2, 2)];
    if z.abs() < EPS {
        Some(inv)
    } else {
        Some(inv / z)
    }
}

/// Local scale and rotation of the homography at point `p`, taken from its Jacobian.
///
pub fn local_scale_rotation(h: &Homography, p: &Vector2<f32>) -> (f32, f32) {
    let w = h[(2, 0)] * p.x + h[(2, 1)] * p.y + h[(2, 2)];
    let w = if w.abs() < EPS { EPS.copysign(w) } else { w };
    let q = project(h, p);
    let j00 = (h[(0, 0)] - q.x * h[(2, 0)]) / w;
    let j01 = (h[(0, 1)] - q.x * h[(2, 1)]) / w;
    let j10 = (h[(1, 0)] - q.y * h[(2, 0)]) / w;
    let j11 = (h[(1, 1)] - q.y * h[(2, 1)]) / w;
    let det = j00 * j11 - j01 * j10;
    let rotation = (j10 - j01).atan2(j00 + j11);
    (det.abs().sqrt(), rotation)
}

/// Similarity `p -> [[a, -b], [b, a]] * p + t` where `a = s*cos(r)` and `b = s*sin(r)`
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity2 {
    pub a: f32,
    pub b: f32,
    pub translation: Vector2<f32>,
}

impl Default for Similarity2 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Similarity2 {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            translation: Vector2::zeros(),
        }
    }

    pub fn from_scale_rotation(scale: f32, rotation: f32, translation: Vector2<f32>) -> Self {
        Self {
            a: scale * rotation.cos(),
            b: scale * rotation.sin(),
            translation,
        }
    }

    pub fn scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    pub fn rotation(&self) -> f32 {
        self.b.atan2(self.a)
    }

    pub fn apply(&self, p: &Vector2<f32>) -> Vector2<f32> {
        Vector2::new(
            self.a * p.x - self.b * p.y + self.translation.x,
            self.b * p.x + self.a * p.y + self.translation.y,
        )
    }

    pub fn as_homography(&self) -> Homography {
        Matrix3::new(
            self.a,
            -self.b,
            self.translation.x,
            self.b,
            self.a,
            self.translation.y,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Least squares similarity mapping `src` onto `dst` (closed form).
    ///
    /// Returns `None` when the source points collapse to a single location.
    ///
    pub fn fit(src: &[Vector2<f32>], dst: &[Vector2<f32>]) -> Option<Self> {
        if src.is_empty() || src.len() != dst.len() {
            return None;
        }
        let n = src.len() as f32;
        let src_mean = src.iter().fold(Vector2::zeros(), |acc, p| acc + p) / n;
        let dst_mean = dst.iter().fold(Vector2::zeros(), |acc, p| acc + p) / n;

        let (mut dot, mut cross, mut norm) = (0.0_f32, 0.0_f32, 0.0_f32);
        for (s, d) in src.iter().zip(dst.iter()) {
            let s = s - src_mean;
            let d = d - dst_mean;
            dot += s.dot(&d);
            cross += s.x * d.y - s.y * d.x;
            norm += s.norm_squared();
        }
        if norm < EPS * EPS {
            return None;
        }
        let a = dot / norm;
        let b = cross / norm;
        let rotated = Vector2::new(a * src_mean.x - b * src_mean.y, b * src_mean.x + a * src_mean.y);
        Some(Self {
            a,
            b,
            translation: dst_mean - rotated,
        })
    }
}

/// Exact homography mapping four source points onto four destination points.
///
pub fn homography_from_4_points(src: &[Vector2<f64>; 4], dst: &[Vector2<f64>; 4]) -> Option<Matrix3<f64>> {
    let mut a: SMatrix<f64, 8, 8> = SMatrix::zeros();
    let mut b: SVector<f64, 8> = SVector::zeros();
    for i in 0..4 {
        let (x, y) = (src[i].x, src[i].y);
        let (u, v) = (dst[i].x, dst[i].y);
        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -x * u;
        a[(r, 7)] = -y * u;
        b[r] = u;
        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -x * v;
        a[(r + 1, 7)] = -y * v;
        b[r + 1] = v;
    }
    let h = a.lu().solve(&b)?;
    if h.iter().any(|e| !e.is_finite()) {
        return None;
    }
    Some(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}
