use crate::estimation::{irls, IrlsFit, IrlsScale};
use crate::utils::transform::{project, Homography};
use crate::{Errors, EPS};
use anyhow::Result;
use nalgebra::{Matrix3, SMatrix, SVector, Vector2};

type Normal8 = SMatrix<f64, 8, 8>;
type Param8 = SVector<f64, 8>;

/// Robust homography between `src` and `dst`.
///
pub fn estimate_homography(
    src: &[Vector2<f32>],
    dst: &[Vector2<f32>],
    priors: &[f32],
    scale: &IrlsScale,
    iterations: usize,
) -> Result<IrlsFit<Homography>> {
    let conditioning = Conditioning::new(src);
    irls(
        priors,
        scale,
        iterations,
        |weights| solve_weighted(src, dst, weights, &conditioning),
        |h, i| project(h, &src[i]) - dst[i],
    )
}

/// Similarity that moves the points to the origin with unit mean distance
///
struct Conditioning {
    center: Vector2<f64>,
    scale: f64,
}

impl Conditioning {
    fn new(points: &[Vector2<f32>]) -> Self {
        let n = points.len().max(1) as f64;
        let center = points
            .iter()
            .fold(Vector2::<f64>::zeros(), |acc, p| acc + p.cast::<f64>())
            / n;
        let spread = points
            .iter()
            .map(|p| (p.cast::<f64>() - center).norm())
            .sum::<f64>()
            / n;
        Self {
            center,
            scale: if spread > EPS as f64 { 1.0 / spread } else { 1.0 },
        }
    }

    fn apply(&self, p: &Vector2<f32>) -> Vector2<f64> {
        (p.cast::<f64>() - self.center) * self.scale
    }

    fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.scale,
            0.0,
            -self.scale * self.center.x,
            0.0,
            self.scale,
            -self.scale * self.center.y,
            0.0,
            0.0,
            1.0,
        )
    }

    fn inverse(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.scale,
            0.0,
            self.center.x,
            0.0,
            1.0 / self.scale,
            self.center.y,
            0.0,
            0.0,
            1.0,
        )
    }
}

fn solve_weighted(
    src: &[Vector2<f32>],
    dst: &[Vector2<f32>],
    weights: &[f32],
    conditioning: &Conditioning,
) -> Result<Homography> {
    let mut ata = Normal8::zeros();
    let mut atb = Param8::zeros();

    // Both point sets share the conditioning so the flow stays a small perturbation
    for ((s, d), w) in src.iter().zip(dst.iter()).zip(weights.iter()) {
        let p = conditioning.apply(s);
        let q = conditioning.apply(d);
        let w = *w as f64;

        let jx = Param8::from_column_slice(&[p.x, p.y, 1.0, 0.0, 0.0, 0.0, -p.x * q.x, -p.y * q.x]);
        let jy = Param8::from_column_slice(&[0.0, 0.0, 0.0, p.x, p.y, 1.0, -p.x * q.y, -p.y * q.y]);

        // symmetric rank-one updates, upper triangle only
        for r in 0..8 {
            let (ax, ay) = (jx[r] * w, jy[r] * w);
            if ax == 0.0 && ay == 0.0 {
                continue;
            }
            for c in r..8 {
                ata[(r, c)] += ax * jx[c] + ay * jy[c];
            }
            atb[r] += ax * q.x + ay * q.y;
        }
    }
    for r in 0..8 {
        for c in 0..r {
            ata[(r, c)] = ata[(c, r)];
        }
    }

    let h = ata
        .cholesky()
        .map(|c| c.solve(&atb))
        .ok_or(Errors::SingularSystem)?;
    if h.iter().any(|v| !v.is_finite()) {
        return Err(Errors::SingularSystem.into());
    }

    let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    let full = conditioning.inverse() * normalized * conditioning.matrix();
    let z = full[(2, 2)];
    if z.abs() < f64::EPSILON {
        return Err(Errors::SingularSystem.into());
    }
    Ok((full / z).cast::<f32>())
}
