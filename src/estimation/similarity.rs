use crate::estimation::{irls, IrlsFit, IrlsScale};
use crate::utils::transform::Similarity2;
use crate::Errors;
use anyhow::Result;
use nalgebra::{Matrix4, Vector2, Vector4};

/// Robust similarity fit expressed around `center`.
///
/// The parameters `{dx, dy, a, b}` map a centered point `q = p - center` to
/// `[[a, -b], [b, a]] * q + center + (dx, dy)`, so the normal equations stay well conditioned
/// for small boxes far from the origin.
///
pub fn estimate_similarity(
    src: &[Vector2<f32>],
    dst: &[Vector2<f32>],
    priors: &[f32],
    center: &Vector2<f32>,
    scale: &IrlsScale,
    iterations: usize,
) -> Result<IrlsFit<Similarity2>> {
    irls(
        priors,
        scale,
        iterations,
        |weights| solve_weighted(src, dst, weights, center),
        |s, i| s.apply(&src[i]) - dst[i],
    )
}

fn solve_weighted(
    src: &[Vector2<f32>],
    dst: &[Vector2<f32>],
    weights: &[f32],
    center: &Vector2<f32>,
) -> Result<Similarity2> {
    let mut ata = Matrix4::<f32>::zeros();
    let mut atb = Vector4::<f32>::zeros();

    for ((s, d), w) in src.iter().zip(dst.iter()).zip(weights.iter()) {
        let q = s - center;
        let u = d - center;
        // Jacobian rows of the x and y equations
        let jx = Vector4::new(1.0, 0.0, q.x, -q.y);
        let jy = Vector4::new(0.0, 1.0, q.y, q.x);
        ata += (jx * jx.transpose() + jy * jy.transpose()) * *w;
        atb += (jx * u.x + jy * u.y) * *w;
    }

    let p = ata
        .cholesky()
        .map(|c| c.solve(&atb))
        .ok_or(Errors::SingularSystem)?;
    if p.iter().any(|v| !v.is_finite()) {
        return Err(Errors::SingularSystem.into());
    }

    let (a, b) = (p[2], p[3]);
    let rotated_center = Vector2::new(a * center.x - b * center.y, b * center.x + a * center.y);
    Ok(Similarity2 {
        a,
        b,
        translation: center + Vector2::new(p[0], p[1]) - rotated_center,
    })
}
