use crate::estimation::{irls, IrlsFit, IrlsScale};
use anyhow::Result;
use nalgebra::Vector2;

/// Robust translation between `src` and `dst`: every round takes the weighted mean flow.
///
pub fn estimate_translation(
    src: &[Vector2<f32>],
    dst: &[Vector2<f32>],
    priors: &[f32],
    scale: &IrlsScale,
    iterations: usize,
) -> Result<IrlsFit<Vector2<f32>>> {
    irls(
        priors,
        scale,
        iterations,
        |weights| {
            Ok(src
                .iter()
                .zip(dst.iter())
                .zip(weights.iter())
                .fold(Vector2::zeros(), |acc, ((s, d), w)| acc + (d - s) * *w))
        },
        |t, i| src[i] + t - dst[i],
    )
}

#[cfg(test)]
mod tests {
    use crate::estimation::translation::estimate_translation;
    use crate::estimation::IrlsScale;
    use nalgebra::Vector2;

    fn points() -> Vec<Vector2<f32>> {
        (0..6)
            .map(|i| Vector2::new(0.4 + 0.03 * i as f32, 0.5 - 0.02 * i as f32))
            .collect()
    }

    #[test]
    fn identical_flow_one_round() {
        let src = points();
        let f = Vector2::new(0.013, -0.004);
        let dst = src.iter().map(|p| p + f).collect::<Vec<_>>();
        let priors = vec![1.0 / 6.0; 6];
        let fit = estimate_translation(&src, &dst, &priors, &IrlsScale::isotropic(500.0), 1).unwrap();
        assert!((fit.model - f).norm() < 1e-6);
        assert!(fit.weights.iter().all(|w| (w - 100.0).abs() < 1e-2));
    }

    #[test]
    fn outlier_is_suppressed() {
        let src = points();
        let f = Vector2::new(0.01, 0.0);
        let mut dst = src.iter().map(|p| p + f).collect::<Vec<_>>();
        dst[5] = src[5] + Vector2::new(-0.05, 0.03);
        let priors = vec![1.0 / 6.0; 6];
        for iterations in 1..=5 {
            let fit = estimate_translation(&src, &dst, &priors, &IrlsScale::isotropic(500.0), iterations)
                .unwrap();
            assert!(fit.weights.iter().all(|w| w.is_finite() && *w >= 0.0));
            if iterations == 5 {
                assert!((fit.model - f).norm() < 1e-4);
                assert!(fit.weights[5] < 0.1);
                assert!(fit.weights[..5].iter().all(|w| *w > 0.5));
            }
        }
    }
}
