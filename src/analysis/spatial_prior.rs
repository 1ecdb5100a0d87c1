use crate::analysis::density::{BoxFrame, DensityGrid};
use crate::motion::MotionVector;
use crate::EPS;

/// Decay of the previous confidence per step
pub const SPATIAL_CONFIDENCE_DECAY: f32 = 0.9;

/// Updated spatial prior and its confidence, both `grid_size x grid_size`
///
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialPrior {
    pub prior: Vec<f32>,
    pub confidence: Vec<f32>,
}

/// Accumulates the inlier weight over the (moved) box and blends it into the previous grid.
///
/// The new grid is normalized to a maximum of `1`. Every cell of the result is the average of
/// the previous and new value, weighted by the decayed previous confidence and the new mass.
/// A previous grid of the wrong size is treated as empty.
///
#[allow(clippy::too_many_arguments)]
pub fn compute_spatial_prior(
    vectors: &[MotionVector],
    weights: &[f32],
    inliers: &[bool],
    frame: BoxFrame,
    grid_size: usize,
    bilinear: bool,
    prev_prior: &[f32],
    prev_confidence: &[f32],
) -> SpatialPrior {
    let mut grid = DensityGrid::new(grid_size, frame);
    for i in 0..vectors.len() {
        if !inliers[i] {
            continue;
        }
        let p = vectors[i].match_location();
        if bilinear {
            grid.add_bilinear(&p, weights[i]);
        } else {
            grid.add_nearest(&p, weights[i]);
        }
    }
    grid.normalize_max();
    let mass = grid.into_cells();

    let cells = grid_size * grid_size;
    let has_previous = prev_prior.len() == cells && prev_confidence.len() == cells;

    let mut prior = Vec::with_capacity(cells);
    let mut confidence = Vec::with_capacity(cells);
    for i in 0..cells {
        let (old, old_conf) = if has_previous {
            (prev_prior[i], prev_confidence[i] * SPATIAL_CONFIDENCE_DECAY)
        } else {
            (0.0, 0.0)
        };
        let new = mass[i];
        let total = old_conf + new;
        prior.push(if total > EPS {
            (old * old_conf + new * new) / total
        } else {
            old
        });
        confidence.push(total.min(1.0));
    }
    SpatialPrior { prior, confidence }
}

#[cfg(test)]
mod tests {
    use crate::analysis::density::BoxFrame;
    use crate::analysis::spatial_prior::compute_spatial_prior;
    use crate::motion::MotionVector;
    use crate::EPS;
    use nalgebra::Vector2;

    fn frame() -> BoxFrame {
        BoxFrame::new(Vector2::new(0.5, 0.5), Vector2::new(1.0, 1.0), 0.0)
    }

    #[test]
    fn first_update() {
        let vectors = vec![
            MotionVector::new(Vector2::new(0.05, 0.05), Vector2::zeros(), Vector2::zeros(), 0),
            MotionVector::new(Vector2::new(0.95, 0.95), Vector2::zeros(), Vector2::zeros(), 1),
        ];
        let sp = compute_spatial_prior(&vectors, &[2.0, 1.0], &[true, true], frame(), 10, false, &[], &[]);
        assert_eq!(sp.prior.len(), 100);
        assert!((sp.prior[0] - 1.0).abs() < EPS);
        assert!((sp.prior[99] - 0.5).abs() < EPS);
        assert!((sp.confidence[99] - 0.5).abs() < EPS);
        assert_eq!(sp.confidence[50], 0.0);
    }

    #[test]
    fn blending_with_history() {
        let vectors = vec![MotionVector::new(
            Vector2::new(0.05, 0.05),
            Vector2::zeros(),
            Vector2::zeros(),
            0,
        )];
        let prev_prior = vec![0.5; 100];
        let prev_conf = vec![1.0; 100];
        let sp = compute_spatial_prior(&vectors, &[1.0], &[true], frame(), 10, true, &prev_prior, &prev_conf);
        // cell 0: (0.5 * 0.9 + 1 * 1) / 1.9
        assert!((sp.prior[0] - 1.45 / 1.9).abs() < 1e-5);
        assert!((sp.confidence[0] - 1.0).abs() < EPS);
        // untouched cells keep the value, confidence decays
        assert!((sp.prior[55] - 0.5).abs() < EPS);
        assert!((sp.confidence[55] - 0.9).abs() < EPS);
    }
}
