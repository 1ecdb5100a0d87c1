use crate::analysis::density::{density_weights, BoxFrame, DensityGrid};
use crate::estimation::{INLIER_WEIGHT, OUTLIER_WEIGHT};
use crate::motion::MotionVector;
use crate::options::TrackStepOptions;
use crate::state::{quantize_position, BoxState};
use crate::EPS;
use nalgebra::Vector2;
use std::collections::{HashMap, HashSet};

/// Extent of a uniform distribution with unit standard deviation
const UNIFORM_EXTENT: f32 = 3.464_101_6;

pub fn is_inlier(weight: f32) -> bool {
    weight > INLIER_WEIGHT
}

pub fn is_outlier(weight: f32) -> bool {
    weight < OUTLIER_WEIGHT
}

/// What the inlier scoring learned about the step
///
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InlierStats {
    pub num_inliers: usize,
    pub num_outliers: usize,
    /// Inliers whose id was an inlier in the previous state
    pub num_continued: usize,
    /// Previous inliers that turned into outliers
    pub num_swapped: usize,
    /// Inliers whose flow agrees with the previous velocity
    pub num_motion_inliers: usize,
    /// `num_continued` over the number of previous inliers
    pub continued_fraction: f32,
    /// `num_swapped` over the number of previous inliers
    pub swapped_fraction: f32,
    /// `num_motion_inliers` over `num_inliers`
    pub motion_inlier_fraction: f32,
    /// Density and prior weighted mean flow magnitude of the inliers
    pub kinetic_energy: f32,
}

/// Density grid of the candidate positions over the box
///
pub fn candidate_density(vectors: &[MotionVector], frame: BoxFrame, grid_size: usize) -> DensityGrid {
    let mut grid = DensityGrid::new(grid_size, frame);
    vectors.iter().for_each(|v| grid.add_bilinear(&v.pos, 1.0));
    grid
}

/// Classifies the fitted correspondences and records inliers and outliers in `next`.
///
/// Inliers keep their track id, quantized match position and continuation length (one more
/// than in `prev` when the id continues). Correspondences without a track id are counted but
/// not recorded.
///
pub fn score_and_record_inliers(
    vectors: &[MotionVector],
    fitted: &[f32],
    priors: &[f32],
    density: &DensityGrid,
    prev: &BoxState,
    next: &mut BoxState,
    opts: &TrackStepOptions,
) -> InlierStats {
    next.clear_inlier_records();

    let previous_inliers = prev
        .inlier_ids
        .iter()
        .zip(prev.inlier_length.iter().chain(std::iter::repeat(&0)))
        .map(|(id, len)| (*id, *len))
        .collect::<HashMap<_, _>>();
    let positions = vectors.iter().map(|v| v.pos).collect::<Vec<_>>();
    let density_w = density_weights(density, &positions);

    let prev_velocity = prev.velocity();
    let motion_threshold = (2.0 * opts.min_motion_sigma)
        .max(opts.relative_motion_sigma * prev_velocity.norm());

    let mut stats = InlierStats::default();
    let mut outlier_ids = HashSet::new();
    let (mut energy, mut energy_norm) = (0.0_f32, 0.0_f32);

    for (i, v) in vectors.iter().enumerate() {
        let w = fitted[i];
        if is_inlier(w) {
            stats.num_inliers += 1;
            let importance = density_w[i] * priors[i];
            energy += importance * v.object.norm();
            energy_norm += importance;
            if (v.object - prev_velocity).norm() < motion_threshold {
                stats.num_motion_inliers += 1;
            }
            if v.has_track_id() {
                let length = match previous_inliers.get(&v.track_id) {
                    Some(len) => {
                        stats.num_continued += 1;
                        len + 1
                    }
                    None => 1,
                };
                next.inlier_ids.push(v.track_id);
                next.inlier_length.push(length);
                next.inlier_match_pos.push(quantize_position(&v.match_location()));
            }
        } else if is_outlier(w) {
            stats.num_outliers += 1;
            if v.has_track_id() {
                outlier_ids.insert(v.track_id);
                next.outlier_ids.push(v.track_id);
                next.outlier_match_pos.push(quantize_position(&v.match_location()));
            }
        }
    }

    stats.num_swapped = prev
        .inlier_ids
        .iter()
        .filter(|id| outlier_ids.contains(id))
        .count();
    if !previous_inliers.is_empty() {
        let n = previous_inliers.len() as f32;
        stats.continued_fraction = stats.num_continued as f32 / n;
        stats.swapped_fraction = stats.num_swapped as f32 / n;
    }
    if stats.num_inliers > 0 {
        stats.motion_inlier_fraction = stats.num_motion_inliers as f32 / stats.num_inliers as f32;
    }
    if energy_norm > EPS * EPS {
        stats.kinetic_energy = energy / energy_norm;
    }
    stats
}

/// Center and extent of the inliers after the motion.
///
/// Match locations are averaged with the given weights, normalized by the local density.
/// The extent along the box axes is that of a uniform distribution with the same spread.
/// Returns `None` when no weight is left.
///
pub fn inlier_center_extent(
    vectors: &[MotionVector],
    weights: &[f32],
    inliers: &[bool],
    density: &DensityGrid,
    frame: &BoxFrame,
) -> Option<(Vector2<f32>, Vector2<f32>)> {
    let positions = vectors.iter().map(|v| v.pos).collect::<Vec<_>>();
    let density_w = density_weights(density, &positions);

    let mut total = 0.0_f32;
    let mut center = Vector2::zeros();
    for i in 0..vectors.len() {
        if inliers[i] {
            let w = weights[i] * density_w[i];
            total += w;
            center += vectors[i].match_location() * w;
        }
    }
    if total < EPS * EPS || !total.is_finite() {
        return None;
    }
    center /= total;

    let mut variance = Vector2::zeros();
    for i in 0..vectors.len() {
        if inliers[i] {
            let w = weights[i] * density_w[i];
            let d = vectors[i].match_location() - center;
            let along = Vector2::new(d.dot(&frame.axis_x), d.dot(&frame.axis_y));
            variance += along.component_mul(&along) * w;
        }
    }
    variance /= total;
    let extent = variance.map(|v| v.sqrt() * UNIFORM_EXTENT);
    Some((center, extent))
}
