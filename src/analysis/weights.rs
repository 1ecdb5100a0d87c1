use crate::analysis::density::BoxFrame;
use crate::analysis::{INLIER_BOOST, MAX_BOOSTED_LENGTH, MAX_MULTIPLIER, OUTLIER_DISCOUNT};
use crate::estimation::normalize_weights;
use crate::linear_ramp;
use crate::motion::{MotionVector, MotionVectorFrame};
use crate::options::TrackStepOptions;
use crate::state::BoxState;
use crate::utils::quad::Quad;
use crate::EPS;
use nalgebra::Vector2;
use std::collections::{HashMap, HashSet};

/// Share of the weight background discrimination may remove at most
pub const MAX_BACKGROUND_SUPPRESSION: f32 = 0.9;

/// Region of the frame in which correspondences are considered for the box
///
#[derive(Debug, Clone, PartialEq)]
pub struct SearchWindow {
    pub min: Vector2<f32>,
    pub max: Vector2<f32>,
    pub expansion: f32,
    /// Set when the box is rotated or a quad, the half-plane tests refine the bounds then
    pub corners: Option<Quad>,
}

impl SearchWindow {
    /// Window around the box expanded by `max(min_expansion, 0.25 * diagonal, 2 * |velocity|)`,
    /// or not expanded at all for perspective tracking.
    ///
    pub fn new(state: &BoxState, opts: &TrackStepOptions, perspective: bool) -> Self {
        let expansion = if perspective {
            0.0
        } else {
            opts.expansion_size
                .max(0.25 * state.diagonal())
                .max(2.0 * state.velocity().norm())
        };
        let corners = state.corners();
        let (lo, hi) = corners.bounds();
        let e = Vector2::new(expansion, expansion);
        Self {
            min: lo - e,
            max: hi + e,
            expansion,
            corners: if state.is_oriented() {
                Some(corners)
            } else {
                None
            },
        }
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.max.x - self.min.x > EPS && self.max.y - self.min.y > EPS)
            || !self.min.iter().chain(self.max.iter()).all(|v| v.is_finite())
    }

    pub fn contains(&self, p: &Vector2<f32>) -> bool {
        p.y >= self.min.y
            && p.y <= self.max.y
            && p.x >= self.min.x
            && p.x <= self.max.x
            && self
                .corners
                .as_ref()
                .map(|q| q.contains_expanded(p, self.expansion))
                .unwrap_or(true)
    }

    /// Correspondences inside the window: a binary search over `x` followed by the `y` and
    /// half-plane tests
    ///
    pub fn select(&self, frame: &MotionVectorFrame) -> Vec<MotionVector> {
        if self.is_degenerate() {
            return Vec::default();
        }
        frame
            .x_range(self.min.x, self.max.x)
            .iter()
            .filter(|v| self.contains(&v.pos))
            .copied()
            .collect()
    }
}

/// Candidate correspondences of the box together with their prior weights (sum is `1`)
///
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    pub vectors: Vec<MotionVector>,
    pub priors: Vec<f32>,
}

impl Candidates {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Selects the correspondences of the box and assigns their prior weights.
///
/// A prior is the spatial Gaussian around the previous inlier center, blended with a motion
/// agreement Gaussian when the previous step showed disparity, suppressed for background-like
/// vectors and scaled by what is known of each track id from the previous step. History is
/// ignored at a chunk boundary.
///
pub fn get_vectors_and_weights(
    frame: &MotionVectorFrame,
    state: &BoxState,
    opts: &TrackStepOptions,
    window: &SearchWindow,
) -> Candidates {
    let vectors = window.select(frame);
    if vectors.is_empty() {
        return Candidates::default();
    }

    let box_frame = BoxFrame::from_state(state);
    let inlier_center = state.inlier_center();
    let local_center = box_frame.local(&inlier_center);
    let sigma = Vector2::new(
        opts.spatial_sigma.max(state.inlier_width / 2.0),
        opts.spatial_sigma.max(state.inlier_height / 2.0),
    );

    let speed = state.velocity().norm();
    let motion_sigma = opts.min_motion_sigma.max(opts.relative_motion_sigma * speed);
    let blend = (state.motion_disparity.abs() * state.prior_weight).clamp(0.0, 1.0);
    let movement = linear_ramp(
        state.kinetic_energy,
        opts.low_kinetic_energy,
        opts.high_kinetic_energy,
    );

    let use_history = !frame.is_chunk_boundary;
    let inlier_lengths = state
        .inlier_ids
        .iter()
        .zip(state.inlier_length.iter().chain(std::iter::repeat(&1)))
        .map(|(id, len)| (*id, *len))
        .collect::<HashMap<_, _>>();
    let outliers = state.outlier_ids.iter().copied().collect::<HashSet<_>>();

    let priors = vectors
        .iter()
        .map(|v| {
            let d = box_frame.local(&v.pos) - local_center;
            let spatial = (-(d.x * d.x) / (2.0 * sigma.x * sigma.x)
                - (d.y * d.y) / (2.0 * sigma.y * sigma.y))
                .exp();

            let magnitude_gap = v.object.norm() - speed;
            let motion = (-(magnitude_gap * magnitude_gap) / (2.0 * motion_sigma * motion_sigma)).exp();
            let mut weight = spatial * ((1.0 - blend) + blend * motion);

            if state.background_discrimination > 0.0 {
                let obj = v.object.norm();
                let background_like =
                    (-(obj * obj) / (2.0 * opts.min_motion_sigma * opts.min_motion_sigma)).exp();
                weight *= 1.0
                    - MAX_BACKGROUND_SUPPRESSION * state.background_discrimination * background_like;
            }

            if use_history && v.has_track_id() {
                let multiplier = if let Some(len) = inlier_lengths.get(&v.track_id) {
                    (1.0 + (INLIER_BOOST - 1.0) * movement)
                        * (1.0 + (*len).min(MAX_BOOSTED_LENGTH) as f32)
                } else if outliers.contains(&v.track_id) {
                    1.0 / OUTLIER_DISCOUNT
                } else {
                    1.0
                };
                weight *= multiplier.min(MAX_MULTIPLIER);
            }
            if weight.is_finite() {
                weight.max(0.0)
            } else {
                0.0
            }
        })
        .collect::<Vec<_>>();

    let mut candidates = Candidates { vectors, priors };
    normalize_weights(&mut candidates.priors);
    candidates
}

#[cfg(test)]
mod tests {
    use crate::analysis::weights::{get_vectors_and_weights, SearchWindow};
    use crate::motion::{MotionVector, MotionVectorFrame};
    use crate::options::TrackStepOptions;
    use crate::state::BoxState;
    use nalgebra::Vector2;
    use std::f32::consts::FRAC_PI_4;

    fn frame() -> MotionVectorFrame {
        let mut vectors = Vec::default();
        for i in 0..20 {
            for j in 0..20 {
                vectors.push(MotionVector::new(
                    Vector2::new(i as f32 / 20.0, j as f32 / 20.0),
                    Vector2::new(0.01, 0.0),
                    Vector2::zeros(),
                    i * 20 + j,
                ));
            }
        }
        MotionVectorFrame::new(vectors, 1.0)
    }

    #[test]
    fn window_expansion() {
        let opts = TrackStepOptions::default();
        let state = BoxState::new(0.4, 0.4, 0.2, 0.2).with_velocity(0.1, 0.0);
        let window = SearchWindow::new(&state, &opts, false);
        assert!((window.expansion - 0.2).abs() < 1e-6);
        assert!(window.corners.is_none());

        let perspective = SearchWindow::new(&state, &opts, true);
        assert_eq!(perspective.expansion, 0.0);
        assert!((perspective.min - Vector2::new(0.4, 0.4)).norm() < 1e-6);
    }

    #[test]
    fn rotated_box_uses_half_planes() {
        let opts = TrackStepOptions::default().expansion_size(0.0);
        let state = BoxState::new(0.4, 0.4, 0.2, 0.2).rotate(FRAC_PI_4);
        let window = SearchWindow::new(&state, &opts, false);
        assert!(window.corners.is_some());
        let inside = window.select(&frame());
        assert!(!inside.is_empty());
        // the rotated square is a diamond, its expanded edges bound the L1 distance
        let limit = (0.2 / 2.0 + window.expansion) * 2f32.sqrt() + 1e-5;
        assert!(inside
            .iter()
            .all(|v| (v.pos - Vector2::new(0.5, 0.5)).abs().sum() <= limit));
        assert!(!window.contains(&Vector2::new(0.35, 0.35)));
    }

    #[test]
    fn priors_sum_to_one() {
        let opts = TrackStepOptions::default();
        let mut state = BoxState::new(0.4, 0.4, 0.2, 0.2).with_velocity(0.01, 0.0);
        state.prior_weight = 1.0;
        state.motion_disparity = 0.5;
        state.background_discrimination = 1.0;
        state.kinetic_energy = 0.01;
        state.inlier_ids = vec![210, 211];
        state.inlier_length = vec![3, 1];
        state.outlier_ids = vec![212];

        let window = SearchWindow::new(&state, &opts, false);
        let candidates = get_vectors_and_weights(&frame(), &state, &opts, &window);
        assert!(!candidates.is_empty());
        let sum = candidates.priors.iter().sum::<f32>();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(candidates.priors.iter().all(|w| w.is_finite() && *w >= 0.0));

        let weight_of = |id: i32| {
            candidates.priors[candidates
                .vectors
                .iter()
                .position(|v| v.track_id == id)
                .unwrap()]
        };
        // 210 is (0.5, 0.5), 211 and 212 are its neighbours below
        assert!(weight_of(210) > weight_of(211));
        assert!(weight_of(211) > weight_of(212) * 100.0);
    }

    #[test]
    fn chunk_boundary_ignores_history() {
        let opts = TrackStepOptions::default();
        let mut state = BoxState::new(0.4, 0.4, 0.2, 0.2);
        state.outlier_ids = vec![210];
        let frame = frame().chunk_boundary(true);
        let window = SearchWindow::new(&state, &opts, false);
        let candidates = get_vectors_and_weights(&frame, &state, &opts, &window);
        let max = candidates.priors.iter().cloned().fold(0.0, f32::max);
        let center = candidates
            .vectors
            .iter()
            .position(|v| v.track_id == 210)
            .unwrap();
        assert!((candidates.priors[center] - max).abs() < 1e-7);
    }

    #[test]
    fn empty_window() {
        let opts = TrackStepOptions::default();
        let state = BoxState::new(0.4, 0.4, 0.2, 0.2);
        let window = SearchWindow::new(&state, &opts, false);
        let frame = MotionVectorFrame::new(vec![], 1.0);
        assert!(get_vectors_and_weights(&frame, &state, &opts, &window).is_empty());
    }
}
