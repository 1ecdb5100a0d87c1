use crate::analysis::density::BoxFrame;
use crate::analysis::inliers::{
    candidate_density, inlier_center_extent, is_inlier, score_and_record_inliers, InlierStats,
};
use crate::analysis::spatial_prior::compute_spatial_prior;
use crate::analysis::weights::{get_vectors_and_weights, Candidates, SearchWindow};
use crate::estimation::initialization::initialize_weights;
use crate::estimation::{
    IrlsFit, IrlsScale, ModelContext, MotionModel, MotionModelKind, MIN_CORRESPONDENCES,
};
use crate::motion::MotionVectorFrame;
use crate::options::TrackStepOptions;
use crate::state::{BoxState, InternalState, TrackStatus};
use crate::utils::quad::Quad;
use crate::utils::transform::{local_scale_rotation, project, Similarity2};
use crate::{linear_ramp, Errors, EPS};
use anyhow::Result;
use log::{debug, trace};
use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

/// Seed of the initialization sampler, every step is reproducible
pub const INITIALIZATION_SEED: u64 = 0x6d6f_7469_6f6e;

/// Below this share of continued (or motion-agreeing) inliers the inlier records are dropped
pub const MIN_CONTINUITY: f32 = 0.15;

/// Above this share of previous inliers turning into outliers the inlier records are dropped
pub const MAX_SWAP_RATIO: f32 = 0.5;

/// Inlier count range over which the tracking confidence goes from `0` to `1`
pub const CONFIDENCE_INLIERS: (f32, f32) = (4.0, 20.0);

/// Relative change of the inlier center at which the blend trusts the measurement `1/e` as much
const INLIER_CHANGE_SCALE: f32 = 0.1;

/// Computes the state that follows `history[0]` on `frame`.
///
/// `history` holds the state tracked from and its predecessors toward the tracking origin.
/// The returned state always carries the outcome in its `track_status`.
///
pub(crate) fn track_step(
    history: &[&BoxState],
    frame: &MotionVectorFrame,
    opts: &TrackStepOptions,
    verbosity: u8,
) -> BoxState {
    match history.first() {
        Some(prev) => Step {
            prev,
            history,
            frame,
            opts,
            verbosity,
        }
        .run(),
        None => BoxState::default(),
    }
}

struct Step<'a> {
    prev: &'a BoxState,
    history: &'a [&'a BoxState],
    frame: &'a MotionVectorFrame,
    opts: &'a TrackStepOptions,
    verbosity: u8,
}

fn failed(mut state: BoxState, status: TrackStatus) -> BoxState {
    state.track_status = status;
    state.tracking_confidence = 0.0;
    state
}

impl<'a> Step<'a> {
    fn run(&self) -> BoxState {
        if self.frame.is_duplicated {
            let mut next = self.prev.clone();
            next.track_status = TrackStatus::BoxDuplicated;
            return next;
        }

        let mut next = self.normalized();
        match next.validate_geometry() {
            Err(e) => {
                if self.verbosity > 0 {
                    debug!("Box geometry rejected: {}", e);
                }
                return failed(next, TrackStatus::BoxUntracked);
            }
            Ok(false) => return failed(next, TrackStatus::BoxEmpty),
            Ok(true) => {}
        }

        let kind = MotionModelKind::select(self.opts);
        if (kind == MotionModelKind::Perspective || self.opts.tracking_degrees.is_perspective())
            && next.quad.is_none()
        {
            let size = next.scaled_size();
            next.aspect_ratio = next.aspect_ratio.or(Some(size.x / size.y.max(EPS)));
            let corners = next.corners();
            next.set_quad(corners);
        }
        // inputs of the step, rescaled to the current frame
        let base = next.clone();

        let window = SearchWindow::new(&base, self.opts, kind == MotionModelKind::Perspective);
        let candidates = get_vectors_and_weights(self.frame, &base, self.opts, &window);
        let static_box = base.velocity().norm() < self.opts.static_motion_temporal_ratio;
        self.stage(|| {
            format!(
                "{} candidates in [{:.3}, {:.3}]-[{:.3}, {:.3}]",
                candidates.len(),
                window.min.x,
                window.min.y,
                window.max.x,
                window.max.y
            )
        });

        if candidates.len() < MIN_CORRESPONDENCES {
            // a pose needs 4 correspondences, there is no degraded fallback for it
            if kind == MotionModelKind::Perspective && !candidates.is_empty() {
                return failed(next, TrackStatus::BoxUntracked);
            }
            if static_box && self.frame.valid_background_model {
                return self.camera_only(next);
            }
            return failed(next, TrackStatus::BoxNoFeatures);
        }

        let mut priors = candidates.priors.clone();
        let flows = candidates
            .vectors
            .iter()
            .map(|v| v.object)
            .collect::<Vec<_>>();
        let mut rng = StdRng::seed_from_u64(INITIALIZATION_SEED);
        let confident = initialize_weights(
            &flows,
            &mut priors,
            &self.opts.irls_initialization,
            &mut rng,
        );
        if confident < MIN_CORRESPONDENCES && static_box && kind != MotionModelKind::Perspective {
            self.stage(|| format!("{} confident vectors, camera motion only", confident));
            return self.camera_only(next);
        }

        let scale = IrlsScale::from_motion(&base.velocity(), base.kinetic_energy, self.opts);
        let ctx = ModelContext::new(&base, self.frame.aspect_ratio, scale, self.opts);
        let fit = match self.fit(kind, &base, &candidates, &priors, &ctx) {
            Ok(fit) => fit,
            Err(e) => {
                if self.verbosity > 0 {
                    debug!("Motion model cannot be fitted: {}", e);
                }
                let status = if kind == MotionModelKind::Perspective {
                    TrackStatus::BoxUntracked
                } else {
                    TrackStatus::BoxNoFeatures
                };
                return failed(next, status);
            }
        };

        let vectors = &candidates.vectors;
        let center = base.center();
        let object_translation = match &fit.model {
            MotionModel::Perspective(_) => {
                fit.model.translation_at(&center) - self.frame.camera_flow_at(&center)
            }
            model => model.translation_at(&center),
        };

        let density = candidate_density(
            vectors,
            BoxFrame::from_state(&base),
            self.opts.spatial_prior_grid_size,
        );
        let stats = score_and_record_inliers(
            vectors,
            &fit.weights,
            &priors,
            &density,
            &base,
            &mut next,
            self.opts,
        );

        let disparity = self.motion_disparity(&base, &object_translation, &stats);
        next.motion_disparity = disparity;
        let inlier_ratio = self.inlier_ratio(stats.num_inliers);
        self.stage(|| {
            format!(
                "translation [{:.5}, {:.5}], {} inliers ({} continued, {} swapped), disparity {:.3}, ratio {:.3}",
                object_translation.x,
                object_translation.y,
                stats.num_inliers,
                stats.num_continued,
                stats.num_swapped,
                disparity,
                inlier_ratio
            )
        });

        let has_history = base.inlier_ids.len() >= MIN_CORRESPONDENCES;
        let occlusion = &self.opts.cancel_tracking_with_occlusion_options;
        if occlusion.activated
            && has_history
            && (stats.continued_fraction < occlusion.min_motion_continuity
                || inlier_ratio < occlusion.min_inlier_ratio)
        {
            if self.verbosity > 0 {
                debug!(
                    "Occlusion detected: continuity {:.3}, inlier ratio {:.3}",
                    stats.continued_fraction, inlier_ratio
                );
            }
            return failed(next, TrackStatus::BoxUntracked);
        }

        let continuity_lost = has_history
            && stats.continued_fraction.max(stats.motion_inlier_fraction) < MIN_CONTINUITY;
        let saturated = disparity.abs() >= 1.0;
        let swapped = has_history && stats.swapped_fraction > MAX_SWAP_RATIO;
        let reset = continuity_lost || saturated || swapped;
        if reset {
            if self.verbosity > 0 {
                debug!(
                    "Internal reset: continuity lost {}, disparity saturated {}, inliers swapped {}",
                    continuity_lost, saturated, swapped
                );
            }
            next.clear_inlier_records();
        }

        if let Err(e) = self.apply_motion(&mut next, &fit.model) {
            if self.verbosity > 0 {
                debug!("Motion cannot be applied: {}", e);
            }
            return failed(next, TrackStatus::BoxUntracked);
        }

        let inliers = fit.weights.iter().map(|w| is_inlier(*w)).collect::<Vec<_>>();
        let state_weights = if self.opts.use_post_estimation_weights_for_state {
            &fit.weights
        } else {
            &priors
        };
        self.update_inlier_geometry(
            &base,
            &mut next,
            &candidates,
            state_weights,
            &inliers,
            fit.model.kind() != MotionModelKind::Perspective,
        );
        if self.opts.compute_spatial_prior {
            let sp = compute_spatial_prior(
                vectors,
                state_weights,
                &inliers,
                BoxFrame::from_state(&next),
                self.opts.spatial_prior_grid_size,
                next.quad.is_none(),
                &base.spatial_prior,
                &base.spatial_confidence,
            );
            next.spatial_prior = sp.prior;
            next.spatial_confidence = sp.confidence;
        }

        let w = self.opts.velocity_update_weight;
        let velocity = if reset {
            base.velocity()
        } else if base.inlier_ids.is_empty() {
            object_translation
        } else {
            object_translation * w + base.velocity() * (1.0 - w)
        };
        next.dx = velocity.x;
        next.dy = velocity.y;
        next.prior_weight = (base.prior_weight + self.opts.prior_weight_increase).min(1.0);
        next.kinetic_energy = stats
            .kinetic_energy
            .max(base.kinetic_energy * self.opts.kinetic_energy_decay);
        next.background_discrimination = if reset {
            base.background_discrimination
        } else {
            linear_ramp(
                next.kinetic_energy,
                self.opts.background_discrimination_low_level,
                self.opts.background_discrimination_high_level,
            )
        };
        next.tracking_confidence = linear_ramp(
            stats.num_inliers as f32,
            CONFIDENCE_INLIERS.0,
            CONFIDENCE_INLIERS.1,
        );
        if self.opts.return_internal_state {
            next.internal = Some(InternalState {
                vectors: candidates.vectors.clone(),
                weights: fit.weights.clone(),
            });
        }
        next.track_status = TrackStatus::BoxTracked;
        next
    }

    fn stage<F: FnOnce() -> String>(&self, message: F) {
        if self.verbosity > 1 {
            trace!("{}", message());
        }
    }

    /// Copy of the previous state expressed in the aspect ratio and frame period of `frame`
    ///
    fn normalized(&self) -> BoxState {
        let mut next = self.prev.clone();
        next.internal = None;

        let aspect = self.frame.aspect_ratio;
        if aspect.is_finite() && aspect > EPS {
            match next.frame_aspect_ratio {
                Some(a) if a > EPS && (a - aspect).abs() > EPS => next.scale_aspect(a, aspect),
                _ => next.frame_aspect_ratio = Some(aspect),
            }
        }

        let duration = self.frame.duration_ms;
        if duration > 0.0 {
            if let Some(d) = next.frame_duration_ms {
                if d > 0.0 && (d - duration).abs() > EPS {
                    let ratio = duration / d;
                    next.dx *= ratio;
                    next.dy *= ratio;
                }
            }
            next.frame_duration_ms = Some(duration);
        }
        next
    }

    /// Fits the selected model, degrading similarity and homography to translation when there
    /// is too little history or the fit fails
    ///
    fn fit(
        &self,
        kind: MotionModelKind,
        base: &BoxState,
        candidates: &Candidates,
        priors: &[f32],
        ctx: &ModelContext,
    ) -> Result<IrlsFit<MotionModel>> {
        let vectors = &candidates.vectors;
        let kind = match kind {
            MotionModelKind::Similarity | MotionModelKind::Homography => {
                let previous = base.inlier_ids.iter().copied().collect::<HashSet<_>>();
                let continued = vectors
                    .iter()
                    .filter(|v| v.has_track_id() && previous.contains(&v.track_id))
                    .count();
                if continued < self.opts.object_similarity_min_contd_inliers {
                    self.stage(|| format!("{} continued inliers, fitting translation", continued));
                    MotionModelKind::Translation
                } else {
                    kind
                }
            }
            kind => kind,
        };

        match kind.estimate(vectors, priors, ctx) {
            Ok(fit) => Ok(fit),
            Err(e) if kind == MotionModelKind::Similarity || kind == MotionModelKind::Homography => {
                self.stage(|| format!("{:?} fit failed ({}), fitting translation", kind, e));
                MotionModelKind::Translation.estimate(vectors, priors, ctx)
            }
            Err(e) => Err(e),
        }
    }

    /// Signed disparity between the measured translation and the previous velocity
    ///
    fn motion_disparity(&self, base: &BoxState, translation: &Vector2<f32>, stats: &InlierStats) -> f32 {
        let measured_speed = translation.norm();
        let expected_speed = base.velocity().norm();
        let measured = linear_ramp(
            (measured_speed - expected_speed).abs(),
            self.opts.motion_disparity_low_level,
            self.opts.motion_disparity_high_level,
        )
        .min(1.0 - stats.continued_fraction);
        let magnitude = measured.max(base.motion_disparity.abs() * self.opts.disparity_decay);
        if measured_speed < expected_speed {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Inlier count relative to the largest one in the history window
    ///
    fn inlier_ratio(&self, num_inliers: usize) -> f32 {
        let max = self
            .history
            .iter()
            .map(|s| s.inlier_ids.len())
            .max()
            .unwrap_or(0)
            .max(num_inliers);
        if max == 0 {
            1.0
        } else {
            num_inliers as f32 / max as f32
        }
    }

    /// Moves the box by the fitted object motion followed by the camera motion
    ///
    fn apply_motion(&self, next: &mut BoxState, model: &MotionModel) -> Result<()> {
        if let MotionModel::Perspective(pose) = model {
            next.set_quad(pose.quad);
            let h = pose.pose_homography;
            next.pnp_homography = Some([
                h[(0, 0)],
                h[(0, 1)],
                h[(0, 2)],
                h[(1, 0)],
                h[(1, 1)],
                h[(1, 2)],
                h[(2, 0)],
                h[(2, 1)],
                h[(2, 2)],
            ]);
            return Ok(());
        }

        let camera = &self.frame.background_model;
        let old = next.corners();
        let moved = Quad::new(old.vertices.map(|c| project(camera, &model.warp(&c))));

        if next.quad.is_some() {
            if !moved.is_finite() {
                return Err(Errors::InvalidGeometry("moved quad is not finite".into()).into());
            }
            if !moved.is_convex() {
                return Err(Errors::NonConvexQuad.into());
            }
            next.set_quad(moved);
            return Ok(());
        }

        // the corner fit keeps the rectangle a rectangle
        let motion = Similarity2::fit(&old.vertices, &moved.vertices).ok_or_else(|| {
            Errors::InvalidGeometry("box corners cannot be matched".into())
        })?;
        let center = motion.apply(&next.center());
        self.apply_scale_rotation(next, motion.scale(), motion.rotation());
        next.set_center(center);
        Ok(())
    }

    fn apply_scale_rotation(&self, next: &mut BoxState, scale: f32, rotation: f32) {
        let degrees = self.opts.tracking_degrees;
        if degrees.tracks_scale() && scale.is_finite() {
            let max = self.opts.box_similarity_max_scale;
            next.scale *= scale.clamp(1.0 / max, max);
        }
        if degrees.tracks_rotation() && rotation.is_finite() {
            let max = self.opts.box_similarity_max_rotation;
            next.rotation += rotation.clamp(-max, max);
        }
    }

    /// Static box carried by the camera model alone
    ///
    fn camera_only(&self, mut next: BoxState) -> BoxState {
        let camera = &self.frame.background_model;
        let center = next.center();

        if let Some(q) = next.quad {
            let moved = q.transformed(camera);
            if !moved.is_finite() || !moved.is_convex() {
                if self.verbosity > 0 {
                    debug!("Camera motion folds the quad, tracking is cancelled");
                }
                return failed(next, TrackStatus::BoxUntracked);
            }
            next.set_quad(moved);
        } else {
            let (scale, rotation) = local_scale_rotation(camera, &center);
            self.apply_scale_rotation(&mut next, scale, rotation);
            next.set_center(project(camera, &center));
        }

        let shift = next.center() - center;
        next.inlier_center_x += shift.x;
        next.inlier_center_y += shift.y;
        next.track_status = TrackStatus::BoxTrackedOutOfBound;
        next
    }

    /// Inlier center and extent blended with the previous ones, then the spring that pulls the
    /// box toward the inliers
    ///
    fn update_inlier_geometry(
        &self,
        base: &BoxState,
        next: &mut BoxState,
        candidates: &Candidates,
        weights: &[f32],
        inliers: &[bool],
        spring: bool,
    ) {
        let moved_frame = BoxFrame::from_state(next);
        let shift = next.center() - base.center();
        let previous_center = base.inlier_center() + shift;
        let previous_extent = Vector2::new(base.inlier_width, base.inlier_height);
        let density = candidate_density(
            &candidates.vectors,
            BoxFrame::from_state(base),
            self.opts.spatial_prior_grid_size,
        );

        let (center, extent) = match inlier_center_extent(
            &candidates.vectors,
            weights,
            inliers,
            &density,
            &moved_frame,
        ) {
            Some((center, extent)) => {
                let change = (center - previous_center).norm() / next.diagonal().max(EPS);
                let alpha = 0.3 + 0.7 * (-change / INLIER_CHANGE_SCALE).exp();
                let extent_alpha = if previous_extent.norm() < EPS { 1.0 } else { alpha };
                (
                    center * alpha + previous_center * (1.0 - alpha),
                    extent * extent_alpha + previous_extent * (1.0 - extent_alpha),
                )
            }
            None => (previous_center, previous_extent),
        };
        next.inlier_center_x = center.x;
        next.inlier_center_y = center.y;
        next.inlier_width = extent.x;
        next.inlier_height = extent.y;

        if !spring {
            return;
        }
        let offset = center - next.center();
        let relative = offset.norm() / next.diagonal().max(EPS);
        let threshold = self.opts.inlier_center_relative_distance;
        if relative > threshold {
            let pull = offset * self.opts.inlier_spring_force * (1.0 - threshold / relative);
            self.stage(|| format!("spring pulls the box by [{:.5}, {:.5}]", pull.x, pull.y));
            next.translate(&pull);
        }
    }
}
