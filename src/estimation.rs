use crate::linear_ramp;
use crate::motion::MotionVector;
use crate::options::{CameraIntrinsics, TrackStepOptions, TrackingDegrees};
use crate::state::BoxState;
use crate::utils::quad::Quad;
use crate::utils::transform::{local_scale_rotation, project, Homography, Similarity2};
use crate::{Errors, EPS};
use anyhow::Result;
use log::trace;
use nalgebra::Vector2;

/// Weighted mean translation
pub mod translation;

/// Similarity (translation, scale, rotation) around the box center
pub mod similarity;

/// Full planar homography
pub mod homography;

/// Planar pose of a fixed-aspect quad (PnP)
pub mod perspective;

/// RANSAC-like pre-weighting of the correspondences
pub mod initialization;

/// Every solver needs at least this many correspondences
pub const MIN_CORRESPONDENCES: usize = 4;

/// Added to the IRLS error before it is inverted
pub const IRLS_EPSILON: f32 = 0.01;

/// Fitted weight above which a correspondence is an inlier
pub const INLIER_WEIGHT: f32 = 0.5;

/// Fitted weight below which a correspondence is an outlier
pub const OUTLIER_WEIGHT: f32 = 0.1;

/// Anisotropic error metric of the IRLS rounds.
///
/// Residuals are measured in an orthogonal basis aligned with the expected motion: errors
/// along the motion direction are tolerated in proportion to the motion magnitude, errors across
/// it are not. Both scales are inverse sigmas.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrlsScale {
    parallel: Vector2<f32>,
    perpendicular: Vector2<f32>,
    parallel_scale: f32,
    perpendicular_scale: f32,
}

impl IrlsScale {
    pub fn isotropic(scale: f32) -> Self {
        Self {
            parallel: Vector2::x(),
            perpendicular: Vector2::y(),
            parallel_scale: scale,
            perpendicular_scale: scale,
        }
    }

    /// Scale derived from the expected motion of the box
    ///
    pub fn from_motion(velocity: &Vector2<f32>, kinetic_energy: f32, opts: &TrackStepOptions) -> Self {
        let movement = linear_ramp(
            kinetic_energy,
            opts.low_kinetic_energy,
            opts.high_kinetic_energy,
        );
        let base = opts.inlier_high_weight
            + (opts.inlier_low_weight - opts.inlier_high_weight) * movement;
        let speed = velocity.norm();
        if speed < EPS {
            return Self::isotropic(base);
        }
        let parallel = velocity / speed;
        Self {
            parallel,
            perpendicular: Vector2::new(-parallel.y, parallel.x),
            parallel_scale: (1.0 / (opts.relative_motion_sigma * speed)).min(base),
            perpendicular_scale: base,
        }
    }

    /// The same metric for coordinates magnified by `factor`
    ///
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            parallel_scale: self.parallel_scale * factor,
            perpendicular_scale: self.perpendicular_scale * factor,
            ..*self
        }
    }

    pub fn error(&self, residual: &Vector2<f32>) -> f32 {
        let along = residual.dot(&self.parallel) * self.parallel_scale;
        let across = residual.dot(&self.perpendicular) * self.perpendicular_scale;
        (along * along + across * across).sqrt()
    }
}

/// Result of a robust fit: the model and the unnormalized final weights (`1 / (error + eps)`)
///
#[derive(Debug, Clone)]
pub struct IrlsFit<M> {
    pub model: M,
    pub weights: Vec<f32>,
}

pub(crate) fn check_correspondences(n: usize) -> Result<()> {
    if n < MIN_CORRESPONDENCES {
        return Err(Errors::InsufficientCorrespondences {
            required: MIN_CORRESPONDENCES,
            actual: n,
        }
        .into());
    }
    Ok(())
}

/// Normalizes the weights to sum `1`, a vanishing sum turns into uniform weights
///
pub fn normalize_weights(weights: &mut [f32]) {
    if weights.is_empty() {
        return;
    }
    let sum = weights.iter().sum::<f32>();
    if !sum.is_finite() || sum < EPS {
        let uniform = 1.0 / weights.len() as f32;
        weights.iter_mut().for_each(|w| *w = uniform);
    } else {
        weights.iter_mut().for_each(|w| *w /= sum);
    }
}

/// Runs the shared reweighting loop.
///
/// `fit` solves the weighted problem for weights that sum to `1`, `residual` returns the
/// prediction error of a correspondence under the model. Intermediate rounds weight by
/// `prior / (error + eps)`, the last one by `1 / (error + eps)`.
///
pub(crate) fn irls<M, F, R>(
    priors: &[f32],
    scale: &IrlsScale,
    iterations: usize,
    mut fit: F,
    residual: R,
) -> Result<IrlsFit<M>>
where
    F: FnMut(&[f32]) -> Result<M>,
    R: Fn(&M, usize) -> Vector2<f32>,
{
    check_correspondences(priors.len())?;
    let iterations = iterations.max(1);
    let mut weights = priors.to_vec();
    normalize_weights(&mut weights);

    let mut round = 0;
    loop {
        let model = fit(&weights)?;
        round += 1;
        let last = round == iterations;
        for (i, w) in weights.iter_mut().enumerate() {
            let err = scale.error(&residual(&model, i));
            let err = if err.is_finite() { err } else { f32::MAX / 2.0 };
            let numerator = if last { 1.0 } else { priors[i] };
            *w = numerator / (err + IRLS_EPSILON);
        }
        if last {
            return Ok(IrlsFit { model, weights });
        }
        normalize_weights(&mut weights);
    }
}

/// Model families the box can follow
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionModelKind {
    Translation,
    Similarity,
    Homography,
    Perspective,
}

/// Fitted frame-to-frame motion of the object
///
#[derive(Debug, Clone, PartialEq)]
pub enum MotionModel {
    Translation(Vector2<f32>),
    Similarity(Similarity2),
    Homography(Homography),
    Perspective(perspective::PnpPose),
}

/// Everything besides the correspondences that a model fit may need
///
#[derive(Debug, Clone)]
pub struct ModelContext {
    pub center: Vector2<f32>,
    pub quad: Quad,
    /// Width over height of the tracked planar object
    pub aspect_ratio: f32,
    pub intrinsics: CameraIntrinsics,
    pub irls_scale: IrlsScale,
    pub iterations: usize,
    pub max_similarity_scale: f32,
    pub max_similarity_rotation: f32,
    pub max_homography_scale: f32,
    pub max_homography_rotation: f32,
}

impl ModelContext {
    pub fn new(state: &BoxState, frame_aspect_ratio: f32, irls_scale: IrlsScale, opts: &TrackStepOptions) -> Self {
        let quad = state.corners();
        let size = state.scaled_size();
        let aspect_ratio = state
            .aspect_ratio
            .unwrap_or_else(|| size.x / size.y.max(EPS));
        let intrinsics = opts.camera_intrinsics.unwrap_or_else(|| {
            let extent = crate::motion::frame_extent(frame_aspect_ratio);
            CameraIntrinsics::pinhole(1.0, 1.0, extent.x / 2.0, extent.y / 2.0)
        });
        Self {
            center: state.center(),
            quad,
            aspect_ratio,
            intrinsics,
            irls_scale,
            iterations: opts.irls_iterations,
            max_similarity_scale: opts.box_similarity_max_scale,
            max_similarity_rotation: opts.box_similarity_max_rotation,
            max_homography_scale: opts.quad_homography_max_scale,
            max_homography_rotation: opts.quad_homography_max_rotation,
        }
    }
}

impl MotionModelKind {
    /// The model that the options ask for
    ///
    pub fn select(opts: &TrackStepOptions) -> Self {
        let degrees = opts.tracking_degrees;
        if opts.forced_pnp_tracking
            || (degrees == TrackingDegrees::ObjectPerspective && opts.camera_intrinsics.is_some())
        {
            MotionModelKind::Perspective
        } else if degrees == TrackingDegrees::ObjectPerspective {
            MotionModelKind::Homography
        } else if degrees.is_object_driven() {
            MotionModelKind::Similarity
        } else {
            MotionModelKind::Translation
        }
    }

    /// Fits the model to the correspondences.
    ///
    /// Translation, similarity and homography follow the object flow (camera motion removed),
    /// the perspective model follows the total flow since the pose lives in camera coordinates.
    /// Similarity fits are clamped to the configured limits, homographies beyond them are
    /// rejected.
    ///
    pub fn estimate(
        &self,
        vectors: &[MotionVector],
        priors: &[f32],
        ctx: &ModelContext,
    ) -> Result<IrlsFit<MotionModel>> {
        check_correspondences(vectors.len())?;
        let src = vectors.iter().map(|v| v.pos).collect::<Vec<_>>();
        match self {
            MotionModelKind::Translation => {
                let dst = vectors.iter().map(|v| v.object_location()).collect::<Vec<_>>();
                let fit = translation::estimate_translation(&src, &dst, priors, &ctx.irls_scale, ctx.iterations)?;
                Ok(IrlsFit {
                    model: MotionModel::Translation(fit.model),
                    weights: fit.weights,
                })
            }
            MotionModelKind::Similarity => {
                let dst = vectors.iter().map(|v| v.object_location()).collect::<Vec<_>>();
                let fit = similarity::estimate_similarity(
                    &src,
                    &dst,
                    priors,
                    &ctx.center,
                    &ctx.irls_scale,
                    ctx.iterations,
                )?;
                let clamped = clamp_similarity(
                    &fit.model,
                    &ctx.center,
                    ctx.max_similarity_scale,
                    ctx.max_similarity_rotation,
                );
                Ok(IrlsFit {
                    model: MotionModel::Similarity(clamped),
                    weights: fit.weights,
                })
            }
            MotionModelKind::Homography => {
                let dst = vectors.iter().map(|v| v.object_location()).collect::<Vec<_>>();
                let fit = homography::estimate_homography(
                    &src,
                    &dst,
                    priors,
                    &ctx.irls_scale,
                    ctx.iterations,
                )?;
                let (scale, rotation) = local_scale_rotation(&fit.model, &ctx.center);
                if scale > ctx.max_homography_scale
                    || scale < 1.0 / ctx.max_homography_scale
                    || rotation.abs() > ctx.max_homography_rotation
                {
                    trace!(
                        "Homography rejected: local scale {}, rotation {}",
                        scale,
                        rotation
                    );
                    return Err(Errors::InvalidGeometry(format!(
                        "homography scale {} rotation {} exceeds the limits",
                        scale, rotation
                    ))
                    .into());
                }
                Ok(IrlsFit {
                    model: MotionModel::Homography(fit.model),
                    weights: fit.weights,
                })
            }
            MotionModelKind::Perspective => {
                let dst = vectors.iter().map(|v| v.match_location()).collect::<Vec<_>>();
                let fit = perspective::estimate_pose(
                    &src,
                    &dst,
                    priors,
                    &ctx.quad,
                    ctx.aspect_ratio,
                    &ctx.intrinsics,
                    &ctx.irls_scale,
                    ctx.iterations,
                )?;
                Ok(IrlsFit {
                    model: MotionModel::Perspective(fit.model),
                    weights: fit.weights,
                })
            }
        }
    }
}

impl MotionModel {
    /// Where the object point `p` moves to
    ///
    pub fn warp(&self, p: &Vector2<f32>) -> Vector2<f32> {
        match self {
            MotionModel::Translation(t) => p + t,
            MotionModel::Similarity(s) => s.apply(p),
            MotionModel::Homography(h) => project(h, p),
            MotionModel::Perspective(pose) => project(&pose.frame_homography, p),
        }
    }

    /// Displacement of the point `p`
    ///
    pub fn translation_at(&self, p: &Vector2<f32>) -> Vector2<f32> {
        self.warp(p) - p
    }

    pub fn kind(&self) -> MotionModelKind {
        match self {
            MotionModel::Translation(_) => MotionModelKind::Translation,
            MotionModel::Similarity(_) => MotionModelKind::Similarity,
            MotionModel::Homography(_) => MotionModelKind::Homography,
            MotionModel::Perspective(_) => MotionModelKind::Perspective,
        }
    }
}

/// Limits the scale change to `[1 / max_scale, max_scale]` and the rotation to
/// `[-max_rotation, max_rotation]`, keeping the motion of `center` unchanged.
///
pub fn clamp_similarity(
    s: &Similarity2,
    center: &Vector2<f32>,
    max_scale: f32,
    max_rotation: f32,
) -> Similarity2 {
    let scale = s.scale().clamp(1.0 / max_scale.max(EPS), max_scale);
    let rotation = s.rotation().clamp(-max_rotation, max_rotation);
    let moved_center = s.apply(center);
    let mut clamped = Similarity2::from_scale_rotation(scale, rotation, Vector2::zeros());
    clamped.translation = moved_center - clamped.apply(center);
    clamped
}
