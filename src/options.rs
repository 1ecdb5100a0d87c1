use serde::{Deserialize, Serialize};

/// Which degrees of freedom the box follows, and whether they come from the camera model or
/// from the object's own correspondences.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TrackingDegrees {
    #[default]
    Translation,
    CameraScale,
    CameraRotation,
    CameraRotationScale,
    CameraPerspective,
    ObjectScale,
    ObjectRotation,
    ObjectRotationScale,
    ObjectPerspective,
}

impl TrackingDegrees {
    pub fn tracks_scale(&self) -> bool {
        matches!(
            self,
            TrackingDegrees::CameraScale
                | TrackingDegrees::CameraRotationScale
                | TrackingDegrees::ObjectScale
                | TrackingDegrees::ObjectRotationScale
        )
    }

    pub fn tracks_rotation(&self) -> bool {
        matches!(
            self,
            TrackingDegrees::CameraRotation
                | TrackingDegrees::CameraRotationScale
                | TrackingDegrees::ObjectRotation
                | TrackingDegrees::ObjectRotationScale
        )
    }

    /// The box is a quad warped by a homography
    ///
    pub fn is_perspective(&self) -> bool {
        matches!(
            self,
            TrackingDegrees::CameraPerspective | TrackingDegrees::ObjectPerspective
        )
    }

    /// Scale/rotation/perspective are estimated from the object's correspondences
    ///
    pub fn is_object_driven(&self) -> bool {
        matches!(
            self,
            TrackingDegrees::ObjectScale
                | TrackingDegrees::ObjectRotation
                | TrackingDegrees::ObjectRotationScale
                | TrackingDegrees::ObjectPerspective
        )
    }
}

/// RANSAC-like translation pass that down-weights vectors disagreeing with the dominant flow
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IrlsInitialization {
    pub activated: bool,
    pub rounds: usize,
    /// Maximum flow difference (normalized units) to agree with a hypothesis
    pub cutoff: f32,
}

impl Default for IrlsInitialization {
    fn default() -> Self {
        Self {
            activated: true,
            rounds: 50,
            cutoff: 0.005,
        }
    }
}

/// Cancels the track when the object looks occluded
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CancelTrackingWithOcclusionOptions {
    pub activated: bool,
    /// Minimum fraction of previous inliers that must continue
    pub min_motion_continuity: f32,
    /// Minimum inlier count relative to the recent maximum
    pub min_inlier_ratio: f32,
}

impl Default for CancelTrackingWithOcclusionOptions {
    fn default() -> Self {
        Self {
            activated: false,
            min_motion_continuity: 0.4,
            min_inlier_ratio: 0.1,
        }
    }
}

/// Pinhole intrinsics in normalized image coordinates with radial distortion `k0..k2`
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub k0: f32,
    pub k1: f32,
    pub k2: f32,
}

impl CameraIntrinsics {
    pub fn pinhole(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            k0: 0.0,
            k1: 0.0,
            k2: 0.0,
        }
    }

    pub fn distortion(mut self, k0: f32, k1: f32, k2: f32) -> Self {
        self.k0 = k0;
        self.k1 = k1;
        self.k2 = k2;
        self
    }

    pub fn has_distortion(&self) -> bool {
        self.k0 != 0.0 || self.k1 != 0.0 || self.k2 != 0.0
    }
}

/// Class that is used to configure a single tracking step of the box.
///
/// The options are immutable once the box is created; every setter consumes and returns the
/// options object.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStepOptions {
    pub(crate) tracking_degrees: TrackingDegrees,
    pub(crate) object_similarity_min_contd_inliers: usize,
    pub(crate) irls_iterations: usize,
    pub(crate) irls_initialization: IrlsInitialization,
    pub(crate) spatial_sigma: f32,
    pub(crate) min_motion_sigma: f32,
    pub(crate) relative_motion_sigma: f32,
    pub(crate) expansion_size: f32,
    pub(crate) low_kinetic_energy: f32,
    pub(crate) high_kinetic_energy: f32,
    pub(crate) motion_disparity_low_level: f32,
    pub(crate) motion_disparity_high_level: f32,
    pub(crate) background_discrimination_low_level: f32,
    pub(crate) background_discrimination_high_level: f32,
    pub(crate) inlier_low_weight: f32,
    pub(crate) inlier_high_weight: f32,
    pub(crate) prior_weight_increase: f32,
    pub(crate) kinetic_energy_decay: f32,
    pub(crate) velocity_update_weight: f32,
    pub(crate) inlier_spring_force: f32,
    pub(crate) inlier_center_relative_distance: f32,
    pub(crate) compute_spatial_prior: bool,
    pub(crate) spatial_prior_grid_size: usize,
    pub(crate) return_internal_state: bool,
    pub(crate) use_post_estimation_weights_for_state: bool,
    pub(crate) static_motion_temporal_ratio: f32,
    pub(crate) max_track_failures: usize,
    pub(crate) cancel_tracking_with_occlusion_options: CancelTrackingWithOcclusionOptions,
    pub(crate) camera_intrinsics: Option<CameraIntrinsics>,
    pub(crate) forced_pnp_tracking: bool,
    pub(crate) disparity_decay: f32,
    pub(crate) box_similarity_max_scale: f32,
    pub(crate) box_similarity_max_rotation: f32,
    pub(crate) quad_homography_max_scale: f32,
    pub(crate) quad_homography_max_rotation: f32,
}

impl Default for TrackStepOptions {
    fn default() -> Self {
        Self {
            tracking_degrees: TrackingDegrees::Translation,
            object_similarity_min_contd_inliers: 30,
            irls_iterations: 5,
            irls_initialization: IrlsInitialization::default(),
            spatial_sigma: 0.15,
            min_motion_sigma: 0.002,
            relative_motion_sigma: 0.3,
            expansion_size: 0.05,
            low_kinetic_energy: 0.001,
            high_kinetic_energy: 0.004,
            motion_disparity_low_level: 0.008,
            motion_disparity_high_level: 0.016,
            background_discrimination_low_level: 0.004,
            background_discrimination_high_level: 0.008,
            inlier_low_weight: 250.0,
            inlier_high_weight: 500.0,
            prior_weight_increase: 0.2,
            kinetic_energy_decay: 0.98,
            velocity_update_weight: 0.7,
            inlier_spring_force: 0.3,
            inlier_center_relative_distance: 0.1,
            compute_spatial_prior: false,
            spatial_prior_grid_size: 10,
            return_internal_state: false,
            use_post_estimation_weights_for_state: true,
            static_motion_temporal_ratio: 3e-3,
            max_track_failures: 10,
            cancel_tracking_with_occlusion_options: CancelTrackingWithOcclusionOptions::default(),
            camera_intrinsics: None,
            forced_pnp_tracking: false,
            disparity_decay: 0.8,
            box_similarity_max_scale: 1.05,
            box_similarity_max_rotation: 0.2,
            quad_homography_max_scale: 1.2,
            quad_homography_max_rotation: 0.3,
        }
    }
}

impl TrackStepOptions {
    /// Degrees of freedom the box follows
    ///
    pub fn tracking_degrees(mut self, degrees: TrackingDegrees) -> Self {
        self.tracking_degrees = degrees;
        self
    }

    /// The minimal number of inliers continued from the previous frame that is required to fit
    /// similarity or homography models. Below it the fit silently degrades to translation.
    ///
    pub fn object_similarity_min_contd_inliers(mut self, n: usize) -> Self {
        self.object_similarity_min_contd_inliers = n;
        self
    }

    /// Number of reweighting rounds of every robust solver
    ///
    pub fn irls_iterations(mut self, n: usize) -> Self {
        assert!(n > 0, "At least one IRLS iteration is required");
        self.irls_iterations = n;
        self
    }

    pub fn irls_initialization(mut self, init: IrlsInitialization) -> Self {
        assert!(init.cutoff > 0.0, "The cutoff is expected to be a positive float");
        self.irls_initialization = init;
        self
    }

    /// Lower bound for the spatial sigma (normalized units) of the prior weights. The sigma grows
    /// with the extent of the inliers observed in the previous frame.
    ///
    pub fn spatial_sigma(mut self, sigma: f32) -> Self {
        assert!(sigma > 0.0, "The sigma is expected to be a positive float");
        self.spatial_sigma = sigma;
        self
    }

    pub fn min_motion_sigma(mut self, sigma: f32) -> Self {
        assert!(sigma > 0.0, "The sigma is expected to be a positive float");
        self.min_motion_sigma = sigma;
        self
    }

    /// Expected motion noise relative to the box velocity
    ///
    pub fn relative_motion_sigma(mut self, sigma: f32) -> Self {
        assert!(sigma > 0.0, "The sigma is expected to be a positive float");
        self.relative_motion_sigma = sigma;
        self
    }

    /// Minimal expansion of the search window around the box
    ///
    pub fn expansion_size(mut self, size: f32) -> Self {
        assert!(size >= 0.0, "The expansion must not be negative");
        self.expansion_size = size;
        self
    }

    /// Kinetic energy range over which the box goes from static to moving
    ///
    pub fn kinetic_energy_levels(mut self, low: f32, high: f32) -> Self {
        assert!(low <= high, "The low level must not exceed the high level");
        self.low_kinetic_energy = low;
        self.high_kinetic_energy = high;
        self
    }

    pub fn motion_disparity_levels(mut self, low: f32, high: f32) -> Self {
        assert!(low <= high, "The low level must not exceed the high level");
        self.motion_disparity_low_level = low;
        self.motion_disparity_high_level = high;
        self
    }

    pub fn background_discrimination_levels(mut self, low: f32, high: f32) -> Self {
        assert!(low <= high, "The low level must not exceed the high level");
        self.background_discrimination_low_level = low;
        self.background_discrimination_high_level = high;
        self
    }

    /// Inverse IRLS sigma for moving (`low`) and static (`high`) boxes. Fitted weights are
    /// expressed in these units, a vector is an inlier when its final weight exceeds `0.5`.
    ///
    pub fn inlier_weights(mut self, low: f32, high: f32) -> Self {
        assert!(
            low > 0.0 && low <= high,
            "The weights must be positive with low <= high"
        );
        self.inlier_low_weight = low;
        self.inlier_high_weight = high;
        self
    }

    pub fn prior_weight_increase(mut self, increase: f32) -> Self {
        assert!((0.0..=1.0).contains(&increase));
        self.prior_weight_increase = increase;
        self
    }

    pub fn kinetic_energy_decay(mut self, decay: f32) -> Self {
        assert!((0.0..=1.0).contains(&decay));
        self.kinetic_energy_decay = decay;
        self
    }

    /// Weight of the measured velocity when it is blended with the previous one
    ///
    pub fn velocity_update_weight(mut self, weight: f32) -> Self {
        assert!((0.0..=1.0).contains(&weight));
        self.velocity_update_weight = weight;
        self
    }

    pub fn inlier_spring_force(mut self, force: f32) -> Self {
        assert!((0.0..=1.0).contains(&force));
        self.inlier_spring_force = force;
        self
    }

    /// Distance between the box center and the inlier center, relative to the box diagonal,
    /// beyond which the spring force pulls the box
    ///
    pub fn inlier_center_relative_distance(mut self, distance: f32) -> Self {
        assert!(distance >= 0.0);
        self.inlier_center_relative_distance = distance;
        self
    }

    pub fn compute_spatial_prior(mut self, compute: bool) -> Self {
        self.compute_spatial_prior = compute;
        self
    }

    pub fn spatial_prior_grid_size(mut self, size: usize) -> Self {
        assert!(size > 1, "The grid must have at least two cells per side");
        self.spatial_prior_grid_size = size;
        self
    }

    /// Keep the vectors and weights of every step in the produced states
    ///
    pub fn return_internal_state(mut self, keep: bool) -> Self {
        self.return_internal_state = keep;
        self
    }

    pub fn use_post_estimation_weights_for_state(mut self, use_post: bool) -> Self {
        self.use_post_estimation_weights_for_state = use_post;
        self
    }

    /// Velocity (normalized units per frame) below which the box is considered static
    ///
    pub fn static_motion_temporal_ratio(mut self, ratio: f32) -> Self {
        assert!(ratio >= 0.0);
        self.static_motion_temporal_ratio = ratio;
        self
    }

    /// Tracking is cancelled when `max_track_failures + 1` consecutive states fail
    ///
    pub fn max_track_failures(mut self, n: usize) -> Self {
        self.max_track_failures = n;
        self
    }

    pub fn cancel_tracking_with_occlusion_options(
        mut self,
        opts: CancelTrackingWithOcclusionOptions,
    ) -> Self {
        self.cancel_tracking_with_occlusion_options = opts;
        self
    }

    pub fn camera_intrinsics(mut self, intrinsics: CameraIntrinsics) -> Self {
        assert!(
            intrinsics.fx > 0.0 && intrinsics.fy > 0.0,
            "Focal lengths are expected to be positive"
        );
        self.camera_intrinsics = Some(intrinsics);
        self
    }

    pub fn forced_pnp_tracking(mut self, forced: bool) -> Self {
        self.forced_pnp_tracking = forced;
        self
    }

    pub fn disparity_decay(mut self, decay: f32) -> Self {
        assert!((0.0..=1.0).contains(&decay));
        self.disparity_decay = decay;
        self
    }

    /// Per-step limits of a similarity fit, scale is a factor `>= 1`, rotation is in radians
    ///
    pub fn box_similarity_limits(mut self, max_scale: f32, max_rotation: f32) -> Self {
        assert!(max_scale >= 1.0 && max_rotation >= 0.0);
        self.box_similarity_max_scale = max_scale;
        self.box_similarity_max_rotation = max_rotation;
        self
    }

    /// Per-step limits of a homography fit, beyond them the fit is rejected
    ///
    pub fn quad_homography_limits(mut self, max_scale: f32, max_rotation: f32) -> Self {
        assert!(max_scale >= 1.0 && max_rotation >= 0.0);
        self.quad_homography_max_scale = max_scale;
        self.quad_homography_max_rotation = max_rotation;
        self
    }

    pub fn get_tracking_degrees(&self) -> TrackingDegrees {
        self.tracking_degrees
    }

    pub fn get_max_track_failures(&self) -> usize {
        self.max_track_failures
    }

    pub fn get_camera_intrinsics(&self) -> Option<CameraIntrinsics> {
        self.camera_intrinsics
    }
}
