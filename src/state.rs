use crate::motion::{frame_extent, MotionVector};
pub use crate::utils::quad::Quad;
use crate::{Errors, EstimateClose, EPS};
use anyhow::Result;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Version of the [BoxState] record layout
pub const BOX_STATE_VERSION: u32 = 1;

/// Boxes wider or taller than this (normalized units) are considered broken
pub const MAX_BOX_EXTENT: f32 = 10000.0;

const QUANT_MIN: f32 = -0.5;
const QUANT_RANGE: f32 = 2.0;
const QUANT_LEVELS: f32 = 65535.0;

/// Outcome of the last tracking step for the state.
///
/// The order matters: everything at or above [TrackStatus::BoxTracked] is a successful step.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum TrackStatus {
    /// Tracking ceased, the owner must stop stepping the box
    #[default]
    BoxUntracked,
    /// Degenerate box geometry
    BoxEmpty,
    /// No usable correspondences in the search window
    BoxNoFeatures,
    BoxTracked,
    /// The frame was a duplicate, the state is a verbatim copy
    BoxDuplicated,
    /// Static box moved by the camera model only
    BoxTrackedOutOfBound,
}

impl TrackStatus {
    pub fn is_successful(&self) -> bool {
        *self >= TrackStatus::BoxTracked
    }
}

/// Vectors and weights that produced a state
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternalState {
    pub vectors: Vec<MotionVector>,
    pub weights: Vec<f32>,
}

/// Snapshot of a tracked region at one frame.
///
/// The geometry is a rotated rectangle unless `quad` is set. `pos_x`, `pos_y`, `width` and
/// `height` describe the unscaled, unrotated box; `scale` and `rotation` are applied about its
/// center, so the tracked extent is `width * scale` by `height * scale` around
/// `pos + size / 2`. When `quad` is set it is authoritative and the rectangle fields hold its
/// axis-aligned bounds.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxState {
    pub version: u32,
    pub pos_x: f32,
    pub pos_y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
    pub scale: f32,
    #[serde(default)]
    pub quad: Option<Quad>,

    pub dx: f32,
    pub dy: f32,
    pub kinetic_energy: f32,
    pub prior_weight: f32,

    pub inlier_ids: Vec<i32>,
    pub inlier_length: Vec<u32>,
    pub inlier_match_pos: Vec<u32>,
    pub outlier_ids: Vec<i32>,
    pub outlier_match_pos: Vec<u32>,

    pub inlier_center_x: f32,
    pub inlier_center_y: f32,
    pub inlier_width: f32,
    pub inlier_height: f32,

    pub spatial_prior: Vec<f32>,
    pub spatial_confidence: Vec<f32>,

    pub track_status: TrackStatus,
    pub motion_disparity: f32,
    pub tracking_confidence: f32,
    pub background_discrimination: f32,

    #[serde(default)]
    pub pnp_homography: Option<[f32; 9]>,
    /// Width over height of the planar object tracked in perspective mode
    #[serde(default)]
    pub aspect_ratio: Option<f32>,
    #[serde(default)]
    pub frame_aspect_ratio: Option<f32>,
    #[serde(default)]
    pub frame_duration_ms: Option<f32>,

    #[serde(default)]
    pub internal: Option<InternalState>,
}

impl Default for BoxState {
    fn default() -> Self {
        Self {
            version: BOX_STATE_VERSION,
            pos_x: 0.0,
            pos_y: 0.0,
            width: 0.0,
            height: 0.0,
            rotation: 0.0,
            scale: 1.0,
            quad: None,
            dx: 0.0,
            dy: 0.0,
            kinetic_energy: 0.0,
            prior_weight: 0.0,
            inlier_ids: Vec::default(),
            inlier_length: Vec::default(),
            inlier_match_pos: Vec::default(),
            outlier_ids: Vec::default(),
            outlier_match_pos: Vec::default(),
            inlier_center_x: 0.0,
            inlier_center_y: 0.0,
            inlier_width: 0.0,
            inlier_height: 0.0,
            spatial_prior: Vec::default(),
            spatial_confidence: Vec::default(),
            track_status: TrackStatus::BoxUntracked,
            motion_disparity: 0.0,
            tracking_confidence: 0.0,
            background_discrimination: 0.0,
            pnp_homography: None,
            aspect_ratio: None,
            frame_aspect_ratio: None,
            frame_duration_ms: None,
            internal: None,
        }
    }
}

impl BoxState {
    /// Axis aligned box with the top-left corner at `(pos_x, pos_y)`
    ///
    pub fn new(pos_x: f32, pos_y: f32, width: f32, height: f32) -> Self {
        let mut state = Self {
            pos_x,
            pos_y,
            width,
            height,
            ..Default::default()
        };
        state.inlier_center_x = pos_x + width / 2.0;
        state.inlier_center_y = pos_y + height / 2.0;
        state
    }

    /// Box described by an explicit quad
    ///
    pub fn from_quad(quad: Quad) -> Self {
        let mut state = Self::default();
        state.set_quad(quad);
        let c = quad.center();
        state.inlier_center_x = c.x;
        state.inlier_center_y = c.y;
        state
    }

    pub fn rotate(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_velocity(mut self, dx: f32, dy: f32) -> Self {
        self.dx = dx;
        self.dy = dy;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: f32) -> Self {
        self.aspect_ratio = Some(aspect_ratio);
        self
    }

    /// Replaces the geometry with the quad and refreshes the rectangle fields from its bounds
    ///
    pub fn set_quad(&mut self, quad: Quad) {
        let (lo, hi) = quad.bounds();
        self.pos_x = lo.x;
        self.pos_y = lo.y;
        self.width = hi.x - lo.x;
        self.height = hi.y - lo.y;
        self.scale = 1.0;
        self.rotation = 0.0;
        self.quad = Some(quad);
    }

    /// Extent of the box after scaling
    ///
    pub fn scaled_size(&self) -> Vector2<f32> {
        Vector2::new(self.width * self.scale, self.height * self.scale)
    }

    pub fn center(&self) -> Vector2<f32> {
        match &self.quad {
            Some(q) => q.center(),
            None => Vector2::new(self.pos_x + self.width / 2.0, self.pos_y + self.height / 2.0),
        }
    }

    /// Moves the box so that its center lands on `center`
    ///
    pub fn set_center(&mut self, center: Vector2<f32>) {
        let shift = center - self.center();
        self.translate(&shift);
    }

    pub fn translate(&mut self, shift: &Vector2<f32>) {
        self.pos_x += shift.x;
        self.pos_y += shift.y;
        if let Some(q) = &mut self.quad {
            q.vertices.iter_mut().for_each(|v| *v += shift);
        }
    }

    pub fn velocity(&self) -> Vector2<f32> {
        Vector2::new(self.dx, self.dy)
    }

    pub fn inlier_center(&self) -> Vector2<f32> {
        Vector2::new(self.inlier_center_x, self.inlier_center_y)
    }

    /// Corners of the region
    ///
    pub fn corners(&self) -> Quad {
        match &self.quad {
            Some(q) => *q,
            None => {
                let size = self.scaled_size();
                Quad::from_rotated_rect(self.center(), size.x, size.y, self.rotation)
            }
        }
    }

    /// Whether the search window needs oriented half-plane tests in addition to bounds
    ///
    pub fn is_oriented(&self) -> bool {
        self.quad.is_some() || self.rotation.abs() > EPS
    }

    pub fn diagonal(&self) -> f32 {
        match &self.quad {
            Some(q) => q.diagonal(),
            None => self.scaled_size().norm(),
        }
    }

    pub fn num_inliers(&self) -> usize {
        self.inlier_ids.len()
    }

    /// Checks the geometry, distinguishing a broken box from an empty one.
    ///
    /// Returns [Errors::InvalidGeometry] or [Errors::NonConvexQuad] for boxes that cannot be
    /// tracked any further, and `Ok(false)` for boxes that are merely degenerate (empty).
    ///
    pub fn validate_geometry(&self) -> Result<bool> {
        let size = self.scaled_size();
        let fields = [self.pos_x, self.pos_y, size.x, size.y, self.rotation];
        if fields.iter().any(|f| !f.is_finite()) {
            return Err(Errors::InvalidGeometry("non-finite box fields".into()).into());
        }
        if size.x.abs() >= MAX_BOX_EXTENT || size.y.abs() >= MAX_BOX_EXTENT {
            return Err(Errors::InvalidGeometry(format!(
                "box extent {}x{} exceeds the limit",
                size.x, size.y
            ))
            .into());
        }
        if let Some(q) = &self.quad {
            if !q.is_finite() {
                return Err(Errors::InvalidGeometry("non-finite quad".into()).into());
            }
            if q.is_collapsed() {
                return Ok(false);
            }
            if !q.is_convex() {
                return Err(Errors::NonConvexQuad.into());
            }
            if q.area() < EPS * EPS {
                return Ok(false);
            }
        }
        Ok(size.x > EPS && size.y > EPS)
    }

    /// Rescales every position dependent field from one frame aspect ratio to another
    ///
    pub fn scale_aspect(&mut self, from: f32, to: f32) {
        let ratio = frame_extent(to).component_div(&frame_extent(from));
        let scale = |p: Vector2<f32>| p.component_mul(&ratio);

        let top_left = scale(Vector2::new(self.pos_x, self.pos_y));
        let size = scale(Vector2::new(self.width, self.height));
        let velocity = scale(self.velocity());
        let inlier_center = scale(self.inlier_center());
        let inlier_size = scale(Vector2::new(self.inlier_width, self.inlier_height));

        self.pos_x = top_left.x;
        self.pos_y = top_left.y;
        self.width = size.x;
        self.height = size.y;
        self.dx = velocity.x;
        self.dy = velocity.y;
        self.inlier_center_x = inlier_center.x;
        self.inlier_center_y = inlier_center.y;
        self.inlier_width = inlier_size.x;
        self.inlier_height = inlier_size.y;
        if let Some(q) = &mut self.quad {
            q.vertices.iter_mut().for_each(|v| *v = scale(*v));
        }
        self.frame_aspect_ratio = Some(to);
    }

    /// Clears everything learned about inliers and outliers
    ///
    pub fn clear_inlier_records(&mut self) {
        self.inlier_ids.clear();
        self.inlier_length.clear();
        self.inlier_match_pos.clear();
        self.outlier_ids.clear();
        self.outlier_match_pos.clear();
    }
}

impl EstimateClose for BoxState {
    /// Compares geometry and velocity
    ///
    fn almost_same(&self, other: &Self, eps: f32) -> bool {
        let quads_close = match (&self.quad, &other.quad) {
            (Some(l), Some(r)) => l
                .vertices
                .iter()
                .zip(r.vertices.iter())
                .all(|(a, b)| (a - b).norm() < eps),
            (None, None) => true,
            _ => false,
        };
        quads_close
            && (self.pos_x - other.pos_x).abs() < eps
            && (self.pos_y - other.pos_y).abs() < eps
            && (self.width - other.width).abs() < eps
            && (self.height - other.height).abs() < eps
            && (self.rotation - other.rotation).abs() < eps
            && (self.scale - other.scale).abs() < eps
            && (self.dx - other.dx).abs() < eps
            && (self.dy - other.dy).abs() < eps
    }
}

/// Packs a position into 16-bit fixed point per coordinate (`x` in the high half).
///
pub fn quantize_position(p: &Vector2<f32>) -> u32 {
    let q = |v: f32| {
        let n = ((v - QUANT_MIN) / QUANT_RANGE).clamp(0.0, 1.0);
        (n * QUANT_LEVELS).round() as u32
    };
    (q(p.x) << 16) | q(p.y)
}

pub fn dequantize_position(packed: u32) -> Vector2<f32> {
    let d = |q: u32| (q as f32) / QUANT_LEVELS * QUANT_RANGE + QUANT_MIN;
    Vector2::new(d(packed >> 16), d(packed & 0xffff))
}

#[cfg(test)]
mod tests {
    use crate::motion::MotionVector;
    use crate::state::{
        dequantize_position, quantize_position, BoxState, InternalState, TrackStatus,
    };
    use crate::utils::quad::Quad;
    use crate::{Errors, EstimateClose, EPS};
    use nalgebra::Vector2;

    #[test]
    fn status_order() {
        assert!(TrackStatus::BoxTracked.is_successful());
        assert!(TrackStatus::BoxDuplicated.is_successful());
        assert!(TrackStatus::BoxTrackedOutOfBound.is_successful());
        assert!(!TrackStatus::BoxNoFeatures.is_successful());
        assert!(!TrackStatus::BoxEmpty.is_successful());
        assert!(!TrackStatus::BoxUntracked.is_successful());
    }

    #[test]
    fn quantization() {
        let p = Vector2::new(0.123, 0.987);
        let back = dequantize_position(quantize_position(&p));
        assert!((back - p).norm() < 1e-4);

        let far = dequantize_position(quantize_position(&Vector2::new(-3.0, 7.0)));
        assert!((far - Vector2::new(-0.5, 1.5)).norm() < EPS);
    }

    #[test]
    fn geometry_validation() {
        let state = BoxState::new(0.4, 0.4, 0.2, 0.2);
        assert!(state.validate_geometry().unwrap());

        let empty = BoxState::new(0.4, 0.4, 0.0, 0.2);
        assert!(!empty.validate_geometry().unwrap());

        let huge = BoxState::new(0.4, 0.4, 20000.0, 0.2);
        let err = huge.validate_geometry().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::InvalidGeometry(_))
        ));

        let bow_tie = BoxState::from_quad(Quad::new([
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 1.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(0.0, 1.0),
        ]));
        let err = bow_tie.validate_geometry().unwrap_err();
        assert_eq!(err.downcast_ref::<Errors>(), Some(&Errors::NonConvexQuad));
    }

    #[test]
    fn scale_applies_about_the_center() {
        let state = BoxState::new(0.4, 0.4, 0.2, 0.1).with_scale(2.0);
        assert!((state.center() - Vector2::new(0.5, 0.45)).norm() < EPS);
        let corners = state.corners();
        assert!((corners.center() - state.center()).norm() < EPS);
        let (lo, hi) = corners.bounds();
        assert!((lo - Vector2::new(0.3, 0.35)).norm() < EPS);
        assert!((hi - Vector2::new(0.7, 0.55)).norm() < EPS);
    }

    #[test]
    fn quad_is_authoritative() {
        let quad = Quad::from_rotated_rect(Vector2::new(0.5, 0.5), 0.2, 0.2, 0.0);
        let mut state = BoxState::from_quad(quad);
        assert!((state.pos_x - 0.4).abs() < EPS);
        assert!((state.width - 0.2).abs() < EPS);
        assert!(state.is_oriented());

        state.translate(&Vector2::new(0.1, 0.0));
        assert!((state.corners().vertices[0] - Vector2::new(0.5, 0.4)).norm() < EPS);
        assert!((state.center() - Vector2::new(0.6, 0.5)).norm() < EPS);
    }

    #[test]
    fn aspect_rescaling() {
        let mut state = BoxState::new(0.4, 0.2, 0.2, 0.1).with_velocity(0.01, 0.01);
        // 2:1 frame becomes 1:1, y extent doubles
        state.scale_aspect(2.0, 1.0);
        assert!((state.pos_y - 0.4).abs() < EPS);
        assert!((state.height - 0.2).abs() < EPS);
        assert!((state.dy - 0.02).abs() < EPS);
        assert!((state.pos_x - 0.4).abs() < EPS);
        assert_eq!(state.frame_aspect_ratio, Some(1.0));
    }

    #[test]
    fn close_estimate() {
        let a = BoxState::new(0.4, 0.4, 0.2, 0.2);
        let mut b = a.clone();
        b.pos_x += 1e-6;
        assert!(a.almost_same(&b, 1e-4));
        b.dx = 0.1;
        assert!(!a.almost_same(&b, 1e-4));
    }

    #[test]
    fn record_round_trip() {
        let mut state = BoxState::new(0.4, 0.4, 0.2, 0.2)
            .rotate(0.1)
            .with_velocity(0.01, -0.02)
            .with_aspect_ratio(1.5);
        state.track_status = TrackStatus::BoxTrackedOutOfBound;
        state.inlier_ids = vec![1, 5, 9];
        state.inlier_length = vec![1, 2, 3];
        state.inlier_match_pos = vec![quantize_position(&Vector2::new(0.5, 0.5)); 3];
        state.outlier_ids = vec![4];
        state.outlier_match_pos = vec![quantize_position(&Vector2::new(0.45, 0.41))];
        state.spatial_prior = vec![0.25; 4];
        state.spatial_confidence = vec![0.5; 4];
        state.pnp_homography = Some([1.0, 0.0, 0.1, 0.0, 1.0, 0.2, 0.0, 0.0, 1.0]);
        state.quad = Some(Quad::from_rotated_rect(Vector2::new(0.5, 0.5), 0.2, 0.2, 0.1));
        state.motion_disparity = -0.3;
        state.tracking_confidence = 0.7;
        state.internal = Some(InternalState {
            vectors: vec![MotionVector::new(
                Vector2::new(0.5, 0.5),
                Vector2::new(0.01, 0.0),
                Vector2::new(0.0, 0.001),
                3,
            )],
            weights: vec![1.0],
        });

        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: BoxState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, state);
    }
}
