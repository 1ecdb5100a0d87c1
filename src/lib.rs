//! Single-object, frame-to-frame box tracking driven by sparse motion vectors.
//!
//! The central type is [`MotionBox`](crate::motion_box::MotionBox): it keeps the history of a
//! tracked region as a queue of [`BoxState`](crate::state::BoxState) records and advances it one
//! frame at a time from a [`MotionVectorFrame`](crate::motion::MotionVectorFrame).
//!
use thiserror::Error;

/// Sparse correspondences (motion vectors) and the per-frame camera model
pub mod motion;

/// Persisted snapshot of a tracked region
pub mod state;

/// Tracking configuration
pub mod options;

/// Robust (IRLS) motion model estimators
pub mod estimation;

/// Prior weights, inlier scoring, density and spatial prior grids
pub mod analysis;

/// Stateful per-object tracker and its bidirectional history queue
pub mod motion_box;

/// Driving many independent boxes over a thread pool
pub mod batch;

/// Geometry helpers
pub mod utils;

pub mod prelude;

#[cfg(test)]
pub(crate) mod test_stuff;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Errors {
    #[error("Model fit requires at least {required} correspondences, got {actual}.")]
    InsufficientCorrespondences { required: usize, actual: usize },
    #[error("Normal equations are singular - the model cannot be solved.")]
    SingularSystem,
    #[error("Box geometry is invalid: {0}")]
    InvalidGeometry(String),
    #[error("Quad is not convex.")]
    NonConvexQuad,
    #[error("Frame {0} is not trackable - it is outside the queue or its state was not tracked.")]
    FrameNotTrackable(i32),
    #[error("Perspective pose cannot be recovered from the correspondences.")]
    DegeneratePose,
    #[error("The box was never reset - the history queue is empty.")]
    EmptyQueue,
}

pub(crate) const EPS: f32 = 0.00001;

/// Approximate comparison with a tolerance
///
pub trait EstimateClose {
    fn almost_same(&self, other: &Self, eps: f32) -> bool;
}

/// Maps `value` to `[0, 1]`, `0` at or below `low` and `1` at or above `high`.
///
pub fn linear_ramp(value: f32, low: f32, high: f32) -> f32 {
    if high - low < EPS {
        return if value >= high { 1.0 } else { 0.0 };
    }
    ((value - low) / (high - low)).clamp(0.0, 1.0)
}
