pub use crate::batch::track_step_all;
pub use crate::motion::frame_builder::{build_motion_vector_frame, TrackedFeature, TrackingData};
pub use crate::motion::{MotionVector, MotionVectorFrame};
pub use crate::motion_box::MotionBox;
pub use crate::options::{
    CameraIntrinsics, CancelTrackingWithOcclusionOptions, IrlsInitialization, TrackStepOptions,
    TrackingDegrees,
};
pub use crate::state::{BoxState, TrackStatus};
pub use crate::utils::quad::Quad;
pub use crate::Errors;
