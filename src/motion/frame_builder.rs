use crate::motion::{MotionVector, MotionVectorFrame, NO_TRACK_ID};
use crate::utils::transform::{flow_at, Homography};
use crate::EPS;
use nalgebra::{Matrix3, Vector2};

/// Feature tracked between two frames, in pixels
///
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackedFeature {
    pub x: f32,
    pub y: f32,
    /// Total displacement to the next frame
    pub dx: f32,
    pub dy: f32,
    pub track_id: Option<i32>,
}

/// Raw per-frame output of a feature tracker
///
#[derive(Debug, Clone)]
pub struct TrackingData {
    pub frame_width: u32,
    pub frame_height: u32,
    pub features: Vec<TrackedFeature>,
    /// Camera model expressed in normalized coordinates
    pub background_model: Homography,
    pub valid_background_model: bool,
    pub is_duplicated: bool,
    pub is_chunk_boundary: bool,
    pub duration_ms: f32,
}

impl Default for TrackingData {
    fn default() -> Self {
        Self {
            frame_width: 1,
            frame_height: 1,
            features: Vec::default(),
            background_model: Matrix3::identity(),
            valid_background_model: false,
            is_duplicated: false,
            is_chunk_boundary: false,
            duration_ms: 0.0,
        }
    }
}

/// Converts raw tracking data to the form consumed by the box tracker.
///
/// Coordinates are divided by the longer frame side, the background flow is taken from the
/// camera model (identity when the model is invalid) and the object flow is whatever remains
/// of the total flow.
///
pub fn build_motion_vector_frame(data: &TrackingData) -> MotionVectorFrame {
    let width = data.frame_width.max(1) as f32;
    let height = data.frame_height.max(1) as f32;
    let norm = 1.0 / width.max(height);
    let model = if data.valid_background_model {
        data.background_model
    } else {
        Matrix3::identity()
    };

    let vectors = data
        .features
        .iter()
        .filter(|f| f.x.is_finite() && f.y.is_finite() && f.dx.is_finite() && f.dy.is_finite())
        .map(|f| {
            let pos = Vector2::new(f.x * norm, f.y * norm);
            let total = Vector2::new(f.dx * norm, f.dy * norm);
            let background = flow_at(&model, &pos);
            MotionVector {
                pos,
                object: total - background,
                background,
                track_id: f.track_id.unwrap_or(NO_TRACK_ID),
            }
        })
        .collect();

    MotionVectorFrame::new(vectors, width / height.max(EPS))
        .background_model(model, data.valid_background_model)
        .duplicated(data.is_duplicated)
        .chunk_boundary(data.is_chunk_boundary)
        .duration_ms(data.duration_ms)
}
