use crate::utils::transform::{flow_at, invert, project, Homography};
use nalgebra::{Matrix3, Vector2};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Builder of motion vector frames from raw tracking data
pub mod frame_builder;

/// Track id used when the correspondence has no stable identity
pub const NO_TRACK_ID: i32 = -1;

/// Single point correspondence between two consecutive frames.
///
/// All coordinates are normalized so that the longer image side has the extent `1`.
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionVector {
    /// Location in the frame the box is tracked from
    pub pos: Vector2<f32>,
    /// Flow of the point with the camera induced displacement removed
    pub object: Vector2<f32>,
    /// Camera induced flow
    pub background: Vector2<f32>,
    pub track_id: i32,
}

impl Default for MotionVector {
    fn default() -> Self {
        Self {
            pos: Vector2::zeros(),
            object: Vector2::zeros(),
            background: Vector2::zeros(),
            track_id: NO_TRACK_ID,
        }
    }
}

impl MotionVector {
    pub fn new(pos: Vector2<f32>, object: Vector2<f32>, background: Vector2<f32>, track_id: i32) -> Self {
        Self {
            pos,
            object,
            background,
            track_id,
        }
    }

    /// Total flow (object and camera)
    ///
    pub fn motion(&self) -> Vector2<f32> {
        self.object + self.background
    }

    /// Where the point lands in the next frame
    ///
    pub fn match_location(&self) -> Vector2<f32> {
        self.pos + self.motion()
    }

    /// Where the point would land if only the object moved
    ///
    pub fn object_location(&self) -> Vector2<f32> {
        self.pos + self.object
    }

    pub fn has_track_id(&self) -> bool {
        self.track_id >= 0
    }

    fn lexicographic(&self, other: &Self) -> Ordering {
        self.pos
            .x
            .total_cmp(&other.pos.x)
            .then(self.pos.y.total_cmp(&other.pos.y))
    }
}

/// All correspondences of a frame together with the camera (background) model.
///
/// Vectors are kept sorted by `(x, y)` of their position, which is what allows the box to
/// select its candidates with a binary search over `x`.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FrameRecord")]
pub struct MotionVectorFrame {
    vectors: Vec<MotionVector>,
    pub background_model: Homography,
    pub valid_background_model: bool,
    pub is_duplicated: bool,
    pub is_chunk_boundary: bool,
    /// Frame width divided by frame height
    pub aspect_ratio: f32,
    pub duration_ms: f32,
}

/// Serialized form of [MotionVectorFrame], the ordering is restored when it is read back
///
#[derive(Deserialize)]
struct FrameRecord {
    vectors: Vec<MotionVector>,
    background_model: Homography,
    valid_background_model: bool,
    is_duplicated: bool,
    is_chunk_boundary: bool,
    aspect_ratio: f32,
    duration_ms: f32,
}

impl From<FrameRecord> for MotionVectorFrame {
    fn from(r: FrameRecord) -> Self {
        let mut frame = MotionVectorFrame::new(r.vectors, r.aspect_ratio);
        frame.background_model = r.background_model;
        frame.valid_background_model = r.valid_background_model;
        frame.is_duplicated = r.is_duplicated;
        frame.is_chunk_boundary = r.is_chunk_boundary;
        frame.duration_ms = r.duration_ms;
        frame
    }
}

impl Default for MotionVectorFrame {
    fn default() -> Self {
        Self {
            vectors: Vec::default(),
            background_model: Matrix3::identity(),
            valid_background_model: false,
            is_duplicated: false,
            is_chunk_boundary: false,
            aspect_ratio: 1.0,
            duration_ms: 0.0,
        }
    }
}

impl MotionVectorFrame {
    /// Creates the frame and establishes the `(x, y)` ordering of the vectors
    ///
    pub fn new(mut vectors: Vec<MotionVector>, aspect_ratio: f32) -> Self {
        vectors.sort_by(MotionVector::lexicographic);
        Self {
            vectors,
            aspect_ratio,
            ..Default::default()
        }
    }

    /// Sets the camera model. An invalid model is replaced by the identity.
    ///
    pub fn background_model(mut self, model: Homography, valid: bool) -> Self {
        self.valid_background_model = valid;
        self.background_model = if valid { model } else { Matrix3::identity() };
        self
    }

    pub fn duplicated(mut self, is_duplicated: bool) -> Self {
        self.is_duplicated = is_duplicated;
        self
    }

    pub fn chunk_boundary(mut self, is_chunk_boundary: bool) -> Self {
        self.is_chunk_boundary = is_chunk_boundary;
        self
    }

    pub fn duration_ms(mut self, duration_ms: f32) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn vectors(&self) -> &[MotionVector] {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Normalized extent of the frame, the longer side is `1`
    ///
    pub fn frame_extent(&self) -> Vector2<f32> {
        frame_extent(self.aspect_ratio)
    }

    /// Vectors whose `x` lies within `[x_min, x_max]`
    ///
    pub fn x_range(&self, x_min: f32, x_max: f32) -> &[MotionVector] {
        let start = self
            .vectors
            .partition_point(|v| v.pos.x.total_cmp(&x_min) == Ordering::Less);
        let end = self
            .vectors
            .partition_point(|v| v.pos.x.total_cmp(&x_max) != Ordering::Greater);
        if start >= end {
            &[]
        } else {
            &self.vectors[start..end]
        }
    }

    /// Camera induced displacement at `p`
    ///
    pub fn camera_flow_at(&self, p: &Vector2<f32>) -> Vector2<f32> {
        flow_at(&self.background_model, p)
    }

    /// The frame describing the motion in the opposite direction, used to track backwards.
    ///
    /// Every vector starts at its former match location; flows are negated and the camera
    /// model is inverted.
    ///
    pub fn invert(&self) -> Self {
        let inverse = if self.valid_background_model {
            invert(&self.background_model)
        } else {
            None
        };
        let valid = inverse.is_some();
        let model = inverse.unwrap_or_else(Matrix3::identity);
        let vectors = self
            .vectors
            .iter()
            .map(|v| {
                let pos = v.match_location();
                let background = if valid {
                    project(&model, &pos) - pos
                } else {
                    -v.background
                };
                MotionVector {
                    pos,
                    object: -v.motion() - background,
                    background,
                    track_id: v.track_id,
                }
            })
            .collect();

        MotionVectorFrame::new(vectors, self.aspect_ratio)
            .background_model(model, valid)
            .duplicated(self.is_duplicated)
            .chunk_boundary(self.is_chunk_boundary)
            .duration_ms(self.duration_ms)
    }
}

/// Normalized extent of a frame with the given aspect ratio (width / height)
///
pub fn frame_extent(aspect_ratio: f32) -> Vector2<f32> {
    if aspect_ratio >= 1.0 {
        Vector2::new(1.0, 1.0 / aspect_ratio)
    } else {
        Vector2::new(aspect_ratio, 1.0)
    }
}
