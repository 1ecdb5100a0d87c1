use crate::motion::{MotionVector, MotionVectorFrame};
use crate::motion_box::MotionBox;
use crate::options::{CameraIntrinsics, TrackStepOptions, TrackingDegrees};
use crate::state::{BoxState, Quad, TrackStatus};
use crate::test_stuff::{translating_frame, vectors_in_box, FlowGen};
use crate::utils::transform::Similarity2;
use nalgebra::{Matrix3, Vector2};

fn five_vectors() -> MotionVectorFrame {
    let vectors = [(0.45, 0.45), (0.45, 0.55), (0.5, 0.5), (0.55, 0.45), (0.55, 0.55)]
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| {
            MotionVector::new(
                Vector2::new(x, y),
                Vector2::new(0.01, 0.0),
                Vector2::zeros(),
                i as i32,
            )
        })
        .collect();
    MotionVectorFrame::new(vectors, 1.0)
}

#[test]
fn reset_without_steps() {
    let _ = env_logger::try_init();
    let mut mb = MotionBox::new(TrackStepOptions::default());
    mb.reset_at_frame(42, BoxState::new(0.4, 0.4, 0.2, 0.2));
    assert_eq!(mb.len(), 1);
    assert_eq!(mb.start_frame().unwrap(), 42);
    assert_eq!(
        mb.state_at_frame(42).unwrap().track_status,
        TrackStatus::BoxTracked
    );
}

#[test]
fn five_vector_translation() {
    let _ = env_logger::try_init();
    let mut mb = MotionBox::with_verbosity(TrackStepOptions::default(), 2);
    mb.reset_at_frame(0, BoxState::new(0.4, 0.4, 0.2, 0.2));

    assert!(mb.track_step(0, &five_vectors(), true).unwrap());
    let next = mb.state_at_frame(1).unwrap();
    assert_eq!(next.track_status, TrackStatus::BoxTracked);
    assert!((next.dx - 0.01).abs() < 1e-4);
    assert!(next.dy.abs() < 1e-4);
    assert!((next.pos_x - 0.41).abs() < 1e-4);
    assert!((next.pos_y - 0.4).abs() < 1e-4);
    assert!((next.width - 0.2).abs() < 1e-6);
    assert_eq!(next.inlier_ids.len(), 5);
    assert!(next.motion_disparity.abs() < 1.0);
    assert!((next.prior_weight - 0.2).abs() < 1e-6);
}

#[test]
fn repeated_failures_cancel_tracking() {
    let _ = env_logger::try_init();
    let failures = 3;
    let opts = TrackStepOptions::default().max_track_failures(failures);
    let mut mb = MotionBox::with_verbosity(opts, 1);
    let mut initial = BoxState::new(0.1, 0.4, 0.2, 0.2);
    initial.prior_weight = 1.0;
    mb.reset_at_frame(0, initial);

    for step in 0..=failures {
        let frame_no = step as i32;
        let state = mb.state_at_frame(frame_no).unwrap().clone();
        let frame = translating_frame(&state, 0.05, 0.0, 25);
        let ok = mb.track_step(frame_no, &frame, true).unwrap();
        let next = mb.state_at_frame(frame_no + 1).unwrap();
        assert!(next.motion_disparity.abs() * next.prior_weight > 0.8);
        if step < failures {
            assert!(ok, "cancelled early at step {}", step + 1);
            assert_eq!(next.track_status, TrackStatus::BoxTracked);
        } else {
            assert!(!ok);
            assert_eq!(next.track_status, TrackStatus::BoxUntracked);
        }
    }
    assert!(!mb.trackable_from_frame(failures as i32 + 1));
}

#[test]
fn static_box_without_features_follows_camera() {
    let _ = env_logger::try_init();
    let mut mb = MotionBox::new(TrackStepOptions::default());
    let initial = BoxState::new(0.3, 0.3, 0.2, 0.1).rotate(0.1);
    mb.reset_at_frame(0, initial.clone());

    let frame = MotionVectorFrame::new(vec![], 1.0).background_model(Matrix3::identity(), true);
    assert!(mb.track_step(0, &frame, true).unwrap());
    let next = mb.state_at_frame(1).unwrap();
    assert_eq!(next.track_status, TrackStatus::BoxTrackedOutOfBound);
    assert_eq!(next.width, initial.width);
    assert_eq!(next.height, initial.height);
    assert!((next.scale - initial.scale).abs() < 1e-5);
    assert!((next.rotation - initial.rotation).abs() < 1e-5);
    assert!((next.center() - initial.center()).norm() < 1e-5);
}

#[test]
fn moving_box_without_features_is_retryable() {
    let _ = env_logger::try_init();
    let mut mb = MotionBox::new(TrackStepOptions::default());
    mb.reset_at_frame(0, BoxState::new(0.3, 0.3, 0.2, 0.2).with_velocity(0.02, 0.0));
    let empty = MotionVectorFrame::new(vec![], 1.0);
    assert!(!mb.track_step(0, &empty, true).unwrap());
    assert_eq!(
        mb.state_at_frame(1).unwrap().track_status,
        TrackStatus::BoxNoFeatures
    );
    // the failed state cannot be tracked from, the one before it still can
    assert!(!mb.trackable_from_frame(1));
    let state = mb.state_at_frame(0).unwrap().clone();
    assert!(mb.track_step(0, &translating_frame(&state, 0.02, 0.0, 25), true).unwrap());
}

#[test]
fn noisy_sequence_with_outliers() {
    let _ = env_logger::try_init();
    let flow = Vector2::new(0.004, 0.002);
    let initial = BoxState::new(0.2, 0.3, 0.2, 0.2);
    let mut mb = MotionBox::new(TrackStepOptions::default());
    mb.reset_at_frame(0, initial.clone());

    let frames = FlowGen::new(&initial, flow, 40, 8, 0.0005).take(20);
    for (f, frame) in frames.enumerate() {
        assert!(mb.track_step(f as i32, &frame, true).unwrap(), "step {}", f);
    }
    let last = mb.state_at_frame(20).unwrap();
    let expected = initial.center() + flow * 20.0;
    assert!((last.center() - expected).norm() < 0.01);
    assert!((last.velocity() - flow).norm() < 0.001);
    assert!(last.tracking_confidence > 0.9);
}

#[test]
fn backward_tracking_with_inverted_frames() {
    let _ = env_logger::try_init();
    let flow = Vector2::new(0.01, 0.0);
    let start = BoxState::new(0.3, 0.3, 0.2, 0.2);

    let mut forward_frames = Vec::default();
    let mut state = start.clone();
    for _ in 0..3 {
        forward_frames.push(translating_frame(&state, flow.x, flow.y, 25));
        state.translate(&flow);
    }

    let mut mb = MotionBox::new(TrackStepOptions::default());
    mb.reset_at_frame(3, state.clone());
    for f in (1..=3).rev() {
        let frame = forward_frames[f as usize - 1].invert();
        assert!(mb.track_step(f, &frame, false).unwrap());
    }
    assert_eq!(mb.start_frame().unwrap(), 0);
    let first = mb.state_at_frame(0).unwrap();
    assert!((first.pos_x - start.pos_x).abs() < 1e-3);
    assert!(first.dx < 0.0);
}

#[test]
fn object_rotation_and_scale() {
    let _ = env_logger::try_init();
    let opts = TrackStepOptions::default()
        .tracking_degrees(TrackingDegrees::ObjectRotationScale)
        .object_similarity_min_contd_inliers(10);
    let mut mb = MotionBox::new(opts);
    mb.reset_at_frame(0, BoxState::new(0.4, 0.4, 0.2, 0.2));

    for f in 0..4 {
        let state = mb.state_at_frame(f).unwrap().clone();
        let motion = Similarity2::from_scale_rotation(1.01, 0.02, Vector2::zeros());
        let center = state.center();
        let vectors = vectors_in_box(&state, Vector2::zeros(), 25)
            .into_iter()
            .map(|mut v| {
                v.object = motion.apply(&(v.pos - center)) + center - v.pos;
                v
            })
            .collect();
        let frame = MotionVectorFrame::new(vectors, 1.0);
        assert!(mb.track_step(f, &frame, true).unwrap());
    }
    let last = mb.state_at_frame(4).unwrap();
    // the first step has no continued inliers and fits a translation only
    assert!((last.rotation - 0.06).abs() < 5e-3);
    assert!((last.scale - 1.01f32.powi(3)).abs() < 5e-3);
}

#[test]
fn homography_tracks_quad() {
    let _ = env_logger::try_init();
    let opts = TrackStepOptions::default()
        .tracking_degrees(TrackingDegrees::ObjectPerspective)
        .object_similarity_min_contd_inliers(10);
    let mut mb = MotionBox::new(opts);
    mb.reset_at_frame(0, BoxState::new(0.4, 0.4, 0.2, 0.2));

    for f in 0..3 {
        let state = mb.state_at_frame(f).unwrap().clone();
        let frame = translating_frame(&state, 0.005, 0.005, 36);
        assert!(mb.track_step(f, &frame, true).unwrap());
    }
    let last = mb.state_at_frame(3).unwrap();
    let quad = last.quad.unwrap();
    assert!(quad.is_convex());
    assert!((quad.center() - Vector2::new(0.515, 0.515)).norm() < 1e-3);
    assert!((quad.area() - 0.04).abs() < 1e-3);
}

#[test]
fn perspective_tracking() {
    let _ = env_logger::try_init();
    let opts = TrackStepOptions::default()
        .tracking_degrees(TrackingDegrees::ObjectPerspective)
        .camera_intrinsics(CameraIntrinsics::pinhole(1.0, 1.0, 0.5, 0.5));
    let mut mb = MotionBox::new(opts);
    mb.reset_at_frame(0, BoxState::new(0.4, 0.4, 0.2, 0.2));

    for f in 0..3 {
        let state = mb.state_at_frame(f).unwrap().clone();
        let frame = translating_frame(&state, 0.01, 0.0, 25);
        assert!(mb.track_step(f, &frame, true).unwrap());
    }
    let last = mb.state_at_frame(3).unwrap();
    assert!(last.pnp_homography.is_some());
    assert_eq!(last.aspect_ratio, Some(1.0));
    let quad = last.quad.unwrap();
    assert!((quad.center() - Vector2::new(0.53, 0.5)).norm() < 1e-3);
}

#[test]
fn perspective_cancels_on_starvation() {
    let _ = env_logger::try_init();
    let opts = TrackStepOptions::default().forced_pnp_tracking(true);
    let mut mb = MotionBox::new(opts);
    let state = BoxState::new(0.4, 0.4, 0.2, 0.2).with_velocity(0.02, 0.0);
    mb.reset_at_frame(0, state.clone());
    let frame = translating_frame(&state, 0.02, 0.0, 1);
    assert!(!mb.track_step(0, &frame, true).unwrap());
    assert_eq!(
        mb.state_at_frame(1).unwrap().track_status,
        TrackStatus::BoxUntracked
    );
}

#[test]
fn static_perspective_box_does_not_fall_back_to_camera() {
    let _ = env_logger::try_init();
    let opts = TrackStepOptions::default().forced_pnp_tracking(true);
    let mut mb = MotionBox::new(opts);
    let state = BoxState::new(0.4, 0.4, 0.2, 0.2);
    mb.reset_at_frame(0, state.clone());
    let grid = vectors_in_box(&state, Vector2::zeros(), 4);
    for n in 1..4 {
        let frame = MotionVectorFrame::new(grid[..n].to_vec(), 1.0)
            .background_model(Matrix3::identity(), true);
        assert!(!mb.track_step(0, &frame, true).unwrap());
        assert_eq!(
            mb.state_at_frame(1).unwrap().track_status,
            TrackStatus::BoxUntracked
        );
    }

    // without any vectors the camera model still carries the box
    let empty = MotionVectorFrame::new(vec![], 1.0).background_model(Matrix3::identity(), true);
    assert!(mb.track_step(0, &empty, true).unwrap());
    assert_eq!(
        mb.state_at_frame(1).unwrap().track_status,
        TrackStatus::BoxTrackedOutOfBound
    );
}

#[test]
fn self_intersecting_quad_is_untracked() {
    let _ = env_logger::try_init();
    let mut mb = MotionBox::new(TrackStepOptions::default());
    mb.reset_at_frame(
        0,
        BoxState::from_quad(Quad::new([
            Vector2::new(0.3, 0.3),
            Vector2::new(0.5, 0.5),
            Vector2::new(0.5, 0.3),
            Vector2::new(0.3, 0.5),
        ])),
    );
    let empty = MotionVectorFrame::new(vec![], 1.0);
    assert!(!mb.track_step(0, &empty, true).unwrap());
    assert_eq!(
        mb.state_at_frame(1).unwrap().track_status,
        TrackStatus::BoxUntracked
    );
}

#[test]
fn occlusion_cancels_tracking() {
    let _ = env_logger::try_init();
    let opts = TrackStepOptions::default().cancel_tracking_with_occlusion_options(
        crate::options::CancelTrackingWithOcclusionOptions {
            activated: true,
            ..Default::default()
        },
    );
    let mut mb = MotionBox::new(opts);
    mb.reset_at_frame(0, BoxState::new(0.4, 0.4, 0.2, 0.2));
    let state = mb.state_at_frame(0).unwrap().clone();
    assert!(mb.track_step(0, &translating_frame(&state, 0.002, 0.0, 25), true).unwrap());

    // the object disappears, what remains are anonymous vectors moving elsewhere
    let state = mb.state_at_frame(1).unwrap().clone();
    let vectors = vectors_in_box(&state, Vector2::new(0.002, 0.0), 25)
        .into_iter()
        .map(|mut v| {
            v.track_id += 1000;
            v
        })
        .collect();
    let frame = MotionVectorFrame::new(vectors, 1.0);
    assert!(!mb.track_step(1, &frame, true).unwrap());
    assert_eq!(
        mb.state_at_frame(2).unwrap().track_status,
        TrackStatus::BoxUntracked
    );
}

#[test]
fn serialized_history_round_trip() {
    let mut mb = MotionBox::new(TrackStepOptions::default().return_internal_state(true));
    mb.reset_at_frame(0, BoxState::new(0.4, 0.4, 0.2, 0.2));
    let state = mb.state_at_frame(0).unwrap().clone();
    mb.track_step(0, &translating_frame(&state, 0.01, 0.0, 16), true)
        .unwrap();
    let state = mb.state_at_frame(1).unwrap();
    let encoded = serde_json::to_string(state).unwrap();
    let decoded: BoxState = serde_json::from_str(&encoded).unwrap();
    assert_eq!(&decoded, state);
}
