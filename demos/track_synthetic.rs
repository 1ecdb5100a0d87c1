use motionbox::prelude::*;
use nalgebra::Matrix3;

/// Features on a regular grid inside the pixel rectangle, all moving by `(dx, dy)` pixels
fn features(x: f32, y: f32, w: f32, h: f32, dx: f32, dy: f32, first_id: i32) -> Vec<TrackedFeature> {
    let mut res = Vec::default();
    for i in 0..6 {
        for j in 0..6 {
            res.push(TrackedFeature {
                x: x + w * (0.1 + 0.16 * i as f32),
                y: y + h * (0.1 + 0.16 * j as f32),
                dx,
                dy,
                track_id: Some(first_id + i * 6 + j),
            });
        }
    }
    res
}

fn main() {
    let _ = env_logger::try_init();

    let (width, height) = (1280.0_f32, 720.0_f32);
    let norm = 1.0 / width;
    let objects = [
        (100.0, 100.0, 120.0, 80.0, 4.0, 1.0),
        (600.0, 300.0, 90.0, 140.0, -3.0, 2.0),
    ];

    let mut boxes = objects
        .iter()
        .map(|&(x, y, w, h, _, _)| {
            let mut mb = MotionBox::with_verbosity(
                TrackStepOptions::default().tracking_degrees(TrackingDegrees::ObjectScale),
                1,
            );
            mb.reset_at_frame(0, BoxState::new(x * norm, y * norm, w * norm, h * norm));
            mb
        })
        .collect::<Vec<_>>();

    for frame_no in 0..30 {
        let mut data = TrackingData {
            frame_width: width as u32,
            frame_height: height as u32,
            background_model: Matrix3::identity(),
            valid_background_model: true,
            duration_ms: 33.3,
            ..Default::default()
        };
        for (k, &(x, y, w, h, dx, dy)) in objects.iter().enumerate() {
            let t = frame_no as f32;
            data.features.extend(features(
                x + dx * t,
                y + dy * t,
                w,
                h,
                dx,
                dy,
                k as i32 * 100,
            ));
        }
        let frame = build_motion_vector_frame(&data);
        let results = track_step_all(&mut boxes, frame_no, &frame, true, 1);
        for (k, r) in results.iter().enumerate() {
            match r {
                Ok(true) => {}
                Ok(false) => eprintln!("Box {} lost at frame {}", k, frame_no + 1),
                Err(e) => eprintln!("Box {} cannot be tracked: {}", k, e),
            }
        }
    }

    for (k, mb) in boxes.iter().enumerate() {
        for (frame, state) in mb.states().step_by(10) {
            eprintln!(
                "Box {} frame {}: center {:?}, status {:?}, confidence {:.2}",
                k,
                frame,
                state.center() / norm,
                state.track_status,
                state.tracking_confidence
            );
        }
    }
}
