use crate::motion::MotionVectorFrame;
use crate::motion_box::MotionBox;
use anyhow::Result;
use rayon::prelude::*;

/// Tracks every box by one step on the same frame.
///
/// Boxes are independent, so when there are more than `grain_size` of them they are processed
/// in chunks of `grain_size` on the rayon pool, otherwise serially on the calling thread. The
/// results are in the order of `boxes`.
///
pub fn track_step_all(
    boxes: &mut [MotionBox],
    from_frame: i32,
    frame: &MotionVectorFrame,
    forward: bool,
    grain_size: usize,
) -> Vec<Result<bool>> {
    let grain_size = grain_size.max(1);
    if boxes.len() <= grain_size {
        return boxes
            .iter_mut()
            .map(|b| b.track_step(from_frame, frame, forward))
            .collect();
    }

    boxes
        .par_chunks_mut(grain_size)
        .flat_map_iter(|chunk| {
            chunk
                .iter_mut()
                .map(|b| b.track_step(from_frame, frame, forward))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Splits batch results into the indices of successful steps and the errors
///
pub fn partition_results(results: Vec<Result<bool>>) -> (Vec<usize>, Vec<(usize, anyhow::Error)>) {
    let mut tracked = Vec::default();
    let mut errors = Vec::default();
    for (i, r) in results.into_iter().enumerate() {
        match r {
            Ok(true) => tracked.push(i),
            Ok(false) => {}
            Err(e) => errors.push((i, e)),
        }
    }
    (tracked, errors)
}
