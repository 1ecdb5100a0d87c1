use crate::motion::{MotionVector, MotionVectorFrame};
use crate::state::BoxState;
use nalgebra::Vector2;
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `n` (rounded to a square) vectors laid out on a grid covering the inner 80% of the box,
/// with ids given by the grid index
///
pub fn vectors_in_box(state: &BoxState, flow: Vector2<f32>, n: usize) -> Vec<MotionVector> {
    let side = ((n as f32).sqrt().round() as usize).max(1);
    let center = state.center();
    let size = state.scaled_size() * 0.8;
    let step = |i: usize| {
        if side == 1 {
            0.0
        } else {
            i as f32 / (side - 1) as f32 - 0.5
        }
    };
    let mut vectors = Vec::with_capacity(side * side);
    for i in 0..side {
        for j in 0..side {
            let pos = center + Vector2::new(step(i) * size.x, step(j) * size.y);
            vectors.push(MotionVector::new(
                pos,
                flow,
                Vector2::zeros(),
                (i * side + j) as i32,
            ));
        }
    }
    vectors
}

/// Frame in which everything inside the box moves by `(dx, dy)`
///
pub fn translating_frame(state: &BoxState, dx: f32, dy: f32, n: usize) -> MotionVectorFrame {
    MotionVectorFrame::new(vectors_in_box(state, Vector2::new(dx, dy), n), 1.0)
}

/// Endless sequence of frames of an object moving with a constant flow.
///
/// Every frame holds `n` object vectors jittered by `noise`, plus `outliers` vectors spread over
/// the object that move elsewhere.
///
pub struct FlowGen {
    center: Vector2<f32>,
    size: Vector2<f32>,
    flow: Vector2<f32>,
    n: usize,
    outliers: usize,
    gen: StdRng,
    noise: Uniform<f32>,
    spread: Uniform<f32>,
}

impl FlowGen {
    pub fn new(state: &BoxState, flow: Vector2<f32>, n: usize, outliers: usize, noise: f32) -> Self {
        Self {
            center: state.center(),
            size: state.scaled_size(),
            flow,
            n,
            outliers,
            gen: StdRng::seed_from_u64(42),
            noise: Uniform::new_inclusive(-noise, noise),
            spread: Uniform::new(-0.4, 0.4),
        }
    }
}

impl Iterator for FlowGen {
    type Item = MotionVectorFrame;

    fn next(&mut self) -> Option<Self::Item> {
        let mut vectors = Vec::with_capacity(self.n + self.outliers);
        for i in 0..(self.n + self.outliers) {
            let offset = Vector2::new(
                self.gen.sample(self.spread) * self.size.x,
                self.gen.sample(self.spread) * self.size.y,
            );
            let jitter = Vector2::new(self.gen.sample(self.noise), self.gen.sample(self.noise));
            let flow = if i < self.n {
                self.flow + jitter
            } else {
                Vector2::new(-self.flow.y, self.flow.x) * 3.0 + jitter
            };
            vectors.push(MotionVector::new(
                self.center + offset,
                flow,
                Vector2::zeros(),
                -1,
            ));
        }
        self.center += self.flow;
        Some(MotionVectorFrame::new(vectors, 1.0))
    }
}
