use crate::motion::MotionVectorFrame;
use crate::options::TrackStepOptions;
use crate::state::{BoxState, TrackStatus};
use crate::Errors;
use anyhow::Result;
use log::{debug, warn};
use std::collections::VecDeque;

/// The per-frame transition of a box state
pub mod transition;

#[cfg(test)]
mod scenario_tests;

/// History lookups never reach further back than this many states
pub const MAX_HISTORY: usize = 10;

/// `|motion_disparity| * prior_weight` above which a state counts as a tracking failure
pub const FAILURE_DISPARITY: f32 = 0.8;

/// Tracks a single region through a sequence of motion vector frames.
///
/// The history is a contiguous queue of states, one per frame, whose first element belongs to
/// frame `queue_start`. Tracking forward writes the state of the frame after the one tracked
/// from, tracking backward the one before it, growing the queue on either side as needed.
///
#[derive(Debug, Clone)]
pub struct MotionBox {
    states: VecDeque<BoxState>,
    queue_start: i32,
    initial_state: Option<BoxState>,
    options: TrackStepOptions,
    verbosity: u8,
}

impl MotionBox {
    pub fn new(options: TrackStepOptions) -> Self {
        Self::with_verbosity(options, 0)
    }

    /// Creates the box with diagnostic logging: `1` logs the status of every step, `2` adds
    /// the details of every stage
    ///
    pub fn with_verbosity(options: TrackStepOptions, verbosity: u8) -> Self {
        Self {
            states: VecDeque::default(),
            queue_start: 0,
            initial_state: None,
            options,
            verbosity,
        }
    }

    pub fn options(&self) -> &TrackStepOptions {
        &self.options
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// Restarts tracking at `frame` from `state`, dropping the whole history
    ///
    pub fn reset_at_frame(&mut self, frame: i32, state: BoxState) {
        let mut state = state;
        state.track_status = TrackStatus::BoxTracked;
        self.states.clear();
        self.states.push_back(state.clone());
        self.queue_start = frame;
        self.initial_state = Some(state);
        if self.verbosity > 0 {
            debug!("Box reset at frame {}", frame);
        }
    }

    /// The state tracking was (re)started from
    ///
    pub fn initial_state(&self) -> Option<&BoxState> {
        self.initial_state.as_ref()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// First frame with a state
    ///
    pub fn start_frame(&self) -> Result<i32> {
        if self.states.is_empty() {
            return Err(Errors::EmptyQueue.into());
        }
        Ok(self.queue_start)
    }

    /// Last frame with a state
    ///
    pub fn end_frame(&self) -> Result<i32> {
        if self.states.is_empty() {
            return Err(Errors::EmptyQueue.into());
        }
        Ok(self.queue_start + self.states.len() as i32 - 1)
    }

    fn queue_pos(&self, frame: i32) -> Option<usize> {
        let pos = frame - self.queue_start;
        if pos < 0 || pos as usize >= self.states.len() {
            None
        } else {
            Some(pos as usize)
        }
    }

    pub fn state_at_frame(&self, frame: i32) -> Option<&BoxState> {
        self.queue_pos(frame).and_then(|pos| self.states.get(pos))
    }

    /// States in frame order
    ///
    pub fn states(&self) -> impl Iterator<Item = (i32, &BoxState)> + '_ {
        self.states
            .iter()
            .enumerate()
            .map(move |(i, s)| (self.queue_start + i as i32, s))
    }

    /// Whether tracking may continue from the state of `frame`
    ///
    pub fn trackable_from_frame(&self, frame: i32) -> bool {
        self.state_at_frame(frame)
            .map(|s| s.track_status.is_successful())
            .unwrap_or(false)
    }

    /// Keeps at most `keep` states at the end of the queue
    ///
    pub fn trim_front(&mut self, keep: usize) {
        while self.states.len() > keep {
            self.states.pop_front();
            self.queue_start += 1;
        }
    }

    /// Keeps at most `keep` states at the beginning of the queue
    ///
    pub fn trim_back(&mut self, keep: usize) {
        self.states.truncate(keep);
    }

    /// Tracks the box from `from_frame` one frame forward (or backward) using the
    /// correspondences of `frame`.
    ///
    /// `frame` must describe the motion away from `from_frame` in the tracking direction; for
    /// backward tracking that is usually [MotionVectorFrame::invert] of the forward frame.
    ///
    /// Returns `Ok(true)` when the new state is successful, `Ok(false)` when the step failed (the
    /// status of the stored state tells whether tracking may be retried). Tracking from a frame
    /// without a successful state is an error.
    ///
    pub fn track_step(&mut self, from_frame: i32, frame: &MotionVectorFrame, forward: bool) -> Result<bool> {
        if self.states.is_empty() {
            return Err(Errors::EmptyQueue.into());
        }
        let pos = match self.queue_pos(from_frame) {
            Some(pos) if self.states[pos].track_status.is_successful() => pos,
            _ => {
                warn!(
                    "Cannot track from frame {}: the frame is outside of [{}, {}] or its state was not tracked",
                    from_frame,
                    self.queue_start,
                    self.queue_start + self.states.len() as i32 - 1
                );
                return Err(Errors::FrameNotTrackable(from_frame).into());
            }
        };

        let history = self.history(pos, forward);
        let next = transition::track_step(&history, frame, &self.options, self.verbosity);
        let target = self.store(pos, next, forward);
        let status = self.check_failures(target, forward);

        if self.verbosity > 0 {
            let to_frame = self.queue_start + target as i32;
            debug!(
                "Box tracked from frame {} to {}: {:?}",
                from_frame, to_frame, status
            );
        }
        Ok(status.is_successful())
    }

    /// The state at `pos` followed by its predecessors toward the tracking origin
    ///
    fn history(&self, pos: usize, forward: bool) -> Vec<&BoxState> {
        if forward {
            self.states
                .range(..=pos)
                .rev()
                .take(MAX_HISTORY)
                .collect()
        } else {
            self.states.range(pos..).take(MAX_HISTORY).collect()
        }
    }

    /// Writes the new state next to `pos` and returns its queue position
    ///
    fn store(&mut self, pos: usize, state: BoxState, forward: bool) -> usize {
        if forward {
            let target = pos + 1;
            if target < self.states.len() {
                self.states[target] = state;
            } else {
                self.states.push_back(state);
            }
            target
        } else if pos == 0 {
            self.states.push_front(state);
            self.queue_start -= 1;
            0
        } else {
            self.states[pos - 1] = state;
            pos - 1
        }
    }

    /// Cancels tracking when the last `max_track_failures + 1` states toward the origin all
    /// failed. Returns the final status of the stored state.
    ///
    fn check_failures(&mut self, target: usize, forward: bool) -> TrackStatus {
        let window = self.options.max_track_failures + 1;
        let failing = |s: &BoxState| s.motion_disparity.abs() * s.prior_weight > FAILURE_DISPARITY;
        let all_failed = if forward {
            target + 1 >= window
                && self
                    .states
                    .range(..=target)
                    .rev()
                    .take(window)
                    .all(failing)
        } else {
            self.states.len() - target >= window
                && self.states.range(target..).take(window).all(failing)
        };

        let state = &mut self.states[target];
        if all_failed && state.track_status != TrackStatus::BoxUntracked {
            if self.verbosity > 0 {
                debug!(
                    "{} consecutive failing states, tracking is cancelled",
                    window
                );
            }
            state.track_status = TrackStatus::BoxUntracked;
            state.tracking_confidence = 0.0;
        }
        state.track_status
    }
}
