//! The publisher side of tennicam: receives the frames of the tennicam
//! server, turns them into balls and publishes them on a segment, at a fixed
//! frequency, until interrupted.
//!
//! In active transform mode the transform applied to the balls is re-read
//! from a live store at every iteration, so that it can be tuned while the
//! publisher runs (see [`crate::transform_session`]).

use crate::cancel::CancellationToken;
use crate::control_loop::{LoopError, LoopReport, StopReason};
use crate::driver::{Driver, Frame};
use crate::frame_feed::FrameFeed;
use crate::observation::Ball;
use crate::rate::RateGovernor;
use crate::sink::Sink;
use crate::transform::TransformStore;

use log::{error, info, warn};

/// Default frequency of the publisher, in Hz.
pub const DEFAULT_FREQUENCY: f64 = 200.0;

/// Anything the publisher can get server frames from.
pub trait FrameProvider {
    /// The frames received since the last call, oldest first.
    fn poll_frames(&mut self) -> Vec<Frame>;
}

impl FrameProvider for FrameFeed {
    fn poll_frames(&mut self) -> Vec<Frame> {
        self.drain()
    }
}

impl FrameProvider for std::sync::mpsc::Receiver<Frame> {
    fn poll_frames(&mut self) -> Vec<Frame> {
        self.try_iter().collect()
    }
}

pub struct Standalone<F, S> {
    driver: Driver,
    frames: F,
    sink: S,
    live_transform: Option<Box<dyn TransformStore>>,
    governor: RateGovernor,
    published: u64,
}

impl<F: FrameProvider, S: Sink<Ball>> Standalone<F, S> {
    pub fn new(driver: Driver, frames: F, sink: S, frequency: f64) -> Result<Self, LoopError> {
        Ok(Standalone {
            driver,
            frames,
            sink,
            live_transform: None,
            governor: RateGovernor::new(frequency)?,
            published: 0,
        })
    }

    /// Re-reads the transform from `store` at every iteration.
    pub fn with_live_transform(mut self, store: Box<dyn TransformStore>) -> Self {
        self.live_transform = Some(store);
        self
    }

    /// Number of balls published so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    fn refresh_transform(&mut self, warned: &mut bool) {
        let Some(store) = &self.live_transform else {
            return;
        };
        match store.read() {
            Ok(transform) => {
                if transform != *self.driver.transform() {
                    info!("applying new transform:\n{transform}");
                    self.driver.set_transform(transform);
                }
                *warned = false;
            }
            Err(e) => {
                if !*warned {
                    warn!("failed to read live transform, keeping the current one: {e}");
                    *warned = true;
                }
            }
        }
    }

    /// Runs until `token` is cancelled, or for `max_ticks` iterations.
    /// Iterations without new frame publish nothing.
    pub fn run(
        &mut self,
        token: &CancellationToken,
        max_ticks: Option<u64>,
    ) -> Result<LoopReport, LoopError> {
        info!(
            "publishing balls to {} at {:.1} Hz",
            self.sink,
            1.0 / self.governor.period().as_secs_f64()
        );
        self.governor.reset();
        let mut ticks = 0;
        let mut warned = false;

        let result = loop {
            if token.is_cancelled() {
                break Ok(StopReason::Cancelled);
            }
            if max_ticks.is_some_and(|max| ticks >= max) {
                break Ok(StopReason::TickLimit);
            }

            self.refresh_transform(&mut warned);
            let mut failure = None;
            for frame in self.frames.poll_frames() {
                let ball = self.driver.process(&frame);
                if let Err(e) = self.sink.dispatch(&ball) {
                    error!("{} : received error {}.", self.sink, e);
                    failure = Some(e);
                    break;
                }
                self.published += 1;
            }
            ticks += 1;
            if let Some(e) = failure {
                break Err(LoopError::Sink(vec![(self.sink.to_string(), e)]));
            }

            self.governor.wait();
        };

        let result = match (result, self.sink.finalize()) {
            (result, Ok(())) => result,
            (Ok(_), Err(e)) => {
                error!("{} : error during terminating : {}.", self.sink, e);
                Err(LoopError::Sink(vec![(self.sink.to_string(), e)]))
            }
            (Err(LoopError::Sink(mut failures)), Err(e)) => {
                error!("{} : error during terminating : {}.", self.sink, e);
                failures.push((self.sink.to_string(), e));
                Err(LoopError::Sink(failures))
            }
            (Err(other), Err(e)) => {
                error!("{} : error during terminating : {}.", self.sink, e);
                Err(other)
            }
        };
        let reason = result?;
        info!(
            "publisher stopped after {} iterations, {} balls published ({:?})",
            ticks, self.published, reason
        );
        Ok(LoopReport { ticks, reason })
    }
}
