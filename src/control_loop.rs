//! The loop every tennicam tool is built around: read the next sample of
//! each source, combine them into one record, hand the record to each sink,
//! wait for the next tick, and start over until told to stop.
//!
//! ```text
//!  sources ──read──▶ combine ──record──▶ sinks ──▶ rate governor ──┐
//!     ▲                                                           │
//!     └───────────────────────────── next tick ◀──────────────────┘
//! ```
//!
//! Each source is followed in one of two ways, see [`Follow`]. For the
//! default [`Follow::Sequence`], the loop starts from the sequence number of
//! the source's latest sample when the loop starts, and increments it by one
//! every tick, so no sample is ever processed twice.

use crate::cancel::CancellationToken;
use crate::observation::{Ball, CombinedRecord, Sample};
use crate::rate::{InvalidFrequency, RateGovernor};
use crate::sink::{Sink, SinkError};
use crate::source::{Source, SourceError, Stamped};

use log::{debug, error, info, warn};
use std::fmt;

/// How the loop reads a source on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Follow {
    /// Read the sample following the one read on the previous tick.
    Sequence,
    /// Read whatever the most recent sample is.
    Latest,
}

/// Returned when a record could not be built out of a tick's samples.
#[derive(Debug, Clone, PartialEq)]
pub struct CombineError(pub String);

impl fmt::Display for CombineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to combine samples: {}", self.0)
    }
}

impl std::error::Error for CombineError {}

/// Reasons for a loop to stop early.
#[derive(Debug)]
pub enum LoopError {
    /// The loop was built without any source.
    NoSources,

    /// The loop was built with a frequency it can not run at.
    Frequency(InvalidFrequency),

    /// A source failed; no sink saw anything for that tick.
    Source(SourceError),

    /// The samples of a tick could not be combined.
    Combine(CombineError),

    /// At least one sink failed, either taking a record or finalizing. All
    /// sinks were still given the record, and all were finalized.
    Sink(Vec<(String, SinkError)>),
}

impl fmt::Display for LoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopError::NoSources => write!(f, "control loop without source"),
            LoopError::Frequency(error) => write!(f, "{error}"),
            LoopError::Source(error) => write!(f, "source failure: {error}"),
            LoopError::Combine(error) => write!(f, "{error}"),
            LoopError::Sink(failures) => {
                let failures: Vec<String> = failures
                    .iter()
                    .map(|(sink, error)| format!("{sink}: {error}"))
                    .collect();
                write!(f, "sink failure: {}", failures.join(", "))
            }
        }
    }
}

impl std::error::Error for LoopError {}

impl From<SourceError> for LoopError {
    fn from(value: SourceError) -> Self {
        Self::Source(value)
    }
}

impl From<InvalidFrequency> for LoopError {
    fn from(value: InvalidFrequency) -> Self {
        Self::Frequency(value)
    }
}

impl From<CombineError> for LoopError {
    fn from(value: CombineError) -> Self {
        Self::Combine(value)
    }
}

/// Why a loop stopped, when it stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cancellation token was triggered.
    Cancelled,
    /// The configured number of ticks was reached.
    TickLimit,
}

/// What a loop did before stopping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopReport {
    pub ticks: u64,
    pub reason: StopReason,
}

/// Turns the samples of one tick, in source registration order, into the
/// record given to the sinks.
pub type Combine<R> = Box<dyn FnMut(Vec<Sample>) -> Result<R, CombineError>>;

struct Attached {
    source: Box<dyn Source<Item = Sample>>,
    follow: Follow,
    cursor: u64,
}

impl Attached {
    fn next(&mut self) -> Result<Stamped<Sample>, SourceError> {
        match self.follow {
            Follow::Sequence => {
                self.cursor += 1;
                self.source.read(self.cursor)
            }
            Follow::Latest => self.source.latest(),
        }
    }
}

/// Builds a [`ControlLoop`].
pub struct ControlLoopBuilder<R> {
    frequency: f64,
    combine: Combine<R>,
    sources: Vec<Attached>,
    sinks: Vec<Box<dyn Sink<R>>>,
    token: CancellationToken,
    max_ticks: Option<u64>,
}

impl ControlLoopBuilder<Sample> {
    /// A loop over a single source whose samples go to the sinks unchanged.
    pub fn identity(frequency: f64) -> Self {
        Self::new(frequency, Box::new(combine::identity))
    }
}

impl<R> ControlLoopBuilder<R> {
    /// A loop ticking at `frequency` Hz, building its records with `combine`.
    pub fn new(frequency: f64, combine: Combine<R>) -> Self {
        ControlLoopBuilder {
            frequency,
            combine,
            sources: Vec::new(),
            sinks: Vec::new(),
            token: CancellationToken::new(),
            max_ticks: None,
        }
    }

    /// Registers a source read with [`Follow::Sequence`].
    pub fn source(self, source: Box<dyn Source<Item = Sample>>) -> Self {
        self.source_following(source, Follow::Sequence)
    }

    pub fn source_following(
        mut self,
        source: Box<dyn Source<Item = Sample>>,
        follow: Follow,
    ) -> Self {
        self.sources.push(Attached {
            source,
            follow,
            cursor: 0,
        });
        self
    }

    /// Registers a sink. Sinks get each record in registration order.
    pub fn sink(mut self, sink: Box<dyn Sink<R>>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Stops the loop after this many ticks.
    pub fn max_ticks(mut self, max_ticks: Option<u64>) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    pub fn build(self) -> Result<ControlLoop<R>, LoopError> {
        if self.sources.is_empty() {
            return Err(LoopError::NoSources);
        }
        Ok(ControlLoop {
            governor: RateGovernor::new(self.frequency)?,
            combine: self.combine,
            sources: self.sources,
            sinks: self.sinks,
            token: self.token,
            max_ticks: self.max_ticks,
        })
    }
}

/// A fixed-rate read / combine / dispatch loop. See the module documentation.
pub struct ControlLoop<R> {
    governor: RateGovernor,
    combine: Combine<R>,
    sources: Vec<Attached>,
    sinks: Vec<Box<dyn Sink<R>>>,
    token: CancellationToken,
    max_ticks: Option<u64>,
}

impl<R> ControlLoop<R> {
    /// Runs until the cancellation token is triggered, the tick limit is
    /// reached, or something fails. Sinks are finalized in every case.
    pub fn run(mut self) -> Result<LoopReport, LoopError> {
        let sources: Vec<String> = self.sources.iter().map(|a| a.source.to_string()).collect();
        let sinks: Vec<String> = self.sinks.iter().map(|s| s.to_string()).collect();
        info!(
            "starting control loop at {:.1} Hz, sources: [{}], sinks: [{}]",
            1.0 / self.governor.period().as_secs_f64(),
            sources.join(", "),
            sinks.join(", ")
        );

        let result = self.start().and_then(|_| self.cycle());
        let unfinalized = self.finalize_sinks();
        let result = match result {
            Ok(_) if !unfinalized.is_empty() => Err(LoopError::Sink(unfinalized)),
            Err(LoopError::Sink(mut failures)) => {
                failures.extend(unfinalized);
                Err(LoopError::Sink(failures))
            }
            other => other,
        };

        match &result {
            Ok(report) => info!(
                "control loop stopped after {} ticks ({:?})",
                report.ticks, report.reason
            ),
            Err(error) => error!("control loop stopped: {error}"),
        }
        result
    }

    fn start(&mut self) -> Result<(), LoopError> {
        for attached in self.sources.iter_mut() {
            let latest = attached.source.latest()?;
            attached.cursor = latest.sequence;
            info!(
                "{} : starting from sequence {} ({:?})",
                attached.source, attached.cursor, attached.follow
            );
        }
        self.governor.reset();
        Ok(())
    }

    fn cycle(&mut self) -> Result<LoopReport, LoopError> {
        let mut ticks = 0;
        loop {
            if self.token.is_cancelled() {
                return Ok(LoopReport {
                    ticks,
                    reason: StopReason::Cancelled,
                });
            }
            if self.max_ticks.is_some_and(|max| ticks >= max) {
                return Ok(LoopReport {
                    ticks,
                    reason: StopReason::TickLimit,
                });
            }

            let samples = self.read_all()?;
            let record = (self.combine)(samples)?;
            let failures = self.dispatch(&record);
            ticks += 1;
            if !failures.is_empty() {
                return Err(LoopError::Sink(failures));
            }

            self.governor.wait();
        }
    }

    fn read_all(&mut self) -> Result<Vec<Sample>, SourceError> {
        let mut samples = Vec::with_capacity(self.sources.len());
        for attached in self.sources.iter_mut() {
            let stamped = attached.next().map_err(|error| {
                error!("{} : {error}", attached.source);
                error
            })?;
            if attached.follow == Follow::Sequence && stamped.sequence != attached.cursor {
                debug!(
                    "{} : asked for {}, got {}",
                    attached.source, attached.cursor, stamped.sequence
                );
            }
            samples.push(stamped.value);
        }
        Ok(samples)
    }

    fn dispatch(&mut self, record: &R) -> Vec<(String, SinkError)> {
        let mut failures = Vec::new();
        for sink in self.sinks.iter_mut() {
            if let Err(error) = sink.dispatch(record) {
                warn!("{sink} : received error {error}.");
                failures.push((sink.to_string(), error));
            }
        }
        failures
    }

    fn finalize_sinks(&mut self) -> Vec<(String, SinkError)> {
        let mut failures = Vec::new();
        for sink in self.sinks.iter_mut() {
            if let Err(error) = sink.finalize() {
                warn!("{sink} : error during terminating : {error}.");
                failures.push((sink.to_string(), error));
            }
        }
        failures
    }
}

/// Ready-made combine functions for the shapes of records the tools use.
pub mod combine {
    use super::*;

    /// Passes the single sample of a one-source loop through.
    pub fn identity(samples: Vec<Sample>) -> Result<Sample, CombineError> {
        let count = samples.len();
        let mut samples = samples.into_iter();
        match (samples.next(), samples.next()) {
            (Some(sample), None) => Ok(sample),
            _ => Err(CombineError(format!("expected 1 sample, got {count}"))),
        }
    }

    /// A ball, optionally followed by a joint state.
    pub fn ball_with_joints(samples: Vec<Sample>) -> Result<CombinedRecord, CombineError> {
        let mut samples = samples.into_iter();
        let ball = match samples.next() {
            Some(Sample::Ball(ball)) => ball,
            other => {
                return Err(CombineError(format!("expected a ball first, got {other:?}")));
            }
        };
        let joints = match samples.next() {
            None => None,
            Some(Sample::Joints(joints)) => Some(joints),
            Some(other) => {
                return Err(CombineError(format!(
                    "expected joints second, got {other:?}"
                )));
            }
        };
        if samples.next().is_some() {
            return Err(CombineError("too many samples".to_string()));
        }
        Ok(CombinedRecord { ball, joints })
    }

    /// A joint state followed by a ball, as read when mirroring a robot.
    pub fn joints_with_ball(samples: Vec<Sample>) -> Result<CombinedRecord, CombineError> {
        match <[Sample; 2]>::try_from(samples) {
            Ok([Sample::Joints(joints), Sample::Ball(ball)]) => Ok(CombinedRecord {
                ball,
                joints: Some(joints),
            }),
            Ok(other) => Err(CombineError(format!(
                "expected joints then ball, got {other:?}"
            ))),
            Err(samples) => Err(CombineError(format!(
                "expected 2 samples, got {}",
                samples.len()
            ))),
        }
    }

    /// The ball of a single-source loop.
    pub fn ball(samples: Vec<Sample>) -> Result<Ball, CombineError> {
        match identity(samples)? {
            Sample::Ball(ball) => Ok(ball),
            other => Err(CombineError(format!("expected a ball, got {other:?}"))),
        }
    }
}
