//! Sources of samples for the control loop, and the thread-safe ring buffer
//! that backs all of them.
//!
//! A [`Source`] is read either by asking for its most recent sample with
//! [`Source::latest`], or by asking for a precise sequence number with
//! [`Source::read`]. Sequence numbers increase by one for each published
//! sample, so a reader that increments its own cursor never sees the same
//! sample twice.

use crate::observation::Sample;

use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// Number of samples a [`SharedBuffer`] retains by default.
pub const DEFAULT_CAPACITY: usize = 50_000;

/// How long [`Source::read`] waits for a sequence number by default.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// A sample along with the sequence number its publisher assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamped<T> {
    pub sequence: u64,
    pub value: T,
}

impl<T> Stamped<T> {
    /// Converts the carried value, keeping the sequence number.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Stamped<U> {
        Stamped {
            sequence: self.sequence,
            value: f(self.value),
        }
    }
}

/// Everything that can go wrong while reading from a [`Source`].
#[derive(Debug)]
pub enum SourceError {
    /// The requested sequence number did not show up in time.
    Unavailable {
        source: String,
        sequence: u64,
        waited: Duration,
    },

    /// The source never produced anything in time.
    NoSample { source: String, waited: Duration },

    /// The publisher went away and nothing more will arrive.
    Closed { source: String },

    /// Returned when attaching to a source fails.
    Io(std::io::Error),

    /// Returned when a sample could not be decoded.
    Decode(serde_json::Error),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SourceError as SE;
        match self {
            SE::Unavailable {
                source,
                sequence,
                waited,
            } => write!(
                f,
                "{source}: sample {sequence} unavailable after {:.3}s",
                waited.as_secs_f64()
            ),
            SE::NoSample { source, waited } => write!(
                f,
                "{source}: no sample after {:.3}s",
                waited.as_secs_f64()
            ),
            SE::Closed { source } => write!(f, "{source}: publisher closed"),
            SE::Io(error) => write!(f, "io error: {error}"),
            SE::Decode(error) => write!(f, "decode error: {error}"),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<std::io::Error> for SourceError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value)
    }
}

/// A stream of samples produced at its own pace by someone else.
pub trait Source: fmt::Display {
    type Item;

    /// Returns the most recent sample. Blocks until a first sample exists.
    fn latest(&mut self) -> Result<Stamped<Self::Item>, SourceError>;

    /// Returns the sample with the given sequence number, blocking until it
    /// has been published. If it has already been dropped from history, the
    /// oldest sample still available is returned instead.
    fn read(&mut self, sequence: u64) -> Result<Stamped<Self::Item>, SourceError>;
}

impl<S: Source + ?Sized> Source for Box<S> {
    type Item = S::Item;

    fn latest(&mut self) -> Result<Stamped<Self::Item>, SourceError> {
        (**self).latest()
    }

    fn read(&mut self, sequence: u64) -> Result<Stamped<Self::Item>, SourceError> {
        (**self).read(sequence)
    }
}

/// Wraps any source whose items convert into a [`Sample`], so that sources
/// of different shapes can be registered with the same control loop.
pub struct SampleSource<S>(pub S);

impl<S: Source> fmt::Display for SampleSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<S> Source for SampleSource<S>
where
    S: Source,
    S::Item: Into<Sample>,
{
    type Item = Sample;

    fn latest(&mut self) -> Result<Stamped<Sample>, SourceError> {
        self.0.latest().map(|s| s.map(Into::into))
    }

    fn read(&mut self, sequence: u64) -> Result<Stamped<Sample>, SourceError> {
        self.0.read(sequence).map(|s| s.map(Into::into))
    }
}

/// Shorthand for boxing a source as a [`Sample`] source.
pub fn boxed_sample_source<S>(source: S) -> Box<dyn Source<Item = Sample>>
where
    S: Source + 'static,
    S::Item: Into<Sample>,
{
    Box::new(SampleSource(source))
}

#[derive(Debug)]
struct Ring<T> {
    samples: VecDeque<Stamped<T>>,
    capacity: usize,
    next_sequence: u64,
    closed: bool,
}

impl<T> Ring<T> {
    fn push(&mut self, stamped: Stamped<T>) {
        self.next_sequence = stamped.sequence + 1;
        self.samples.push_back(stamped);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }
}

#[derive(Debug)]
struct Shared<T> {
    ring: Mutex<Ring<T>>,
    published: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A bounded history of samples that one [`Publisher`] writes to and any
/// number of readers read from, possibly from other threads.
#[derive(Debug)]
pub struct SharedBuffer<T> {
    name: String,
    shared: Arc<Shared<T>>,
    read_timeout: Duration,
    startup_timeout: Option<Duration>,
}

// Derived `Clone` would require `T: Clone` on the handle itself.
impl<T> Clone for SharedBuffer<T> {
    fn clone(&self) -> Self {
        SharedBuffer {
            name: self.name.clone(),
            shared: Arc::clone(&self.shared),
            read_timeout: self.read_timeout,
            startup_timeout: self.startup_timeout,
        }
    }
}

impl<T: Clone> SharedBuffer<T> {
    /// Instantiates an empty buffer retaining at most `capacity` samples.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        SharedBuffer {
            name: name.into(),
            shared: Arc::new(Shared {
                ring: Mutex::new(Ring {
                    samples: VecDeque::new(),
                    capacity: capacity.max(1),
                    next_sequence: 0,
                    closed: false,
                }),
                published: Condvar::new(),
            }),
            read_timeout: DEFAULT_READ_TIMEOUT,
            startup_timeout: None,
        }
    }

    /// How long [`Source::read`] waits for a sequence number before giving up.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// How long [`Source::latest`] waits for a first sample. `None` waits
    /// forever.
    pub fn with_startup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.set_startup_timeout(timeout);
        self
    }

    pub fn set_startup_timeout(&mut self, timeout: Option<Duration>) {
        self.startup_timeout = timeout;
    }

    /// A handle that writes into this buffer.
    pub fn publisher(&self) -> Publisher<T> {
        Publisher {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of samples currently retained.
    pub fn len(&self) -> usize {
        self.shared.lock().samples.len()
    }

    /// True if nothing has been published yet, or everything was evicted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn wait_until<'a>(
        &'a self,
        mut ring: MutexGuard<'a, Ring<T>>,
        deadline: Option<Instant>,
    ) -> (MutexGuard<'a, Ring<T>>, bool) {
        match deadline {
            None => (
                self.shared
                    .published
                    .wait(ring)
                    .unwrap_or_else(PoisonError::into_inner),
                false,
            ),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return (ring, true);
                }
                let (guard, result) = self
                    .shared
                    .published
                    .wait_timeout(ring, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner);
                ring = guard;
                (ring, result.timed_out() && Instant::now() >= deadline)
            }
        }
    }
}

impl<T: Clone> fmt::Display for SharedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl<T: Clone> Source for SharedBuffer<T> {
    type Item = T;

    fn latest(&mut self) -> Result<Stamped<T>, SourceError> {
        let started = Instant::now();
        let deadline = self.startup_timeout.map(|timeout| started + timeout);
        let mut ring = self.shared.lock();
        loop {
            if let Some(newest) = ring.samples.back() {
                return Ok(newest.clone());
            }
            if ring.closed {
                return Err(SourceError::Closed {
                    source: self.name.clone(),
                });
            }
            let (guard, timed_out) = self.wait_until(ring, deadline);
            ring = guard;
            if timed_out && ring.samples.is_empty() {
                return Err(SourceError::NoSample {
                    source: self.name.clone(),
                    waited: started.elapsed(),
                });
            }
        }
    }

    fn read(&mut self, sequence: u64) -> Result<Stamped<T>, SourceError> {
        let started = Instant::now();
        let deadline = Some(started + self.read_timeout);
        let mut ring = self.shared.lock();
        loop {
            if let (Some(oldest), Some(newest)) = (ring.samples.front(), ring.samples.back()) {
                if newest.sequence >= sequence {
                    if oldest.sequence >= sequence {
                        return Ok(oldest.clone());
                    }
                    // Sequence numbers are contiguous within the ring.
                    let index = (sequence - oldest.sequence) as usize;
                    return Ok(ring.samples[index].clone());
                }
            }
            if ring.closed {
                return Err(SourceError::Closed {
                    source: self.name.clone(),
                });
            }
            let (guard, timed_out) = self.wait_until(ring, deadline);
            ring = guard;
            if timed_out && ring.next_sequence <= sequence {
                return Err(SourceError::Unavailable {
                    source: self.name.clone(),
                    sequence,
                    waited: started.elapsed(),
                });
            }
        }
    }
}

/// The writing end of a [`SharedBuffer`].
#[derive(Debug)]
pub struct Publisher<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Publisher<T> {
    /// Appends a sample, assigning it the next sequence number, which is
    /// returned.
    pub fn publish(&self, value: T) -> u64 {
        let mut ring = self.shared.lock();
        let sequence = ring.next_sequence;
        ring.push(Stamped { sequence, value });
        drop(ring);
        self.shared.published.notify_all();
        sequence
    }

    /// Appends a sample that already carries a sequence number, as happens
    /// when relaying samples from another process. Samples older than the
    /// newest one are ignored.
    pub fn publish_stamped(&self, stamped: Stamped<T>) {
        let mut ring = self.shared.lock();
        if !ring.samples.is_empty() && stamped.sequence < ring.next_sequence {
            return;
        }
        // A jump in upstream numbering invalidates the contiguous history.
        if stamped.sequence != ring.next_sequence {
            ring.samples.clear();
        }
        ring.push(stamped);
        drop(ring);
        self.shared.published.notify_all();
    }

    /// Marks the stream as finished. Readers waiting for more samples fail
    /// with [`SourceError::Closed`].
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.published.notify_all();
    }
}
