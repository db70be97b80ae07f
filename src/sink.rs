//! Defines the Sink trait, implemented by every destination of the control
//! loop's records: the log file, the simulation display, the terminal. This
//! enforces a common interface so that a loop can dispatch each record to
//! any number of sinks, in order, without knowing what they do with it.

use std::fmt;

/// Returned when a sink could not take a record.
#[derive(Debug)]
pub enum SinkError {
    /// Returned when writing to a file or a socket fails.
    Io(std::io::Error),

    /// Returned when a record could not be serialized.
    Encode(serde_json::Error),

    /// Returned when the other end is not in a state to accept the record.
    Refused(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Io(error) => write!(f, "io error: {error}"),
            SinkError::Encode(error) => write!(f, "encoding error: {error}"),
            SinkError::Refused(reason) => write!(f, "refused: {reason}"),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<std::io::Error> for SinkError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

///
/// A destination for the records of a control loop. Sinks are named through
/// their `Display` implementation, which is what shows up in the logs.
///
pub trait Sink<R>: fmt::Display {
    /// Hands one record to the sink.
    fn dispatch(&mut self, record: &R) -> Result<(), SinkError>;

    /// Cleans up at termination of the loop
    fn finalize(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<R, S: Sink<R> + ?Sized> Sink<R> for Box<S> {
    fn dispatch(&mut self, record: &R) -> Result<(), SinkError> {
        (**self).dispatch(record)
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        (**self).finalize()
    }
}

impl<R, S: Sink<R> + ?Sized> Sink<R> for &mut S {
    fn dispatch(&mut self, record: &R) -> Result<(), SinkError> {
        (**self).dispatch(record)
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        (**self).finalize()
    }
}
