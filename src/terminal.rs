use crate::observation::{Ball, CombinedRecord, Sample};
use crate::sink::{Sink, SinkError};

use log::debug;

use std::{
    fmt,
    io::{self, Stdout, Write},
};

/// Prints one line per record. Balls are printed with their `Display`
/// implementation, joint states as `positions | velocities`.
pub struct TerminalSink<W: Write> {
    writer: W,
}

impl TerminalSink<Stdout> {
    pub fn stdout() -> Self {
        TerminalSink::new(io::stdout())
    }
}

impl<W: Write> TerminalSink<W> {
    pub fn new(writer: W) -> Self {
        TerminalSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> fmt::Display for TerminalSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TerminalSink")
    }
}

impl<W: Write> Sink<Ball> for TerminalSink<W> {
    fn dispatch(&mut self, record: &Ball) -> Result<(), SinkError> {
        writeln!(self.writer, "{record}")?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> Sink<Sample> for TerminalSink<W> {
    fn dispatch(&mut self, record: &Sample) -> Result<(), SinkError> {
        match record {
            Sample::Ball(ball) => writeln!(self.writer, "{ball}")?,
            Sample::Joints(joints) => writeln!(self.writer, "{joints}")?,
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Logs the joint state of each record at debug level.
#[derive(Debug, Default)]
pub struct JointsLogSink;

impl fmt::Display for JointsLogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JointsLogSink")
    }
}

impl Sink<CombinedRecord> for JointsLogSink {
    fn dispatch(&mut self, record: &CombinedRecord) -> Result<(), SinkError> {
        if let Some(joints) = &record.joints {
            debug!("{joints}");
        }
        Ok(())
    }
}
