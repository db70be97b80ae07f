//! This module provides an API to write and read tennicam log files, a
//! line-oriented text format holding the balls observed by the tracking,
//! optionally interleaved with the state of a robot. The files have the
//! following structure:
//!
//! - The first line is reserved for metadata. It is empty, unless a robot is
//!   co-logged, in which case it holds the robot's position (four floats) and
//!   orientation (a string of four space separated values):
//!
//! ```text
//! ((0.1, 0.2, 0.3, 0.4), '0 0 0 0')
//! ```
//!
//! - Then one line per ball, `(ball_id, time_stamp, position, velocity)`,
//!   time stamps being in nanoseconds:
//!
//! ```text
//! (12, 1700000000000000000, (0.5, 1.2, 0.3), (1.0, -2.0, 0.0))
//! ```
//!
//! - When a robot is co-logged, each line is extended with the robot time
//!   stamp, joint positions (radians) and joint velocities (radians per
//!   second):
//!
//! ```text
//! (12, 1700000000000000000, (0.5, 1.2, 0.3), (1.0, -2.0, 0.0), 1699999999990000000, (0.1, 0.2, 0.3, 0.4), (0.0, 0.0, 0.0, 0.0))
//! ```
//!
//! A log may end with a truncated line when the logger was killed while
//! writing. Readers stop at the first line they cannot parse and report that
//! they did.

use crate::observation::{Ball, CombinedRecord, JointState, Radian, TimeStamp};
use crate::sink::{Sink, SinkError};

use nom::{
    branch::alt,
    bytes::complete::take_while,
    character::complete::{char, i64, multispace0},
    combinator::{all_consuming, map, map_res, opt},
    multi::separated_list0,
    number::complete::double,
    sequence::{delimited, pair, preceded, terminated, tuple},
    Finish, IResult,
};
use std::{
    fmt,
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Lines, Write},
    path::{Path, PathBuf},
};

/// Robot placement written on the first line of a log with robot data.
#[derive(Debug, Clone, PartialEq)]
pub struct LogMetadata {
    pub robot_position: [f64; 4],
    pub robot_orientation: String,
}

/// The robot part of a log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotEntry {
    pub time_stamp: TimeStamp,
    pub joint_positions: Vec<Radian>,
    pub joint_velocities: Vec<Radian>,
}

/// One line of a log file.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub ball_id: i64,
    pub time_stamp: TimeStamp,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub robot: Option<RobotEntry>,
}

impl From<&CombinedRecord> for LogEntry {
    fn from(record: &CombinedRecord) -> Self {
        let Ball {
            ball_id,
            time_stamp,
            position,
            velocity,
        } = record.ball;
        LogEntry {
            ball_id,
            time_stamp,
            position,
            velocity,
            robot: record.joints.as_ref().map(|joints| RobotEntry {
                time_stamp: joints.time_stamp,
                joint_positions: joints.positions.clone(),
                joint_velocities: joints.velocities.clone(),
            }),
        }
    }
}

impl From<&LogEntry> for CombinedRecord {
    fn from(entry: &LogEntry) -> Self {
        CombinedRecord {
            ball: Ball {
                ball_id: entry.ball_id,
                time_stamp: entry.time_stamp,
                position: entry.position,
                velocity: entry.velocity,
            },
            joints: entry.robot.as_ref().map(|robot| JointState {
                time_stamp: robot.time_stamp,
                positions: robot.joint_positions.clone(),
                velocities: robot.joint_velocities.clone(),
            }),
        }
    }
}

struct FloatTuple<'a>(&'a [f64]);

impl fmt::Display for FloatTuple<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value:?}")?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for LogMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, '{}')",
            FloatTuple(&self.robot_position),
            self.robot_orientation
        )
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}",
            self.ball_id,
            self.time_stamp,
            FloatTuple(&self.position),
            FloatTuple(&self.velocity)
        )?;
        if let Some(robot) = &self.robot {
            write!(
                f,
                ", {}, {}, {}",
                robot.time_stamp,
                FloatTuple(&robot.joint_positions),
                FloatTuple(&robot.joint_velocities)
            )?;
        }
        write!(f, ")")
    }
}

fn comma(s: &str) -> IResult<&str, char> {
    delimited(multispace0, char(','), multispace0)(s)
}

fn open(s: &str) -> IResult<&str, char> {
    terminated(char('('), multispace0)(s)
}

fn close(s: &str) -> IResult<&str, char> {
    preceded(pair(opt(comma), multispace0), char(')'))(s)
}

fn parse_floats(s: &str) -> IResult<&str, Vec<f64>> {
    delimited(open, separated_list0(comma, double), close)(s)
}

fn parse_vec3(s: &str) -> IResult<&str, [f64; 3]> {
    map_res(parse_floats, <[f64; 3]>::try_from)(s)
}

fn parse_quoted(s: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
        )),
        |cs: &str| cs.to_owned(),
    )(s)
}

fn parse_metadata(s: &str) -> IResult<&str, LogMetadata> {
    map(
        delimited(
            open,
            tuple((
                map_res(parse_floats, <[f64; 4]>::try_from),
                preceded(comma, parse_quoted),
            )),
            close,
        ),
        |(robot_position, robot_orientation)| LogMetadata {
            robot_position,
            robot_orientation,
        },
    )(s)
}

fn parse_robot(s: &str) -> IResult<&str, RobotEntry> {
    map(
        tuple((
            i64,
            preceded(comma, parse_floats),
            preceded(comma, parse_floats),
        )),
        |(time_stamp, joint_positions, joint_velocities)| RobotEntry {
            time_stamp,
            joint_positions,
            joint_velocities,
        },
    )(s)
}

fn parse_entry(s: &str) -> IResult<&str, LogEntry> {
    map(
        delimited(
            open,
            tuple((
                i64,
                preceded(comma, i64),
                preceded(comma, parse_vec3),
                preceded(comma, parse_vec3),
                opt(preceded(comma, parse_robot)),
            )),
            close,
        ),
        |(ball_id, time_stamp, position, velocity, robot)| LogEntry {
            ball_id,
            time_stamp,
            position,
            velocity,
            robot,
        },
    )(s)
}

impl std::str::FromStr for LogEntry {
    type Err = nom::error::Error<String>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match all_consuming(delimited(multispace0, parse_entry, multispace0))(s).finish() {
            Ok((_remaining, entry)) => Ok(entry),
            Err(nom::error::Error { input, code }) => Err(nom::error::Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}

impl std::str::FromStr for LogMetadata {
    type Err = nom::error::Error<String>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match all_consuming(delimited(multispace0, parse_metadata, multispace0))(s).finish() {
            Ok((_remaining, metadata)) => Ok(metadata),
            Err(nom::error::Error { input, code }) => Err(nom::error::Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}

/// Things that go wrong when opening a log.
#[derive(Debug)]
pub enum LogError {
    /// The log file does not exist.
    NotFound(PathBuf),

    /// Returned when io fails when reading or writing files.
    Io(io::Error),

    /// The metadata line is neither empty nor valid metadata.
    Metadata(nom::error::Error<String>),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::NotFound(path) => write!(f, "failed to find: {}", path.display()),
            LogError::Io(error) => write!(f, "io error: {error}"),
            LogError::Metadata(error) => write!(f, "invalid metadata line: {error}"),
        }
    }
}

impl std::error::Error for LogError {}

impl From<io::Error> for LogError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Lazily reads the entries of a log. Iteration stops at the end of the file
/// or at the first line that does not parse, whichever comes first; use
/// [`LogReader::stopped_early`] afterwards to tell them apart.
pub struct LogReader<R> {
    metadata: Option<LogMetadata>,
    lines: Lines<R>,
    stopped_early: bool,
    done: bool,
}

impl LogReader<BufReader<File>> {
    /// Opens the log at `path` and reads its metadata line.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LogError::NotFound(path.to_path_buf()));
        }
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: BufRead> LogReader<R> {
    /// Reads the metadata line from `reader`. An empty input has no metadata
    /// and no entries.
    pub fn new(reader: R) -> Result<Self, LogError> {
        let mut lines = reader.lines();
        let metadata = match lines.next().transpose()? {
            None => None,
            Some(line) if line.trim().is_empty() => None,
            Some(line) => Some(line.parse().map_err(LogError::Metadata)?),
        };
        Ok(LogReader {
            metadata,
            lines,
            stopped_early: false,
            done: false,
        })
    }

    pub fn metadata(&self) -> Option<&LogMetadata> {
        self.metadata.as_ref()
    }

    /// True if reading stopped on a line that could not be parsed.
    pub fn stopped_early(&self) -> bool {
        self.stopped_early
    }
}

impl<R: BufRead> Iterator for LogReader<R> {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        if self.done {
            return None;
        }
        let parsed = match self.lines.next() {
            None => None,
            Some(Ok(line)) => match line.parse::<LogEntry>() {
                Ok(entry) => return Some(entry),
                Err(error) => Some(error.input),
            },
            Some(Err(error)) => Some(error.to_string()),
        };
        self.done = true;
        if let Some(reason) = parsed {
            log::debug!("log parsing stopped early: {reason}");
            self.stopped_early = true;
        }
        None
    }
}

/// Everything a log file holds.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLog {
    pub metadata: Option<LogMetadata>,
    pub entries: Vec<LogEntry>,
    /// False if a line (typically the last one) could not be parsed.
    pub complete: bool,
}

/// Reads a whole log file.
pub fn parse_log(path: impl AsRef<Path>) -> Result<ParsedLog, LogError> {
    let mut reader = LogReader::open(path)?;
    let entries: Vec<LogEntry> = reader.by_ref().collect();
    Ok(ParsedLog {
        metadata: reader.metadata.take(),
        entries,
        complete: !reader.stopped_early(),
    })
}

/// Returns the first `directory/tennicam_NNN` path that does not exist yet,
/// counting from 1.
pub fn unique_path(directory: impl AsRef<Path>) -> PathBuf {
    let directory = directory.as_ref();
    (1..)
        .map(|counter: u64| directory.join(format!("tennicam_{counter:03}")))
        .find(|path| !path.exists())
        .unwrap_or_else(|| directory.join("tennicam"))
}

/// A [`Sink`] writing each record as one log line.
pub struct LogSink<W: Write> {
    name: String,
    writer: W,
}

impl LogSink<BufWriter<File>> {
    /// Creates the log file at `path` and writes its metadata line.
    pub fn create(path: impl AsRef<Path>, metadata: Option<&LogMetadata>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut sink = LogSink::new(BufWriter::new(file), metadata)?;
        sink.name = format!("LogSink({})", path.display());
        Ok(sink)
    }
}

impl<W: Write> LogSink<W> {
    /// Writes the metadata line to `writer`.
    pub fn new(mut writer: W, metadata: Option<&LogMetadata>) -> io::Result<Self> {
        match metadata {
            Some(metadata) => writeln!(writer, "{metadata}")?,
            None => writeln!(writer)?,
        }
        Ok(LogSink {
            name: "LogSink".to_string(),
            writer,
        })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> fmt::Display for LogSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl<W: Write> Sink<CombinedRecord> for LogSink<W> {
    fn dispatch(&mut self, record: &CombinedRecord) -> Result<(), SinkError> {
        writeln!(self.writer, "{}", LogEntry::from(record))?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ball_record(id: i64) -> CombinedRecord {
        CombinedRecord {
            ball: Ball {
                ball_id: id,
                time_stamp: 1_700_000_000_000_000_000 + id,
                position: [0.5, 1.25, -0.3],
                velocity: [1.5, -2.0, 0.0],
            },
            joints: None,
        }
    }

    fn robot_record(id: i64) -> CombinedRecord {
        CombinedRecord {
            joints: Some(JointState {
                time_stamp: 42,
                positions: vec![0.1, 0.2, 0.3, 0.4],
                velocities: vec![0.0, -0.5, 0.25, 3.0],
            }),
            ..ball_record(id)
        }
    }

    #[test]
    fn entry_format() {
        let entry = LogEntry::from(&ball_record(3));
        assert_eq!(
            entry.to_string(),
            "(3, 1700000000000000003, (0.5, 1.25, -0.3), (1.5, -2.0, 0.0))"
        );
    }

    #[test]
    fn parse_python_style_entry() {
        let entry: LogEntry = "(-1, 100, (1.0, 2, 3e-05), (0.0, 0.0, 0.0))".parse().unwrap();
        assert_eq!(entry.ball_id, -1);
        assert_eq!(entry.time_stamp, 100);
        assert_eq!(entry.position, [1.0, 2.0, 3e-5]);
        assert_eq!(entry.robot, None);
    }

    #[test]
    fn parse_entry_with_robot_and_singleton_tuples() {
        let entry: LogEntry = "(1, 2, (0.0, 0.0, 0.0), (0.0, 0.0, 0.0), 3, (0.5,), (1.5,))"
            .parse()
            .unwrap();
        let robot = entry.robot.unwrap();
        assert_eq!(robot.time_stamp, 3);
        assert_eq!(robot.joint_positions, vec![0.5]);
        assert_eq!(robot.joint_velocities, vec![1.5]);
    }

    #[test]
    fn position_needs_three_values() {
        assert!("(1, 2, (0.0, 0.0), (0.0, 0.0, 0.0))".parse::<LogEntry>().is_err());
    }

    #[test]
    fn write_then_read_without_robot() {
        let records: Vec<CombinedRecord> = (0..5).map(ball_record).collect();
        let mut sink = LogSink::new(Vec::new(), None).unwrap();
        for record in &records {
            Sink::<CombinedRecord>::dispatch(&mut sink, record).unwrap();
        }
        let bytes = sink.into_inner();
        assert!(bytes.starts_with(b"\n"));

        let mut reader = LogReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.metadata(), None);
        let read: Vec<CombinedRecord> = reader.by_ref().map(|e| CombinedRecord::from(&e)).collect();
        assert_eq!(read, records);
        assert!(!reader.stopped_early());
    }

    #[test]
    fn write_then_read_with_robot() {
        let metadata = LogMetadata {
            robot_position: [0.1, 0.2, 0.3, 0.4],
            robot_orientation: "0 0 0 0".to_string(),
        };
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let path = tempfile.path();

        let mut sink = LogSink::create(path, Some(&metadata)).unwrap();
        for id in 0..3 {
            Sink::<CombinedRecord>::dispatch(&mut sink, &robot_record(id)).unwrap();
        }
        Sink::<CombinedRecord>::finalize(&mut sink).unwrap();

        let parsed = parse_log(path).unwrap();
        assert_eq!(parsed.metadata, Some(metadata));
        assert!(parsed.complete);
        assert_eq!(parsed.entries.len(), 3);
        assert_eq!(CombinedRecord::from(&parsed.entries[2]), robot_record(2));
    }

    #[test]
    fn metadata_line_format() {
        let metadata = LogMetadata {
            robot_position: [0.0, 1.0, 2.5, 0.0],
            robot_orientation: "0 0 0 1".to_string(),
        };
        assert_eq!(metadata.to_string(), "((0.0, 1.0, 2.5, 0.0), '0 0 0 1')");
        assert_eq!(metadata.to_string().parse::<LogMetadata>().unwrap(), metadata);
        let double_quoted: LogMetadata = "((0, 1, 2.5, 0), \"0 0 0 1\")".parse().unwrap();
        assert_eq!(double_quoted, metadata);
    }

    #[test]
    fn truncated_last_line() {
        let content = "\n(0, 1, (0.0, 0.0, 0.0), (0.0, 0.0, 0.0))\n(1, 2, (0.0, 0.0, 0.0), (0.0, 0.0, 0.0))\n(2, 3, (0.0, 0.";
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tempfile.path(), content).unwrap();

        let parsed = parse_log(tempfile.path()).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[1].ball_id, 1);
        assert!(!parsed.complete);
    }

    #[test]
    fn reading_stops_at_first_bad_line() {
        let content = "\n(0, 1, (0.0, 0.0, 0.0), (0.0, 0.0, 0.0))\ngarbage\n(1, 2, (0.0, 0.0, 0.0), (0.0, 0.0, 0.0))\n";
        let mut reader = LogReader::new(Cursor::new(content)).unwrap();
        assert_eq!(reader.by_ref().count(), 1);
        assert!(reader.stopped_early());
        assert_eq!(reader.next(), None);
    }

    #[test]
    fn empty_file() {
        let reader = LogReader::new(Cursor::new("")).unwrap();
        assert_eq!(reader.metadata(), None);
        assert_eq!(reader.count(), 0);
    }

    #[test]
    fn bad_metadata() {
        assert!(matches!(
            LogReader::new(Cursor::new("not metadata\n")),
            Err(LogError::Metadata(_))
        ));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            parse_log(dir.path().join("nope")),
            Err(LogError::NotFound(_))
        ));
    }

    #[test]
    fn unique_path_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(unique_path(dir.path()), dir.path().join("tennicam_001"));
        std::fs::write(dir.path().join("tennicam_001"), "").unwrap();
        std::fs::write(dir.path().join("tennicam_002"), "").unwrap();
        assert_eq!(unique_path(dir.path()), dir.path().join("tennicam_003"));
    }
}
