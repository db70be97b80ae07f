// Commandline argument parser using clap for the tennicam tools

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Segment the tennicam publisher writes to when none is given.
pub const DEFAULT_SEGMENT_ID: &str = "tennicam_client";

/// Endpoint of the tennicam segment when none is given.
pub const DEFAULT_SEGMENT_ADDRESS: &str = "127.0.0.1:7661";

/// Endpoint of the robot segment when none is given.
pub const DEFAULT_ROBOT_ADDRESS: &str = "127.0.0.1:7662";

/// Endpoint of the simulation display when none is given.
pub const DEFAULT_SIMULATION_ADDRESS: &str = "127.0.0.1:7663";

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct TennicamArgs {
    #[command(subcommand)]
    /// Which tool to run
    pub command: CommandTask,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Publish the balls received from the tennicam server on a segment
    #[command(about)]
    Serve(ServeCommand),

    /// Print the balls published on a segment
    #[command(about)]
    Print(PrintCommand),

    /// Write the balls published on a segment, and optionally the state of a
    /// robot, to a log file
    #[command(about)]
    Log(LogCommand),

    /// Display the balls published on a segment in a simulation
    #[command(about)]
    Display(DisplayCommand),

    /// Mirror a robot and the balls published on a segment in a simulation
    #[command(about)]
    Mirror(MirrorCommand),

    /// Interactively edit the transform applied by a running publisher
    #[command(about)]
    Transform(TransformCommand),
}

impl CommandTask {
    /// Name of the tool, as shown in the logs.
    pub fn name(&self) -> &'static str {
        match self {
            CommandTask::Serve(_) => "serve",
            CommandTask::Print(_) => "print",
            CommandTask::Log(_) => "log",
            CommandTask::Display(_) => "display",
            CommandTask::Mirror(_) => "mirror",
            CommandTask::Transform(_) => "transform",
        }
    }

    /// Segment the tool works on, as shown in the logs.
    pub fn segment_id(&self) -> &str {
        match self {
            CommandTask::Serve(cmd) => &cmd.segment.segment_id,
            CommandTask::Print(cmd) => &cmd.segment.segment_id,
            CommandTask::Log(cmd) => &cmd.segment.segment_id,
            CommandTask::Display(cmd) => &cmd.segment.segment_id,
            CommandTask::Mirror(cmd) => &cmd.segment.segment_id,
            CommandTask::Transform(cmd) => &cmd.segment_id,
        }
    }
}

/// Which segment carries the balls
#[derive(Debug, Args, Clone)]
pub struct SegmentArgs {
    /// Identifier of the tennicam segment
    #[arg(short = 's', long = "segment-id", default_value = DEFAULT_SEGMENT_ID)]
    pub segment_id: String,

    /// Endpoint (host:port) of the tennicam segment
    #[arg(long = "segment-address", default_value = DEFAULT_SEGMENT_ADDRESS)]
    pub segment_address: String,
}

/// Options shared by the tools built on the control loop
#[derive(Debug, Args, Clone)]
pub struct LoopArgs {
    /// Stop after this many ticks, run until interrupted otherwise
    #[arg(long = "ticks")]
    pub ticks: Option<u64>,

    /// Seconds to wait for a sample before giving up
    #[arg(long = "read-timeout", default_value_t = 1.0)]
    pub read_timeout: f64,

    /// Seconds to wait for the first sample of each source, forever if not set
    #[arg(long = "startup-timeout")]
    pub startup_timeout: Option<f64>,
}

#[derive(Debug, Args, Clone)]
pub struct ServeCommand {
    #[command(flatten)]
    pub segment: SegmentArgs,

    /// Driver configuration file (server address and transform)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Publishing frequency, in Hz
    #[arg(short = 'f', long = "frequency", default_value_t = 200.0)]
    pub frequency: f64,

    /// Re-read the live transform at each iteration
    #[arg(short = 'a', long = "active-transform")]
    pub active_transform: bool,

    /// Directory of the live transform
    #[arg(long = "shm-dir", default_value = crate::transform::DEFAULT_SHM_DIR)]
    pub shm_dir: PathBuf,

    /// Stop after this many iterations, run until interrupted otherwise
    #[arg(long = "ticks")]
    pub ticks: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct PrintCommand {
    #[command(flatten)]
    pub segment: SegmentArgs,

    #[command(flatten)]
    pub run: LoopArgs,

    /// Maximum printing frequency, in Hz
    #[arg(short = 'f', long = "frequency", default_value_t = 1000.0)]
    pub frequency: f64,

    /// Show the latest ball in a full screen monitor instead of printing lines
    #[arg(long = "tui")]
    pub tui: bool,
}

#[derive(Debug, Args, Clone)]
pub struct LogCommand {
    #[command(flatten)]
    pub segment: SegmentArgs,

    #[command(flatten)]
    pub run: LoopArgs,

    /// Logging frequency, in Hz
    #[arg(short = 'f', long = "frequency", default_value_t = 1000.0)]
    pub frequency: f64,

    /// Log file, the first free /tmp/tennicam_NNN if not set
    #[arg(short = 'o', long = "out")]
    pub outfile: Option<PathBuf>,

    /// Identifier of the robot segment, the robot is not logged if not set
    #[arg(long = "robot-segment-id")]
    pub robot_segment_id: Option<String>,

    /// Endpoint (host:port) of the robot segment
    #[arg(long = "robot-address", default_value = DEFAULT_ROBOT_ADDRESS)]
    pub robot_address: String,

    /// Position of the robot, written in the log's metadata
    #[arg(long = "robot-position", num_args = 4, allow_negative_numbers = true,
          default_values_t = [0.0, 0.0, 0.0, 0.0])]
    pub robot_position: Vec<f64>,

    /// Orientation of the robot (four space separated values), written in the
    /// log's metadata
    #[arg(long = "robot-orientation", default_value = "0 0 0 0")]
    pub robot_orientation: String,
}

#[derive(Debug, Args, Clone)]
pub struct DisplayCommand {
    #[command(flatten)]
    pub segment: SegmentArgs,

    #[command(flatten)]
    pub run: LoopArgs,

    /// Display frequency, in Hz
    #[arg(short = 'f', long = "frequency", default_value_t = 100.0)]
    pub frequency: f64,

    /// Name of the simulation display
    #[arg(long = "simulation-id", default_value = "tennicam_client_display")]
    pub simulation_id: String,

    /// Endpoint (host:port) of the simulation display
    #[arg(long = "simulation-address", default_value = DEFAULT_SIMULATION_ADDRESS)]
    pub simulation_address: String,
}

#[derive(Debug, Args, Clone)]
pub struct MirrorCommand {
    #[command(flatten)]
    pub segment: SegmentArgs,

    #[command(flatten)]
    pub run: LoopArgs,

    /// Mirroring frequency, in Hz
    #[arg(short = 'f', long = "frequency", default_value_t = 300.0)]
    pub frequency: f64,

    /// Identifier of the robot segment to mirror
    #[arg(long = "robot-segment-id", default_value = "real_robot")]
    pub robot_segment_id: String,

    /// Endpoint (host:port) of the robot segment
    #[arg(long = "robot-address", default_value = DEFAULT_ROBOT_ADDRESS)]
    pub robot_address: String,

    /// Name of the simulation mirroring the robot
    #[arg(long = "simulation-id", default_value = "mirroring")]
    pub simulation_id: String,

    /// Endpoint (host:port) of the simulation
    #[arg(long = "simulation-address", default_value = DEFAULT_SIMULATION_ADDRESS)]
    pub simulation_address: String,
}

#[derive(Debug, Args, Clone)]
pub struct TransformCommand {
    /// Identifier of the segment of the running publisher
    #[arg(short = 's', long = "segment-id", default_value = DEFAULT_SEGMENT_ID)]
    pub segment_id: String,

    /// Configuration file the transform is saved to
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Directory of the live transform
    #[arg(long = "shm-dir", default_value = crate::transform::DEFAULT_SHM_DIR)]
    pub shm_dir: PathBuf,
}

/// Arguments of the dummy tennicam server
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct DummyServerArgs {
    /// Configuration file holding the address to publish on
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Milliseconds between two frames
    #[arg(short = 'p', long = "period", default_value_t = 10)]
    pub period_ms: u64,

    /// Amplitude of the uniform noise added to each coordinate
    #[arg(short = 'n', long = "noise", default_value_t = 0.0)]
    pub noise: f64,

    /// Probability for a frame to report no ball
    #[arg(short = 'd', long = "dropout", default_value_t = 0.0)]
    pub dropout: f64,
}
