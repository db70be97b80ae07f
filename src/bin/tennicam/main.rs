//! The tennicam tools: a publisher turning the frames of the tennicam server
//! into balls, and the tools reading them back.
//!
//! ```text
//! tennicam serve --active-transform
//! tennicam print --tui
//! tennicam log --robot-segment-id pamy -o /tmp/session
//! tennicam transform
//! ```

use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::{
    error::Error,
    io::{self, Write},
    path::Path,
    process::ExitCode,
    time::Duration,
};

use tennicam_client::{
    args::{
        CommandTask, DisplayCommand, LogCommand, LoopArgs, MirrorCommand, PrintCommand,
        ServeCommand, TennicamArgs, TransformCommand,
    },
    cancel::{install_interrupt_handler, CancellationToken},
    driver::Driver,
    driver_config::{default_config_file, DriverConfig},
    frame_feed::FrameFeed,
    gui::{monitor, MonitorSink, MonitorState},
    log_format::{unique_path, LogMetadata, LogSink},
    observation::{Ball, JointState},
    segment::{SegmentPublisher, SegmentSource},
    simulation::SimulationSink,
    source::boxed_sample_source,
    standalone::Standalone,
    terminal::{JointsLogSink, TerminalSink},
    tools,
    transform::LiveTransformFile,
    transform_session::TransformSession,
};

type CmdResult = Result<(), Box<dyn Error>>;

/// Directory of the log files when no output file is given.
const DEFAULT_LOG_DIR: &str = "/tmp";

fn init_logger(command: &'static str, segment_id: String) {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(move |buf, record| {
            writeln!(
                buf,
                "[tennicam {} | segment_id: {} | {} {}] {}",
                command,
                segment_id,
                record.level(),
                buf.timestamp_seconds(),
                record.args()
            )
        })
        .init();
}

fn main() -> ExitCode {
    let args = TennicamArgs::parse();
    init_logger(args.command.name(), args.command.segment_id().to_string());

    let token = CancellationToken::new();
    // The editing session blocks on stdin, Ctrl+C has to kill it.
    if !matches!(args.command, CommandTask::Transform(_)) {
        if let Err(e) = install_interrupt_handler(&token) {
            error!("failed to install the interrupt handler: {e}");
            return ExitCode::FAILURE;
        }
    }

    let result = match args.command {
        CommandTask::Serve(cmd) => serve(cmd, &token),
        CommandTask::Print(cmd) => print(cmd, &token),
        CommandTask::Log(cmd) => log(cmd, &token),
        CommandTask::Display(cmd) => display(cmd, &token),
        CommandTask::Mirror(cmd) => mirror(cmd, &token),
        CommandTask::Transform(cmd) => transform(cmd),
    };

    match result {
        Ok(()) => {
            info!("exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn check_frequency(frequency: f64) -> Result<f64, Box<dyn Error>> {
    if frequency.is_finite() && frequency > 0.0 {
        Ok(frequency)
    } else {
        Err(format!("frequency should be a positive number of Hz, got {frequency}").into())
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration, Box<dyn Error>> {
    Duration::try_from_secs_f64(value).map_err(|e| format!("invalid {name} {value}: {e}").into())
}

/// Subscribes to a segment with the timeouts of `run`.
fn subscribe<T>(
    name: &str,
    address: &str,
    run: &LoopArgs,
) -> Result<SegmentSource<T>, Box<dyn Error>>
where
    T: Clone + serde::de::DeserializeOwned + Send + 'static,
{
    let read_timeout = seconds("read timeout", run.read_timeout)?;
    let startup_timeout = run
        .startup_timeout
        .map(|t| seconds("startup timeout", t))
        .transpose()?;
    let source = SegmentSource::connect(name, address, read_timeout)
        .map_err(|e| format!("failed to subscribe to {name} at {address}: {e}"))?;
    Ok(source.with_startup_timeout(startup_timeout))
}

fn load_config(path: Option<&Path>) -> Result<DriverConfig, Box<dyn Error>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_file);
    let config = DriverConfig::from_file(&path)?;
    info!("using configuration {}", path.display());
    Ok(config)
}

fn serve(cmd: ServeCommand, token: &CancellationToken) -> CmdResult {
    let frequency = check_frequency(cmd.frequency)?;
    let config = load_config(cmd.config.as_deref())?;

    let publisher = SegmentPublisher::<Ball>::bind(
        cmd.segment.segment_id.clone(),
        cmd.segment.segment_address.as_str(),
    )?;
    let feed = FrameFeed::start(config.url());
    let mut standalone =
        Standalone::new(Driver::new(config.transform), feed, publisher, frequency)?;

    let live = LiveTransformFile::new(&cmd.shm_dir, &cmd.segment.segment_id);
    if cmd.active_transform {
        live.init(&config.transform)?;
        info!("live transform at {}", live.path().display());
        standalone = standalone.with_live_transform(Box::new(live.clone()));
    }

    let result = standalone.run(token, cmd.ticks);

    if cmd.active_transform {
        if let Err(e) = live.remove() {
            error!("{} : received error {}.", live.path().display(), e);
        }
    }
    result?;
    Ok(())
}

fn print(cmd: PrintCommand, token: &CancellationToken) -> CmdResult {
    let frequency = check_frequency(cmd.frequency)?;
    let source = subscribe::<Ball>(&cmd.segment.segment_id, &cmd.segment.segment_address, &cmd.run)?;

    if !cmd.tui {
        let control = tools::print(frequency, boxed_sample_source(source))
            .sink(Box::new(TerminalSink::stdout()))
            .cancellation(token.clone())
            .max_ticks(cmd.run.ticks)
            .build()?;
        control.run()?;
        return Ok(());
    }

    let state = MonitorState::new();
    let sink = MonitorSink::new(state.clone());
    let ticks = cmd.run.ticks;
    let result = monitor(&cmd.segment.segment_id, state, token.clone(), move |stop| {
        tools::print(frequency, boxed_sample_source(source))
            .sink(Box::new(sink))
            .cancellation(stop)
            .max_ticks(ticks)
            .build()?
            .run()
    })?;
    result?;
    Ok(())
}

fn log(cmd: LogCommand, token: &CancellationToken) -> CmdResult {
    let frequency = check_frequency(cmd.frequency)?;
    let path = cmd.outfile.clone().unwrap_or_else(|| unique_path(DEFAULT_LOG_DIR));

    let ball = subscribe::<Ball>(&cmd.segment.segment_id, &cmd.segment.segment_address, &cmd.run)?;
    let (robot, metadata) = match &cmd.robot_segment_id {
        Some(robot_segment_id) => {
            let robot =
                subscribe::<JointState>(robot_segment_id, &cmd.robot_address, &cmd.run)?;
            let robot_position: [f64; 4] = cmd
                .robot_position
                .as_slice()
                .try_into()
                .map_err(|_| "robot position should have 4 values")?;
            let metadata = LogMetadata {
                robot_position,
                robot_orientation: cmd.robot_orientation.clone(),
            };
            (Some(boxed_sample_source(robot)), Some(metadata))
        }
        None => (None, None),
    };

    let sink = LogSink::create(&path, metadata.as_ref())
        .map_err(|e| format!("failed to create {}: {e}", path.display()))?;
    info!("logging to {}", path.display());

    let control = tools::log(frequency, boxed_sample_source(ball), robot)
        .sink(Box::new(sink))
        .cancellation(token.clone())
        .max_ticks(cmd.run.ticks)
        .build()?;
    control.run()?;
    info!("log written to {}", path.display());
    Ok(())
}

fn display(cmd: DisplayCommand, token: &CancellationToken) -> CmdResult {
    let frequency = check_frequency(cmd.frequency)?;
    let ball = subscribe::<Ball>(&cmd.segment.segment_id, &cmd.segment.segment_address, &cmd.run)?;
    let simulation = SimulationSink::connect(
        cmd.simulation_id.clone(),
        cmd.simulation_address.as_str(),
        Duration::from_secs_f64(1.0 / frequency),
    )
    .map_err(|e| format!("failed to connect to simulation {}: {e}", cmd.simulation_id))?;

    let control = tools::display(frequency, boxed_sample_source(ball))
        .sink(Box::new(simulation))
        .cancellation(token.clone())
        .max_ticks(cmd.run.ticks)
        .build()?;
    control.run()?;
    Ok(())
}

fn mirror(cmd: MirrorCommand, token: &CancellationToken) -> CmdResult {
    let frequency = check_frequency(cmd.frequency)?;
    let robot = subscribe::<JointState>(&cmd.robot_segment_id, &cmd.robot_address, &cmd.run)?;
    let ball = subscribe::<Ball>(&cmd.segment.segment_id, &cmd.segment.segment_address, &cmd.run)?;
    let simulation = SimulationSink::connect(
        cmd.simulation_id.clone(),
        cmd.simulation_address.as_str(),
        Duration::from_secs_f64(1.0 / frequency),
    )
    .map_err(|e| format!("failed to connect to simulation {}: {e}", cmd.simulation_id))?;

    let robot = boxed_sample_source(robot);
    let control = tools::mirror(frequency, robot, boxed_sample_source(ball))
        .sink(Box::new(simulation))
        .sink(Box::new(JointsLogSink))
        .cancellation(token.clone())
        .max_ticks(cmd.run.ticks)
        .build()?;
    control.run()?;
    Ok(())
}

fn transform(cmd: TransformCommand) -> CmdResult {
    let live = LiveTransformFile::new(&cmd.shm_dir, &cmd.segment_id);
    if !live.exists() {
        return Err(format!(
            "no live transform at {}, is `tennicam serve --active-transform` running for segment {}?",
            live.path().display(),
            cmd.segment_id
        )
        .into());
    }
    let config_file = cmd.config.clone().unwrap_or_else(default_config_file);
    // Fails early on a missing or broken file rather than after the edit.
    DriverConfig::from_file(&config_file)?;

    let stdin = io::stdin();
    let outcome = TransformSession::new(&live, &config_file, stdin.lock(), io::stdout()).run()?;
    if outcome.saved {
        info!("transform saved to {}", config_file.display());
    }
    Ok(())
}
