//! Sends balls and joint states to a simulation display, as newline-delimited
//! JSON commands:
//!
//! ```text
//! {"command":"ball","position":[..],"velocity":[..],"duration_us":10000,"mode":"overwrite"}
//! {"command":"joints","positions":[..],"velocities":[..]}
//! ```
//!
//! A ball command asks the display to move its ball to `position` over
//! `duration_us`, replacing whatever command it was executing.

use crate::observation::{Ball, CombinedRecord, JointState, Sample};
use crate::sink::{Sink, SinkError};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    io::{self, BufWriter, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Overwrite,
    Queue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    Ball {
        position: [f64; 3],
        velocity: [f64; 3],
        duration_us: u64,
        mode: Mode,
    },
    Joints {
        positions: Vec<f64>,
        velocities: Vec<f64>,
    },
}

/// A [`Sink`] driving the simulation display. Balls the tracking did not
/// detect are not sent, the simulated ball stays where it was.
pub struct SimulationSink<W: Write> {
    name: String,
    writer: W,
    duration: Duration,
}

impl SimulationSink<BufWriter<TcpStream>> {
    /// Connects to the display `name` listening on `address`. Ball commands
    /// last `duration`, typically the period of the loop feeding the sink.
    pub fn connect(
        name: impl Into<String>,
        address: impl ToSocketAddrs,
        duration: Duration,
    ) -> io::Result<Self> {
        let name = name.into();
        let stream = TcpStream::connect(address)?;
        stream.set_nodelay(true)?;
        info!("{} : connected to simulation at {}", name, stream.peer_addr()?);
        Ok(SimulationSink::new(name, BufWriter::new(stream), duration))
    }
}

impl<W: Write> SimulationSink<W> {
    pub fn new(name: impl Into<String>, writer: W, duration: Duration) -> Self {
        SimulationSink {
            name: name.into(),
            writer,
            duration,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn ball_command(&self, ball: &Ball) -> Command {
        Command::Ball {
            position: ball.position,
            velocity: ball.velocity,
            duration_us: self.duration.as_micros() as u64,
            mode: Mode::Overwrite,
        }
    }

    fn joints_command(joints: &JointState) -> Command {
        Command::Joints {
            positions: joints.positions.clone(),
            velocities: joints.velocities.clone(),
        }
    }

    fn send(&mut self, commands: &[Command]) -> Result<(), SinkError> {
        for command in commands {
            serde_json::to_writer(&mut self.writer, command)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn commands_for_ball(&self, ball: &Ball) -> Vec<Command> {
        if ball.is_valid() {
            vec![self.ball_command(ball)]
        } else {
            debug!("{} : not sending undetected ball", self.name);
            Vec::new()
        }
    }
}

impl<W: Write> fmt::Display for SimulationSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimulationSink({})", self.name)
    }
}

impl<W: Write> Sink<Ball> for SimulationSink<W> {
    fn dispatch(&mut self, record: &Ball) -> Result<(), SinkError> {
        let commands = self.commands_for_ball(record);
        self.send(&commands)
    }
}

impl<W: Write> Sink<Sample> for SimulationSink<W> {
    fn dispatch(&mut self, record: &Sample) -> Result<(), SinkError> {
        let commands = match record {
            Sample::Ball(ball) => self.commands_for_ball(ball),
            Sample::Joints(joints) => vec![Self::joints_command(joints)],
        };
        self.send(&commands)
    }
}

impl<W: Write> Sink<CombinedRecord> for SimulationSink<W> {
    fn dispatch(&mut self, record: &CombinedRecord) -> Result<(), SinkError> {
        let mut commands = Vec::with_capacity(2);
        if let Some(joints) = &record.joints {
            commands.push(Self::joints_command(joints));
        }
        commands.extend(self.commands_for_ball(&record.ball));
        self.send(&commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    fn ball(id: i64) -> Ball {
        Ball {
            ball_id: id,
            time_stamp: 0,
            position: [1.0, 2.0, 3.0],
            velocity: [0.5, 0.0, -0.5],
        }
    }

    fn commands(bytes: Vec<u8>) -> Vec<Command> {
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn ball_command_format() {
        let mut sink = SimulationSink::new("test", Vec::new(), Duration::from_millis(10));
        Sink::<Ball>::dispatch(&mut sink, &ball(0)).unwrap();
        assert_eq!(
            String::from_utf8(sink.into_inner()).unwrap(),
            "{\"command\":\"ball\",\"position\":[1.0,2.0,3.0],\"velocity\":[0.5,0.0,-0.5],\"duration_us\":10000,\"mode\":\"overwrite\"}\n"
        );
    }

    #[test]
    fn undetected_balls_are_not_sent() {
        let mut sink = SimulationSink::new("test", Vec::new(), Duration::from_millis(10));
        Sink::<Sample>::dispatch(&mut sink, &Sample::Ball(Ball::invalid(5))).unwrap();
        assert!(sink.into_inner().is_empty());
    }

    #[test]
    fn combined_record_sends_joints_then_ball() {
        let mut sink = SimulationSink::new("test", Vec::new(), Duration::from_micros(3333));
        let record = CombinedRecord {
            ball: ball(1),
            joints: Some(JointState {
                time_stamp: 0,
                positions: vec![0.1, 0.2],
                velocities: vec![0.0, 0.0],
            }),
        };
        Sink::<CombinedRecord>::dispatch(&mut sink, &record).unwrap();
        let sent = commands(sink.into_inner());
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0],
            Command::Joints {
                positions: vec![0.1, 0.2],
                velocities: vec![0.0, 0.0]
            }
        );
        assert!(matches!(sent[1], Command::Ball { duration_us: 3333, mode: Mode::Overwrite, .. }));
    }

    #[test]
    fn commands_reach_the_display() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let mut sink =
            SimulationSink::connect("display", address, Duration::from_millis(10)).unwrap();
        let (stream, _) = listener.accept().unwrap();

        Sink::<Ball>::dispatch(&mut sink, &ball(0)).unwrap();
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).unwrap();
        let command: Command = serde_json::from_str(&line).unwrap();
        match command {
            Command::Ball { position, .. } => assert_eq!(position, [1.0, 2.0, 3.0]),
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(sink.to_string(), "SimulationSink(display)");
    }

    #[test]
    fn closed_display_is_a_sink_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let mut sink =
            SimulationSink::connect("display", address, Duration::from_millis(10)).unwrap();
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
        drop(listener);

        let mut failed = false;
        for _ in 0..100 {
            if Sink::<Ball>::dispatch(&mut sink, &ball(0)).is_err() {
                failed = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(failed);
    }
}
