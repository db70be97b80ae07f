//! The samples that flow through the tennicam tools: balls as published by
//! the visual tracking, joint states as published by a robot driver, and the
//! records the control loop builds out of them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Nanoseconds since an implementation-defined epoch.
pub type TimeStamp = i64;
pub type Radian = f64;

/// Identifier given to a ball the tracking could not detect.
pub const INVALID_BALL_ID: i64 = -1;

/// A single ball observation. `ball_id` is [`INVALID_BALL_ID`] when the
/// visual tracking did not detect anything for this frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    pub ball_id: i64,
    pub time_stamp: TimeStamp,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
}

impl Ball {
    /// A ball with the invalid id, observed at `time_stamp`.
    pub fn invalid(time_stamp: TimeStamp) -> Self {
        Ball {
            ball_id: INVALID_BALL_ID,
            time_stamp,
            position: [0.0; 3],
            velocity: [0.0; 3],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.ball_id >= 0
    }
}

impl fmt::Display for Ball {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.position;
        let [dx, dy, dz] = self.velocity;
        write!(
            f,
            "ball {} | time stamp {} | position ({:.3}, {:.3}, {:.3}) | velocity ({:.3}, {:.3}, {:.3})",
            self.ball_id, self.time_stamp, x, y, z, dx, dy, dz
        )
    }
}

/// Joint positions (radians) and velocities (radians per second) of a robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    pub time_stamp: TimeStamp,
    pub positions: Vec<Radian>,
    pub velocities: Vec<Radian>,
}

impl fmt::Display for JointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let positions: Vec<String> = self.positions.iter().map(|p| format!("{p:.2}")).collect();
        let velocities: Vec<String> = self.velocities.iter().map(|v| format!("{v:.2}")).collect();
        write!(f, "{} | {}", positions.join(" "), velocities.join(" "))
    }
}

/// Whatever a source of the control loop can produce. The loop handles
/// differently shaped sources through this one type, and the combine
/// functions match on it explicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Ball(Ball),
    Joints(JointState),
}

impl From<Ball> for Sample {
    fn from(ball: Ball) -> Self {
        Sample::Ball(ball)
    }
}

impl From<JointState> for Sample {
    fn from(joints: JointState) -> Self {
        Sample::Joints(joints)
    }
}

/// One ball together with, when a robot is involved, the robot's joint state
/// read during the same tick. Built fresh every tick and handed to the sinks.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedRecord {
    pub ball: Ball,
    pub joints: Option<JointState>,
}

impl From<Ball> for CombinedRecord {
    fn from(ball: Ball) -> Self {
        CombinedRecord { ball, joints: None }
    }
}
