//! Turns the frames of the tennicam server into [`Ball`]s: the observed
//! position is moved into the transform's frame and the velocity is
//! estimated by finite differences.

use crate::observation::{Ball, TimeStamp};
use crate::transform::Transform;

use serde::{Deserialize, Serialize};

/// One message of the tennicam server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame counter of the server.
    pub num: i64,
    /// Nanoseconds.
    pub time: TimeStamp,
    /// Processing time of the frame, as reported by the server.
    #[serde(default)]
    pub proc_time: i64,
    /// Ball position, `None` when no ball was detected.
    pub obs: Option<[f64; 3]>,
}

#[derive(Debug, Clone)]
pub struct Driver {
    transform: Transform,
    next_ball_id: i64,
    previous: Option<(TimeStamp, [f64; 3])>,
}

impl Driver {
    pub fn new(transform: Transform) -> Self {
        Driver {
            transform,
            next_ball_id: 0,
            previous: None,
        }
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Applies `transform` to the frames processed from now on. The velocity
    /// history is kept.
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    /// Converts a frame. Frames without an observation give an invalid ball
    /// and break the velocity history.
    pub fn process(&mut self, frame: &Frame) -> Ball {
        let Some(observed) = frame.obs else {
            self.previous = None;
            return Ball::invalid(frame.time);
        };

        let position = self.transform.apply(observed);
        let velocity = self.velocity(frame.time, position);
        let ball_id = self.next_ball_id;
        self.next_ball_id += 1;

        Ball {
            ball_id,
            time_stamp: frame.time,
            position,
            velocity,
        }
    }

    fn velocity(&mut self, time_stamp: TimeStamp, position: [f64; 3]) -> [f64; 3] {
        let previous = self.previous.replace((time_stamp, position));
        match previous {
            Some((previous_time, previous_position)) if time_stamp > previous_time => {
                let dt = (time_stamp - previous_time) as f64 * 1e-9;
                let mut velocity = [0.0; 3];
                for ((v, p), previous) in velocity.iter_mut().zip(position).zip(previous_position) {
                    *v = (p - previous) / dt;
                }
                velocity
            }
            _ => [0.0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::INVALID_BALL_ID;

    fn frame(num: i64, time: TimeStamp, obs: Option<[f64; 3]>) -> Frame {
        Frame {
            num,
            time,
            proc_time: 0,
            obs,
        }
    }

    fn assert_close(a: [f64; 3], b: [f64; 3]) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-9, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn decode_frames() {
        let with_ball: Frame =
            serde_json::from_str(r#"{"num": 3, "time": 1000, "proc_time": 12, "obs": [1.0, 2.0, 3.0]}"#)
                .unwrap();
        assert_eq!(
            with_ball,
            Frame {
                proc_time: 12,
                ..frame(3, 1000, Some([1.0, 2.0, 3.0]))
            }
        );
        let without: Frame = serde_json::from_str(r#"{"num": 4, "time": 2000, "obs": null}"#).unwrap();
        assert_eq!(without.obs, None);
    }

    #[test]
    fn finite_difference_velocity() {
        let mut driver = Driver::new(Transform::default());
        let first = driver.process(&frame(0, 1_000_000_000, Some([0.0, 0.0, 0.0])));
        assert_eq!(first.ball_id, 0);
        assert_eq!(first.velocity, [0.0; 3]);

        // 10 ms later
        let second = driver.process(&frame(1, 1_010_000_000, Some([0.01, -0.02, 0.0])));
        assert_eq!(second.ball_id, 1);
        assert_close(second.velocity, [1.0, -2.0, 0.0]);
    }

    #[test]
    fn missing_observation_resets_history() {
        let mut driver = Driver::new(Transform::default());
        driver.process(&frame(0, 0, Some([0.0; 3])));
        let invalid = driver.process(&frame(1, 10, None));
        assert_eq!(invalid.ball_id, INVALID_BALL_ID);
        assert_eq!(invalid.time_stamp, 10);
        assert!(!invalid.is_valid());

        let after = driver.process(&frame(2, 20, Some([5.0, 5.0, 5.0])));
        assert_eq!(after.velocity, [0.0; 3]);
        // invalid balls do not consume ids
        assert_eq!(after.ball_id, 1);
    }

    #[test]
    fn non_increasing_time_gives_zero_velocity() {
        let mut driver = Driver::new(Transform::default());
        driver.process(&frame(0, 100, Some([0.0; 3])));
        let ball = driver.process(&frame(1, 100, Some([1.0; 3])));
        assert_eq!(ball.velocity, [0.0; 3]);
    }

    #[test]
    fn positions_are_transformed() {
        let mut driver = Driver::new(Transform::new([1.0, 0.0, 0.0], [0.0; 3]));
        let ball = driver.process(&frame(0, 0, Some([1.0, 2.0, 3.0])));
        assert_eq!(ball.position, [2.0, 2.0, 3.0]);

        driver.set_transform(Transform::new([0.0, 0.0, -1.0], [0.0; 3]));
        let ball = driver.process(&frame(1, 1_000_000_000, Some([1.0, 2.0, 3.0])));
        assert_eq!(ball.position, [1.0, 2.0, 2.0]);
        assert_close(ball.velocity, [-1.0, 0.0, -1.0]);
    }
}
