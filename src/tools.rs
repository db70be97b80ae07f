//! How each tool wires its sources into a [control loop](crate::control_loop).
//!
//! The publishers run at their own pace, usually faster than the tools that
//! drive a display. Those tools follow every source with [`Follow::Latest`],
//! so what they show lags the publisher by at most one period. The printer
//! and the logger follow the balls with [`Follow::Sequence`] so that no ball
//! is skipped.

use crate::control_loop::{combine, ControlLoopBuilder, Follow};
use crate::observation::{Ball, CombinedRecord, Sample};
use crate::source::Source;

/// A source of any shape, as registered with a control loop.
pub type BoxedSource = Box<dyn Source<Item = Sample>>;

/// Every ball, unchanged.
pub fn print(frequency: f64, balls: BoxedSource) -> ControlLoopBuilder<Sample> {
    ControlLoopBuilder::identity(frequency).source(balls)
}

/// Every ball, along with the robot's joint state at the time it is read.
pub fn log(
    frequency: f64,
    balls: BoxedSource,
    robot: Option<BoxedSource>,
) -> ControlLoopBuilder<CombinedRecord> {
    let builder =
        ControlLoopBuilder::new(frequency, Box::new(combine::ball_with_joints)).source(balls);
    match robot {
        Some(robot) => builder.source_following(robot, Follow::Latest),
        None => builder,
    }
}

/// The most recent ball.
pub fn display(frequency: f64, balls: BoxedSource) -> ControlLoopBuilder<Ball> {
    ControlLoopBuilder::new(frequency, Box::new(combine::ball))
        .source_following(balls, Follow::Latest)
}

/// The most recent joint state of the robot and the most recent ball.
pub fn mirror(
    frequency: f64,
    robot: BoxedSource,
    balls: BoxedSource,
) -> ControlLoopBuilder<CombinedRecord> {
    ControlLoopBuilder::new(frequency, Box::new(combine::joints_with_ball))
        .source_following(robot, Follow::Latest)
        .source_following(balls, Follow::Latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::JointState;
    use crate::sink::{Sink, SinkError};
    use crate::source::{SourceError, Stamped};
    use std::{
        cell::{Cell, RefCell},
        fmt,
        rc::Rc,
        time::Duration,
    };

    /// A publisher that gets `step` samples further every time it is read.
    struct Racing {
        newest: Rc<Cell<u64>>,
        step: u64,
        joints: bool,
    }

    impl Racing {
        fn new(step: u64, joints: bool) -> (Self, Rc<Cell<u64>>) {
            let newest = Rc::new(Cell::new(0));
            let source = Racing {
                newest: Rc::clone(&newest),
                step,
                joints,
            };
            (source, newest)
        }

        fn sample(&self, sequence: u64) -> Stamped<Sample> {
            let value = if self.joints {
                Sample::Joints(JointState {
                    time_stamp: sequence as i64,
                    positions: vec![0.0; 4],
                    velocities: vec![0.0; 4],
                })
            } else {
                Sample::Ball(Ball {
                    ball_id: sequence as i64,
                    time_stamp: sequence as i64,
                    position: [0.0; 3],
                    velocity: [0.0; 3],
                })
            };
            Stamped { sequence, value }
        }

        fn advance(&self) -> u64 {
            self.newest.set(self.newest.get() + self.step);
            self.newest.get()
        }
    }

    impl fmt::Display for Racing {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "racing")
        }
    }

    impl Source for Racing {
        type Item = Sample;

        fn latest(&mut self) -> Result<Stamped<Sample>, SourceError> {
            let newest = self.advance();
            Ok(self.sample(newest))
        }

        fn read(&mut self, sequence: u64) -> Result<Stamped<Sample>, SourceError> {
            if sequence > self.advance() {
                return Err(SourceError::Unavailable {
                    source: "racing".to_string(),
                    sequence,
                    waited: Duration::ZERO,
                });
            }
            Ok(self.sample(sequence))
        }
    }

    struct Collect<R>(Rc<RefCell<Vec<R>>>);

    impl<R> fmt::Display for Collect<R> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "collect")
        }
    }

    impl<R: Clone> Sink<R> for Collect<R> {
        fn dispatch(&mut self, record: &R) -> Result<(), SinkError> {
            self.0.borrow_mut().push(record.clone());
            Ok(())
        }
    }

    fn collect<R>() -> (Box<Collect<R>>, Rc<RefCell<Vec<R>>>) {
        let records = Rc::new(RefCell::new(Vec::new()));
        (Box::new(Collect(Rc::clone(&records))), records)
    }

    #[test]
    fn display_shows_the_newest_ball() {
        let (balls, newest) = Racing::new(5, false);
        let (sink, records) = collect::<Ball>();

        display(10_000.0, Box::new(balls))
            .sink(sink)
            .max_ticks(Some(3))
            .build()
            .unwrap()
            .run()
            .unwrap();

        let ids: Vec<i64> = records.borrow().iter().map(|b| b.ball_id).collect();
        assert_eq!(ids, vec![10, 15, 20]);
        assert_eq!(newest.get(), 20);
    }

    #[test]
    fn mirror_shows_the_newest_robot_and_ball() {
        let (robot, robot_newest) = Racing::new(3, true);
        let (balls, balls_newest) = Racing::new(5, false);
        let (sink, records) = collect::<CombinedRecord>();

        mirror(10_000.0, Box::new(robot), Box::new(balls))
            .sink(sink)
            .max_ticks(Some(2))
            .build()
            .unwrap()
            .run()
            .unwrap();

        let records = records.borrow();
        let last = records.last().unwrap();
        assert_eq!(last.ball.ball_id as u64, balls_newest.get());
        let joints = last.joints.as_ref().unwrap();
        assert_eq!(joints.time_stamp as u64, robot_newest.get());
    }

    #[test]
    fn log_skips_no_ball() {
        let (balls, newest) = Racing::new(5, false);
        let (robot, robot_newest) = Racing::new(3, true);
        let (sink, records) = collect::<CombinedRecord>();

        log(10_000.0, Box::new(balls), Some(Box::new(robot)))
            .sink(sink)
            .max_ticks(Some(3))
            .build()
            .unwrap()
            .run()
            .unwrap();

        let records = records.borrow();
        let ids: Vec<i64> = records.iter().map(|r| r.ball.ball_id).collect();
        // starts after the latest ball at startup, one ball per tick
        assert_eq!(ids, vec![6, 7, 8]);
        assert!(newest.get() > 8);
        let robot_stamp = records[2].joints.as_ref().unwrap().time_stamp;
        assert_eq!(robot_stamp as u64, robot_newest.get());
    }

    #[test]
    fn log_without_robot() {
        let (balls, _) = Racing::new(1, false);
        let (sink, records) = collect::<CombinedRecord>();

        log(10_000.0, Box::new(balls), None)
            .sink(sink)
            .max_ticks(Some(2))
            .build()
            .unwrap()
            .run()
            .unwrap();

        assert!(records.borrow().iter().all(|r| r.joints.is_none()));
        assert_eq!(records.borrow().len(), 2);
    }
}
