//! tennicam is a visual ball tracking system: a vision server detects a
//! table tennis ball in camera frames and reports its position. This crate
//! is the client side of it. It receives the server's frames, turns them
//! into balls (position in the robot frame, velocity, id) and publishes them
//! on a segment, from which the other tools read them to print them, log them
//! to a file, or display them in a simulation, optionally along with the
//! state of a robot.
//!
//! All the tools but the publisher are built around the same
//! [control loop](control_loop): read the next sample of every source,
//! combine them into one record, hand it to every sink, wait for the next
//! tick, until interrupted.
//!
//! The transform moving the observed positions into the robot frame can be
//! edited while the publisher runs, see [`transform_session`].

pub mod args;
pub mod cancel;
pub mod control_loop;
pub mod driver;
pub mod driver_config;
pub mod dummy_server;
pub mod frame_feed;
pub mod gui;
pub mod log_format;
pub mod observation;
pub mod rate;
pub mod segment;
pub mod simulation;
pub mod sink;
pub mod source;
pub mod standalone;
pub mod terminal;
pub mod tools;
pub mod transform;
pub mod transform_session;
