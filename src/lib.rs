//! # Kobuki Driver Library
//!
//! Serial protocol driver for Kobuki-style differential-drive bases.
//!
//! This library provides framing and decoding of the base's sensor stream,
//! wheel odometry, velocity command encoding and a connection handle that runs
//! the read loop on a tokio task and publishes typed events.

pub mod config;
pub mod driver;
pub mod error;
pub mod odometry;
pub mod protocol;
pub mod serial;
pub mod telemetry;
pub mod teleop;
