//! # Kobuki Serial Protocol Module
//!
//! Implementation of the Kobuki base wire protocol.
//!
//! This module handles:
//! - Frame synchronization and validation (0xAA 0x55 header, XOR checksum)
//! - Splitting validated packets into typed sub-packets
//! - Decoding sensor sub-packets (core sensors, inertia, cliff, ...)
//! - Encoding velocity commands into base-control packets

pub mod packet;
pub mod checksum;
pub mod framer;
pub mod demux;
pub mod decoder;
pub mod encoder;
