//! # mudlink-cli — one-shot driver
//!
//! Connects to a host with the `mudlink-core` engine, runs the commands
//! given on the command line, prints each response and disconnects.

pub mod config;
pub mod target;
