//! Runtime glue: configuration, fatal error capture, shard state, telemetry, and the
//! signal-driven runner.

pub mod config;
pub mod fatal;
pub mod runner;
pub mod state;
pub mod telemetry;
