//! Binary-crate wiring for the statetrans anomaly detector: CLI parsing,
//! configuration resolution, the `statetrans.log` sink, packet replay, and
//! the uplink client. The engine itself lives in `statetrans-core`.

pub mod cli;
pub mod config;
pub mod logger;
pub mod replay;
pub mod uplink;
