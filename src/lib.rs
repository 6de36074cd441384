//! quadro2 — sensor-fusion and remote telemetry core for a small autonomous
//! multirotor flight controller (spec.md §1).
//!
//! Two independent subsystems share a process: the [`fusion`] core turns
//! raw sensor readings into a filtered Z/Y/X world-frame state estimate via
//! three [`ekf`]-backed axis filters fed by [`sensors`]; the [`remote`] core
//! maintains one bidirectional text pipe to a web client, serving
//! [`assets`] and mirroring the process's logs through [`logging`].

pub mod assets;
pub mod config;
pub mod ekf;
pub mod error;
pub mod fusion;
pub mod logging;
pub mod matrix;
pub mod remote;
pub mod sensors;
