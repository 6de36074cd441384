//! Crate-wide error taxonomy (spec.md §7).
//!
//! The cores never propagate a failure up through a callback; these types
//! exist so each failure site can log a precise cause before recovering
//! locally. `main` is the only place `anyhow` appears, at the process
//! boundary, matching the teacher's `persistence.rs`.

use thiserror::Error;

/// Failures from the Scalar EKF Engine (§4.1, §7 "Numerical failure in EKF").
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum EkfError {
    #[error("matrix operation failed")]
    ComputationFailed,
    #[error("dimension mismatch or unknown measurement tag")]
    ParameterError,
}

/// Failures from a `SensorDriver` during init (§4.3 "driver initialization errors
/// are reported by return").
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver {0} failed to initialize")]
    InitFailed(&'static str),
}

/// Failures from the Embedded-Asset Streamer (§4.5 "Asset not found").
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("asset not found")]
    NotFound,
}
