//! Axis Fuser (spec.md §4.2, ~30% of core — instantiated three times: Z, Y, X).
//!
//! Each `AxisFuser` owns one two-state EKF (`x` = [position, velocity]) and
//! fuses every measurement tagged for its axis through the scalar EKF engine
//! in [`crate::ekf`]. Grounded on `original_source/src/sensing/sensors.c`'s
//! `sensors_fuseZ`/`sensors_fuseY`/`sensors_fuseX` trio, which differ only in
//! tuning constants and the set of sensors fused per axis (see the row
//! mapping table in spec.md §4.2).

use crate::config::AxisTuning;
use crate::ekf::{self, CorrectScratch, PredictScratch};
use crate::error::EkfError;
use crate::matrix::Matrix;

/// Variance assigned to a measurement row not targeted by the current
/// `correct` call. `lazy_correct`'s "zero the unused rows of H" trick makes
/// the Kalman gain column for that row exactly zero regardless of this
/// value (P·Hᵀ's corresponding column is the zero vector), so it only has to
/// be large enough to keep the innovation covariance `S` non-singular for a
/// from-scratch Gauss-Jordan inverse — the original's `eekf` library is not
/// in `original_source`, so this is a disclosed adaptation rather than a
/// transcription of its internal handling of unused rows.
const UNUSED_VARIANCE: f64 = 1.0e6;

/// World-frame axis an `AxisFuser` estimates position/velocity along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisId {
    Z,
    Y,
    X,
}

/// Measurement kind carried by a `MeasurementEvent` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    Acceleration,
    Orientation,
    Altimeter,
    Ultrasonic,
    Position,
    GroundSpeed,
}

/// One axis's double-integrator EKF plus its fixed-shape scratch space.
pub struct AxisFuser {
    axis: AxisId,
    x: Matrix,
    p: Matrix,
    z: Matrix,
    r: Matrix,
    last_timestamp: i64,
    tuning: AxisTuning,
    variances: Vec<f64>,
    predict_scratch: PredictScratch,
    correct_scratch: CorrectScratch,
}

impl AxisFuser {
    /// `variances` is indexed by row per the spec.md §4.2 table: Z has 3
    /// rows (ultrasonic, altimeter, gnss-altitude), Y has 2 (gnss-lat,
    /// gnss-groundspeed), X has 1 (gnss-lon).
    pub fn new(axis: AxisId, tuning: AxisTuning, variances: Vec<f64>) -> Self {
        let m = variances.len();
        let mut fuser = Self {
            axis,
            x: Matrix::zeros(2, 1),
            p: Matrix::zeros(2, 2),
            z: Matrix::zeros(m, 1),
            r: Matrix::zeros(m, m),
            last_timestamp: 0,
            tuning,
            variances,
            predict_scratch: PredictScratch::new(2),
            correct_scratch: CorrectScratch::new(2, m),
        };
        fuser.reset();
        fuser
    }

    pub fn axis(&self) -> AxisId {
        self.axis
    }

    /// (position, velocity).
    pub fn state(&self) -> (f64, f64) {
        (self.x[(0, 0)], self.x[(1, 0)])
    }

    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    /// Resets `x` to zero and `P` to the bootstrapping pattern (position
    /// variance 0, velocity variance 1). `lastTimestamp` is deliberately
    /// untouched — the original resets only state, covariance, and the
    /// measurement vector, not the prediction clock (spec.md §4.2 `reset()`).
    pub fn reset(&mut self) {
        self.x.fill(0.0);
        self.p.fill(0.0);
        self.p[(1, 1)] = 1.0;
        self.z.fill(0.0);
    }

    /// Time-update driven by the axial component of a linear-acceleration
    /// measurement. Drops (no-op, not an error) out-of-order timestamps.
    pub fn predict(&mut self, accel: f64, timestamp: i64) -> Result<(), EkfError> {
        if timestamp < self.last_timestamp {
            return Ok(());
        }
        let dt = (timestamp - self.last_timestamp) as f64 / 1_000_000.0;
        self.last_timestamp = timestamp;

        let mut u = Matrix::zeros(1, 1);
        u[(0, 0)] = accel;

        let q_mag = accel.abs() + self.tuning.q_base;
        let mut q = Matrix::zeros(2, 2);
        q[(0, 0)] = 0.25 * q_mag * dt.powi(4);
        q[(0, 1)] = 0.5 * q_mag * dt.powi(3);
        q[(1, 0)] = 0.5 * q_mag * dt.powi(3);
        q[(1, 1)] = q_mag * dt * dt;

        let vel_limit = self.tuning.vel_limit;
        let result = ekf::predict(
            &mut self.x,
            &mut self.p,
            &u,
            &q,
            &mut self.predict_scratch,
            |xk, uk, xp, jf| {
                jf[(0, 0)] = 1.0;
                jf[(0, 1)] = dt;
                jf[(1, 0)] = 0.0;
                jf[(1, 1)] = 1.0;
                jf.mul_into(xk, xp).ok_or(EkfError::ComputationFailed)?;
                xp[(0, 0)] += 0.5 * dt * dt * uk[(0, 0)];
                xp[(1, 0)] += dt * uk[(0, 0)];
                if xp[(1, 0)] > vel_limit {
                    xp[(1, 0)] = vel_limit;
                } else if xp[(1, 0)] < -vel_limit {
                    xp[(1, 0)] = -vel_limit;
                }
                Ok(())
            },
        );
        if let Err(err) = result {
            tracing::error!(axis = ?self.axis, ?err, "predict failed");
            return Err(err);
        }
        let (pos, vel) = self.state();
        tracing::trace!(axis = ?self.axis, pos, vel, "predicted");
        Ok(())
    }

    /// Maps a measurement kind to the row of `z`/`variances` it corrects and
    /// the column of `x` (0 = position, 1 = velocity) it observes, or `None`
    /// if the kind is not fused on this axis (spec.md §4.2 table).
    ///
    /// `original_source`'s Y- and X-axis correction switches are missing
    /// `break` statements between cases (§9 REDESIGN FLAG) — a POSITION
    /// correction there falls through into the GROUNDSPEED case and, on X,
    /// falls all the way into `default: return`, so the X-axis correction
    /// call never actually ran. This match has explicit, non-fallthrough
    /// arms per the intended row mapping instead. GROUNDSPEED observes
    /// velocity, not position (`original_source/src/sensing/sensors.c`'s
    /// `Jh[1][1] = 1.0` for `SENSORS_GROUNDSPEED`) — every other fused kind
    /// observes position.
    fn active_row_and_column(&self, kind: MeasurementKind) -> Option<(usize, usize)> {
        use MeasurementKind::*;
        match self.axis {
            AxisId::Z => match kind {
                Ultrasonic => Some((0, 0)),
                Altimeter => Some((1, 0)),
                Position => Some((2, 0)),
                _ => None,
            },
            AxisId::Y => match kind {
                Position => Some((0, 0)),
                GroundSpeed => Some((1, 1)),
                _ => None,
            },
            AxisId::X => match kind {
                Position => Some((0, 0)),
                _ => None,
            },
        }
    }

    /// Lazy measurement-update: writes `value` into the row `kind` maps to
    /// on this axis, assigns that row's real sensor variance and every other
    /// row `UNUSED_VARIANCE`, and invokes [`ekf::lazy_correct`]. A `kind` not
    /// fused on this axis is a no-op (spec.md §3 invariant).
    pub fn correct(&mut self, kind: MeasurementKind, value: f64) -> Result<(), EkfError> {
        let Some((row, column)) = self.active_row_and_column(kind) else {
            tracing::trace!(axis = ?self.axis, ?kind, "tag not fused on this axis, ignoring");
            return Ok(());
        };

        self.z[(row, 0)] = value;
        self.r.fill(0.0);
        for i in 0..self.r.rows() {
            self.r[(i, i)] = UNUSED_VARIANCE;
        }
        self.r[(row, row)] = self.variances[row];

        let result = ekf::lazy_correct(
            &mut self.x,
            &mut self.p,
            &self.z,
            &self.r,
            &mut self.correct_scratch,
            |xk, zhat, jh| {
                jh.fill(0.0);
                jh[(row, column)] = 1.0;
                jh.mul_into(xk, zhat).ok_or(EkfError::ComputationFailed)?;
                Ok(())
            },
        );
        if let Err(err) = result {
            tracing::error!(axis = ?self.axis, ?kind, ?err, "correct failed");
            return Err(err);
        }
        let (pos, vel) = self.state();
        tracing::trace!(axis = ?self.axis, ?kind, value, pos, vel, "corrected");
        Ok(())
    }
}
