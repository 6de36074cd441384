//! Scalar EKF Engine (spec.md §4.1, ~15% of core).
//!
//! Generic predict/correct over a caller-supplied transition and measurement
//! closure. The engine itself owns no matrices — `PredictScratch` and
//! `CorrectScratch` are allocated once by the caller (one `AxisFuser`) and
//! reused across every call, per the design note in spec.md §9 ("allocate
//! scratch once per fuser and pass by reference — do not per-call-allocate").
//!
//! Where the original C passes a `void* userData` into the transition and
//! measurement callbacks, the Rust port has no need for it: the caller's
//! closure simply captures whatever it needs (`dt` for transition, the
//! sensor tag for measurement).

use crate::error::EkfError;
use crate::matrix::Matrix;

/// Reusable scratch space for one `predict` call against an `n`-state system.
pub struct PredictScratch {
    xp: Matrix,
    jf: Matrix,
    fp: Matrix,
    ft: Matrix,
    fpft: Matrix,
}

impl PredictScratch {
    pub fn new(n: usize) -> Self {
        Self {
            xp: Matrix::zeros(n, 1),
            jf: Matrix::zeros(n, n),
            fp: Matrix::zeros(n, n),
            ft: Matrix::zeros(n, n),
            fpft: Matrix::zeros(n, n),
        }
    }
}

/// Reusable scratch space for one `lazy_correct` call against an `n`-state,
/// `m`-measurement system.
pub struct CorrectScratch {
    zhat: Matrix,
    h: Matrix,
    y: Matrix,
    ht: Matrix,
    pht: Matrix,
    hp: Matrix,
    hpht: Matrix,
    s: Matrix,
    s_inv: Matrix,
    k: Matrix,
    ky: Matrix,
    kh: Matrix,
    identity: Matrix,
    i_minus_kh: Matrix,
    x_new: Matrix,
    p_new: Matrix,
}

impl CorrectScratch {
    pub fn new(n: usize, m: usize) -> Self {
        Self {
            zhat: Matrix::zeros(m, 1),
            h: Matrix::zeros(m, n),
            y: Matrix::zeros(m, 1),
            ht: Matrix::zeros(n, m),
            pht: Matrix::zeros(n, m),
            hp: Matrix::zeros(m, n),
            hpht: Matrix::zeros(m, m),
            s: Matrix::zeros(m, m),
            s_inv: Matrix::zeros(m, m),
            k: Matrix::zeros(n, m),
            ky: Matrix::zeros(n, 1),
            kh: Matrix::zeros(n, n),
            identity: Matrix::identity(n),
            i_minus_kh: Matrix::zeros(n, n),
            x_new: Matrix::zeros(n, 1),
            p_new: Matrix::zeros(n, n),
        }
    }
}

/// Time-update: x' = f(x, u), P' = F·P·Fᵀ + Q.
///
/// `transition(x, u, xp, jf)` must fill `xp` with the predicted state and
/// `jf` with the transition Jacobian evaluated at `x`.
pub fn predict(
    x: &mut Matrix,
    p: &mut Matrix,
    u: &Matrix,
    q: &Matrix,
    scratch: &mut PredictScratch,
    mut transition: impl FnMut(&Matrix, &Matrix, &mut Matrix, &mut Matrix) -> Result<(), EkfError>,
) -> Result<(), EkfError> {
    transition(x, u, &mut scratch.xp, &mut scratch.jf)?;

    scratch
        .jf
        .mul_into(p, &mut scratch.fp)
        .ok_or(EkfError::ParameterError)?;
    scratch
        .jf
        .transpose_into(&mut scratch.ft)
        .ok_or(EkfError::ParameterError)?;
    scratch
        .fp
        .mul_into(&scratch.ft, &mut scratch.fpft)
        .ok_or(EkfError::ComputationFailed)?;
    scratch
        .fpft
        .add_into(q, p)
        .ok_or(EkfError::ComputationFailed)?;
    x.copy_from(&scratch.xp).ok_or(EkfError::ParameterError)?;
    Ok(())
}

/// Lazy measurement-update: ẑ = h(x), y = z - ẑ, S = H·P·Hᵀ + R,
/// K = P·Hᵀ·S⁻¹, x ← x + K·y, P ← (I - K·H)·P.
///
/// `measurement(x, zp, jh)` must fill `zp` with the predicted measurement and
/// `jh` with the measurement Jacobian — rows for sensors absent from this
/// update are left zero by the caller (the "lazy" form, see spec.md §4.2).
pub fn lazy_correct(
    x: &mut Matrix,
    p: &mut Matrix,
    z: &Matrix,
    r: &Matrix,
    scratch: &mut CorrectScratch,
    mut measurement: impl FnMut(&Matrix, &mut Matrix, &mut Matrix) -> Result<(), EkfError>,
) -> Result<(), EkfError> {
    measurement(x, &mut scratch.zhat, &mut scratch.h)?;

    z.sub_into(&scratch.zhat, &mut scratch.y)
        .ok_or(EkfError::ParameterError)?;
    scratch
        .h
        .transpose_into(&mut scratch.ht)
        .ok_or(EkfError::ParameterError)?;
    p.mul_into(&scratch.ht, &mut scratch.pht)
        .ok_or(EkfError::ComputationFailed)?;
    scratch
        .h
        .mul_into(p, &mut scratch.hp)
        .ok_or(EkfError::ComputationFailed)?;
    scratch
        .hp
        .mul_into(&scratch.ht, &mut scratch.hpht)
        .ok_or(EkfError::ComputationFailed)?;
    scratch
        .hpht
        .add_into(r, &mut scratch.s)
        .ok_or(EkfError::ComputationFailed)?;
    scratch
        .s
        .invert_into(&mut scratch.s_inv)
        .ok_or(EkfError::ComputationFailed)?;
    scratch
        .pht
        .mul_into(&scratch.s_inv, &mut scratch.k)
        .ok_or(EkfError::ComputationFailed)?;
    scratch
        .k
        .mul_into(&scratch.y, &mut scratch.ky)
        .ok_or(EkfError::ComputationFailed)?;
    x.add_into(&scratch.ky, &mut scratch.x_new)
        .ok_or(EkfError::ComputationFailed)?;
    scratch
        .k
        .mul_into(&scratch.h, &mut scratch.kh)
        .ok_or(EkfError::ComputationFailed)?;
    scratch
        .identity
        .sub_into(&scratch.kh, &mut scratch.i_minus_kh)
        .ok_or(EkfError::ComputationFailed)?;
    scratch
        .i_minus_kh
        .mul_into(p, &mut scratch.p_new)
        .ok_or(EkfError::ComputationFailed)?;

    x.copy_from(&scratch.x_new).ok_or(EkfError::ParameterError)?;
    p.copy_from(&scratch.p_new).ok_or(EkfError::ParameterError)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A constant-position EKF: measurement is direct observation of x[0].
    #[test]
    fn correct_pulls_estimate_toward_measurement() {
        let mut x = Matrix::zeros(1, 1);
        let mut p = Matrix::zeros(1, 1);
        p[(0, 0)] = 1.0;
        let mut z = Matrix::zeros(1, 1);
        z[(0, 0)] = 10.0;
        let mut r = Matrix::zeros(1, 1);
        r[(0, 0)] = 0.1;
        let mut scratch = CorrectScratch::new(1, 1);

        lazy_correct(&mut x, &mut p, &z, &r, &mut scratch, |xk, zp, jh| {
            jh[(0, 0)] = 1.0;
            zp[(0, 0)] = xk[(0, 0)];
            Ok(())
        })
        .unwrap();

        assert!(x[(0, 0)] > 0.0 && x[(0, 0)] < 10.0);
        assert!(p[(0, 0)] < 1.0);

        // A second correction should move the estimate even closer to 10.
        let prev = x[(0, 0)];
        z[(0, 0)] = 10.0;
        lazy_correct(&mut x, &mut p, &z, &r, &mut scratch, |xk, zp, jh| {
            jh[(0, 0)] = 1.0;
            zp[(0, 0)] = xk[(0, 0)];
            Ok(())
        })
        .unwrap();
        assert!(x[(0, 0)] > prev);
    }

    #[test]
    fn predict_double_integrator_advances_position() {
        let mut x = Matrix::zeros(2, 1);
        let mut p = Matrix::identity(2);
        let mut u = Matrix::zeros(1, 1);
        u[(0, 0)] = 0.0;
        let q = Matrix::zeros(2, 2);
        let mut scratch = PredictScratch::new(2);
        let dt = 0.1;

        x[(1, 0)] = 2.0; // initial velocity
        predict(&mut x, &mut p, &u, &q, &mut scratch, |xk, uk, xp, jf| {
            jf[(0, 0)] = 1.0;
            jf[(0, 1)] = dt;
            jf[(1, 0)] = 0.0;
            jf[(1, 1)] = 1.0;
            jf.mul_into(xk, xp).ok_or(EkfError::ComputationFailed)?;
            xp[(0, 0)] += 0.5 * dt * dt * uk[(0, 0)];
            xp[(1, 0)] += dt * uk[(0, 0)];
            Ok(())
        })
        .unwrap();

        assert!((x[(0, 0)] - 0.2).abs() < 1e-9);
        assert!((x[(1, 0)] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn computation_failed_on_singular_innovation_covariance() {
        let mut x = Matrix::zeros(1, 1);
        let mut p = Matrix::zeros(1, 1); // zero covariance
        let mut z = Matrix::zeros(1, 1);
        z[(0, 0)] = 1.0;
        let r = Matrix::zeros(1, 1); // zero measurement variance too -> S singular
        let mut scratch = CorrectScratch::new(1, 1);

        let err = lazy_correct(&mut x, &mut p, &z, &r, &mut scratch, |xk, zp, jh| {
            jh[(0, 0)] = 1.0;
            zp[(0, 0)] = xk[(0, 0)];
            Ok(())
        })
        .unwrap_err();
        assert_eq!(err, EkfError::ComputationFailed);
    }
}
