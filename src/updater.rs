// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The single-peak updater: builds the Gauss-Newton Jacobian and
Hessian over one peak's footprint, solves the symmetric system via Cholesky,
applies a clamped update, and validates the result. Used directly by the
`Original` strategy and as the per-attempt building block of the LM inner
loop and the multi-channel coordinator.
*/

use nalgebra::{Cholesky, DMatrix, DVector};

use crate::error::ErrorCause;
use crate::fitstate::FitState;
use crate::peak::Peak;

/// Jacobian, Hessian (both restricted to the family's active parameters),
/// and the deviance error evaluated with the peak's current contribution
/// still present in the shared buffers.
pub struct JacobianHessian {
    pub active: Vec<usize>,
    pub j: DVector<f64>,
    pub h: DMatrix<f64>,
}

/// Build J and H over `peak`'s footprint. The peak's own contribution must
/// still be present in `fit`'s buffers (i.e. not yet subtracted) when this
/// is called, since the model intensity `f` must include it.
pub fn calc_jacobian_and_hessian(fit: &FitState, peak: &Peak) -> Result<JacobianHessian, ErrorCause> {
    let active = fit.psf().active_params();
    let k = active.len();
    let mut j = DVector::zeros(k);
    let mut h = DMatrix::zeros(k, k);

    for py in peak.footprint_y_range() {
        for px in peak.footprint_x_range() {
            if !fit.in_bounds(px, py) {
                continue;
            }
            let f = fit
                .model_intensity(px, py)
                .ok_or(ErrorCause::NegativeModelIntensity)?;
            if f <= 0.0 {
                return Err(ErrorCause::NegativeModelIntensity);
            }
            let x = fit.image()[[py as usize, px as usize]];
            let partials = fit.psf().partials(peak, px, py);
            let t1 = 2.0 * (1.0 - x / f);
            let t2 = 2.0 * x / (f * f);

            for (a, &ia) in active.iter().enumerate() {
                j[a] += t1 * partials[ia];
                for (b, &ib) in active.iter().enumerate() {
                    h[(a, b)] += t2 * partials[ia] * partials[ib];
                }
            }
        }
    }

    Ok(JacobianHessian { active, j, h })
}

/// Poisson deviance `sum(2*(f - x*log(f)))` over `peak`'s footprint, with
/// `peak`'s contribution assumed present in `fit`'s buffers.
pub fn peak_error(fit: &FitState, peak: &Peak) -> Result<f64, ErrorCause> {
    let mut error = 0.0;
    for py in peak.footprint_y_range() {
        for px in peak.footprint_x_range() {
            if !fit.in_bounds(px, py) {
                continue;
            }
            let f = fit
                .model_intensity(px, py)
                .ok_or(ErrorCause::NegativeModelIntensity)?;
            if f <= 0.0 {
                return Err(ErrorCause::NegativeModelIntensity);
            }
            let x = fit.image()[[py as usize, px as usize]];
            error += 2.0 * (f - x * f.ln());
        }
    }
    Ok(error)
}

/// Solve `H'*delta = J` with `H' = H + lambda*diag(H)` via dense Cholesky on the lower triangle. `None` on factorization
/// failure -- the documented `ERROR` path, never a panic.
pub fn solve_delta(h: &DMatrix<f64>, j: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
    let mut h_damped = h.clone();
    if lambda > 0.0 {
        for i in 0..h_damped.nrows() {
            h_damped[(i, i)] += lambda * h[(i, i)];
        }
    }
    let chol = Cholesky::new(h_damped)?;
    let delta = chol.solve(j);
    if delta.iter().all(|v| v.is_finite()) {
        Some(delta)
    } else {
        None
    }
}

/// Apply a solved delta to `peak`'s parameters through the shared soft-clamp
/// policy: on a sign reversal from the previous update,
/// halve that parameter's clamp ceiling; then move the parameter by
/// `-delta / (1 + |delta|/clamp)` -- `delta` solves `H*delta = J` with `J`
/// the true (positive) Poisson-deviance gradient, so the descent step is the
/// negated, clamped delta.
///
/// This is a free function over the peak's scalar state (not tied to any
/// one family) so the multi-channel coordinator can reuse it per channel
/// after computing its own coupled deltas.
pub fn update_params(peak: &mut Peak, active: &[usize], delta: &DVector<f64>) {
    let mut params = peak.params.as_array();
    for (a, &idx) in active.iter().enumerate() {
        let d = delta[a];
        let new_sign = if d > 0.0 {
            1
        } else if d < 0.0 {
            -1
        } else {
            0
        };
        if peak.sign[idx] != 0 && new_sign != 0 && new_sign != peak.sign[idx] {
            peak.clamp[idx] *= 0.5;
        }
        peak.sign[idx] = new_sign;
        let step = d / (1.0 + d.abs() / peak.clamp[idx]);
        params[idx] -= step;
    }
    peak.params = crate::peak::PeakParams::from_array(params);
}

/// Re-derive the peak's integer anchor (hysteresis 0.6) and footprint
/// (hysteresis 0.6 on half-width change, capped at `margin`), and clamp/
/// recompute z-dependent widths.
pub fn resync_footprint(fit: &FitState, peak: &mut Peak) {
    if matches!(fit.psf(), crate::psf::PsfFamily::Gaussian2D) {
        // The isotropic family's shared width delta comes only from the
        // x-width Jacobian/Hessian column; y_width is never an independent
        // parameter and tracks x_width by assignment.
        peak.params.y_width = peak.params.x_width;
    }
    fit.psf().clamp_z(peak);
    peak.xi = crate::psf::apply_anchor_hysteresis(peak.xi, peak.params.x_center);
    peak.yi = crate::psf::apply_anchor_hysteresis(peak.yi, peak.params.y_center);
    let (wx, wy) = fit.psf().footprint_for(peak, fit.config().margin);
    if wx != peak.wx || wy != peak.wy {
        peak.scratch = fit.psf().new_scratch(wx, wy);
    }
    peak.wx = wx;
    peak.wy = wy;
}

/// Validity checks: anchor/footprint inside `margin`,
/// height non-negative, active widths non-negative. z range is enforced by
/// [`resync_footprint`]'s call into [`crate::psf::PsfFamily::clamp_z`], which
/// always clamps an out-of-range z back in rather than failing the peak.
pub fn validate(fit: &FitState, peak: &Peak) -> Result<(), ErrorCause> {
    let margin = fit.config().margin;
    let rows = fit.rows() as i32;
    let cols = fit.cols() as i32;
    if peak.xi < margin
        || peak.yi < margin
        || peak.xi > cols - margin - 1
        || peak.yi > rows - margin - 1
        || peak.wx > margin
        || peak.wy > margin
    {
        return Err(ErrorCause::MarginViolation);
    }
    if peak.params.height < 0.0 {
        return Err(ErrorCause::NegativeHeight);
    }
    let active = fit.psf().active_params();
    if active.contains(&crate::psf::param_index::X_WIDTH) && peak.params.x_width < 0.0 {
        return Err(ErrorCause::NegativeWidth);
    }
    if active.contains(&crate::psf::param_index::Y_WIDTH) && peak.params.y_width < 0.0 {
        return Err(ErrorCause::NegativeWidth);
    }
    Ok(())
}
