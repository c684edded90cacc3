// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The outer-sweep controller: one call to [`sweep`] drives every
`Running` peak through one [`crate::updater`] pass, either the classical
single-step `Original` strategy or a Levenberg-Marquardt inner loop with
trust adjustment. Which strategy runs is fixed at [`crate::fitstate::FitState`]
construction time via [`crate::config::FitterConfig`].
*/

use crate::config::FitStrategy;
use crate::constants::MAX_LAMBDA;
use crate::error::ErrorCause;
use crate::fitstate::FitState;
use crate::peak::Status;
use crate::updater;

/// Run one sweep over every `Running` peak, per the configured strategy.
pub fn sweep(fit: &mut FitState) {
    match fit.config().strategy {
        FitStrategy::Original => sweep_original(fit),
        FitStrategy::LevenbergMarquardt => sweep_lm(fit),
    }
}

fn sweep_original(fit: &mut FitState) {
    for idx in 0..fit.peaks().len() {
        if !fit.peaks()[idx].status.is_running() {
            continue;
        }
        update_peak_original(fit, idx);
    }
}

fn sweep_lm(fit: &mut FitState) {
    for idx in 0..fit.peaks().len() {
        if !fit.peaks()[idx].status.is_running() {
            continue;
        }
        update_peak_lm(fit, idx);
    }
}

/// Relative-error-change convergence test shared by both strategies: no
/// previous finite error means "can't tell yet", never converged.
fn converged(prev_error: f64, new_error: f64, tolerance: f64) -> bool {
    if !prev_error.is_finite() || prev_error == 0.0 {
        return false;
    }
    ((new_error - prev_error).abs() / prev_error) < tolerance
}

/// One `Original`-strategy update: build J/H, subtract, solve (undamped),
/// apply, validate, re-add, and recompute error exactly once.
fn update_peak_original(fit: &mut FitState, idx: usize) {
    let committed = fit.peaks()[idx].clone();

    let jh = match updater::calc_jacobian_and_hessian(fit, &committed) {
        Ok(jh) => jh,
        Err(cause) => {
            fit.subtract_peak(idx);
            fit.record_failure(idx, cause);
            return;
        }
    };
    fit.subtract_peak(idx);

    let delta = match updater::solve_delta(&jh.h, &jh.j, 0.0) {
        Some(d) => d,
        None => {
            fit.record_failure(idx, ErrorCause::SolverFailure);
            return;
        }
    };

    let mut trial = committed.clone();
    updater::update_params(&mut trial, &jh.active, &delta);
    updater::resync_footprint(fit, &mut trial);

    if let Err(cause) = updater::validate(fit, &trial) {
        fit.record_failure(idx, cause);
        return;
    }

    fit.add_peak_value(&trial);
    let new_error = match updater::peak_error(fit, &trial) {
        Ok(e) => e,
        Err(cause) => {
            fit.subtract_peak_value(&trial);
            fit.record_failure(idx, cause);
            return;
        }
    };

    let prev_error = committed.error;
    let tolerance = fit.config().tolerance;
    trial.error_old = prev_error;
    trial.error = new_error;
    trial.status = if converged(prev_error, new_error, tolerance) {
        Status::Converged
    } else {
        Status::Running
    };
    fit.commit_peak(idx, trial);
}

/// One `LevenbergMarquardt`-strategy update: an inner damping-retry loop
/// around the same build/solve/apply/validate/re-add sequence.
fn update_peak_lm(fit: &mut FitState, idx: usize) {
    let committed = fit.peaks()[idx].clone();

    let starting_error = match updater::peak_error(fit, &committed) {
        Ok(e) => e,
        Err(cause) => {
            fit.subtract_peak(idx);
            fit.record_failure(idx, cause);
            return;
        }
    };
    let jh = match updater::calc_jacobian_and_hessian(fit, &committed) {
        Ok(jh) => jh,
        Err(cause) => {
            fit.subtract_peak(idx);
            fit.record_failure(idx, cause);
            return;
        }
    };
    fit.subtract_peak(idx);

    let tolerance = fit.config().tolerance;
    let lambda_up = fit.config().lambda_up;
    let lambda_down = fit.config().lambda_down;
    let mut lambda = committed.lambda.max(1.0e-12);

    loop {
        if lambda > MAX_LAMBDA {
            fit.record_failure(idx, ErrorCause::NonDecreasingLM);
            return;
        }

        let delta = match updater::solve_delta(&jh.h, &jh.j, lambda) {
            Some(d) => d,
            None => {
                lambda *= lambda_up;
                continue;
            }
        };

        let mut trial = committed.clone();
        updater::update_params(&mut trial, &jh.active, &delta);
        updater::resync_footprint(fit, &mut trial);

        if updater::validate(fit, &trial).is_err() {
            lambda *= lambda_up;
            continue;
        }

        fit.add_peak_value(&trial);
        let current_error = match updater::peak_error(fit, &trial) {
            Ok(e) => e,
            Err(_) => {
                fit.subtract_peak_value(&trial);
                lambda *= lambda_up;
                continue;
            }
        };

        if current_error > starting_error {
            let rel = (current_error - starting_error).abs() / starting_error.abs().max(f64::EPSILON);
            if rel < tolerance {
                trial.lambda = lambda;
                trial.error_old = committed.error;
                trial.error = current_error;
                trial.status = Status::Converged;
                fit.commit_peak(idx, trial);
                return;
            }
            fit.subtract_peak_value(&trial);
            lambda *= lambda_up;
            continue;
        }

        let rel = (starting_error - current_error).abs() / starting_error.abs().max(f64::EPSILON);
        trial.error_old = committed.error;
        trial.error = current_error;
        if rel < tolerance {
            trial.status = Status::Converged;
            trial.lambda = lambda;
        } else {
            lambda *= lambda_down;
            trial.lambda = lambda;
            trial.status = Status::Running;
        }
        fit.commit_peak(idx, trial);
        return;
    }
}
