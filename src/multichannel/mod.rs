// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The multi-channel coordinator: holds `C` independent
[`crate::fitstate::FitState`]s, one per channel/plane, and couples the
shared `x, y, z` (and optionally `height`) parameters of a group of `C`
peaks through affine transforms and z-dependent weight tables. A group's
status is always shared across its `C` members; any channel's failure
fails the whole group.
*/

mod transform;

pub use transform::{AffineMap, ChannelTransform};

use ndarray::Array2;

use crate::config::FitterConfig;
use crate::constants::MAX_LAMBDA;
use crate::diagnostics::Diagnostics;
use crate::error::{ErrorCause, FitError};
use crate::fitstate::FitState;
use crate::peak::{Peak, PeakParams, Status};
use crate::psf::param_index;
use crate::updater;

/// Whether the group's per-channel heights are locked together or fitted
/// independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeightsMode {
    /// Channel 0 alone carries the free height parameter; other channels'
    /// heights are copied from it and the per-channel weighting factor
    /// stays at 1.0.
    Fixed,
    /// Each channel fits its own height; the weighting factor tracks the
    /// fitted value.
    Independent,
}

/// The five z-dependent per-parameter weight tables, each `[n_weights x
/// n_channels]`, plus the scale/offset mapping a peak's z into a weight
/// index.
#[derive(Clone, Debug)]
pub struct WeightTables {
    pub w_h: Array2<f64>,
    pub w_x: Array2<f64>,
    pub w_y: Array2<f64>,
    pub w_z: Array2<f64>,
    pub w_bg: Array2<f64>,
    pub z_scale: f64,
    pub z_offset: f64,
}

impl WeightTables {
    fn n_weights(&self) -> usize {
        self.w_x.nrows()
    }

    /// `zi = clamp(round((z - offset)*scale), 0, n_weights-1)`.
    fn weight_index(&self, z: f64) -> usize {
        let n = self.n_weights();
        if n == 0 {
            return 0;
        }
        let raw = ((z - self.z_offset) * self.z_scale).round();
        raw.clamp(0.0, (n - 1) as f64) as usize
    }
}

/// Holds `C` [`FitState`]s plus the coupling machinery that advances `C`
/// peaks at the same logical index together.
pub struct Coordinator {
    channels: Vec<FitState>,
    transforms: Vec<ChannelTransform>,
    weights: WeightTables,
    heights_mode: HeightsMode,
    /// `heights[group][channel]`: current per-channel height weighting
    /// factor.
    heights: Vec<Vec<f64>>,
    config: FitterConfig,
    diagnostics: Diagnostics,
}

impl Coordinator {
    /// `transforms[0]` must be the identity transform for channel 0;
    /// `transforms.len()` fixes `n_channels`.
    pub fn new(
        channels: Vec<FitState>,
        transforms: Vec<ChannelTransform>,
        weights: WeightTables,
        heights_mode: HeightsMode,
        config: FitterConfig,
    ) -> Result<Self, FitError> {
        if channels.len() != transforms.len() {
            return Err(FitError::InvalidSeed(format!(
                "{} channels but {} transforms",
                channels.len(),
                transforms.len()
            )));
        }
        Ok(Self {
            channels,
            transforms,
            weights,
            heights_mode,
            heights: Vec::new(),
            config,
            diagnostics: Diagnostics::default(),
        })
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, k: usize) -> &FitState {
        &self.channels[k]
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Seed a new group from a channel-0-frame peak. Positions are mapped
    /// into every other channel via the `0 -> N` transform before each
    /// channel's [`FitState::seed_peak`] is asked to initialize. Any channel landing outside its image margin
    /// forces the whole group to `Error`, and any already-added members are
    /// subtracted back out.
    pub fn seed_group(&mut self, params0: PeakParams, clamp_start: [f64; crate::constants::NFITTING]) -> usize {
        let group = self.channels[0].peaks().len();
        let mut group_failed = false;

        for k in 0..self.n_channels() {
            let params_k = if k == 0 {
                params0
            } else {
                let t = &self.transforms[k];
                // Transposed per the Open Question in §4.5/§9: the mapping
                // tables are laid out `(y, x)`, so the new x comes from
                // `y_0_to_n` and the new y from `x_0_to_n`.
                let x = t.y_0_to_n.apply(params0.y_center, params0.x_center);
                let y = t.x_0_to_n.apply(params0.y_center, params0.x_center);
                PeakParams {
                    x_center: x,
                    y_center: y,
                    ..params0
                }
            };
            self.channels[k].seed_peak(params_k, clamp_start);
            if !self.channels[k].peaks()[group].status.is_added() {
                group_failed = true;
            }
        }

        if group_failed {
            for k in 0..self.n_channels() {
                if self.channels[k].peaks()[group].status.is_added() {
                    self.channels[k].subtract_peak(group);
                }
                self.channels[k].record_failure(group, ErrorCause::MarginViolation);
            }
            self.heights.push(vec![1.0; self.n_channels()]);
            return group;
        }

        let mean_height = self
            .channels
            .iter()
            .map(|c| c.peaks()[group].params.height)
            .sum::<f64>()
            / self.n_channels() as f64;

        let heights = match self.heights_mode {
            HeightsMode::Fixed => {
                for k in 0..self.n_channels() {
                    self.channels[k].peaks_mut()[group].params.height = mean_height;
                }
                vec![1.0; self.n_channels()]
            }
            HeightsMode::Independent => self
                .channels
                .iter()
                .map(|c| c.peaks()[group].params.height)
                .collect(),
        };
        self.heights.push(heights);

        group
    }

    pub fn get_unconverged(&self) -> usize {
        self.channels[0]
            .peaks()
            .iter()
            .filter(|p| p.status.is_running())
            .count()
    }

    /// Run one LM sweep across every `Running` group.
    pub fn iterate(&mut self) {
        let n_groups = self.channels[0].peaks().len();
        for group in 0..n_groups {
            if !self.channels[0].peaks()[group].status.is_running() {
                continue;
            }
            self.update_group(group);
        }
    }

    /// Mark every channel's peak at `group` `Error(cause)`. Each channel's
    /// own `record_failure` already tallies its own `Diagnostics`; the
    /// coordinator's own counters mirror the group-level failure on top of
    /// that, since a caller inspecting the coordinator shouldn't have to
    /// sum across channels to see that a group failed.
    fn fail_group(&mut self, group: usize, cause: ErrorCause) {
        for channel in &mut self.channels {
            channel.record_failure(group, cause);
        }
        self.diagnostics.record(cause);
    }

    fn update_group(&mut self, group: usize) {
        let n = self.n_channels();
        let committed: Vec<Peak> = (0..n).map(|k| self.channels[k].peaks()[group].clone()).collect();

        let mut starting_errors = Vec::with_capacity(n);
        let mut jhs = Vec::with_capacity(n);
        for k in 0..n {
            let e = match updater::peak_error(&self.channels[k], &committed[k]) {
                Ok(e) => e,
                Err(cause) => {
                    self.fail_group(group, cause);
                    return;
                }
            };
            let jh = match updater::calc_jacobian_and_hessian(&self.channels[k], &committed[k]) {
                Ok(jh) => jh,
                Err(cause) => {
                    self.fail_group(group, cause);
                    return;
                }
            };
            starting_errors.push(e);
            jhs.push(jh);
        }
        let starting_error: f64 = starting_errors.iter().sum();
        for k in 0..n {
            self.channels[k].subtract_peak(group);
        }

        let tolerance = self.config.tolerance;
        let lambda_up = self.config.lambda_up;
        let lambda_down = self.config.lambda_down;
        let mut lambda = committed[0].lambda.max(1.0e-12);

        loop {
            if lambda > MAX_LAMBDA {
                self.fail_group(group, ErrorCause::NonDecreasingLM);
                return;
            }

            let mut deltas = Vec::with_capacity(n);
            let mut solver_failed = false;
            for k in 0..n {
                match updater::solve_delta(&jhs[k].h, &jhs[k].j, lambda) {
                    Some(d) => deltas.push(d),
                    None => {
                        solver_failed = true;
                        break;
                    }
                }
            }
            if solver_failed {
                lambda *= lambda_up;
                continue;
            }

            let mut trials: Vec<Peak> = committed.clone();
            self.coordinator_update(group, &committed, &jhs, &deltas, &mut trials);
            for k in 0..n {
                updater::resync_footprint(&self.channels[k], &mut trials[k]);
            }

            let mut invalid = false;
            for k in 0..n {
                if updater::validate(&self.channels[k], &trials[k]).is_err() {
                    invalid = true;
                    break;
                }
            }
            if invalid {
                lambda *= lambda_up;
                continue;
            }

            for k in 0..n {
                self.channels[k].add_peak_value(&trials[k]);
            }
            let mut current_errors = Vec::with_capacity(n);
            let mut error_failed = false;
            for k in 0..n {
                match updater::peak_error(&self.channels[k], &trials[k]) {
                    Ok(e) => current_errors.push(e),
                    Err(_) => {
                        error_failed = true;
                        break;
                    }
                }
            }
            if error_failed {
                for k in 0..n {
                    self.channels[k].subtract_peak_value(&trials[k]);
                }
                lambda *= lambda_up;
                continue;
            }
            let current_error: f64 = current_errors.iter().sum();

            if current_error > starting_error {
                let rel = (current_error - starting_error).abs() / starting_error.abs().max(f64::EPSILON);
                if rel < tolerance {
                    self.commit_group(group, trials, current_errors, lambda, Status::Converged);
                    return;
                }
                for k in 0..n {
                    self.channels[k].subtract_peak_value(&trials[k]);
                }
                lambda *= lambda_up;
                continue;
            }

            let rel = (starting_error - current_error).abs() / starting_error.abs().max(f64::EPSILON);
            let (next_lambda, status) = if rel < tolerance {
                (lambda, Status::Converged)
            } else {
                (lambda * lambda_down, Status::Running)
            };
            self.commit_group(group, trials, current_errors, next_lambda, status);
            return;
        }
    }

    fn commit_group(
        &mut self,
        group: usize,
        mut trials: Vec<Peak>,
        current_errors: Vec<f64>,
        lambda: f64,
        status: Status,
    ) {
        for (k, trial) in trials.iter_mut().enumerate() {
            trial.lambda = lambda;
            trial.error_old = trial.error;
            trial.error = current_errors[k];
            trial.status = status;
        }
        if self.heights_mode == HeightsMode::Independent {
            for k in 0..self.n_channels() {
                self.heights[group][k] = trials[k].params.height.max(0.01);
            }
        }
        for (k, trial) in trials.into_iter().enumerate() {
            self.channels[k].commit_peak(group, trial);
        }
    }

    /// The coupled parameter update: X/Y are a
    /// weighted average of each channel's delta transformed into channel
    /// 0's frame, applied to channel 0, then re-projected into every other
    /// channel; Z is a plain weighted average applied uniformly; height is
    /// either independent-per-channel or locked to channel 0's fit;
    /// background is always per-channel.
    fn coordinator_update(
        &self,
        group: usize,
        committed: &[Peak],
        jhs: &[updater::JacobianHessian],
        deltas: &[nalgebra::DVector<f64>],
        trials: &mut [Peak],
    ) {
        let n = self.n_channels();
        let heights = &self.heights[group];
        let z = committed[0].params.z_center;
        let zi = self.weights.weight_index(z);

        let mut channel_dx = vec![0.0; n];
        let mut channel_dy = vec![0.0; n];
        let mut channel_dz = vec![0.0; n];
        let mut channel_dh = vec![0.0; n];
        let mut channel_dbg = vec![0.0; n];

        for k in 0..n {
            for (a, &idx) in jhs[k].active.iter().enumerate() {
                let d = deltas[k][a];
                match idx {
                    param_index::X_CENTER => channel_dx[k] = d,
                    param_index::Y_CENTER => channel_dy[k] = d,
                    param_index::Z_CENTER => channel_dz[k] = d,
                    param_index::HEIGHT => channel_dh[k] = d,
                    param_index::BACKGROUND => channel_dbg[k] = d,
                    _ => {}
                }
            }
        }

        // X, Y: transform every channel's delta into channel 0's frame
        // (vector transform: linear part only, no translation), weight,
        // average, apply to channel 0, then project channel 0's new
        // position out to every other channel.
        let mut wsum_x = 0.0;
        let mut wsum_y = 0.0;
        let mut acc_dx0 = 0.0;
        let mut acc_dy0 = 0.0;
        for k in 0..n {
            let t = &self.transforms[k];
            // Transposed, per the same convention as `seed_group`: new dx0
            // from `y_n_to_0`, new dy0 from `x_n_to_0`.
            let dx0 = t.y_n_to_0.apply_linear(channel_dy[k], channel_dx[k]);
            let dy0 = t.x_n_to_0.apply_linear(channel_dy[k], channel_dx[k]);
            let wx = self.weights.w_x[[zi, k]] * heights[k];
            let wy = self.weights.w_y[[zi, k]] * heights[k];
            acc_dx0 += wx * dx0;
            acc_dy0 += wy * dy0;
            wsum_x += wx;
            wsum_y += wy;
        }
        let avg_dx0 = if wsum_x.abs() > f64::EPSILON { acc_dx0 / wsum_x } else { 0.0 };
        let avg_dy0 = if wsum_y.abs() > f64::EPSILON { acc_dy0 / wsum_y } else { 0.0 };

        let xy_active = [param_index::X_CENTER, param_index::Y_CENTER];
        let xy_delta = nalgebra::DVector::from_vec(vec![avg_dx0, avg_dy0]);
        updater::update_params(&mut trials[0], &xy_active, &xy_delta);

        let x0 = trials[0].params.x_center;
        let y0 = trials[0].params.y_center;
        for k in 1..n {
            let t = &self.transforms[k];
            trials[k].params.x_center = t.y_0_to_n.apply(y0, x0);
            trials[k].params.y_center = t.x_0_to_n.apply(y0, x0);
        }

        // Z: plain weighted average, applied identically to every channel.
        let mut wsum_z = 0.0;
        let mut acc_dz = 0.0;
        for k in 0..n {
            let w = self.weights.w_z[[zi, k]] * heights[k];
            acc_dz += w * channel_dz[k];
            wsum_z += w;
        }
        let avg_dz = if wsum_z.abs() > f64::EPSILON { acc_dz / wsum_z } else { 0.0 };
        let z_active = [param_index::Z_CENTER];
        for trial in trials.iter_mut() {
            let z_delta = nalgebra::DVector::from_vec(vec![avg_dz]);
            updater::update_params(trial, &z_active, &z_delta);
        }

        // Height.
        match self.heights_mode {
            HeightsMode::Independent => {
                for k in 0..n {
                    let h_active = [param_index::HEIGHT];
                    let h_delta = nalgebra::DVector::from_vec(vec![channel_dh[k]]);
                    updater::update_params(&mut trials[k], &h_active, &h_delta);
                    trials[k].params.height = trials[k].params.height.max(0.01);
                }
            }
            HeightsMode::Fixed => {
                let mut wsum_h = 0.0;
                let mut acc_dh = 0.0;
                for k in 0..n {
                    let w = self.weights.w_h[[zi, k]];
                    acc_dh += w * channel_dh[k];
                    wsum_h += w;
                }
                let avg_dh = if wsum_h.abs() > f64::EPSILON { acc_dh / wsum_h } else { 0.0 };
                let h_active = [param_index::HEIGHT];
                let h_delta = nalgebra::DVector::from_vec(vec![avg_dh]);
                updater::update_params(&mut trials[0], &h_active, &h_delta);
                trials[0].params.height = trials[0].params.height.max(0.01);
                for k in 1..n {
                    trials[k].params.height = trials[0].params.height;
                }
            }
        }

        // Background: always per-channel.
        for k in 0..n {
            let bg_active = [param_index::BACKGROUND];
            let bg_delta = nalgebra::DVector::from_vec(vec![channel_dbg[k]]);
            updater::update_params(&mut trials[k], &bg_active, &bg_delta);
        }
    }
}
