// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-`FitState`/`Coordinator` diagnostic counters, one per
//! [`crate::error::ErrorCause`] variant.

use crate::error::ErrorCause;

/// Accumulated failure counts across every sweep a [`crate::fitstate::FitState`]
/// or [`crate::multichannel::Coordinator`] has run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Cholesky/linear-solve failures.
    pub n_dposv: u64,
    /// Peaks that moved their anchor or footprint outside `MARGIN`.
    pub n_margin: u64,
    /// Peaks whose fitted height went negative.
    pub n_neg_height: u64,
    /// Peaks whose fitted width went negative.
    pub n_neg_width: u64,
    /// Peaks whose model intensity went non-positive during the Poisson
    /// deviance computation.
    pub n_neg_fi: u64,
    /// LM inner loops that exhausted their damping range without an
    /// improving step.
    pub n_non_decr: u64,
}

impl Diagnostics {
    pub fn record(&mut self, cause: ErrorCause) {
        match cause {
            ErrorCause::SolverFailure => self.n_dposv += 1,
            ErrorCause::MarginViolation => self.n_margin += 1,
            ErrorCause::NegativeHeight => self.n_neg_height += 1,
            ErrorCause::NegativeWidth => self.n_neg_width += 1,
            ErrorCause::NegativeModelIntensity => self.n_neg_fi += 1,
            ErrorCause::NonDecreasingLM => self.n_non_decr += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.n_dposv
            + self.n_margin
            + self.n_neg_height
            + self.n_neg_width
            + self.n_neg_fi
            + self.n_non_decr
    }
}
