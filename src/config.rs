// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Configuration for the fitter core.
*/

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DEFAULT_CLAMP_START, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE, LAMBDADOWN, LAMBDAUP, MARGIN,
    NFITTING,
};

/// Errors that can occur loading a [`FitterConfig`] from a file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error reading configuration: {0}")]
    IO(#[from] std::io::Error),
}

/// Which outer-sweep strategy the iterator/coordinator uses.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FitStrategy {
    /// One update per peak per sweep, no inner retry loop.
    Original,
    /// Levenberg-Marquardt with an inner damping-retry loop.
    LevenbergMarquardt,
}

impl Default for FitStrategy {
    fn default() -> Self {
        FitStrategy::LevenbergMarquardt
    }
}

/// Tunable configuration for a [`crate::fitstate::FitState`] or
/// [`crate::multichannel::Coordinator`], injected at construction.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FitterConfig {
    /// Relative-error-change convergence threshold.
    pub tolerance: f64,
    /// Initial per-parameter clamp ceiling, in [`crate::peak::PeakParams`]
    /// order.
    pub clamp_start: [f64; NFITTING],
    /// Cap on the number of outer sweeps a driver loop runs.
    pub max_iterations: usize,
    /// Multiplicative growth of LM damping on a rejected step.
    pub lambda_up: f64,
    /// Multiplicative shrink of LM damping on an accepted step.
    pub lambda_down: f64,
    /// Margin (pixels) a peak's anchor must stay inside of.
    pub margin: i32,
    /// Which outer-sweep strategy to use.
    pub strategy: FitStrategy,
    /// Enables extra invariant assertions at a small performance cost.
    pub testing: bool,
    /// Enables verbose per-sweep trace logging.
    pub verbose: bool,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            clamp_start: [DEFAULT_CLAMP_START; NFITTING],
            max_iterations: DEFAULT_MAX_ITERATIONS,
            lambda_up: LAMBDAUP,
            lambda_down: LAMBDADOWN,
            margin: MARGIN,
            strategy: FitStrategy::default(),
            testing: false,
            verbose: false,
        }
    }
}

impl FitterConfig {
    /// Load a configuration from a TOML file.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }
}
