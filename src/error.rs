// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all fitter-related errors. This should be the *only*
//! error enum that is publicly visible.

use thiserror::Error;

use crate::config::ConfigError;
use crate::psf::PsfError;

/// The *only* publicly visible error from `smlm-fit`.
#[derive(Error, Debug)]
pub enum FitError {
    /// An error constructing or loading a [`crate::config::FitterConfig`].
    #[error("invalid fitter configuration: {0}")]
    Config(#[from] ConfigError),

    /// An error evaluating a PSF model.
    #[error("PSF model error: {0}")]
    Psf(#[from] PsfError),

    /// A peak was seeded outside the image, or otherwise malformed, before
    /// any fitting could begin.
    #[error("peak seed is invalid: {0}")]
    InvalidSeed(String),

    /// The observed image and sCMOS variance term arrays have mismatched
    /// shapes.
    #[error("image and sCMOS term shapes differ: image is {image:?}, scmos term is {scmos:?}")]
    ShapeMismatch {
        image: (usize, usize),
        scmos: (usize, usize),
    },

    /// An IO error, e.g. loading a scenario or configuration file.
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// Causes tracked individually on an [`crate::peak::Status::Error`] peak,
/// mirroring the `Diagnostics` counters 1:1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCause {
    /// The Cholesky factorization of the Gauss-Newton Hessian failed.
    SolverFailure,
    /// The peak's integer anchor or footprint moved outside the allowed
    /// margin.
    MarginViolation,
    /// The fitted height went negative.
    NegativeHeight,
    /// A fitted width went negative.
    NegativeWidth,
    /// The per-pixel model intensity used for the Poisson deviance went
    /// negative.
    NegativeModelIntensity,
    /// An LM inner loop exhausted its damping range without finding an
    /// improving step.
    NonDecreasingLM,
}
