// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
An iterative multi-peak point-spread-function fitter for single-molecule
localization microscopy: a maximum-likelihood estimator for Poisson-
distributed photon counts, driven by a damped Gauss-Newton /
Levenberg-Marquardt update over a shared fit-image and background-image so
that overlapping emitters cooperate rather than double-count pixels.

Two coupled variants share the engine: a single-channel fitter
([`fitstate::FitState`]) for one image, and a multi-plane coordinator
([`multichannel::Coordinator`]) that couples groups of peaks seen
simultaneously across several affine-mapped channels.

Movie I/O, peak-finding, on-disk localization formats, drift correction,
and PSF-table *construction* are all out of scope -- this crate starts from
an already-seeded peak list and an already-built PSF model.
*/

pub mod config;
pub mod constants;
pub mod diagnostics;
pub mod error;
pub mod fitstate;
pub mod iterator;
pub mod multichannel;
pub mod peak;
pub mod psf;
pub mod updater;

pub use config::{FitStrategy, FitterConfig};
pub use error::{ErrorCause, FitError};
pub use fitstate::FitState;
pub use peak::{Peak, PeakParams, PeakResult, Status};
pub use psf::PsfFamily;
