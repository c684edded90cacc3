// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Constants shared by the fitter core. All of these are the defaults a caller
gets from `FitterConfig::default()`; every one of them can be overridden per
`FitterConfig` instance, but none of them are ever read from a global.
 */

/// Minimum and maximum distance (in pixels) a peak's integer anchor may be
/// from the edge of the image, and the maximum integer half-footprint.
pub const MARGIN: i32 = 10;

/// Minimum change required before the integer anchor or footprint of a peak
/// is allowed to move, to prevent chatter between add/subtract cycles.
pub const HYSTERESIS: f64 = 0.6;

/// Multiplicative growth of the Levenberg-Marquardt damping parameter on a
/// rejected step.
pub const LAMBDAUP: f64 = 4.0;

/// Multiplicative shrink of the Levenberg-Marquardt damping parameter on an
/// accepted, improving step.
pub const LAMBDADOWN: f64 = 0.75;

/// Hard backstop on LM damping growth; beyond this the inner loop gives up
/// and marks the peak/group as failed rather than spinning forever.
pub const MAX_LAMBDA: f64 = 1.0e10;

/// Number of fitting parameters per peak: height, x_center, y_center,
/// x_width, y_width, background, z_center.
pub const NFITTING: usize = 7;

/// Number of entries per peak in a flattened results array: the
/// [`NFITTING`] parameters plus a status code and the last computed error.
pub const NPEAKPAR: usize = NFITTING + 2;

/// Default relative-error-change convergence threshold.
pub const DEFAULT_TOLERANCE: f64 = 1.0e-6;

/// Default initial per-parameter clamp (soft step ceiling).
pub const DEFAULT_CLAMP_START: f64 = 1.0;

/// Default cap on the number of outer sweeps a driver loop will run.
pub const DEFAULT_MAX_ITERATIONS: usize = 200;
