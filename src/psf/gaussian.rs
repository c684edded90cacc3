// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared Gaussian shape math used by every Gaussian family (fixed, 2D, 3D,
//! Z-fit). Widths are in the inverse-Gaussian-exponent convention
//! (`x_width = 1 / (2*sigma_x^2)`).

use serde::{Deserialize, Serialize};

/// Fixed per-axis widths for [`super::PsfFamily::GaussianFixed`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GaussianAxes {
    pub x_width: f64,
    pub y_width: f64,
}

/// `exp(-x_width*dx^2 - y_width*dy^2)`.
pub fn exp_term(x_width: f64, y_width: f64, dx: f64, dy: f64) -> f64 {
    (-(x_width * dx * dx + y_width * dy * dy)).exp()
}

/// `height * exp(-x_width*dx^2 - y_width*dy^2)`.
pub fn value(height: f64, x_width: f64, y_width: f64, dx: f64, dy: f64) -> f64 {
    height * exp_term(x_width, y_width, dx, dy)
}

/// Footprint half-width for one axis: `round(4*sqrt(1/(2*width)))`. A
/// non-positive or non-finite width falls back to the largest half-width the
/// caller's margin allows, since that indicates a pathological fit the
/// validity checks will reject regardless.
pub fn half_width_from_width(width: f64) -> i32 {
    if !width.is_finite() || width <= 0.0 {
        return crate::constants::MARGIN;
    }
    let sigma = (1.0 / (2.0 * width)).sqrt();
    (4.0 * sigma).round() as i32
}
