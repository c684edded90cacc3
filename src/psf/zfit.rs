// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Z-dependent width model for the Z-fit PSF family: widths
//! follow a closed-form polynomial in z, `w(z) = w0*(1 + u^2 + A*u^3 +
//! B*u^4)` with `u = (z - c)/d`; the stored inverse-exponent width is
//! `2 / w(z)`.

use serde::{Deserialize, Serialize};

/// Per-axis polynomial width parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ZAxisParams {
    pub w0: f64,
    pub c: f64,
    pub d: f64,
    pub a: f64,
    pub b: f64,
    pub min_z: f64,
    pub max_z: f64,
}

fn w_of_u(p: &ZAxisParams, u: f64) -> f64 {
    p.w0 * (1.0 + u * u + p.a * u.powi(3) + p.b * u.powi(4))
}

fn dw_du(p: &ZAxisParams, u: f64) -> f64 {
    p.w0 * (2.0 * u + 3.0 * p.a * u * u + 4.0 * p.b * u.powi(3))
}

/// `x_width` (or `y_width`) for this axis at the given z.
pub fn width_from_z(p: &ZAxisParams, z: f64) -> f64 {
    let u = (z - p.c) / p.d;
    2.0 / w_of_u(p, u)
}

/// `d(x_width)/dz`, used by the z-column of the Jacobian via the chain
/// rule.
pub fn dwidth_dz(p: &ZAxisParams, z: f64) -> f64 {
    let u = (z - p.c) / p.d;
    let w = w_of_u(p, u);
    let dw_dz = dw_du(p, u) / p.d;
    -2.0 * dw_dz / (w * w)
}
