// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The PSF model layer. A [`PsfFamily`] is polymorphic over the
PSF shape evaluated at an integer pixel grid around a peak's sub-pixel
center: fixed-width 2D Gaussian, isotropic-width 2D Gaussian, independent
x/y-width 2D Gaussian ("3D"), z-dependent-width Gaussian ("Z-fit"), and
tabulated (spline / pupil-function / PSF-FFT) families.

The family set is closed and known up front, so this crate expresses the
polymorphism as an enum matched in one place rather than a `dyn Trait`
object; nothing here shares state across instances.
*/

mod gaussian;
mod tabulated;
mod zfit;

pub use gaussian::GaussianAxes;
pub use tabulated::{PsfTable, TabulatedPsf};
pub use zfit::ZAxisParams;

use std::sync::Arc;
use thiserror::Error;

use crate::constants::NFITTING;
use crate::peak::{Peak, PsfScratch};

/// Errors from evaluating or constructing a PSF model.
#[derive(Error, Debug)]
pub enum PsfError {
    #[error("z center {z} is outside the tabulated/model range [{min}, {max}]")]
    ZOutOfRange { z: f64, min: f64, max: f64 },

    #[error("PSF table lookup index out of bounds: {0}")]
    TableOutOfBounds(String),
}

/// Parameter indices into [`crate::peak::PeakParams::as_array`], named for
/// readability at call sites.
pub mod param_index {
    pub const HEIGHT: usize = 0;
    pub const X_CENTER: usize = 1;
    pub const Y_CENTER: usize = 2;
    pub const X_WIDTH: usize = 3;
    pub const Y_WIDTH: usize = 4;
    pub const BACKGROUND: usize = 5;
    pub const Z_CENTER: usize = 6;
}

/// Which PSF family a peak is fit with.
#[derive(Clone, Debug)]
pub enum PsfFamily {
    /// Widths are fixed and not free parameters.
    GaussianFixed { axes: GaussianAxes },
    /// A single free width parameter shared by both axes ("2D"). The shared
    /// delta comes only from the x-width Jacobian/Hessian column; `y_width`
    /// tracks `x_width` by a plain assignment and never gets its own column.
    Gaussian2D,
    /// Independent x/y-width free parameters ("3D").
    Gaussian3D,
    /// Widths are a deterministic polynomial function of z ("Z-fit").
    GaussianZ { x: ZAxisParams, y: ZAxisParams },
    /// Spline / pupil-function / PSF-FFT, evaluated through a tabulated
    /// lookup supplied by the caller.
    Tabulated(Arc<PsfTable>),
}

impl PsfFamily {
    /// The ordered indices of free parameters for this family (always
    /// includes height, x_center, y_center, background; z_center only for
    /// Z-fit and tabulated families; widths per the family's own rule).
    pub fn active_params(&self) -> Vec<usize> {
        use param_index::*;
        match self {
            PsfFamily::GaussianFixed { .. } => vec![HEIGHT, X_CENTER, Y_CENTER, BACKGROUND],
            PsfFamily::Gaussian2D => vec![HEIGHT, X_CENTER, Y_CENTER, X_WIDTH, BACKGROUND],
            PsfFamily::Gaussian3D => {
                vec![HEIGHT, X_CENTER, Y_CENTER, X_WIDTH, Y_WIDTH, BACKGROUND]
            }
            PsfFamily::GaussianZ { .. } => {
                vec![HEIGHT, X_CENTER, Y_CENTER, Z_CENTER, BACKGROUND]
            }
            PsfFamily::Tabulated(_) => {
                vec![HEIGHT, X_CENTER, Y_CENTER, Z_CENTER, BACKGROUND]
            }
        }
    }

    /// Half-footprint derived from the current widths, with hysteresis
    /// applied against the peak's existing `(wx, wy)`.
    pub fn footprint_for(&self, peak: &Peak, margin: i32) -> (i32, i32) {
        let (wx_raw, wy_raw) = match self {
            PsfFamily::GaussianFixed { axes } => (
                gaussian::half_width_from_width(axes.x_width),
                gaussian::half_width_from_width(axes.y_width),
            ),
            PsfFamily::Gaussian2D => {
                let w = gaussian::half_width_from_width(peak.params.x_width);
                (w, w)
            }
            PsfFamily::Gaussian3D | PsfFamily::GaussianZ { .. } => (
                gaussian::half_width_from_width(peak.params.x_width),
                gaussian::half_width_from_width(peak.params.y_width),
            ),
            PsfFamily::Tabulated(table) => (table.half_size as i32, table.half_size as i32),
        };
        let wx_raw = wx_raw.min(margin);
        let wy_raw = wy_raw.min(margin);
        (
            apply_hysteresis(peak.wx, wx_raw),
            apply_hysteresis(peak.wy, wy_raw),
        )
    }

    /// Re-derive a fresh scratch buffer sized for this family/footprint.
    pub fn new_scratch(&self, wx: i32, wy: i32) -> PsfScratch {
        match self {
            PsfFamily::Tabulated(table) => PsfScratch::new_tabulated(table.len()),
            _ => PsfScratch::new_gaussian(wx.max(wy)),
        }
    }

    /// Clamp `z_center` into the family's supported range. Out-of-range z is
    /// always clamped back in, never treated as a fit failure.
    pub fn clamp_z(&self, peak: &mut Peak) {
        match self {
            PsfFamily::GaussianZ { x, y } => {
                let lo = x.min_z.max(y.min_z);
                let hi = x.max_z.min(y.max_z);
                peak.params.z_center = peak.params.z_center.clamp(lo, hi);
                let wx = zfit::width_from_z(x, peak.params.z_center);
                let wy = zfit::width_from_z(y, peak.params.z_center);
                peak.params.x_width = wx;
                peak.params.y_width = wy;
            }
            PsfFamily::Tabulated(table) => {
                peak.params.z_center = peak.params.z_center.clamp(table.min_z, table.max_z);
            }
            _ => {}
        }
    }

    /// The shape value at one pixel (peak contribution only: no background,
    /// no sCMOS term -- those are accumulated separately by `FitState`).
    pub fn shape_value(&self, peak: &Peak, px: i32, py: i32) -> f64 {
        let dx = px as f64 + 0.5 - peak.params.x_center;
        let dy = py as f64 + 0.5 - peak.params.y_center;
        match self {
            PsfFamily::GaussianFixed { axes } => {
                gaussian::value(peak.params.height, axes.x_width, axes.y_width, dx, dy)
            }
            PsfFamily::Gaussian2D => {
                gaussian::value(peak.params.height, peak.params.x_width, peak.params.x_width, dx, dy)
            }
            PsfFamily::Gaussian3D | PsfFamily::GaussianZ { .. } => gaussian::value(
                peak.params.height,
                peak.params.x_width,
                peak.params.y_width,
                dx,
                dy,
            ),
            PsfFamily::Tabulated(table) => table.value(peak, dx, dy),
        }
    }

    /// Partial derivatives of the shape value w.r.t. every parameter in
    /// [`NFITTING`] order; zero for parameters this family doesn't free.
    /// `∂/∂background` is always `1.0` and is handled the same way for
    /// every family, so it is filled in here uniformly.
    pub fn partials(&self, peak: &Peak, px: i32, py: i32) -> [f64; NFITTING] {
        let dx = px as f64 + 0.5 - peak.params.x_center;
        let dy = py as f64 + 0.5 - peak.params.y_center;
        let mut out = [0.0; NFITTING];
        out[param_index::BACKGROUND] = 1.0;
        match self {
            PsfFamily::GaussianFixed { axes } => {
                let g = gaussian::value(peak.params.height, axes.x_width, axes.y_width, dx, dy);
                let exp_arg = if peak.params.height.abs() > 0.0 {
                    g / peak.params.height
                } else {
                    gaussian::exp_term(axes.x_width, axes.y_width, dx, dy)
                };
                out[param_index::HEIGHT] = exp_arg;
                out[param_index::X_CENTER] = 2.0 * peak.params.height * axes.x_width * dx * exp_arg;
                out[param_index::Y_CENTER] = 2.0 * peak.params.height * axes.y_width * dy * exp_arg;
            }
            PsfFamily::Gaussian2D => {
                let w = peak.params.x_width;
                let exp_arg = gaussian::exp_term(w, w, dx, dy);
                out[param_index::HEIGHT] = exp_arg;
                out[param_index::X_CENTER] = 2.0 * peak.params.height * w * dx * exp_arg;
                out[param_index::Y_CENTER] = 2.0 * peak.params.height * w * dy * exp_arg;
                // y_width is never an independent Jacobian column here; it is
                // kept equal to x_width by assignment after the update.
                out[param_index::X_WIDTH] = -peak.params.height * dx * dx * exp_arg;
            }
            PsfFamily::Gaussian3D | PsfFamily::GaussianZ { .. } => {
                let wx = peak.params.x_width;
                let wy = peak.params.y_width;
                let exp_arg = gaussian::exp_term(wx, wy, dx, dy);
                let h = peak.params.height;
                out[param_index::HEIGHT] = exp_arg;
                out[param_index::X_CENTER] = 2.0 * h * wx * dx * exp_arg;
                out[param_index::Y_CENTER] = 2.0 * h * wy * dy * exp_arg;
                out[param_index::X_WIDTH] = -h * dx * dx * exp_arg;
                out[param_index::Y_WIDTH] = -h * dy * dy * exp_arg;
                if let PsfFamily::GaussianZ { x, y } = self {
                    // Chain rule: d(shape)/dz = d(shape)/dwx * dwx/dz +
                    // d(shape)/dwy * dwy/dz.
                    let dwx_dz = zfit::dwidth_dz(x, peak.params.z_center);
                    let dwy_dz = zfit::dwidth_dz(y, peak.params.z_center);
                    out[param_index::Z_CENTER] =
                        out[param_index::X_WIDTH] * dwx_dz + out[param_index::Y_WIDTH] * dwy_dz;
                }
            }
            PsfFamily::Tabulated(table) => {
                let (dval_dx, dval_dy, dval_dz) = table.gradient(peak, dx, dy);
                out[param_index::HEIGHT] = table.value(peak, dx, dy) / peak.params.height.max(1e-12);
                out[param_index::X_CENTER] = -peak.params.height * dval_dx;
                out[param_index::Y_CENTER] = -peak.params.height * dval_dy;
                out[param_index::Z_CENTER] = peak.params.height * dval_dz;
            }
        }
        out
    }
}

/// Half-footprint hysteresis: the integer only jumps when
/// the raw value differs from the current one by more than
/// [`crate::constants::HYSTERESIS`].
fn apply_hysteresis(current: i32, raw: i32) -> i32 {
    if (raw - current).abs() as f64 > crate::constants::HYSTERESIS {
        raw
    } else {
        current
    }
}

/// Integer anchor hysteresis: the anchor only moves when the floating
/// center has drifted from it by more than `HYSTERESIS` pixels.
pub fn apply_anchor_hysteresis(current: i32, float_center: f64) -> i32 {
    let candidate = float_center.round() as i32;
    if (float_center - current as f64).abs() > crate::constants::HYSTERESIS {
        candidate
    } else {
        current
    }
}
