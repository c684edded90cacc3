// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Tabulated PSF evaluation (spline / pupil-function / PSF-FFT). Construction
of the table is an external collaborator's job; this module only evaluates one that
has already been built, via trilinear interpolation over a regular
`(z, y, x)` grid of unit-amplitude shape samples and central-difference
derivatives.
*/

use ndarray::Array3;

use crate::peak::Peak;

/// A marker type kept for API symmetry with the other PSF families; all of
/// its behaviour lives on [`PsfTable`] itself.
#[derive(Clone, Copy, Debug)]
pub struct TabulatedPsf;

/// An externally supplied, unit-amplitude PSF table sampled on a regular
/// `(z, y, x)` grid.
#[derive(Clone, Debug)]
pub struct PsfTable {
    /// `grid[[zi, yi, xi]]` is the unit-amplitude shape value at that grid
    /// node.
    pub grid: Array3<f64>,
    /// Pixel-space spacing between adjacent x/y grid nodes.
    pub x_step: f64,
    pub y_step: f64,
    /// z range covered by the grid's z-axis, assumed uniformly spaced.
    pub min_z: f64,
    pub max_z: f64,
    /// Half-footprint (in pixels) this table should be evaluated over.
    pub half_size: usize,
}

const FD_STEP: f64 = 1.0e-3;

impl PsfTable {
    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    fn n_z(&self) -> usize {
        self.grid.len_of(ndarray::Axis(0))
    }

    fn n_y(&self) -> usize {
        self.grid.len_of(ndarray::Axis(1))
    }

    fn n_x(&self) -> usize {
        self.grid.len_of(ndarray::Axis(2))
    }

    /// Trilinear interpolation of the unit-amplitude shape at offset
    /// `(dx, dy)` from the peak's center, at the peak's current z.
    fn unit_shape(&self, z: f64, dx: f64, dy: f64) -> f64 {
        let (n_z, n_y, n_x) = (self.n_z(), self.n_y(), self.n_x());
        if n_z == 0 || n_y == 0 || n_x == 0 {
            return 0.0;
        }

        let x_center = (n_x as f64 - 1.0) / 2.0;
        let y_center = (n_y as f64 - 1.0) / 2.0;
        let fx = (dx / self.x_step + x_center).clamp(0.0, (n_x - 1) as f64);
        let fy = (dy / self.y_step + y_center).clamp(0.0, (n_y - 1) as f64);
        let fz = if n_z > 1 {
            let t = ((z - self.min_z) / (self.max_z - self.min_z)).clamp(0.0, 1.0);
            t * (n_z - 1) as f64
        } else {
            0.0
        };

        let x0 = fx.floor() as usize;
        let x1 = (x0 + 1).min(n_x - 1);
        let y0 = fy.floor() as usize;
        let y1 = (y0 + 1).min(n_y - 1);
        let z0 = fz.floor() as usize;
        let z1 = (z0 + 1).min(n_z - 1);

        let tx = fx - x0 as f64;
        let ty = fy - y0 as f64;
        let tz = fz - z0 as f64;

        let at = |zi: usize, yi: usize, xi: usize| self.grid[[zi, yi, xi]];

        let c00 = at(z0, y0, x0) * (1.0 - tx) + at(z0, y0, x1) * tx;
        let c10 = at(z0, y1, x0) * (1.0 - tx) + at(z0, y1, x1) * tx;
        let c0 = c00 * (1.0 - ty) + c10 * ty;

        let c01 = at(z1, y0, x0) * (1.0 - tx) + at(z1, y0, x1) * tx;
        let c11 = at(z1, y1, x0) * (1.0 - tx) + at(z1, y1, x1) * tx;
        let c1 = c01 * (1.0 - ty) + c11 * ty;

        c0 * (1.0 - tz) + c1 * tz
    }

    /// Shape value (already scaled by the peak's height).
    pub fn value(&self, peak: &Peak, dx: f64, dy: f64) -> f64 {
        peak.params.height * self.unit_shape(peak.params.z_center, dx, dy)
    }

    /// Central-difference gradient of the *unit* shape w.r.t. `(dx, dy, z)`.
    pub fn gradient(&self, peak: &Peak, dx: f64, dy: f64) -> (f64, f64, f64) {
        let z = peak.params.z_center;
        let h = FD_STEP;
        let dval_dx = (self.unit_shape(z, dx + h, dy) - self.unit_shape(z, dx - h, dy)) / (2.0 * h);
        let dval_dy = (self.unit_shape(z, dx, dy + h) - self.unit_shape(z, dx, dy - h)) / (2.0 * h);
        let dz = ((self.max_z - self.min_z).abs() * FD_STEP).max(h);
        let dval_dz =
            (self.unit_shape(z + dz, dx, dy) - self.unit_shape(z - dz, dx, dy)) / (2.0 * dz);
        (dval_dx, dval_dy, dval_dz)
    }
}
