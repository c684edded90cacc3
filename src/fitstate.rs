// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The shared per-image fit state: the observed image, the
sCMOS variance term, the accumulated foreground/background buffers, and the
peak list. All buffer mutation goes through [`FitState::add_peak`]/
[`FitState::subtract_peak`] so invariants 1-5 always hold between
calls into the [`crate::updater`]/[`crate::iterator`] layer.
*/

use ndarray::Array2;

use crate::config::FitterConfig;
use crate::constants::NPEAKPAR;
use crate::diagnostics::Diagnostics;
use crate::error::{ErrorCause, FitError};
use crate::peak::{Peak, PeakParams, PeakResult, Status};
use crate::psf::PsfFamily;

/// One image, its shared buffers, and the peaks being fit against it. All
/// peaks in one `FitState` share a single [`PsfFamily`].
pub struct FitState {
    pub(crate) image: Array2<f64>,
    pub(crate) scmos_term: Array2<f64>,
    pub(crate) f_data: Array2<f64>,
    pub(crate) bg_data: Array2<f64>,
    pub(crate) bg_counts: Array2<u32>,

    pub(crate) peaks: Vec<Peak>,
    pub(crate) psf: PsfFamily,
    pub(crate) config: FitterConfig,
    pub(crate) diagnostics: Diagnostics,
}

impl FitState {
    /// Build an empty fit state over a zeroed `rows x cols` image. Call
    /// [`FitState::set_image`] before seeding any peaks.
    pub fn new(rows: usize, cols: usize, psf: PsfFamily, config: FitterConfig) -> Self {
        Self {
            image: Array2::zeros((rows, cols)),
            scmos_term: Array2::zeros((rows, cols)),
            f_data: Array2::zeros((rows, cols)),
            bg_data: Array2::zeros((rows, cols)),
            bg_counts: Array2::zeros((rows, cols)),
            peaks: Vec::new(),
            psf,
            config,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn rows(&self) -> usize {
        self.image.nrows()
    }

    pub fn cols(&self) -> usize {
        self.image.ncols()
    }

    pub fn config(&self) -> &FitterConfig {
        &self.config
    }

    pub fn psf(&self) -> &PsfFamily {
        &self.psf
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn peaks_mut(&mut self) -> &mut [Peak] {
        &mut self.peaks
    }

    /// Read-only access to the shared buffers, used by invariant tests to
    /// compare against a from-scratch recomputation.
    pub fn f_data(&self) -> &Array2<f64> {
        &self.f_data
    }
    pub fn bg_data(&self) -> &Array2<f64> {
        &self.bg_data
    }
    pub fn bg_counts(&self) -> &Array2<u32> {
        &self.bg_counts
    }
    pub fn image(&self) -> &Array2<f64> {
        &self.image
    }
    pub fn scmos_term(&self) -> &Array2<f64> {
        &self.scmos_term
    }

    /// Reset every buffer to zero and install a new observed image plus its
    /// sCMOS variance term. Must be called before any peak is seeded.
    pub fn set_image(&mut self, image: Array2<f64>, scmos_term: Array2<f64>) -> Result<(), FitError> {
        if image.dim() != scmos_term.dim() {
            return Err(FitError::ShapeMismatch {
                image: image.dim(),
                scmos: scmos_term.dim(),
            });
        }
        let dim = image.dim();
        self.f_data = Array2::zeros(dim);
        self.bg_data = Array2::zeros(dim);
        self.bg_counts = Array2::zeros(dim);
        self.image = image;
        self.scmos_term = scmos_term;
        self.peaks.clear();
        self.diagnostics = Diagnostics::default();
        Ok(())
    }

    /// Seed a new peak from initial parameters. If its anchor/footprint
    /// would violate `MARGIN`, the peak is
    /// pushed with status `Error(MarginViolation)` and never added to the
    /// buffers, matching the documented "initialization yields ERROR and
    /// zero contribution to buffers" behaviour.
    pub fn seed_peak(&mut self, params: PeakParams, clamp_start: [f64; crate::constants::NFITTING]) -> usize {
        let margin = self.config.margin;
        let xi = params.x_center.round() as i32;
        let yi = params.y_center.round() as i32;

        let mut dummy = Peak::new(params, xi, yi, 0, 0, clamp_start, self.psf.new_scratch(0, 0));
        let (wx, wy) = self.psf.footprint_for(&dummy, margin);
        dummy.wx = wx;
        dummy.wy = wy;
        dummy.scratch = self.psf.new_scratch(wx, wy);

        let idx = self.peaks.len();
        if self.violates_margin(&dummy, margin) {
            dummy.status = Status::Error(ErrorCause::MarginViolation);
            self.diagnostics.record(ErrorCause::MarginViolation);
            self.peaks.push(dummy);
            return idx;
        }

        self.peaks.push(dummy);
        self.add_peak(idx);
        idx
    }

    fn violates_margin(&self, peak: &Peak, margin: i32) -> bool {
        let rows = self.rows() as i32;
        let cols = self.cols() as i32;
        peak.xi < margin
            || peak.yi < margin
            || peak.xi > cols - margin - 1
            || peak.yi > rows - margin - 1
            || peak.wx > margin
            || peak.wy > margin
    }

    /// Add a peak's contribution to the shared buffers across its footprint
    ///.
    pub fn add_peak(&mut self, idx: usize) {
        let peak = self.peaks[idx].clone();
        for py in peak.footprint_y_range() {
            for px in peak.footprint_x_range() {
                if !self.in_bounds(px, py) {
                    continue;
                }
                let (r, c) = (py as usize, px as usize);
                let shape = self.psf.shape_value(&peak, px, py);
                self.f_data[[r, c]] += shape;
                self.bg_data[[r, c]] += peak.params.background + self.scmos_term[[r, c]];
                self.bg_counts[[r, c]] += 1;
            }
        }
    }

    /// Exact inverse of [`FitState::add_peak`].
    pub fn subtract_peak(&mut self, idx: usize) {
        let peak = self.peaks[idx].clone();
        for py in peak.footprint_y_range() {
            for px in peak.footprint_x_range() {
                if !self.in_bounds(px, py) {
                    continue;
                }
                let (r, c) = (py as usize, px as usize);
                let shape = self.psf.shape_value(&peak, px, py);
                self.f_data[[r, c]] -= shape;
                self.bg_data[[r, c]] -= peak.params.background + self.scmos_term[[r, c]];
                self.bg_counts[[r, c]] -= 1;
            }
        }
    }

    /// Add the contribution of an arbitrary (e.g. trial) peak, not
    /// necessarily `self.peaks[idx]`, across its own footprint.
    pub(crate) fn add_peak_value(&mut self, peak: &Peak) {
        for py in peak.footprint_y_range() {
            for px in peak.footprint_x_range() {
                if !self.in_bounds(px, py) {
                    continue;
                }
                let (r, c) = (py as usize, px as usize);
                let shape = self.psf.shape_value(peak, px, py);
                self.f_data[[r, c]] += shape;
                self.bg_data[[r, c]] += peak.params.background + self.scmos_term[[r, c]];
                self.bg_counts[[r, c]] += 1;
            }
        }
    }

    pub(crate) fn subtract_peak_value(&mut self, peak: &Peak) {
        for py in peak.footprint_y_range() {
            for px in peak.footprint_x_range() {
                if !self.in_bounds(px, py) {
                    continue;
                }
                let (r, c) = (py as usize, px as usize);
                let shape = self.psf.shape_value(peak, px, py);
                self.f_data[[r, c]] -= shape;
                self.bg_data[[r, c]] -= peak.params.background + self.scmos_term[[r, c]];
                self.bg_counts[[r, c]] -= 1;
            }
        }
    }

    pub(crate) fn in_bounds(&self, px: i32, py: i32) -> bool {
        px >= 0 && py >= 0 && (px as usize) < self.cols() && (py as usize) < self.rows()
    }

    /// Model intensity `f_data + bg_data/bg_counts` at one pixel. Returns `None` if the pixel is covered by no peak.
    pub(crate) fn model_intensity(&self, px: i32, py: i32) -> Option<f64> {
        if !self.in_bounds(px, py) {
            return None;
        }
        let (r, c) = (py as usize, px as usize);
        let n = self.bg_counts[[r, c]];
        if n == 0 {
            return None;
        }
        Some(self.f_data[[r, c]] + self.bg_data[[r, c]] / n as f64)
    }

    /// Recompute `(f_data, bg_data, bg_counts)` from scratch over the
    /// currently-added peak set, for invariant tests.
    pub fn recompute_from_scratch(&self) -> (Array2<f64>, Array2<f64>, Array2<u32>) {
        let dim = self.image.dim();
        let mut f_data = Array2::zeros(dim);
        let mut bg_data = Array2::zeros(dim);
        let mut bg_counts: Array2<u32> = Array2::zeros(dim);
        for peak in &self.peaks {
            if !peak.status.is_added() {
                continue;
            }
            for py in peak.footprint_y_range() {
                for px in peak.footprint_x_range() {
                    if !self.in_bounds(px, py) {
                        continue;
                    }
                    let (r, c) = (py as usize, px as usize);
                    f_data[[r, c]] += self.psf.shape_value(peak, px, py);
                    bg_data[[r, c]] += peak.params.background + self.scmos_term[[r, c]];
                    bg_counts[[r, c]] += 1;
                }
            }
        }
        (f_data, bg_data, bg_counts)
    }

    /// Overwrite a committed peak with a trial peak that has already been
    /// validated and re-added to the buffers (used by [`crate::iterator`]).
    pub(crate) fn commit_peak(&mut self, idx: usize, peak: Peak) {
        self.peaks[idx] = peak;
    }

    /// Mark a peak `Error(cause)` and tally the diagnostic. The caller is
    /// responsible for having already subtracted the peak's contribution
    /// from the buffers so an errored peak never contributes to them again.
    pub(crate) fn record_failure(&mut self, idx: usize, cause: ErrorCause) {
        self.peaks[idx].status = Status::Error(cause);
        self.diagnostics.record(cause);
    }

    /// Run one sweep over every `Running` peak, delegating to
    /// [`crate::iterator`].
    pub fn iterate(&mut self) {
        crate::iterator::sweep(self);
    }

    /// Count of peaks still `Running`; the outer driver loop's terminator
    ///.
    pub fn get_unconverged(&self) -> usize {
        self.peaks.iter().filter(|p| p.status.is_running()).count()
    }

    /// Committed peak parameters, status, and last error, ordered by
    /// originating index.
    pub fn get_results(&self) -> Vec<PeakResult> {
        self.peaks
            .iter()
            .enumerate()
            .map(|(index, peak)| PeakResult {
                index,
                params: peak.params,
                status: peak.status,
                error: peak.error,
            })
            .collect()
    }

    /// Flatten [`FitState::get_results`] into `n_fit * NPEAKPAR` doubles
    ///: the 7 parameters, a status code, then the error.
    pub fn get_results_flat(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.peaks.len() * NPEAKPAR);
        for result in self.get_results() {
            out.extend_from_slice(&result.params.as_array());
            out.push(status_code(result.status));
            out.push(result.error);
        }
        out
    }
}

fn status_code(status: Status) -> f64 {
    match status {
        Status::Running => 0.0,
        Status::Converged => 1.0,
        Status::Error(_) => 2.0,
        Status::BadPeak => 3.0,
    }
}
