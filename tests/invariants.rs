// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Buffer-bookkeeping invariants that must hold between every
//! [`smlm_fit::FitState`] mutation, independent of whether a fit ever
//! converges.

use ndarray::Array2;

use smlm_fit::{FitState, FitterConfig, PeakParams, PsfFamily};

fn peak_params(x: f64, y: f64) -> PeakParams {
    PeakParams {
        height: 150.0,
        x_center: x,
        y_center: y,
        x_width: 0.3,
        y_width: 0.3,
        background: 1.0,
        z_center: 0.0,
    }
}

fn fit_with_peaks(positions: &[(f64, f64)]) -> FitState {
    let config = FitterConfig {
        margin: 4,
        ..FitterConfig::default()
    };
    let mut fit = FitState::new(20, 20, PsfFamily::Gaussian3D, config.clone());
    fit.set_image(Array2::zeros((20, 20)), Array2::zeros((20, 20))).unwrap();
    for &(x, y) in positions {
        fit.seed_peak(peak_params(x, y), config.clamp_start);
    }
    fit
}

/// The accumulated buffers always equal a from-scratch recomputation over
/// the currently-added peaks.
#[test]
fn buffers_match_from_scratch_recomputation() {
    let fit = fit_with_peaks(&[(8.0, 8.0), (12.0, 9.0), (10.0, 13.0)]);

    let (f_data, bg_data, bg_counts) = fit.recompute_from_scratch();
    assert_eq!(&bg_counts, fit.bg_counts());
    for (a, b) in f_data.iter().zip(fit.f_data().iter()) {
        assert!((a - b).abs() < 1e-9);
    }
    for (a, b) in bg_data.iter().zip(fit.bg_data().iter()) {
        assert!((a - b).abs() < 1e-9);
    }
}

/// Subtracting a peak right after adding it restores every buffer exactly.
#[test]
fn add_then_subtract_is_a_no_op() {
    let mut fit = fit_with_peaks(&[(10.0, 10.0)]);
    let before_f = fit.f_data().clone();
    let before_bg = fit.bg_data().clone();
    let before_counts = fit.bg_counts().clone();

    fit.add_peak(0);
    fit.subtract_peak(0);

    assert_eq!(&before_counts, fit.bg_counts());
    for (a, b) in before_f.iter().zip(fit.f_data().iter()) {
        assert_eq!(a, b);
    }
    for (a, b) in before_bg.iter().zip(fit.bg_data().iter()) {
        assert_eq!(a, b);
    }
}

/// Overlapping peaks accumulate their background contribution once per
/// peak per covered pixel, not once total.
#[test]
fn overlapping_peaks_accumulate_background_per_peak() {
    let fit = fit_with_peaks(&[(10.0, 10.0), (11.0, 10.0)]);
    let covered_by_both = fit
        .bg_counts()
        .iter()
        .copied()
        .max()
        .expect("non-empty buffer");
    assert_eq!(covered_by_both, 2);
}
