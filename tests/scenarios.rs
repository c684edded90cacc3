// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end regression scenarios that drive the engine from a seeded peak
//! list through to convergence (or a documented failure), exercising the
//! public single-channel and multi-channel entry points together.

mod common;

use ndarray::Array2;

use smlm_fit::config::FitStrategy;
use smlm_fit::error::ErrorCause;
use smlm_fit::multichannel::{AffineMap, ChannelTransform, Coordinator, HeightsMode, WeightTables};
use smlm_fit::psf::ZAxisParams;
use smlm_fit::{FitState, FitterConfig, PeakParams, PsfFamily, Status};

use common::TruePeak;

fn config_with_margin(margin: i32) -> FitterConfig {
    FitterConfig {
        margin,
        strategy: FitStrategy::LevenbergMarquardt,
        ..FitterConfig::default()
    }
}

fn run_to_convergence(fit: &mut FitState) {
    let max = fit.config().max_iterations;
    let mut sweeps = 0;
    while fit.get_unconverged() > 0 && sweeps < max {
        fit.iterate();
        sweeps += 1;
    }
}

fn run_coordinator_to_convergence(coordinator: &mut Coordinator, max_iterations: usize) {
    let mut sweeps = 0;
    while coordinator.get_unconverged() > 0 && sweeps < max_iterations {
        coordinator.iterate();
        sweeps += 1;
    }
}

/// A single isolated peak, seeded close to the truth on a noiseless image,
/// converges back to it.
#[test]
fn single_peak_converges_to_truth() {
    let truth = TruePeak {
        height: 500.0,
        x: 10.3,
        y: 9.7,
        x_width: 0.30,
        y_width: 0.35,
        background: 5.0,
    };
    let image = common::render_noiseless(20, 20, &[truth]);
    let scmos = Array2::zeros((20, 20));

    let config = config_with_margin(3);
    let mut fit = FitState::new(20, 20, PsfFamily::Gaussian3D, config.clone());
    fit.set_image(image, scmos).unwrap();

    let seed = PeakParams {
        height: 400.0,
        x_center: 9.5,
        y_center: 9.0,
        x_width: 0.25,
        y_width: 0.25,
        background: 3.0,
        z_center: 0.0,
    };
    fit.seed_peak(seed, config.clamp_start);
    run_to_convergence(&mut fit);

    let result = &fit.get_results()[0];
    assert_eq!(result.status, Status::Converged);
    assert!((result.params.x_center - truth.x).abs() < 0.1);
    assert!((result.params.y_center - truth.y).abs() < 0.1);
    assert!((result.params.height - truth.height).abs() / truth.height < 0.05);
    assert!((result.params.background - truth.background).abs() < 0.5);
}

/// Two overlapping peaks sharing a footprint both converge, with heights
/// recovered to within a few percent despite the overlap.
#[test]
fn two_overlapping_peaks_both_converge() {
    let truth_a = TruePeak {
        height: 300.0,
        x: 10.0,
        y: 12.0,
        x_width: 0.30,
        y_width: 0.30,
        background: 2.0,
    };
    let truth_b = TruePeak {
        height: 300.0,
        x: 13.0,
        y: 12.0,
        x_width: 0.30,
        y_width: 0.30,
        background: 2.0,
    };
    let image = common::render_noiseless(24, 24, &[truth_a, truth_b]);
    let scmos = Array2::zeros((24, 24));

    let config = config_with_margin(4);
    let mut fit = FitState::new(24, 24, PsfFamily::Gaussian3D, config.clone());
    fit.set_image(image, scmos).unwrap();

    let seed_a = PeakParams {
        height: 250.0,
        x_center: 9.5,
        y_center: 11.5,
        x_width: 0.25,
        y_width: 0.25,
        background: 1.5,
        z_center: 0.0,
    };
    let seed_b = PeakParams {
        height: 250.0,
        x_center: 13.5,
        y_center: 12.5,
        x_width: 0.25,
        y_width: 0.25,
        background: 1.5,
        z_center: 0.0,
    };
    fit.seed_peak(seed_a, config.clamp_start);
    fit.seed_peak(seed_b, config.clamp_start);
    run_to_convergence(&mut fit);

    let results = fit.get_results();
    for result in &results {
        assert_eq!(result.status, Status::Converged);
    }
    assert!((results[0].params.height - truth_a.height).abs() / truth_a.height < 0.02);
    assert!((results[1].params.height - truth_b.height).abs() / truth_b.height < 0.02);
}

/// A z-dependent-width peak, seeded at z=0 with the truth away from it,
/// converges back to the true depth.
#[test]
fn z_fit_recovers_depth() {
    let axis = ZAxisParams {
        w0: 2.0,
        c: 0.0,
        d: 300.0,
        a: 0.0,
        b: 0.0,
        min_z: -500.0,
        max_z: 500.0,
    };
    // width_from_z at z=150 with these coefficients: u=0.5, w(u)=2.5, width=0.8.
    let truth = TruePeak {
        height: 400.0,
        x: 10.0,
        y: 10.0,
        x_width: 0.8,
        y_width: 0.8,
        background: 3.0,
    };
    let image = common::render_noiseless(20, 20, &[truth]);
    let scmos = Array2::zeros((20, 20));

    let config = config_with_margin(3);
    let mut fit = FitState::new(20, 20, PsfFamily::GaussianZ { x: axis, y: axis }, config.clone());
    fit.set_image(image, scmos).unwrap();

    // width_from_z at z=0 is 1.0, so the scratch/footprint built before the
    // first clamp_z pass stays in the right ballpark.
    let seed = PeakParams {
        height: 350.0,
        x_center: 9.5,
        y_center: 9.5,
        x_width: 1.0,
        y_width: 1.0,
        background: 2.5,
        z_center: 0.0,
    };
    fit.seed_peak(seed, config.clamp_start);
    run_to_convergence(&mut fit);

    let result = &fit.get_results()[0];
    assert_eq!(result.status, Status::Converged);
    assert!((result.params.z_center - 150.0).abs() < 30.0);
}

/// An out-of-margin seed is rejected immediately and leaves the shared
/// buffers untouched.
#[test]
fn out_of_bounds_seed_errors_without_touching_buffers() {
    let config = FitterConfig::default(); // margin = 10
    let mut fit = FitState::new(20, 20, PsfFamily::Gaussian2D, config.clone());
    fit.set_image(Array2::zeros((20, 20)), Array2::zeros((20, 20))).unwrap();

    let seed = PeakParams {
        height: 200.0,
        x_center: 2.0,
        y_center: 5.0,
        x_width: 0.3,
        y_width: 0.3,
        background: 1.0,
        z_center: 0.0,
    };
    let idx = fit.seed_peak(seed, config.clamp_start);

    assert!(matches!(
        fit.peaks()[idx].status,
        Status::Error(ErrorCause::MarginViolation)
    ));
    assert!(fit.f_data().iter().all(|&v| v == 0.0));
    assert!(fit.bg_data().iter().all(|&v| v == 0.0));
    assert!(fit.bg_counts().iter().all(|&v| v == 0));
}

fn flat_weight_tables(n_channels: usize) -> WeightTables {
    let table = Array2::from_elem((1, n_channels), 1.0);
    WeightTables {
        w_h: table.clone(),
        w_x: table.clone(),
        w_y: table.clone(),
        w_z: table.clone(),
        w_bg: table,
        z_scale: 1.0,
        z_offset: 0.0,
    }
}

/// With an identity transform and two identical planes, the coupled fit
/// reduces to the same result a single-channel fit of the same image would
/// reach on its own.
#[test]
fn multichannel_identity_matches_single_channel() {
    let truth = TruePeak {
        height: 400.0,
        x: 10.2,
        y: 9.8,
        x_width: 0.3,
        y_width: 0.3,
        background: 4.0,
    };
    let image = common::render_noiseless(20, 20, &[truth]);
    let scmos = Array2::zeros((20, 20));
    let config = config_with_margin(3);

    let seed = PeakParams {
        height: 350.0,
        x_center: 9.5,
        y_center: 9.0,
        x_width: 0.25,
        y_width: 0.25,
        background: 3.0,
        z_center: 0.0,
    };

    // Reference: a standalone single-channel fit of the same image.
    let mut reference = FitState::new(20, 20, PsfFamily::Gaussian3D, config.clone());
    reference.set_image(image.clone(), scmos.clone()).unwrap();
    reference.seed_peak(seed, config.clamp_start);
    run_to_convergence(&mut reference);
    let reference_result = reference.get_results()[0];

    let mut channel0 = FitState::new(20, 20, PsfFamily::Gaussian3D, config.clone());
    channel0.set_image(image.clone(), scmos.clone()).unwrap();
    let mut channel1 = FitState::new(20, 20, PsfFamily::Gaussian3D, config.clone());
    channel1.set_image(image, scmos).unwrap();

    let transforms = vec![ChannelTransform::identity(), ChannelTransform::identity()];
    let weights = flat_weight_tables(2);
    let mut coordinator = Coordinator::new(
        vec![channel0, channel1],
        transforms,
        weights,
        HeightsMode::Fixed,
        config.clone(),
    )
    .unwrap();
    coordinator.seed_group(seed, config.clamp_start);
    run_coordinator_to_convergence(&mut coordinator, config.max_iterations);

    let result0 = coordinator.channel(0).get_results()[0];
    let result1 = coordinator.channel(1).get_results()[0];
    assert_eq!(result0.status, Status::Converged);
    assert_eq!(result1.status, Status::Converged);

    assert!((result0.params.x_center - result1.params.x_center).abs() < 1e-9);
    assert!((result0.params.y_center - result1.params.y_center).abs() < 1e-9);
    assert!((result0.params.height - result1.params.height).abs() < 1e-9);

    assert!((result0.params.x_center - reference_result.params.x_center).abs() < 1e-6);
    assert!((result0.params.y_center - reference_result.params.y_center).abs() < 1e-6);
    assert!((result0.params.height - reference_result.params.height).abs() < 1e-6);
}

/// A channel pair related by a coordinate-swap transform keeps channel 1's
/// position the swap of channel 0's, from the moment a group is seeded and
/// through every sweep afterward.
#[test]
fn multichannel_swap_transform_couples_coordinates() {
    // The spec's literal scenario-5 transform: `xt_0toN = (0,0,1)`,
    // `yt_0toN = (0,1,0)`. Applied per §4.5's `(yt_0toN, xt_0toN)` order
    // (Open Question #3), this swaps x and y between channels; a 90-degree
    // rotation is its own inverse, so the `N->0` maps are the same pair.
    let xt_0to_n = AffineMap { a0: 0.0, a1: 0.0, a2: 1.0 };
    let yt_0to_n = AffineMap { a0: 0.0, a1: 1.0, a2: 0.0 };
    let swap_transform = ChannelTransform {
        x_0_to_n: xt_0to_n,
        y_0_to_n: yt_0to_n,
        x_n_to_0: xt_0to_n,
        y_n_to_0: yt_0to_n,
    };

    let truth0 = TruePeak {
        height: 350.0,
        x: 3.2,
        y: 7.5,
        x_width: 0.3,
        y_width: 0.3,
        background: 2.0,
    };
    let truth1 = TruePeak {
        height: 350.0,
        x: 7.5,
        y: 3.2,
        x_width: 0.3,
        y_width: 0.3,
        background: 2.0,
    };
    let image0 = common::render_noiseless(20, 20, &[truth0]);
    let image1 = common::render_noiseless(20, 20, &[truth1]);
    let scmos = Array2::zeros((20, 20));
    let config = config_with_margin(3);

    let mut channel0 = FitState::new(20, 20, PsfFamily::Gaussian3D, config.clone());
    channel0.set_image(image0, scmos.clone()).unwrap();
    let mut channel1 = FitState::new(20, 20, PsfFamily::Gaussian3D, config.clone());
    channel1.set_image(image1, scmos).unwrap();

    let transforms = vec![ChannelTransform::identity(), swap_transform];
    let weights = flat_weight_tables(2);
    let mut coordinator = Coordinator::new(
        vec![channel0, channel1],
        transforms,
        weights,
        HeightsMode::Fixed,
        config.clone(),
    )
    .unwrap();

    let seed0 = PeakParams {
        height: 350.0,
        x_center: 3.2,
        y_center: 7.5,
        x_width: 0.3,
        y_width: 0.3,
        background: 2.0,
        z_center: 0.0,
    };
    coordinator.seed_group(seed0, config.clamp_start);

    // The mapping is pure arithmetic at seed time, independent of fitting.
    let seeded1 = &coordinator.channel(1).peaks()[0].params;
    assert!((seeded1.x_center - 7.5).abs() < 1e-9);
    assert!((seeded1.y_center - 3.2).abs() < 1e-9);

    run_coordinator_to_convergence(&mut coordinator, config.max_iterations);

    let fitted0 = coordinator.channel(0).get_results()[0];
    let fitted1 = coordinator.channel(1).get_results()[0];
    assert_eq!(fitted0.status, Status::Converged);
    assert_eq!(fitted1.status, Status::Converged);
    assert!((fitted1.params.x_center - fitted0.params.y_center).abs() < 0.1);
    assert!((fitted1.params.y_center - fitted0.params.x_center).abs() < 0.1);
}

/// If the channel-0-to-N mapping places one channel's peak outside that
/// channel's margin, the whole group is forced to `Error` in every channel,
/// not just the offending one.
#[test]
fn multichannel_out_of_bounds_channel_fails_whole_group() {
    // A translation that pushes channel 1's mapped position outside its
    // margin even though channel 0's seed is comfortably inside.
    let push_out = AffineMap { a0: 100.0, a1: 0.0, a2: 1.0 };
    let identity_like = AffineMap { a0: 0.0, a1: 1.0, a2: 0.0 };
    let transform = ChannelTransform {
        x_0_to_n: push_out,
        y_0_to_n: identity_like,
        x_n_to_0: AffineMap { a0: -100.0, a1: 0.0, a2: 1.0 },
        y_n_to_0: identity_like,
    };

    let config = config_with_margin(3);
    let mut channel0 = FitState::new(20, 20, PsfFamily::Gaussian3D, config.clone());
    channel0.set_image(Array2::zeros((20, 20)), Array2::zeros((20, 20))).unwrap();
    let mut channel1 = FitState::new(20, 20, PsfFamily::Gaussian3D, config.clone());
    channel1.set_image(Array2::zeros((20, 20)), Array2::zeros((20, 20))).unwrap();

    let transforms = vec![ChannelTransform::identity(), transform];
    let weights = flat_weight_tables(2);
    let mut coordinator = Coordinator::new(
        vec![channel0, channel1],
        transforms,
        weights,
        HeightsMode::Fixed,
        config.clone(),
    )
    .unwrap();

    let seed0 = PeakParams {
        height: 300.0,
        x_center: 10.0,
        y_center: 10.0,
        x_width: 0.3,
        y_width: 0.3,
        background: 2.0,
        z_center: 0.0,
    };
    coordinator.seed_group(seed0, config.clamp_start);

    let status0 = coordinator.channel(0).peaks()[0].status;
    let status1 = coordinator.channel(1).peaks()[0].status;
    assert!(matches!(status0, Status::Error(ErrorCause::MarginViolation)));
    assert!(matches!(status1, Status::Error(ErrorCause::MarginViolation)));

    assert!(coordinator.channel(0).f_data().iter().all(|&v| v == 0.0));
    assert!(coordinator.channel(0).bg_counts().iter().all(|&v| v == 0));
}
