// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Synthetic-image generation for the numerical round-trip tests. Image
//! simulation is an external collaborator's job, so this lives only under
//! `tests/`, never in the library's public API.

use ndarray::Array2;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};

/// A single ground-truth emitter used to render a synthetic image.
#[derive(Clone, Copy, Debug)]
pub struct TruePeak {
    pub height: f64,
    pub x: f64,
    pub y: f64,
    pub x_width: f64,
    pub y_width: f64,
    pub background: f64,
}

/// Render the noiseless sum of `peaks` over a `rows x cols` grid, in the same
/// inverse-Gaussian-exponent convention as the library. Each peak's own
/// background is added once per pixel, not once per peak, so overlapping
/// peaks with equal backgrounds sum to the expected flat floor instead of
/// stacking.
pub fn render_noiseless(rows: usize, cols: usize, peaks: &[TruePeak]) -> Array2<f64> {
    let mut image = Array2::zeros((rows, cols));
    let mut background = 0.0_f64;
    for r in 0..rows {
        for c in 0..cols {
            let mut value = 0.0;
            for peak in peaks {
                let dx = c as f64 + 0.5 - peak.x;
                let dy = r as f64 + 0.5 - peak.y;
                value += peak.height
                    * (-(peak.x_width * dx * dx + peak.y_width * dy * dy)).exp();
                background = background.max(peak.background);
            }
            image[[r, c]] = value + background;
        }
    }
    image
}

/// Render `peaks` with Poisson shot noise added per pixel, using a
/// deterministic seed so the test is reproducible.
pub fn render_poisson_noisy(rows: usize, cols: usize, peaks: &[TruePeak], seed: u64) -> Array2<f64> {
    let noiseless = render_noiseless(rows, cols, peaks);
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    noiseless.mapv(|lambda| {
        if lambda <= 0.0 {
            return 0.0;
        }
        Poisson::new(lambda)
            .expect("non-negative finite lambda")
            .sample(&mut rng)
    })
}
