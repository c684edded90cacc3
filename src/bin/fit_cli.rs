// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
A thin demonstration harness over `smlm-fit`: reads a scenario description
(image, sCMOS term, PSF family, seed peaks) from a JSON file, drives the
engine to convergence or `max_iterations`, and prints the fitted peaks.

This binary does not perform any of the out-of-scope collaborator duties
(movie I/O, peak-finding, on-disk localization formats) -- it is a harness
for exercising the core engine standalone, not a pipeline stage.
*/

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::Parser;
use log::{debug, info};
use serde::Deserialize;

use smlm_fit::config::FitterConfig;
use smlm_fit::peak::PeakParams;
use smlm_fit::psf::{GaussianAxes, PsfFamily, ZAxisParams};
use smlm_fit::FitState;

#[derive(Parser, Debug)]
#[clap(
    name = "smlm-fit-demo",
    about = "Run the smlm-fit engine on a synthetic scenario"
)]
struct Args {
    /// Path to a scenario JSON file (image, sCMOS term, PSF family, seed
    /// peaks).
    #[clap(parse(from_str))]
    scenario: PathBuf,

    /// Path to a `FitterConfig` TOML file. Defaults are used if omitted.
    #[clap(short, long, parse(from_str))]
    config: Option<PathBuf>,

    /// Verbosity of logging (repeat for more, e.g. -vv).
    #[clap(short, long, parse(from_occurrences))]
    verbose: u8,
}

/// One seeded peak in a scenario file, in channel-0 pixel coordinates.
#[derive(Deserialize, Debug)]
struct SeedPeak {
    height: f64,
    x: f64,
    y: f64,
    #[serde(default)]
    z: f64,
    background: f64,
    #[serde(default)]
    x_width: f64,
    #[serde(default)]
    y_width: f64,
}

impl SeedPeak {
    fn into_params(self) -> PeakParams {
        PeakParams {
            height: self.height,
            x_center: self.x,
            y_center: self.y,
            x_width: self.x_width,
            y_width: self.y_width,
            background: self.background,
            z_center: self.z,
        }
    }
}

/// Which PSF family a scenario selects, tagged by `"family"` in the JSON.
#[derive(Deserialize, Debug)]
#[serde(tag = "family", rename_all = "snake_case")]
enum PsfSpec {
    Fixed { x_width: f64, y_width: f64 },
    Gaussian2D,
    Gaussian3D,
    GaussianZ { x: ZAxisParams, y: ZAxisParams },
}

impl From<PsfSpec> for PsfFamily {
    fn from(spec: PsfSpec) -> Self {
        match spec {
            PsfSpec::Fixed { x_width, y_width } => {
                PsfFamily::GaussianFixed { axes: GaussianAxes { x_width, y_width } }
            }
            PsfSpec::Gaussian2D => PsfFamily::Gaussian2D,
            PsfSpec::Gaussian3D => PsfFamily::Gaussian3D,
            PsfSpec::GaussianZ { x, y } => PsfFamily::GaussianZ { x, y },
        }
    }
}

#[derive(Deserialize, Debug)]
struct Scenario {
    rows: usize,
    cols: usize,
    image: Vec<Vec<f64>>,
    #[serde(default)]
    scmos_term: Option<Vec<Vec<f64>>>,
    psf: PsfSpec,
    peaks: Vec<SeedPeak>,
}

fn setup_logging(verbosity: u8) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}][{}] {}", record.target(), record.level(), message))
        })
        .level(match verbosity {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

fn to_array2(rows: usize, cols: usize, data: Vec<Vec<f64>>) -> ndarray::Array2<f64> {
    let mut out = ndarray::Array2::zeros((rows, cols));
    for (r, row) in data.into_iter().enumerate() {
        for (c, v) in row.into_iter().enumerate() {
            out[[r, c]] = v;
        }
    }
    out
}

fn main() -> Result<(), smlm_fit::FitError> {
    let args = Args::parse();
    setup_logging(args.verbose).expect("failed to initialize logging");

    let config = match &args.config {
        Some(path) => {
            let s = std::fs::read_to_string(path)?;
            FitterConfig::from_toml_str(&s).map_err(smlm_fit::FitError::Config)?
        }
        None => FitterConfig::default(),
    };
    debug!("using config: {:?}", config);

    let file = File::open(&args.scenario)?;
    let scenario: Scenario =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| smlm_fit::FitError::Config(e.into()))?;

    let image = to_array2(scenario.rows, scenario.cols, scenario.image);
    let scmos_term = match scenario.scmos_term {
        Some(data) => to_array2(scenario.rows, scenario.cols, data),
        None => ndarray::Array2::zeros((scenario.rows, scenario.cols)),
    };

    let psf: PsfFamily = scenario.psf.into();
    let mut fit = FitState::new(scenario.rows, scenario.cols, psf, config.clone());
    fit.set_image(image, scmos_term)?;

    for peak in scenario.peaks {
        fit.seed_peak(peak.into_params(), config.clamp_start);
    }
    info!("seeded {} peak(s)", fit.peaks().len());

    let mut sweep = 0;
    loop {
        let unconverged = fit.get_unconverged();
        if unconverged == 0 || sweep >= config.max_iterations {
            break;
        }
        fit.iterate();
        sweep += 1;
        info!(
            "sweep {}: {} peak(s) still running, diagnostics = {:?}",
            sweep,
            fit.get_unconverged(),
            fit.diagnostics()
        );
    }

    for result in fit.get_results() {
        println!(
            "peak {}: status={:?} error={:.6} params={:?}",
            result.index, result.status, result.error, result.params
        );
    }

    Ok(())
}
