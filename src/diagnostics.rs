use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::artifact::load_artifact;
use crate::config::{PlotConfig, RunOptions};
use crate::data::{load_dataset, predict_dataset, DatasetOptions};
use crate::error::Result;
use crate::export::{ErrorStatsSummary, SUMMARY_FILE};
use crate::latlev::stats_by_latlev;
use crate::plotting::{self, FigureDir};

const STEPS: usize = 10;

fn step(n: usize, what: &str) {
    log::info!("🎨 [{n}/{STEPS}] {what}");
}

/// Directory the figures of `model_id` go to.
pub fn figure_dir(config: &PlotConfig, model_id: &str, validation: bool) -> PathBuf {
    let dir = config.figure_root.join(model_id);
    if validation {
        dir
    } else {
        dir.join("training_data")
    }
}

/// Load a regressor and a dataset, predict, and write every diagnostic
/// figure. Returns the figure directory.
///
/// Stops at the first failing figure; figures already written are kept.
pub fn run_all_diagnostics(
    model_id: &str,
    dataset_path: &Path,
    options: &RunOptions,
    config: &PlotConfig,
) -> Result<PathBuf> {
    config.validate()?;
    let started = Instant::now();

    let artifact = load_artifact(&config.regressor_dir, model_id)?;
    artifact.validate()?;
    let dataset_options = DatasetOptions {
        validation: options.validation,
        no_shallow: options.no_shallow,
        rain_only: options.rain_only,
        min_level: Some(artifact.min_level()),
    };
    let dataset = load_dataset(dataset_path, &dataset_options, &artifact.dlev)?;
    let predictions = predict_dataset(&artifact, &dataset)?;

    let dir = figure_dir(config, model_id, options.validation);
    fs::create_dir_all(&dir)?;
    let fig = FigureDir::new(&dir, config);
    let schema = artifact.schema();
    let lev = artifact.lev.as_slice();
    let dlev = artifact.dlev.as_slice();
    let y_true = predictions.y_true_unscaled.view();
    let y_pred = predictions.y_pred_unscaled.view();

    log::info!("🚀 Beginning to make plots in {}", dir.display());

    step(1, "Model error over training iterations");
    plotting::plot_error_history(&artifact.errors, model_id, fig)?;

    step(2, "Effect of scaling on input and output distributions");
    plotting::check_scaling_distribution(fig, &schema, &predictions, lev)?;

    step(3, "True vs predicted output distributions");
    plotting::check_output_distribution(fig, &schema, &predictions, lev)?;

    step(4, "Means and standard deviations");
    plotting::plot_means_stds(fig, &schema, y_true, y_pred, lev)?;

    step(5, "Correlation, explained variance and RMSE");
    plotting::plot_error_stats(fig, &schema, y_true, y_pred, lev)?;
    ErrorStatsSummary::compute(model_id, &schema, y_true, y_pred, lev)?.save_json(fig.path(SUMMARY_FILE))?;

    step(6, "Precipitation rate");
    plotting::plot_precip(fig, &schema, y_true, y_pred, dlev)?;

    step(7, "Scatter plots");
    plotting::plot_scatter(fig, &schema, y_true, y_pred, lev, dlev)?;

    step(8, "Enthalpy conservation");
    plotting::plot_enthalpy(fig, &schema, y_true, y_pred, dlev)?;

    step(9, "Sample profiles");
    let mut rng = match config.sample_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let samples = plotting::plot_sample_profiles(
        config.sample_profiles,
        fig,
        &schema,
        predictions.x_unscaled.view(),
        y_true,
        y_pred,
        lev,
        &mut rng,
    )?;
    log::debug!("sample profiles drawn for examples {samples:?}");

    step(10, "Latitude × level contour plots");
    let latlev = stats_by_latlev(&schema, y_true, y_pred, predictions.lat.view(), &artifact.lat)?;
    plotting::make_contour_plots(fig, &latlev, &artifact.lat, lev)?;

    log::info!(
        "✅ Done! {} figures for {} examples in {:.1}s",
        model_id,
        dataset.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(dir)
}
