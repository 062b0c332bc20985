/// Build a synthetic regressor and dataset, then render every diagnostic figure.
/// Usage: cargo run --bin generate_figures --release [model_id]
use anyhow::{Context, Result};
use nnplot::config::{PlotConfig, RunOptions};
use nnplot::diagnostics::run_all_diagnostics;
use nnplot::synthetic::{write_synthetic, SyntheticSpec};
use std::path::Path;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let model_id = std::env::args().nth(1).unwrap_or_else(|| "synthetic_mlp".to_string());
    let config = PlotConfig::from_env();
    let spec = SyntheticSpec::default();

    log::info!("📊 Generating diagnostic figures for a synthetic regressor...");
    log::info!("  - Levels: {}", spec.levels);
    log::info!("  - Examples: {}", spec.examples);
    log::info!("  - Noise: ±{}", spec.noise);
    log::info!("  - Seed: {}", spec.seed);

    let dataset_path = Path::new("data").join(format!("{model_id}_data.json"));
    write_synthetic(spec, &config.regressor_dir, &model_id, &dataset_path)
        .context("writing the synthetic regressor and dataset")?;

    let dir = run_all_diagnostics(&model_id, &dataset_path, &RunOptions::default(), &config)
        .context("rendering the diagnostic figures")?;

    log::info!("✅ All figures generated in {}", dir.display());
    Ok(())
}
