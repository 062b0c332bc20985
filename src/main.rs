use anyhow::{bail, Context, Result};
use nnplot::artifact::list_artifacts;
use nnplot::config::{PlotConfig, RunOptions};
use nnplot::diagnostics::run_all_diagnostics;
use std::path::PathBuf;

const USAGE: &str = "usage: nnplot <model_id> <dataset.json> [--training] [--noshallow] [--rainonly]";

fn parse_args(args: &[String]) -> Result<(String, PathBuf, RunOptions)> {
    let mut options = RunOptions::default();
    let mut positional = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--training" => options.validation = false,
            "--noshallow" => options.no_shallow = true,
            "--rainonly" => options.rain_only = true,
            flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{USAGE}"),
            value => positional.push(value.to_string()),
        }
    }
    match positional.as_slice() {
        [model_id, dataset] => Ok((model_id.clone(), PathBuf::from(dataset), options)),
        _ => bail!("expected a model id and a dataset file\n{USAGE}"),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (model_id, dataset, options) = parse_args(&args)?;

    let config = PlotConfig::from_env();
    log::info!("Configuration:");
    log::info!("  - Regressors: {}", config.regressor_dir.display());
    log::info!("  - Figures: {}", config.figure_root.display());
    log::info!("  - Dataset: {}", dataset.display());
    log::info!(
        "  - Data: {} (noshallow={}, rainonly={})",
        if options.validation { "validation" } else { "training" },
        options.no_shallow,
        options.rain_only
    );

    let known = list_artifacts(&config.regressor_dir)
        .with_context(|| format!("listing regressors in {}", config.regressor_dir.display()))?;
    if !known.contains(&model_id) {
        bail!(
            "no regressor '{model_id}' in {} (available: {})",
            config.regressor_dir.display(),
            if known.is_empty() { "none".to_string() } else { known.join(", ") }
        );
    }

    let dir = run_all_diagnostics(&model_id, &dataset, &options, &config)
        .with_context(|| format!("making diagnostic figures for '{model_id}'"))?;
    log::info!("📁 Figures written to {}", dir.display());
    Ok(())
}
