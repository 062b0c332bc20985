//! End-to-end test of a full diagnostics run
//!
//! Writes a synthetic regressor and dataset (5 levels, 1000 examples), runs
//! every renderer and checks that:
//! 1. Every documented figure is written, and the PNGs decode
//! 2. The statistics summary reports errors near the injected noise
//! 3. Training-data runs land in their own subfolder

use nnplot::config::{PlotConfig, RunOptions};
use nnplot::diagnostics::run_all_diagnostics;
use nnplot::export::{ErrorStatsSummary, SUMMARY_FILE};
use nnplot::synthetic::{write_synthetic, SyntheticCase, SyntheticSpec};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const TOP_LEVEL_PNGS: [&str; 15] = [
    "error_history.png",
    "input_scaling_check.png",
    "output_scaling_check.png",
    "output_compare_true_pred_unscaled.png",
    "output_compare_true_pred_scaled.png",
    "regress_means_stds.png",
    "regress_stats.png",
    "regress_P_rate.png",
    "P_scatter.png",
    "regress_enthalpy.png",
    "latlev_truemean.png",
    "latlev_bias.png",
    "latlev_rmse.png",
    "latlev_corrcoeff.png",
    // One per level.
    "scatters/Tq_scatter_sigma1.00.png",
];

fn setup(temp_dir: &TempDir, spec: SyntheticSpec) -> (PlotConfig, PathBuf, SyntheticCase) {
    let config = PlotConfig {
        regressor_dir: temp_dir.path().join("regressors"),
        figure_root: temp_dir.path().join("figs"),
        figure_size: (800, 600),
        sample_profiles: 3,
        sample_seed: Some(7),
        ..PlotConfig::default()
    };
    let dataset_path = temp_dir.path().join("validation.json");
    let case = write_synthetic(spec, &config.regressor_dir, "mlp_test", &dataset_path)
        .expect("Failed to write synthetic case");
    (config, dataset_path, case)
}

fn assert_png(path: &Path) {
    assert!(path.exists(), "missing figure {}", path.display());
    let img = image::open(path).unwrap_or_else(|e| panic!("{} does not decode: {e}", path.display()));
    assert!(img.width() > 0 && img.height() > 0);
}

#[test]
fn test_full_run_writes_every_figure() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let (config, dataset_path, case) = setup(&temp_dir, SyntheticSpec::default());

    let dir = run_all_diagnostics("mlp_test", &dataset_path, &RunOptions::default(), &config)
        .expect("Diagnostics run failed");
    assert_eq!(dir, temp_dir.path().join("figs").join("mlp_test"));

    for name in TOP_LEVEL_PNGS {
        assert_png(&dir.join(name));
    }
    for level in &case.artifact.lev {
        assert_png(&dir.join("scatters").join(format!("Tq_scatter_sigma{level:.2}.png")));
    }

    let samples: Vec<_> = std::fs::read_dir(dir.join("samples"))
        .expect("samples directory missing")
        .map(|entry| entry.unwrap().path())
        .collect();
    assert!(!samples.is_empty() && samples.len() <= 3);
    assert!(samples
        .iter()
        .all(|p| p.extension().and_then(|e| e.to_str()) == Some("eps")));
    let profile = std::fs::read_to_string(&samples[0]).expect("sample profile unreadable");
    assert!(profile.starts_with("%!PS-Adobe-3.0 EPSF-3.0"));
    assert!(profile.contains("%%BoundingBox: 0 0 900 600"));

    let summary = ErrorStatsSummary::load_json(dir.join(SUMMARY_FILE)).expect("summary missing");
    assert_eq!(summary.examples, 1000);
    assert_eq!(summary.lev, case.artifact.lev);
    // Uniform ±noise errors over true means near 1 give rmse/mean ≈ noise/√3.
    let expected = SyntheticSpec::default().noise / 3f64.sqrt();
    for stats in [&summary.temperature, &summary.humidity] {
        for &rmse in &stats.rmse_over_mean {
            assert!((rmse - expected).abs() < 0.15 * expected, "rmse/mean = {rmse}, expected ≈ {expected}");
        }
        for &r in &stats.correlation {
            assert!(r > 0.9, "r = {r}");
        }
    }
    assert!(summary.mse > 0.0 && summary.mse < 0.01);
}

#[test]
fn test_training_run_uses_subfolder() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let spec = SyntheticSpec {
        levels: 3,
        examples: 200,
        ..SyntheticSpec::default()
    };
    let (config, dataset_path, _) = setup(&temp_dir, spec);
    let options = RunOptions {
        validation: false,
        ..RunOptions::default()
    };

    let dir = run_all_diagnostics("mlp_test", &dataset_path, &options, &config).expect("Diagnostics run failed");
    assert!(dir.ends_with("mlp_test/training_data"));
    assert_png(&dir.join("error_history.png"));
    assert_png(&dir.join("latlev_corrcoeff.png"));
}

#[test]
fn test_hemisphere_averaged_contours() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let spec = SyntheticSpec {
        levels: 4,
        examples: 300,
        ..SyntheticSpec::default()
    };
    let (config, dataset_path, _) = setup(&temp_dir, spec);
    let config = PlotConfig {
        average_hemispheres: true,
        ..config
    };

    let dir = run_all_diagnostics("mlp_test", &dataset_path, &RunOptions::default(), &config)
        .expect("Diagnostics run failed");
    for name in ["latlev_truemean.png", "latlev_bias.png", "latlev_rmse.png", "latlev_corrcoeff.png"] {
        assert_png(&dir.join(name));
    }
}
