use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{DiagnosticsError, Result};

/// Settings shared by every figure of a diagnostics run.
#[derive(Debug, Clone)]
pub struct PlotConfig {
    /// Directory holding `<model_id>.json` regressor artifacts.
    pub regressor_dir: PathBuf,
    /// Figures go to `<figure_root>/<model_id>/`.
    pub figure_root: PathBuf,
    pub figure_size: (u32, u32),
    /// Number of randomly drawn sample profiles.
    pub sample_profiles: usize,
    /// Seed for drawing sample profiles; `None` draws from entropy.
    pub sample_seed: Option<u64>,
    /// Value bins of the distribution heat maps.
    pub distribution_bins: usize,
    /// Percentiles bounding the default distribution bins.
    pub percentile_range: (f64, f64),
    pub enthalpy_bins: usize,
    /// Discrete colour bands of the filled-contour panels.
    pub contour_bands: usize,
    /// Fold latitude × level maps onto one hemisphere.
    pub average_hemispheres: bool,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            regressor_dir: PathBuf::from("data/regressors"),
            figure_root: PathBuf::from("figs"),
            figure_size: (1200, 900),
            sample_profiles: 20,
            sample_seed: None,
            distribution_bins: 100,
            percentile_range: (0.02, 99.98),
            enthalpy_bins: 50,
            contour_bands: 10,
            average_hemispheres: false,
        }
    }
}

fn env_override<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("⚠️  Ignoring {key}={raw:?}: not a valid value"),
        }
    }
}

impl PlotConfig {
    /// Defaults overridden by `NNPLOT_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("NNPLOT_REGRESSOR_DIR") {
            config.regressor_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("NNPLOT_FIG_ROOT") {
            config.figure_root = PathBuf::from(dir);
        }
        env_override("NNPLOT_SAMPLES", &mut config.sample_profiles);
        env_override("NNPLOT_BINS", &mut config.distribution_bins);
        env_override("NNPLOT_CONTOUR_BANDS", &mut config.contour_bands);
        env_override("NNPLOT_AVG_HEM", &mut config.average_hemispheres);

        if let Ok(raw) = std::env::var("NNPLOT_SEED") {
            match raw.parse::<u64>() {
                Ok(seed) => config.sample_seed = Some(seed),
                Err(_) => log::warn!("⚠️  Ignoring NNPLOT_SEED={raw:?}: not a valid seed"),
            }
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        let (lo, hi) = self.percentile_range;
        if !(0.0..=100.0).contains(&lo) || !(0.0..=100.0).contains(&hi) || lo >= hi {
            return Err(DiagnosticsError::InvalidConfig(format!(
                "percentile range ({lo}, {hi}) must be increasing within 0..=100"
            )));
        }
        if self.distribution_bins == 0 || self.enthalpy_bins == 0 || self.contour_bands == 0 {
            return Err(DiagnosticsError::InvalidConfig(
                "bin and band counts must be positive".to_string(),
            ));
        }
        if self.figure_size.0 < 200 || self.figure_size.1 < 200 {
            return Err(DiagnosticsError::InvalidConfig(format!(
                "figure size {:?} is too small to draw on",
                self.figure_size
            )));
        }
        Ok(())
    }
}

/// Flags for one [`crate::diagnostics::run_all_diagnostics`] call.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// `false` when plotting the training data (figures go to a
    /// `training_data/` subdirectory).
    pub validation: bool,
    pub no_shallow: bool,
    pub rain_only: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            validation: true,
            no_shallow: false,
            rain_only: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PlotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_profiles, 20);
        assert_eq!(config.distribution_bins, 100);
        assert_eq!(config.enthalpy_bins, 50);
        assert_eq!(config.percentile_range, (0.02, 99.98));
        assert!(!config.average_hemispheres);
        assert!(RunOptions::default().validation);
    }

    #[test]
    fn inverted_percentiles_are_rejected() {
        let config = PlotConfig {
            percentile_range: (90.0, 10.0),
            ..PlotConfig::default()
        };
        assert!(matches!(config.validate(), Err(DiagnosticsError::InvalidConfig(_))));
    }

    #[test]
    fn zero_bins_are_rejected() {
        let config = PlotConfig {
            distribution_bins: 0,
            ..PlotConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
