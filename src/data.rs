use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::artifact::RegressorArtifact;
use crate::atmos;
use crate::codec::{self, VariableSchema, HUMIDITY, TEMPERATURE};
use crate::error::{DiagnosticsError, Result};

/// Columns (T and q on every level) of the emulator's inputs and targets,
/// one row per model column/time step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvectionDataset {
    /// Vertical coordinate shared by every variable.
    pub lev: Vec<f64>,
    /// Latitude of each example.
    pub lat: Vec<f64>,
    /// Packed T [K] and q [g/kg] state.
    pub inputs: Array2<f64>,
    /// Packed T [K/day] and q [g/kg/day] tendencies from the parameterization.
    pub targets: Array2<f64>,
}

/// Which examples and levels of a dataset file to use.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatasetOptions {
    /// Whether this is held-out data; only changes where figures go.
    pub validation: bool,
    /// Drop non-precipitating columns that still heat (shallow convection).
    pub no_shallow: bool,
    /// Keep only columns with positive precipitation.
    pub rain_only: bool,
    /// Drop levels above this one (`lev < min_level`).
    pub min_level: Option<f64>,
}

impl ConvectionDataset {
    pub fn new(lev: Vec<f64>, lat: Vec<f64>, inputs: Array2<f64>, targets: Array2<f64>) -> Result<Self> {
        let dataset = Self {
            lev,
            lat,
            inputs,
            targets,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn schema(&self) -> VariableSchema {
        VariableSchema::temperature_humidity(self.lev.len())
    }

    pub fn validate(&self) -> Result<()> {
        let width = self.schema().width();
        if self.inputs.ncols() != width || self.targets.ncols() != width {
            return Err(DiagnosticsError::ShapeMismatch(format!(
                "dataset columns (inputs {}, targets {}) do not match {} levels",
                self.inputs.ncols(),
                self.targets.ncols(),
                self.lev.len()
            )));
        }
        if self.targets.nrows() != self.len() || self.lat.len() != self.len() {
            return Err(DiagnosticsError::ShapeMismatch(format!(
                "dataset rows disagree: inputs {}, targets {}, latitudes {}",
                self.len(),
                self.targets.nrows(),
                self.lat.len()
            )));
        }
        Ok(())
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(self)?)?;
        log::info!("💾 Dataset saved to: {}", path.display());
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let dataset: ConvectionDataset = serde_json::from_str(&json)?;
        dataset.validate()?;
        Ok(dataset)
    }

    /// Keep only levels at or below `min_level`.
    pub fn truncate_levels(self, min_level: f64) -> Result<Self> {
        let keep = codec::levels_at_or_above(&self.lev, min_level);
        let schema = self.schema();
        let (_, inputs) = codec::select_levels(&schema, self.inputs.view(), &keep)?;
        let (_, targets) = codec::select_levels(&schema, self.targets.view(), &keep)?;
        let lev = keep.iter().map(|&i| self.lev[i]).collect();
        Self::new(lev, self.lat, inputs, targets)
    }

    /// Keep the examples at the given row indices.
    pub fn select_examples(&self, rows: &[usize]) -> Self {
        Self {
            lev: self.lev.clone(),
            lat: rows.iter().map(|&i| self.lat[i]).collect(),
            inputs: self.inputs.select(Axis(0), rows),
            targets: self.targets.select(Axis(0), rows),
        }
    }

    /// True precipitation [mm/day] of every example.
    pub fn precipitation(&self, dlev: &[f64]) -> Result<Array1<f64>> {
        let dq = codec::unpack(&self.schema(), self.targets.view(), HUMIDITY)?;
        atmos::calc_precip(dq.view(), dlev)
    }
}

/// Read a dataset file and apply the level truncation and example filters.
///
/// `dlev` is the level spacing after truncation, needed for the
/// precipitation-based filters.
pub fn load_dataset(path: &Path, options: &DatasetOptions, dlev: &[f64]) -> Result<ConvectionDataset> {
    let mut dataset = ConvectionDataset::load_json(path)?;
    log::info!(
        "📂 Loaded {} {} examples on {} levels from {}",
        dataset.len(),
        if options.validation { "validation" } else { "training" },
        dataset.lev.len(),
        path.display()
    );

    if let Some(min_level) = options.min_level {
        dataset = dataset.truncate_levels(min_level)?;
    }

    if options.rain_only || options.no_shallow {
        let precip = dataset.precipitation(dlev)?;
        let dt = codec::unpack(&dataset.schema(), dataset.targets.view(), TEMPERATURE)?;
        let keep: Vec<usize> = (0..dataset.len())
            .filter(|&i| {
                let raining = precip[i] > 0.0;
                let heating = dt.row(i).iter().any(|&v| v != 0.0);
                let rain_ok = !options.rain_only || raining;
                let shallow_ok = !options.no_shallow || raining || !heating;
                rain_ok && shallow_ok
            })
            .collect();
        log::info!(
            "🔎 Example filters kept {}/{} examples (rain_only={}, no_shallow={})",
            keep.len(),
            dataset.len(),
            options.rain_only,
            options.no_shallow
        );
        dataset = dataset.select_examples(&keep);
    }

    if dataset.is_empty() {
        return Err(DiagnosticsError::EmptyInput(format!(
            "no examples left in {}",
            path.display()
        )));
    }
    Ok(dataset)
}

/// Inputs, true outputs and predicted outputs, each on the network's scale
/// and in physical units.
#[derive(Debug, Clone)]
pub struct Predictions {
    pub x_scaled: Array2<f64>,
    pub x_unscaled: Array2<f64>,
    pub y_true_scaled: Array2<f64>,
    pub y_true_unscaled: Array2<f64>,
    pub y_pred_scaled: Array2<f64>,
    pub y_pred_unscaled: Array2<f64>,
    /// Latitude of each example.
    pub lat: Array1<f64>,
}

/// Run the regressor over a dataset on the artifact's level axis.
pub fn predict_dataset(artifact: &RegressorArtifact, dataset: &ConvectionDataset) -> Result<Predictions> {
    let same_levels = dataset.lev.len() == artifact.lev.len()
        && dataset
            .lev
            .iter()
            .zip(&artifact.lev)
            .all(|(a, b)| (a - b).abs() <= 1e-6);
    if !same_levels {
        return Err(DiagnosticsError::ShapeMismatch(format!(
            "dataset levels {:?} differ from model levels {:?}",
            dataset.lev, artifact.lev
        )));
    }

    let x_scaled = artifact
        .input_params
        .transform(artifact.input_scaling, dataset.inputs.view())?;
    let y_pred_scaled = artifact.model.predict(x_scaled.view())?;
    let y_pred_unscaled = artifact
        .output_params
        .inverse_transform(artifact.output_scaling, y_pred_scaled.view())?;
    let y_true_scaled = artifact
        .output_params
        .transform(artifact.output_scaling, dataset.targets.view())?;

    log::debug!("predicted {} examples", dataset.len());
    Ok(Predictions {
        x_scaled,
        x_unscaled: dataset.inputs.clone(),
        y_true_scaled,
        y_true_unscaled: dataset.targets.clone(),
        y_pred_scaled,
        y_pred_unscaled,
        lat: Array1::from_vec(dataset.lat.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{build_synthetic, SyntheticSpec};
    use ndarray::array;
    use tempfile::TempDir;

    /// Two levels; example 0 rains, example 1 heats without rain (shallow),
    /// example 2 does nothing.
    fn three_columns() -> ConvectionDataset {
        let inputs = array![
            [300.0, 250.0, 15.0, 2.0],
            [295.0, 248.0, 12.0, 1.5],
            [290.0, 245.0, 10.0, 1.0],
        ];
        let targets = array![
            [2.0, 1.0, -3.0, -1.0],
            [1.0, 0.0, 0.5, 0.0],
            [0.0, 0.0, 0.0, 0.0],
        ];
        ConvectionDataset::new(vec![0.3, 0.9], vec![-10.0, 0.0, 10.0], inputs, targets).unwrap()
    }

    #[test]
    fn filters_select_raining_and_non_shallow_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        three_columns().save_json(&path).unwrap();
        let dlev = [0.5, 0.5];

        let rain = DatasetOptions {
            rain_only: true,
            ..DatasetOptions::default()
        };
        assert_eq!(load_dataset(&path, &rain, &dlev).unwrap().lat, vec![-10.0]);

        let deep = DatasetOptions {
            no_shallow: true,
            ..DatasetOptions::default()
        };
        assert_eq!(load_dataset(&path, &deep, &dlev).unwrap().lat, vec![-10.0, 10.0]);
    }

    #[test]
    fn truncation_drops_upper_levels() {
        let truncated = three_columns().truncate_levels(0.5).unwrap();
        assert_eq!(truncated.lev, vec![0.9]);
        assert_eq!(truncated.inputs.row(0).to_vec(), vec![250.0, 2.0]);
    }

    #[test]
    fn prediction_rejects_a_dataset_on_other_levels() {
        let model = build_synthetic(SyntheticSpec {
            levels: 3,
            examples: 20,
            ..SyntheticSpec::default()
        })
        .unwrap();
        let other = build_synthetic(SyntheticSpec {
            levels: 4,
            examples: 20,
            ..SyntheticSpec::default()
        })
        .unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        other.dataset.save_json(&path).unwrap();

        let dataset = load_dataset(&path, &DatasetOptions::default(), &other.artifact.dlev).unwrap();
        let err = predict_dataset(&model.artifact, &dataset).unwrap_err();
        assert!(matches!(err, DiagnosticsError::ShapeMismatch(_)));
    }

    #[test]
    fn inconsistent_rows_are_rejected() {
        let err = ConvectionDataset::new(
            vec![0.5],
            vec![0.0],
            Array2::zeros((2, 2)),
            Array2::zeros((2, 2)),
        )
        .unwrap_err();
        assert!(matches!(err, DiagnosticsError::ShapeMismatch(_)));
    }
}
