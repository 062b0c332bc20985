use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::VariableSchema;
use crate::error::{DiagnosticsError, Result};
use crate::model::MlpRegressor;
use crate::scaling::{ScalerParams, ScalingMethod};

/// Errors recorded at one training iteration.
///
/// Iterations where an error was not evaluated hold NaN, which JSON stores as
/// `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(deserialize_with = "nan_if_null")]
    pub train_cost: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub train_cost_alt: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub cross_val_a: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub cross_val_b: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub train_metric_a: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub train_metric_b: f64,
}

fn nan_if_null<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl ErrorRecord {
    /// The six errors in column order.
    pub fn as_array(&self) -> [f64; 6] {
        [
            self.train_cost,
            self.train_cost_alt,
            self.cross_val_a,
            self.cross_val_b,
            self.train_metric_a,
            self.train_metric_b,
        ]
    }
}

/// Everything saved alongside a trained regressor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressorArtifact {
    pub model: MlpRegressor,
    pub errors: Vec<ErrorRecord>,
    pub input_scaling: ScalingMethod,
    pub output_scaling: ScalingMethod,
    pub input_params: ScalerParams,
    pub output_params: ScalerParams,
    pub lat: Vec<f64>,
    pub lev: Vec<f64>,
    pub dlev: Vec<f64>,
}

impl RegressorArtifact {
    /// T/q layout of both the inputs and the outputs.
    pub fn schema(&self) -> VariableSchema {
        VariableSchema::temperature_humidity(self.lev.len())
    }

    /// Highest level (smallest sigma) the model was trained on.
    pub fn min_level(&self) -> f64 {
        self.lev.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lev.is_empty() {
            return Err(DiagnosticsError::EmptyInput("artifact has no levels".to_string()));
        }
        if self.dlev.len() != self.lev.len() {
            return Err(DiagnosticsError::ShapeMismatch(format!(
                "{} levels but {} level spacings",
                self.lev.len(),
                self.dlev.len()
            )));
        }
        let width = self.schema().width();
        let checks = [
            ("model inputs", self.model.input_dim()),
            ("model outputs", self.model.output_dim()),
            ("input scaler", self.input_params.width()),
            ("output scaler", self.output_params.width()),
        ];
        for (what, got) in checks {
            if got != width {
                return Err(DiagnosticsError::ShapeMismatch(format!(
                    "{what} has width {got}, expected {width} for {} levels",
                    self.lev.len()
                )));
            }
        }
        Ok(())
    }
}

/// Where the artifact for `model_id` lives under `dir`.
pub fn artifact_path(dir: &Path, model_id: &str) -> PathBuf {
    dir.join(format!("{model_id}.json"))
}

/// Save an artifact to `<dir>/<model_id>.json`, creating `dir` if needed.
pub fn save_artifact(artifact: &RegressorArtifact, dir: &Path, model_id: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = artifact_path(dir, model_id);
    let json = serde_json::to_string(artifact)?;
    fs::write(&path, json)?;
    log::info!("💾 Regressor artifact saved to: {}", path.display());
    Ok(path)
}

/// Load the artifact for `model_id` from `dir`.
pub fn load_artifact(dir: &Path, model_id: &str) -> Result<RegressorArtifact> {
    let path = artifact_path(dir, model_id);
    let json = fs::read_to_string(&path)?;
    let artifact: RegressorArtifact = serde_json::from_str(&json)?;
    log::info!("📂 Regressor artifact loaded from: {}", path.display());
    Ok(artifact)
}

/// Model identifiers with an artifact in `dir`, sorted.
pub fn list_artifacts(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
    }

    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Activation, DenseLayer};
    use ndarray::{Array1, Array2};
    use tempfile::TempDir;

    fn tiny_artifact(levels: usize) -> RegressorArtifact {
        let width = 2 * levels;
        let layer = DenseLayer::new(Array2::eye(width), Array1::zeros(width)).unwrap();
        RegressorArtifact {
            model: MlpRegressor::new(vec![layer], Activation::Identity).unwrap(),
            errors: vec![ErrorRecord {
                train_cost: 0.1,
                train_cost_alt: 0.2,
                cross_val_a: 0.3,
                cross_val_b: 0.4,
                train_metric_a: 0.5,
                train_metric_b: 0.6,
            }],
            input_scaling: ScalingMethod::StandardScaler,
            output_scaling: ScalingMethod::SimpleY,
            input_params: ScalerParams::identity(width),
            output_params: ScalerParams::identity(width),
            lat: vec![-30.0, 0.0, 30.0],
            lev: (0..levels).map(|i| (i + 1) as f64 / levels as f64).collect(),
            dlev: vec![1.0 / levels as f64; levels],
        }
    }

    #[test]
    fn save_then_load_keeps_every_field() {
        let dir = TempDir::new().unwrap();
        let original = tiny_artifact(3);
        save_artifact(&original, dir.path(), "mlp_test").unwrap();

        let loaded = load_artifact(dir.path(), "mlp_test").unwrap();
        assert_eq!(loaded.model, original.model);
        assert_eq!(loaded.errors, original.errors);
        assert_eq!(loaded.output_scaling, ScalingMethod::SimpleY);
        assert_eq!(loaded.lev, original.lev);
        assert_eq!(list_artifacts(dir.path()).unwrap(), vec!["mlp_test".to_string()]);
    }

    #[test]
    fn unevaluated_errors_load_as_nan() {
        let json = r#"{"train_cost":0.1,"train_cost_alt":null,"cross_val_a":0.3,
            "cross_val_b":0.4,"train_metric_a":0.5,"train_metric_b":0.6}"#;
        let record: ErrorRecord = serde_json::from_str(json).unwrap();
        assert!(record.train_cost_alt.is_nan());
        assert_eq!(record.cross_val_b, 0.4);
    }

    #[test]
    fn missing_artifact_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_artifact(dir.path(), "nope"),
            Err(DiagnosticsError::Io(_))
        ));
    }

    #[test]
    fn artifact_without_layers_fails_to_load() {
        let dir = TempDir::new().unwrap();
        let path = save_artifact(&tiny_artifact(2), dir.path(), "mlp_test").unwrap();
        let mut json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        json["model"]["layers"] = serde_json::json!([]);
        fs::write(&path, json.to_string()).unwrap();

        let err = load_artifact(dir.path(), "mlp_test").unwrap_err();
        assert!(matches!(err, DiagnosticsError::Json(_)));
        assert!(err.to_string().contains("at least one layer"), "{err}");
    }

    #[test]
    fn layer_with_mismatched_bias_fails_to_load() {
        let json = r#"{"weights":{"v":1,"dim":[2,2],"data":[1.0,0.0,0.0,1.0]},"bias":{"v":1,"dim":[3],"data":[0.0,0.0,0.0]}}"#;
        let err = serde_json::from_str::<DenseLayer>(json).unwrap_err();
        assert!(err.to_string().contains("biases"), "{err}");
    }

    #[test]
    fn validate_catches_width_disagreement() {
        let mut artifact = tiny_artifact(2);
        assert!(artifact.validate().is_ok());
        artifact.output_params = ScalerParams::identity(3);
        assert!(matches!(artifact.validate(), Err(DiagnosticsError::ShapeMismatch(_))));
        assert_eq!(tiny_artifact(4).min_level(), 0.25);
    }
}
