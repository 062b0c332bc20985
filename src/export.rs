use ndarray::ArrayView2;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;

use crate::codec::{self, VariableSchema, HUMIDITY, TEMPERATURE};
use crate::error::Result;
use crate::stats::{self, MseOptions, StatKind};

/// File name of the summary inside a figure directory.
pub const SUMMARY_FILE: &str = "regress_stats.json";

/// Per-level skill of one output variable.
///
/// Undefined values (constant columns, zero means) are NaN in memory and
/// `null` on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableStats {
    #[serde(deserialize_with = "nan_vec")]
    pub mean_true: Vec<f64>,
    #[serde(deserialize_with = "nan_vec")]
    pub mean_pred: Vec<f64>,
    #[serde(deserialize_with = "nan_vec")]
    pub std_true: Vec<f64>,
    #[serde(deserialize_with = "nan_vec")]
    pub std_pred: Vec<f64>,
    #[serde(deserialize_with = "nan_vec")]
    pub correlation: Vec<f64>,
    /// RMSE divided by the true mean.
    #[serde(deserialize_with = "nan_vec")]
    pub rmse_over_mean: Vec<f64>,
    #[serde(deserialize_with = "nan_vec")]
    pub explained_variance: Vec<f64>,
}

/// Numbers behind `regress_means_stds.png` and `regress_stats.png`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorStatsSummary {
    pub model_id: String,
    pub examples: usize,
    pub lev: Vec<f64>,
    pub temperature: VariableStats,
    pub humidity: VariableStats,
    /// Mean squared error over every output.
    #[serde(deserialize_with = "nan_or_value")]
    pub mse: f64,
}

fn nan_vec<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error> {
    Ok(Vec::<Option<f64>>::deserialize(deserializer)?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

fn nan_or_value<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl VariableStats {
    fn compute(
        schema: &VariableSchema,
        variable: &str,
        y_true: ArrayView2<'_, f64>,
        y_pred: ArrayView2<'_, f64>,
    ) -> Result<Self> {
        let (mean_true, mean_pred) = stats::mean_or_std(schema, StatKind::Mean, variable, y_true, y_pred)?;
        let (std_true, std_pred) = stats::mean_or_std(schema, StatKind::Std, variable, y_true, y_pred)?;
        let per_level = |all: ndarray::Array1<f64>| -> Result<Vec<f64>> {
            Ok(codec::unpack_row(schema, all.view(), variable)?.to_vec())
        };
        Ok(Self {
            mean_true: mean_true.to_vec(),
            mean_pred: mean_pred.to_vec(),
            std_true: std_true.to_vec(),
            std_pred: std_pred.to_vec(),
            correlation: per_level(stats::pearson_correlation(y_true, y_pred)?)?,
            rmse_over_mean: per_level(stats::rmse(y_true, y_pred)?)?,
            explained_variance: per_level(stats::explained_variance(y_true, y_pred)?)?,
        })
    }
}

impl ErrorStatsSummary {
    /// Skill scores of the unscaled predictions.
    pub fn compute(
        model_id: &str,
        schema: &VariableSchema,
        y_true: ArrayView2<'_, f64>,
        y_pred: ArrayView2<'_, f64>,
        lev: &[f64],
    ) -> Result<Self> {
        let summary = Self {
            model_id: model_id.to_string(),
            examples: y_true.nrows(),
            lev: lev.to_vec(),
            temperature: VariableStats::compute(schema, TEMPERATURE, y_true, y_pred)?,
            humidity: VariableStats::compute(schema, HUMIDITY, y_true, y_pred)?,
            mse: stats::mse(schema, y_pred, y_true, MseOptions::default())?,
        };
        log::debug!("mse over all outputs: {:.6e}", summary.mse);
        Ok(summary)
    }

    /// Save the summary as pretty-printed JSON
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        log::info!("💾 Statistics saved to: {}", path.as_ref().display());
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::NamedTempFile;

    #[test]
    fn test_summary_save_load() {
        let schema = VariableSchema::temperature_humidity(2);
        let truth = array![[1.0, 2.0, 0.5, 1.0], [3.0, 4.0, 1.5, 1.0]];
        let pred = array![[1.5, 2.0, 0.5, 1.0], [2.5, 4.0, 1.5, 1.0]];

        let summary = ErrorStatsSummary::compute("mlp", &schema, truth.view(), pred.view(), &[0.4, 0.9]).unwrap();
        assert_eq!(summary.examples, 2);
        assert_eq!(summary.temperature.mean_true, vec![2.0, 3.0]);
        assert_eq!(summary.humidity.explained_variance, vec![1.0, 1.0]);
        // q at the second level is constant.
        assert!(summary.humidity.correlation[1].is_nan());

        let temp_file = NamedTempFile::new().unwrap();
        summary.save_json(temp_file.path()).unwrap();
        let loaded = ErrorStatsSummary::load_json(temp_file.path()).unwrap();

        assert_eq!(loaded.model_id, "mlp");
        assert_eq!(loaded.temperature.mean_true, summary.temperature.mean_true);
        assert!(loaded.humidity.correlation[1].is_nan());
        assert!((loaded.mse - summary.mse).abs() < 1e-15);
    }

    #[test]
    fn test_summary_json_format() {
        let schema = VariableSchema::temperature_humidity(1);
        let y = array![[1.0, 1.0], [2.0, 1.0]];
        let summary = ErrorStatsSummary::compute("m", &schema, y.view(), y.view(), &[1.0]).unwrap();

        let json = serde_json::to_string_pretty(&summary).unwrap();
        assert!(json.contains("\"model_id\": \"m\""));
        assert!(json.contains("\"rmse_over_mean\""));
        assert!(json.contains("null"));
    }
}
