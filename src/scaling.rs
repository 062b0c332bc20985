use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::codec::VariableSchema;
use crate::error::{DiagnosticsError, Result};

/// How inputs or outputs were normalised before the network saw them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingMethod {
    Identity,
    /// Per-column `(x - mean) / std`.
    StandardScaler,
    /// Per-variable `x / std`: one scale for all levels of a variable, no
    /// centering, so zero tendencies stay zero.
    SimpleY,
}

/// Fitted constants for one [`ScalingMethod`], one entry per packed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub mean: Array1<f64>,
    pub scale: Array1<f64>,
}

impl ScalerParams {
    pub fn identity(width: usize) -> Self {
        Self {
            mean: Array1::zeros(width),
            scale: Array1::ones(width),
        }
    }

    pub fn fit(method: ScalingMethod, schema: &VariableSchema, data: ArrayView2<'_, f64>) -> Result<Self> {
        let width = data.ncols();
        if width != schema.width() {
            return Err(DiagnosticsError::ShapeMismatch(format!(
                "fitting a scaler on {} columns with a {}-column schema",
                width,
                schema.width()
            )));
        }
        if data.nrows() == 0 {
            return Err(DiagnosticsError::EmptyInput("cannot fit a scaler on zero examples".to_string()));
        }
        let nonzero = |s: f64| if s > 0.0 && s.is_finite() { s } else { 1.0 };

        let params = match method {
            ScalingMethod::Identity => Self::identity(width),
            ScalingMethod::StandardScaler => Self {
                mean: data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(width)),
                scale: data.std_axis(Axis(0), 0.0).mapv(nonzero),
            },
            ScalingMethod::SimpleY => {
                let mut scale = Array1::ones(width);
                let mut start = 0;
                for var in schema.variables() {
                    let block = data.slice(ndarray::s![.., start..start + var.levels]);
                    let n = block.len() as f64;
                    let mean = block.sum() / n;
                    let std = (block.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
                    scale
                        .slice_mut(ndarray::s![start..start + var.levels])
                        .fill(nonzero(std));
                    start += var.levels;
                }
                Self {
                    mean: Array1::zeros(width),
                    scale,
                }
            }
        };
        Ok(params)
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    fn check(&self, data: &ArrayView2<'_, f64>) -> Result<()> {
        if self.mean.len() != self.scale.len() || data.ncols() != self.mean.len() {
            return Err(DiagnosticsError::ShapeMismatch(format!(
                "scaler fitted on {} columns applied to {}",
                self.mean.len(),
                data.ncols()
            )));
        }
        Ok(())
    }

    /// Raw values to the network's scale.
    pub fn transform(&self, method: ScalingMethod, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.check(&data)?;
        Ok(match method {
            ScalingMethod::Identity => data.to_owned(),
            ScalingMethod::StandardScaler => (&data - &self.mean) / &self.scale,
            ScalingMethod::SimpleY => &data / &self.scale,
        })
    }

    /// Network-scale values back to physical units.
    pub fn inverse_transform(&self, method: ScalingMethod, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.check(&data)?;
        Ok(match method {
            ScalingMethod::Identity => data.to_owned(),
            ScalingMethod::StandardScaler => &data * &self.scale + &self.mean,
            ScalingMethod::SimpleY => &data * &self.scale,
        })
    }
}
