//! Self-consistent regressor/dataset pairs for demos and end-to-end tests.
//!
//! The regressor is a single linear layer, and the dataset's targets are its
//! predictions minus bounded uniform noise, so every figure has something to
//! show and the expected skill is known.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

use crate::artifact::{self, ErrorRecord, RegressorArtifact};
use crate::codec::{self, VariableSchema};
use crate::data::ConvectionDataset;
use crate::error::{DiagnosticsError, Result};
use crate::model::{Activation, DenseLayer, MlpRegressor};
use crate::scaling::{ScalerParams, ScalingMethod};
use crate::stats;

/// Size and noise of a synthetic case.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticSpec {
    pub levels: usize,
    pub examples: usize,
    /// Half-width of the uniform gap between predicted and true outputs.
    pub noise: f64,
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            levels: 5,
            examples: 1000,
            noise: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticCase {
    pub artifact: RegressorArtifact,
    pub dataset: ConvectionDataset,
}

/// Output sensitivity to each standardised input.
const GAIN: f64 = 0.3;
const TRAINING_ITERATIONS: usize = 60;

/// Build a linear regressor and a dataset whose targets sit within `noise`
/// of its predictions. Outputs have means close to 1.
pub fn build_synthetic(spec: SyntheticSpec) -> Result<SyntheticCase> {
    if spec.levels == 0 || spec.examples == 0 {
        return Err(DiagnosticsError::InvalidConfig(format!(
            "a synthetic case needs levels and examples, got {} × {}",
            spec.levels, spec.examples
        )));
    }
    if spec.noise.is_nan() || spec.noise < 0.0 {
        return Err(DiagnosticsError::InvalidConfig(format!("noise must be non-negative, got {}", spec.noise)));
    }

    let mut rng = StdRng::seed_from_u64(spec.seed);
    let levels = spec.levels;
    let schema = VariableSchema::temperature_humidity(levels);
    let width = schema.width();

    // Sigma levels from the top of the domain down to the surface.
    let lev: Vec<f64> = (0..levels).map(|i| (i + 1) as f64 / levels as f64).collect();
    let dlev = vec![1.0 / levels as f64; levels];
    let lat_axis = stats::linspace(-60.0, 60.0, 7);

    let mut temperature = Array2::zeros((spec.examples, levels));
    let mut humidity = Array2::zeros((spec.examples, levels));
    let mut example_lat = Vec::with_capacity(spec.examples);
    for n in 0..spec.examples {
        let grid_lat = lat_axis[rng.gen_range(0..lat_axis.len())];
        example_lat.push(grid_lat + rng.gen_range(-2.0..2.0));
        let warmth: f64 = rng.gen_range(-4.0..4.0);
        let moisture: f64 = rng.gen_range(0.6..1.2);
        for (k, &sigma) in lev.iter().enumerate() {
            temperature[[n, k]] = 300.0 * sigma.powf(0.19) + warmth + rng.gen_range(-1.0..1.0);
            humidity[[n, k]] = (15.0 * moisture * sigma.powi(3) + rng.gen_range(-0.2..0.2)).max(0.05);
        }
    }
    let inputs = codec::pack(&schema, &[temperature.view(), humidity.view()])?;

    let input_params = ScalerParams::fit(ScalingMethod::StandardScaler, &schema, inputs.view())?;
    let x_scaled = input_params.transform(ScalingMethod::StandardScaler, inputs.view())?;

    // Physical outputs are 1 + GAIN·x_scaled; the output scaler is fitted on
    // those so the network works on the scaled form.
    let outputs = x_scaled.mapv(|v| 1.0 + GAIN * v);
    let output_params = ScalerParams::fit(ScalingMethod::SimpleY, &schema, outputs.view())?;

    let mut weights = Array2::zeros((width, width));
    let mut bias = Array1::zeros(width);
    for j in 0..width {
        weights[[j, j]] = GAIN / output_params.scale[j];
        bias[j] = 1.0 / output_params.scale[j];
    }
    let model = MlpRegressor::new(vec![DenseLayer::new(weights, bias)?], Activation::Identity)?;

    let y_pred = output_params.inverse_transform(ScalingMethod::SimpleY, model.predict(x_scaled.view())?.view())?;
    let noise = Array2::from_shape_fn(y_pred.dim(), |_| rng.gen_range(-1.0..=1.0) * spec.noise);
    let targets = &y_pred - &noise;

    let artifact = RegressorArtifact {
        model,
        errors: error_history(&mut rng),
        input_scaling: ScalingMethod::StandardScaler,
        output_scaling: ScalingMethod::SimpleY,
        input_params,
        output_params,
        lat: lat_axis,
        lev: lev.clone(),
        dlev,
    };
    artifact.validate()?;

    log::debug!(
        "synthetic targets: mean {:?}",
        targets.mean_axis(Axis(0)).map(|m| m.to_vec())
    );
    let dataset = ConvectionDataset::new(lev, example_lat, inputs, targets)?;
    Ok(SyntheticCase { artifact, dataset })
}

/// Decaying training errors; cross-validation is only evaluated every fifth
/// iteration and is NaN in between.
fn error_history(rng: &mut StdRng) -> Vec<ErrorRecord> {
    (0..TRAINING_ITERATIONS)
        .map(|i| {
            let decay = 0.05 * (-(i as f64) / 15.0).exp() + 0.002;
            let jitter = |rng: &mut StdRng| 1.0 + rng.gen_range(-0.1..0.1);
            let cross_val = if i % 5 == 0 { decay * 1.3 } else { f64::NAN };
            ErrorRecord {
                train_cost: decay * jitter(rng),
                train_cost_alt: decay * 0.8 * jitter(rng),
                cross_val_a: cross_val,
                cross_val_b: cross_val * 1.1,
                train_metric_a: decay * 1.1 * jitter(rng),
                train_metric_b: decay * 0.9 * jitter(rng),
            }
        })
        .collect()
}

/// Build a case and write its artifact to `<regressor_dir>/<model_id>.json`
/// and its dataset to `dataset_path`.
pub fn write_synthetic(
    spec: SyntheticSpec,
    regressor_dir: &Path,
    model_id: &str,
    dataset_path: &Path,
) -> Result<SyntheticCase> {
    // Every JSON file directly in the regressor directory is listed as a model.
    if dataset_path.parent() == Some(regressor_dir) {
        return Err(DiagnosticsError::InvalidConfig(format!(
            "dataset {} would be listed as a regressor; write it outside {}",
            dataset_path.display(),
            regressor_dir.display()
        )));
    }
    let case = build_synthetic(spec)?;
    artifact::save_artifact(&case.artifact, regressor_dir, model_id)?;
    case.dataset.save_json(dataset_path)?;
    log::info!(
        "🧪 Synthetic case '{}': {} examples on {} levels",
        model_id,
        case.dataset.len(),
        case.dataset.lev.len()
    );
    Ok(case)
}
