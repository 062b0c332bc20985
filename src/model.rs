use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{DiagnosticsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Relu,
    Tanh,
    Identity,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Identity => x,
        }
    }
}

/// Fully connected layer, `y = x · weights + bias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDenseLayer")]
pub struct DenseLayer {
    /// [inputs, outputs]
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl DenseLayer {
    pub fn new(weights: Array2<f64>, bias: Array1<f64>) -> Result<Self> {
        if weights.ncols() != bias.len() {
            return Err(DiagnosticsError::ShapeMismatch(format!(
                "layer has {} outputs but {} biases",
                weights.ncols(),
                bias.len()
            )));
        }
        Ok(Self { weights, bias })
    }

    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn outputs(&self) -> usize {
        self.weights.ncols()
    }
}

/// Multi-layer perceptron regressor mapping scaled T/q inputs to scaled
/// T/q tendencies. Hidden layers share one activation, the output is linear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMlp")]
pub struct MlpRegressor {
    layers: Vec<DenseLayer>,
    hidden_activation: Activation,
}

// Deserialized forms, checked by the constructors before use.
#[derive(Deserialize)]
struct RawDenseLayer {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl TryFrom<RawDenseLayer> for DenseLayer {
    type Error = DiagnosticsError;

    fn try_from(raw: RawDenseLayer) -> Result<Self> {
        Self::new(raw.weights, raw.bias)
    }
}

#[derive(Deserialize)]
struct RawMlp {
    layers: Vec<DenseLayer>,
    hidden_activation: Activation,
}

impl TryFrom<RawMlp> for MlpRegressor {
    type Error = DiagnosticsError;

    fn try_from(raw: RawMlp) -> Result<Self> {
        Self::new(raw.layers, raw.hidden_activation)
    }
}

impl MlpRegressor {
    pub fn new(layers: Vec<DenseLayer>, hidden_activation: Activation) -> Result<Self> {
        if layers.is_empty() {
            return Err(DiagnosticsError::InvalidConfig("an MLP needs at least one layer".to_string()));
        }
        for (idx, pair) in layers.windows(2).enumerate() {
            if pair[0].outputs() != pair[1].inputs() {
                return Err(DiagnosticsError::ShapeMismatch(format!(
                    "layer {} emits {} values but layer {} takes {}",
                    idx,
                    pair[0].outputs(),
                    idx + 1,
                    pair[1].inputs()
                )));
            }
        }
        Ok(Self {
            layers,
            hidden_activation,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].inputs()
    }

    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].outputs()
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    /// Forward pass over a batch (examples × inputs).
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.input_dim() {
            return Err(DiagnosticsError::ShapeMismatch(format!(
                "model expects {} inputs, got {}",
                self.input_dim(),
                x.ncols()
            )));
        }
        let last = self.layers.len() - 1;
        let mut h = x.to_owned();
        for (idx, layer) in self.layers.iter().enumerate() {
            h = h.dot(&layer.weights) + &layer.bias;
            if idx < last {
                let act = self.hidden_activation;
                h.mapv_inplace(|v| act.apply(v));
            }
        }
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn hidden_relu_then_linear_output() {
        let hidden = DenseLayer::new(array![[1.0, -1.0]], array![0.0, 0.0]).unwrap();
        let output = DenseLayer::new(array![[2.0], [3.0]], array![1.0]).unwrap();
        let mlp = MlpRegressor::new(vec![hidden, output], Activation::Relu).unwrap();

        let y = mlp.predict(array![[2.0], [-2.0]].view()).unwrap();
        // x=2  -> h=[2, 0] -> 4 + 1
        // x=-2 -> h=[0, 2] -> 6 + 1
        assert_eq!(y, array![[5.0], [7.0]]);
    }

    #[test]
    fn mismatched_layers_are_rejected() {
        let a = DenseLayer::new(Array2::zeros((2, 3)), Array1::zeros(3)).unwrap();
        let b = DenseLayer::new(Array2::zeros((4, 1)), Array1::zeros(1)).unwrap();
        assert!(MlpRegressor::new(vec![a, b], Activation::Tanh).is_err());
    }

    #[test]
    fn wrong_input_width_fails() {
        let layer = DenseLayer::new(Array2::eye(3), Array1::zeros(3)).unwrap();
        let mlp = MlpRegressor::new(vec![layer], Activation::Identity).unwrap();
        assert!(matches!(
            mlp.predict(Array2::zeros((1, 2)).view()),
            Err(DiagnosticsError::ShapeMismatch(_))
        ));
    }
}
