use serde::{Deserialize, Serialize};

use crate::error::{shape_mismatch, Result};
use crate::tensor::Tensor;
use crate::utils::{cross_entropy_error, squared_error};

const EPSILON: f32 = 1e-7;

/// Loss over one output vector. Derivatives are taken with respect to the
/// predicted values, so they can be fed straight into backpropagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LossFunction {
    #[default]
    MeanSquareError,
    /// Expects probabilities, usually from a softmax lobe.
    CrossEntropy,
}

impl LossFunction {
    pub fn calculate(&self, predicted: &Tensor, correct: &Tensor) -> Result<f32> {
        let (y, t) = pair(predicted, correct)?;
        let n = y.len().max(1) as f32;
        Ok(match self {
            LossFunction::MeanSquareError => squared_error(&y, &t) / n,
            LossFunction::CrossEntropy => cross_entropy_error(&y, &t, EPSILON) / n,
        })
    }

    pub fn derivative(&self, predicted: &Tensor, correct: &Tensor) -> Result<Tensor> {
        let (y, t) = pair(predicted, correct)?;
        let n = y.len().max(1) as f32;
        let deltas = y
            .iter()
            .zip(&t)
            .map(|(yi, ti)| match self {
                LossFunction::MeanSquareError => 2. * (yi - ti) / n,
                LossFunction::CrossEntropy => -ti / (yi.max(EPSILON) * n),
            })
            .collect();
        Tensor::from_shape_vec(predicted.size(), deltas)
    }
}

fn pair(predicted: &Tensor, correct: &Tensor) -> Result<(Vec<f32>, Vec<f32>)> {
    if predicted.len() != correct.len() {
        return Err(shape_mismatch("loss", predicted.size(), correct.size()));
    }
    Ok((predicted.to_vec(), correct.to_vec()))
}
