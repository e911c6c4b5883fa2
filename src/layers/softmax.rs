use ndarray::Array1;
use rand::RngCore;

use crate::error::{shape_mismatch, Error, Result};
use crate::tensor::{Tensor, TensorSize};
use crate::traits::Lobe;
use crate::utils::softmax;

const NAME: &str = "softmax";

/// Turns the incoming values into a probability distribution of the same
/// shape.
#[derive(Default)]
pub struct Softmax {
    size: Option<TensorSize>,
    output: Option<Array1<f32>>,
}

impl Softmax {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Lobe for Softmax {
    fn name(&self) -> &'static str {
        NAME
    }

    fn compile(&mut self, input: TensorSize, _rng: &mut dyn RngCore) -> Result<TensorSize> {
        self.size = Some(input);
        Ok(input)
    }

    fn output_size(&self) -> Option<TensorSize> {
        self.size
    }

    fn feed(&mut self, input: &Tensor, _training: bool) -> Result<Tensor> {
        let size = self.size.ok_or(Error::NotCompiled)?;
        if input.size() != size {
            return Err(shape_mismatch(NAME, size, input.size()));
        }
        let output = softmax(&input.to_vec());
        let result = Tensor::from_shape_vec(size, output.clone())?;
        self.output = Some(Array1::from_vec(output));
        Ok(result)
    }

    fn calculate_gradients(&mut self, deltas: &Tensor) -> Result<Tensor> {
        let size = self.size.ok_or(Error::NotCompiled)?;
        let output = self.output.as_ref().ok_or(Error::NoForwardPass(NAME))?;
        if deltas.size() != size {
            return Err(shape_mismatch(NAME, size, deltas.size()));
        }
        let grad_out = Array1::from_vec(deltas.to_vec());
        let dot = output.dot(&grad_out);
        Tensor::from_shape_vec(size, (output * &(grad_out - dot)).to_vec())
    }

    fn clear(&mut self) {
        self.output = None;
    }
}
