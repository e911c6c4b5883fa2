use ndarray::{Array1, ArrayViewMutD};
use rand::RngCore;

use super::{BatchNormalizer, Dense};
use crate::activation::Activation;
use crate::error::{shape_mismatch, Error, Result};
use crate::initializer::Initializer;
use crate::tensor::{Tensor, TensorSize};
use crate::traits::{Lobe, Param};

const NAME: &str = "normalization";

/// A linear dense lobe whose output is batch normalized before the
/// activation is applied.
pub struct Normalization {
    dense: Dense,
    normalizer: BatchNormalizer,
    activation: Activation,
    normalized: Option<Array1<f32>>,
}

impl Normalization {
    pub fn new(outputs: usize) -> Self {
        Self {
            dense: Dense::new(outputs),
            normalizer: BatchNormalizer::default(),
            activation: Activation::None,
            normalized: None,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_initializer(mut self, initializer: Initializer) -> Self {
        self.dense = self.dense.with_initializer(initializer);
        self
    }

    pub fn with_normalizer(mut self, normalizer: BatchNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn normalizer(&self) -> &BatchNormalizer {
        &self.normalizer
    }
}

impl Lobe for Normalization {
    fn name(&self) -> &'static str {
        NAME
    }

    fn compile(&mut self, input: TensorSize, rng: &mut dyn RngCore) -> Result<TensorSize> {
        self.dense.compile(input, rng)
    }

    fn output_size(&self) -> Option<TensorSize> {
        self.dense.output_size()
    }

    fn feed(&mut self, input: &Tensor, training: bool) -> Result<Tensor> {
        let linear = Array1::from_vec(self.dense.feed(input, training)?.to_vec());
        let normalized = self.normalizer.forward(linear.view(), training);
        let activation = self.activation;
        let output = normalized.mapv(|x| activation.activate(x));
        self.normalized = Some(normalized);
        Ok(Tensor::vector(output.to_vec()))
    }

    fn calculate_gradients(&mut self, deltas: &Tensor) -> Result<Tensor> {
        let normalized = self.normalized.as_ref().ok_or(Error::NoForwardPass(NAME))?;
        if deltas.len() != normalized.len() {
            return Err(shape_mismatch(
                NAME,
                TensorSize::vector(normalized.len()),
                deltas.size(),
            ));
        }

        let activation = self.activation;
        let mut pre_deltas = Array1::from_vec(deltas.to_vec());
        pre_deltas.zip_mut_with(normalized, |d, &x| *d *= activation.derivative(x));
        let linear_deltas = self
            .normalizer
            .backward(pre_deltas.view())
            .ok_or(Error::NoForwardPass(NAME))?;
        self.dense
            .calculate_gradients(&Tensor::vector(linear_deltas.to_vec()))
    }

    fn params(&mut self) -> Vec<Param<'_>> {
        let mut params = self.dense.params();
        params.extend(self.normalizer.params());
        params
    }

    fn weights(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut weights = self.dense.weights();
        weights.extend(self.normalizer.params().into_iter().map(|param| param.value));
        weights
    }

    fn zero_gradients(&mut self) {
        self.dense.zero_gradients();
        self.normalizer.zero_gradients();
    }

    fn clear(&mut self) {
        self.dense.clear();
        self.normalizer.clear();
        self.normalized = None;
    }
}
