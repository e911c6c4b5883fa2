use std::ops::RangeInclusive;

use ndarray::{ArrayViewD, ArrayViewMutD};
use rand::RngCore;

use crate::error::Result;
use crate::tensor::{Tensor, TensorSize};

/// A trainable buffer borrowed together with its accumulated gradient.
pub struct Param<'a> {
    pub value: ArrayViewMutD<'a, f32>,
    pub gradient: ArrayViewMutD<'a, f32>,
}

/// Identifies one parameter across optimizer steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamKey {
    pub lobe: usize,
    pub slot: usize,
}

/// One layer of a network.
///
/// `feed` caches whatever `calculate_gradients` needs, and gradients keep
/// accumulating across samples until `zero_gradients`.
pub trait Lobe: Send {
    fn name(&self) -> &'static str;

    /// Sizes the lobe for `input` and returns its output size. Calling it
    /// again with the same size leaves the lobe untouched.
    fn compile(&mut self, input: TensorSize, rng: &mut dyn RngCore) -> Result<TensorSize>;

    fn output_size(&self) -> Option<TensorSize>;

    fn feed(&mut self, input: &Tensor, training: bool) -> Result<Tensor>;

    /// Accumulates parameter gradients for `deltas` and returns the deltas
    /// for the previous lobe.
    fn calculate_gradients(&mut self, deltas: &Tensor) -> Result<Tensor>;

    fn params(&mut self) -> Vec<Param<'_>> {
        Vec::new()
    }

    fn adjust_weights(&mut self, lobe: usize, batch_size: usize, optimizer: &mut dyn Optimizer) {
        let scale = 1. / batch_size.max(1) as f32;
        for (slot, param) in self.params().into_iter().enumerate() {
            let gradient = param.gradient.mapv(|g| g * scale);
            optimizer.update(ParamKey { lobe, slot }, param.value, gradient.view());
        }
    }

    fn zero_gradients(&mut self) {
        for mut param in self.params() {
            param.gradient.fill(0.);
        }
    }

    /// Every learned buffer, including those of a frozen lobe.
    fn weights(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        self.params().into_iter().map(|param| param.value).collect()
    }

    fn clip_weights(&mut self, range: RangeInclusive<f32>) {
        let (min, max) = (*range.start(), *range.end());
        for mut weights in self.weights() {
            weights.mapv_inplace(|v| v.max(min).min(max));
        }
    }

    /// Drops cached activations, gradients and running statistics. Learned
    /// weights are kept.
    fn clear(&mut self);
}

pub trait Optimizer: Send {
    fn update(&mut self, key: ParamKey, param: ArrayViewMutD<f32>, gradient: ArrayViewD<f32>);

    /// Post-batch bookkeeping.
    fn step(&mut self) {}
}
