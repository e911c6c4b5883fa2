use ndarray::{Array1, Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayViewMutD, Axis};
use rayon::prelude::*;

use crate::convolution::{filter_gradient, signal_gradient};
use crate::device::{Device, Padding};
use crate::traits::Param;

/// Filters and biases shared by the convolution lobes, with gradient
/// buffers sized up front. Filters are laid out as
/// `(filter, channel, rows, columns)`.
pub(crate) struct FilterBank {
    pub filters: Array4<f32>,
    pub bias: Array1<f32>,
    filter_gradients: Array4<f32>,
    bias_gradients: Array1<f32>,
}

impl FilterBank {
    pub fn new(filters: Array4<f32>) -> Self {
        let count = filters.dim().0;
        Self {
            filter_gradients: Array4::zeros(filters.raw_dim()),
            bias: Array1::zeros(count),
            bias_gradients: Array1::zeros(count),
            filters,
        }
    }

    pub fn count(&self) -> usize {
        self.filters.dim().0
    }

    pub fn depth(&self) -> usize {
        self.filters.dim().1
    }

    pub fn kernel(&self) -> (usize, usize) {
        let (_, _, rows, columns) = self.filters.dim();
        (rows, columns)
    }

    /// One output plane per filter: the sum over channels of the padded
    /// signal correlated with that channel's kernel, plus the bias.
    pub fn correlate(
        &self,
        device: &dyn Device,
        padded: ArrayView3<f32>,
        stride: (usize, usize),
        output: (usize, usize),
    ) -> Array3<f32> {
        let filters = &self.filters;
        let bias = &self.bias;
        let planes = (0..self.count())
            .into_par_iter()
            .map(|f| {
                let mut plane = Array2::from_elem(output, bias[f]);
                for (channel, kernel) in padded
                    .outer_iter()
                    .zip(filters.index_axis(Axis(0), f).outer_iter())
                {
                    plane += &device.correlate2d(channel, kernel, stride, Padding::Valid);
                }
                plane
            })
            .collect();
        stack(planes, output)
    }

    /// Adds the filter and bias gradients for `deltas`, the derivative with
    /// respect to the pre-activation output.
    pub fn accumulate(
        &mut self,
        device: &dyn Device,
        padded: ArrayView3<f32>,
        deltas: ArrayView3<f32>,
        stride: (usize, usize),
    ) {
        let kernel = self.kernel();
        let depth = self.depth();
        let gradients: Vec<Array3<f32>> = (0..self.count())
            .into_par_iter()
            .map(|f| {
                let delta = deltas.index_axis(Axis(0), f);
                let mut gradient = Array3::zeros((depth, kernel.0, kernel.1));
                for (mut slot, channel) in gradient.outer_iter_mut().zip(padded.outer_iter()) {
                    slot.assign(&filter_gradient(device, channel, delta, stride, kernel));
                }
                gradient
            })
            .collect();

        for (f, gradient) in gradients.into_iter().enumerate() {
            let mut slot = self.filter_gradients.index_axis_mut(Axis(0), f);
            slot += &gradient;
            self.bias_gradients[f] += deltas.index_axis(Axis(0), f).sum();
        }
    }

    /// Derivative with respect to the padded signal, one plane per channel.
    pub fn padded_gradient(
        &self,
        device: &dyn Device,
        deltas: ArrayView3<f32>,
        stride: (usize, usize),
        padded: (usize, usize),
    ) -> Array3<f32> {
        let filters = &self.filters;
        let planes = (0..self.depth())
            .into_par_iter()
            .map(|channel| {
                let mut plane = Array2::zeros(padded);
                for (delta, filter) in deltas.outer_iter().zip(filters.outer_iter()) {
                    let kernel = filter.index_axis(Axis(0), channel);
                    plane += &signal_gradient(device, delta, kernel, stride, padded);
                }
                plane
            })
            .collect();
        stack(planes, padded)
    }

    pub fn params(&mut self, with_bias: bool) -> Vec<Param<'_>> {
        let mut params = vec![Param {
            value: self.filters.view_mut().into_dyn(),
            gradient: self.filter_gradients.view_mut().into_dyn(),
        }];
        if with_bias {
            params.push(Param {
                value: self.bias.view_mut().into_dyn(),
                gradient: self.bias_gradients.view_mut().into_dyn(),
            });
        }
        params
    }

    pub fn weights(&mut self, with_bias: bool) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut weights = vec![self.filters.view_mut().into_dyn()];
        if with_bias {
            weights.push(self.bias.view_mut().into_dyn());
        }
        weights
    }

    pub fn zero_gradients(&mut self) {
        self.filter_gradients.fill(0.);
        self.bias_gradients.fill(0.);
    }

    #[cfg(test)]
    pub fn filter_gradients(&self) -> &Array4<f32> {
        &self.filter_gradients
    }
}

fn stack(planes: Vec<Array2<f32>>, (rows, columns): (usize, usize)) -> Array3<f32> {
    let mut stacked = Array3::zeros((planes.len(), rows, columns));
    for (mut slot, plane) in stacked.outer_iter_mut().zip(planes) {
        slot.assign(&plane);
    }
    stacked
}

/// Applies `f` to every channel of `signal`, each producing a `dim` plane.
pub(crate) fn per_channel(
    signal: ArrayView3<f32>,
    dim: (usize, usize),
    f: impl Fn(ArrayView2<f32>) -> Array2<f32>,
) -> Array3<f32> {
    stack(signal.outer_iter().map(f).collect(), dim)
}
