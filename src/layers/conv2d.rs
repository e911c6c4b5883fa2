use std::sync::Arc;

use ndarray::{s, Array3, ArrayViewMutD};
use rand::RngCore;
use tracing::{debug, error};

use super::filter_bank::{per_channel, FilterBank};
use crate::activation::Activation;
use crate::convolution::{output_length, same_padding, zero_pad};
use crate::device::{CpuDevice, Device, Padding};
use crate::error::{shape_mismatch, Error, Result};
use crate::initializer::Initializer;
use crate::tensor::{Tensor, TensorSize};
use crate::traits::{Lobe, Param};

const NAME: &str = "conv2d";

/// Strided, padded 2D convolution over every input channel.
pub struct Conv2d {
    filter_count: usize,
    filter_size: (usize, usize),
    stride: (usize, usize),
    padding: Padding,
    activation: Activation,
    initializer: Initializer,
    bias: bool,
    trainable: bool,
    device: Arc<dyn Device>,
    compiled: Option<Compiled>,
}

struct Compiled {
    input: TensorSize,
    output: TensorSize,
    vertical: (usize, usize),
    horizontal: (usize, usize),
    bank: FilterBank,
    cache: Option<Cache>,
}

struct Cache {
    padded: Array3<f32>,
    pre_activation: Array3<f32>,
}

impl Conv2d {
    pub fn new(filter_count: usize, filter_size: (usize, usize)) -> Self {
        Self {
            filter_count,
            filter_size,
            stride: (1, 1),
            padding: Padding::Same,
            activation: Activation::None,
            initializer: Initializer::default(),
            bias: true,
            trainable: true,
            device: Arc::new(CpuDevice),
            compiled: None,
        }
    }

    pub fn with_stride(mut self, stride: (usize, usize)) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_initializer(mut self, initializer: Initializer) -> Self {
        self.initializer = initializer;
        self
    }

    pub fn without_bias(mut self) -> Self {
        self.bias = false;
        self
    }

    pub fn with_trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    pub fn with_device(mut self, device: Arc<dyn Device>) -> Self {
        self.device = device;
        self
    }
}

impl Lobe for Conv2d {
    fn name(&self) -> &'static str {
        NAME
    }

    fn compile(&mut self, input: TensorSize, rng: &mut dyn RngCore) -> Result<TensorSize> {
        if let Some(compiled) = &self.compiled {
            if compiled.input == input {
                return Ok(compiled.output);
            }
        }

        let (filter_rows, filter_columns) = self.filter_size;
        if self.stride.0 == 0 || self.stride.1 == 0 || self.filter_count == 0 {
            return Err(Error::InvalidConfig(format!(
                "{NAME} needs a non-zero stride and filter count"
            )));
        }
        let rows = output_length(input.rows, filter_rows, self.stride.0, self.padding);
        let columns = output_length(input.columns, filter_columns, self.stride.1, self.padding);
        if rows == 0 || columns == 0 || filter_rows == 0 || filter_columns == 0 {
            error!(lobe = NAME, %input, "filter does not fit the input");
            return Err(Error::InvalidConfig(format!(
                "{filter_rows}x{filter_columns} filter does not fit a {input} input"
            )));
        }

        let (vertical, horizontal) = match self.padding {
            Padding::Valid => ((0, 0), (0, 0)),
            Padding::Same => (
                same_padding(input.rows, filter_rows, self.stride.0),
                same_padding(input.columns, filter_columns, self.stride.1),
            ),
        };
        // Kernels do not depend on the spatial size, so a crop change keeps them.
        let kept = self
            .compiled
            .take()
            .map(|compiled| compiled.bank)
            .filter(|bank| bank.depth() == input.depth);
        let bank = match kept {
            Some(bank) => bank,
            None => {
                let area = filter_rows * filter_columns;
                FilterBank::new(self.initializer.build(
                    (self.filter_count, input.depth, filter_rows, filter_columns),
                    input.depth * area,
                    self.filter_count * area,
                    rng,
                ))
            }
        };
        let output = TensorSize::new(rows, columns, self.filter_count);
        debug!(lobe = NAME, %input, %output, "compiled");

        self.compiled = Some(Compiled {
            input,
            output,
            vertical,
            horizontal,
            bank,
            cache: None,
        });
        Ok(output)
    }

    fn output_size(&self) -> Option<TensorSize> {
        self.compiled.as_ref().map(|compiled| compiled.output)
    }

    fn feed(&mut self, input: &Tensor, _training: bool) -> Result<Tensor> {
        let compiled = self.compiled.as_mut().ok_or(Error::NotCompiled)?;
        if input.size() != compiled.input {
            return Err(shape_mismatch(NAME, compiled.input, input.size()));
        }

        let (vertical, horizontal) = (compiled.vertical, compiled.horizontal);
        let padded_dim = (
            compiled.input.rows + vertical.0 + vertical.1,
            compiled.input.columns + horizontal.0 + horizontal.1,
        );
        let padded = per_channel(input.value(), padded_dim, |channel| {
            zero_pad(channel, vertical, horizontal)
        });
        let output = (compiled.output.rows, compiled.output.columns);
        let pre_activation =
            compiled
                .bank
                .correlate(self.device.as_ref(), padded.view(), self.stride, output);

        let activation = self.activation;
        let result = Tensor::new(pre_activation.mapv(|x| activation.activate(x)));
        compiled.cache = Some(Cache {
            padded,
            pre_activation,
        });
        Ok(result)
    }

    fn calculate_gradients(&mut self, deltas: &Tensor) -> Result<Tensor> {
        let compiled = self.compiled.as_mut().ok_or(Error::NotCompiled)?;
        if deltas.size() != compiled.output {
            return Err(shape_mismatch(NAME, compiled.output, deltas.size()));
        }
        let cache = compiled.cache.as_ref().ok_or(Error::NoForwardPass(NAME))?;

        let activation = self.activation;
        let mut pre_deltas = deltas.value().to_owned();
        pre_deltas.zip_mut_with(&cache.pre_activation, |d, &z| *d *= activation.derivative(z));

        let device = self.device.as_ref();
        let (_, padded_rows, padded_columns) = cache.padded.dim();
        let padded_gradient = compiled.bank.padded_gradient(
            device,
            pre_deltas.view(),
            self.stride,
            (padded_rows, padded_columns),
        );
        if self.trainable {
            compiled
                .bank
                .accumulate(device, cache.padded.view(), pre_deltas.view(), self.stride);
        }

        let (top, left) = (compiled.vertical.0, compiled.horizontal.0);
        let input = compiled.input;
        Ok(Tensor::new(
            padded_gradient
                .slice(s![.., top..top + input.rows, left..left + input.columns])
                .to_owned(),
        ))
    }

    fn params(&mut self) -> Vec<Param<'_>> {
        let bias = self.bias;
        match &mut self.compiled {
            Some(compiled) if self.trainable => compiled.bank.params(bias),
            _ => Vec::new(),
        }
    }

    fn weights(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let bias = self.bias;
        match &mut self.compiled {
            Some(compiled) => compiled.bank.weights(bias),
            None => Vec::new(),
        }
    }

    fn zero_gradients(&mut self) {
        if let Some(compiled) = &mut self.compiled {
            compiled.bank.zero_gradients();
        }
    }

    fn clear(&mut self) {
        if let Some(compiled) = &mut self.compiled {
            compiled.bank.zero_gradients();
            compiled.cache = None;
        }
    }
}
