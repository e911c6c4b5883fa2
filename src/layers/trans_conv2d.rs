use std::sync::Arc;

use ndarray::{Array3, ArrayViewMutD};
use rand::RngCore;
use tracing::{debug, error};

use super::filter_bank::{per_channel, FilterBank};
use crate::activation::Activation;
use crate::convolution::{dilate, subsample, transposed_output_length, zero_pad};
use crate::device::{CpuDevice, Device, Padding};
use crate::error::{shape_mismatch, Error, Result};
use crate::initializer::Initializer;
use crate::tensor::{Tensor, TensorSize};
use crate::traits::{Lobe, Param};

const NAME: &str = "trans_conv2d";

/// Upsampling convolution. The input is dilated by the stride and zero
/// padded, then correlated with the filters at stride one, so both the
/// forward pass and the gradients reuse the plain convolution kernels.
pub struct TransConv2d {
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

/// Zeros around the dilated signal so a stride one valid correlation
/// yields the transposed output length.
fn surround(filter: usize, stride: usize, padding: Padding) -> (usize, usize) {
    match padding {
        Padding::Valid => (filter - 1, filter - 1),
        Padding::Same => {
            let total = stride + filter - 2;
            (total / 2, total - total / 2)
        }
    }
}

impl TransConv2d {
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

impl Lobe for TransConv2d {
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
        let degenerate = [
            self.stride.0,
            self.stride.1,
            filter_rows,
            filter_columns,
            self.filter_count,
        ]
        .contains(&0);
        if degenerate || input.rows == 0 || input.columns == 0 {
            error!(lobe = NAME, %input, "degenerate transposed convolution");
            return Err(Error::InvalidConfig(format!(
                "{NAME} cannot upsample a {input} input with a {filter_rows}x{filter_columns} filter"
            )));
        }

        let rows = transposed_output_length(input.rows, filter_rows, self.stride.0, self.padding);
        let columns =
            transposed_output_length(input.columns, filter_columns, self.stride.1, self.padding);
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
            vertical: surround(filter_rows, self.stride.0, self.padding),
            horizontal: surround(filter_columns, self.stride.1, self.padding),
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

        let stride = self.stride;
        let (vertical, horizontal) = (compiled.vertical, compiled.horizontal);
        let padded_dim = (
            (compiled.input.rows - 1) * stride.0 + 1 + vertical.0 + vertical.1,
            (compiled.input.columns - 1) * stride.1 + 1 + horizontal.0 + horizontal.1,
        );
        let padded = per_channel(input.value(), padded_dim, |channel| {
            zero_pad(dilate(channel, stride).view(), vertical, horizontal)
        });
        let output = (compiled.output.rows, compiled.output.columns);
        let pre_activation =
            compiled
                .bank
                .correlate(self.device.as_ref(), padded.view(), (1, 1), output);

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
            (1, 1),
            (padded_rows, padded_columns),
        );
        if self.trainable {
            compiled
                .bank
                .accumulate(device, cache.padded.view(), pre_deltas.view(), (1, 1));
        }

        let input = compiled.input;
        let offset = (compiled.vertical.0, compiled.horizontal.0);
        let stride = self.stride;
        Ok(Tensor::new(per_channel(
            padded_gradient.view(),
            (input.rows, input.columns),
            |plane| subsample(plane, offset, stride, (input.rows, input.columns)),
        )))
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

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::TransConv2d;
    use crate::device::Padding;
    use crate::initializer::Initializer;
    use crate::layers::testing::{check_gradients, random_tensor, rng};
    use crate::tensor::{Tensor, TensorSize};
    use crate::traits::Lobe;

    fn compiled(lobe: TransConv2d, input: TensorSize) -> TransConv2d {
        let mut lobe = lobe;
        lobe.compile(input, &mut rng()).unwrap();
        lobe
    }

    #[test]
    fn should_grow_output() {
        let input = TensorSize::new(4, 5, 3);
        let valid = TransConv2d::new(2, (3, 3))
            .with_stride((2, 2))
            .with_padding(Padding::Valid)
            .compile(input, &mut rng())
            .unwrap();
        assert_eq!(valid, TensorSize::new(9, 11, 2));

        let same = TransConv2d::new(2, (3, 3))
            .with_stride((2, 2))
            .compile(input, &mut rng())
            .unwrap();
        assert_eq!(same, TensorSize::new(8, 10, 2));
    }

    #[test]
    fn should_expand_each_pixel_into_a_block() {
        let mut lobe = compiled(
            TransConv2d::new(1, (2, 2))
                .with_stride((2, 2))
                .with_padding(Padding::Valid)
                .with_initializer(Initializer::Constant(1.)),
            TensorSize::new(2, 2, 1),
        );
        let output = lobe
            .feed(&Tensor::new(array![[[1., 2.], [3., 4.]]]), false)
            .unwrap();
        let expected = Tensor::new(array![[
            [1., 1., 2., 2.],
            [1., 1., 2., 2.],
            [3., 3., 4., 4.],
            [3., 3., 4., 4.]
        ]]);
        assert!(output.is_value_equal(&expected, 1e-6));
    }

    #[test]
    fn should_match_numeric_gradients_with_unit_stride() {
        let input_size = TensorSize::new(3, 4, 2);
        let mut lobe = compiled(TransConv2d::new(2, (3, 3)), input_size);
        check_gradients(&mut lobe, &random_tensor(input_size, &mut rng()));
    }

    #[test]
    fn should_match_numeric_gradients_with_stride_and_valid_padding() {
        let input_size = TensorSize::new(3, 3, 2);
        let mut lobe = compiled(
            TransConv2d::new(2, (3, 2))
                .with_stride((2, 2))
                .with_padding(Padding::Valid),
            input_size,
        );
        check_gradients(&mut lobe, &random_tensor(input_size, &mut rng()));
    }

    #[test]
    fn should_match_numeric_gradients_with_stride_and_same_padding() {
        let input_size = TensorSize::new(3, 2, 1);
        let mut lobe = compiled(
            TransConv2d::new(3, (3, 3)).with_stride((2, 3)),
            input_size,
        );
        check_gradients(&mut lobe, &random_tensor(input_size, &mut rng()));
    }

    #[test]
    fn should_keep_filters_across_crop_changes() {
        let mut lobe = compiled(
            TransConv2d::new(2, (3, 3)).with_stride((2, 2)),
            TensorSize::new(3, 3, 1),
        );
        let before = lobe.compiled.as_ref().unwrap().bank.filters.clone();

        let output = lobe
            .compile(TensorSize::new(5, 4, 1), &mut ChaCha20Rng::seed_from_u64(99))
            .unwrap();
        assert_eq!(output, TensorSize::new(10, 8, 2));
        assert_eq!(lobe.compiled.as_ref().unwrap().bank.filters, before);
        let input = Tensor::filled(TensorSize::new(5, 4, 1), 1.);
        assert_eq!(lobe.feed(&input, true).unwrap().size(), output);
    }
}
