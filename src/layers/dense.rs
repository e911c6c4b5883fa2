use ndarray::{Array1, Array2, ArrayViewMutD, Axis};
use rand::RngCore;
use tracing::{error, info};

use crate::activation::Activation;
use crate::error::{shape_mismatch, Error, Result};
use crate::initializer::Initializer;
use crate::tensor::{Tensor, TensorSize};
use crate::traits::{Lobe, Param};

const NAME: &str = "dense";

/// Fully connected lobe, `activation(weights . input + bias)`.
///
/// The input is read in flattened order whatever its shape, so a dense
/// lobe can follow a convolution directly. Weights stay pending until the
/// first `compile` tells the lobe how many inputs it has.
pub struct Dense {
    outputs: usize,
    activation: Activation,
    initializer: Initializer,
    trainable: bool,
    weights: Weights,
    cache: Option<Cache>,
}

enum Weights {
    Pending,
    Ready {
        input: TensorSize,
        /// `(outputs, inputs)`
        weights: Array2<f32>,
        bias: Array1<f32>,
        weight_gradients: Array2<f32>,
        bias_gradients: Array1<f32>,
    },
}

struct Cache {
    input: Array1<f32>,
    pre_activation: Array1<f32>,
}

impl Dense {
    pub fn new(outputs: usize) -> Self {
        Self {
            outputs,
            activation: Activation::None,
            initializer: Initializer::default(),
            trainable: true,
            weights: Weights::Pending,
            cache: None,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_initializer(mut self, initializer: Initializer) -> Self {
        self.initializer = initializer;
        self
    }

    pub fn with_trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    /// Number of inputs the weights were built for.
    pub fn inputs(&self) -> Option<usize> {
        match &self.weights {
            Weights::Pending => None,
            Weights::Ready { weights, .. } => Some(weights.ncols()),
        }
    }
}

impl Lobe for Dense {
    fn name(&self) -> &'static str {
        NAME
    }

    fn compile(&mut self, input: TensorSize, rng: &mut dyn RngCore) -> Result<TensorSize> {
        let output = TensorSize::vector(self.outputs);
        if self.outputs == 0 || input.is_empty() {
            error!(lobe = NAME, %input, outputs = self.outputs, "empty dense lobe");
            return Err(Error::InvalidConfig(format!(
                "{NAME} cannot map {input} onto {} outputs",
                self.outputs
            )));
        }

        match &mut self.weights {
            Weights::Ready {
                input: known,
                weights,
                ..
            } if weights.ncols() == input.len() => {
                *known = input;
                return Ok(output);
            }
            Weights::Ready { weights, .. } => {
                info!(
                    lobe = NAME,
                    from = weights.ncols(),
                    to = input.len(),
                    "rebuilding dense weights for new input count"
                );
            }
            Weights::Pending => {}
        }

        let inputs = input.len();
        self.weights = Weights::Ready {
            input,
            weights: self
                .initializer
                .build((self.outputs, inputs), inputs, self.outputs, rng),
            bias: Array1::zeros(self.outputs),
            weight_gradients: Array2::zeros((self.outputs, inputs)),
            bias_gradients: Array1::zeros(self.outputs),
        };
        self.cache = None;
        Ok(output)
    }

    fn output_size(&self) -> Option<TensorSize> {
        match self.weights {
            Weights::Pending => None,
            Weights::Ready { .. } => Some(TensorSize::vector(self.outputs)),
        }
    }

    fn feed(&mut self, input: &Tensor, _training: bool) -> Result<Tensor> {
        let Weights::Ready {
            input: expected,
            weights,
            bias,
            ..
        } = &self.weights
        else {
            return Err(Error::NotCompiled);
        };
        if input.len() != expected.len() {
            return Err(shape_mismatch(NAME, *expected, input.size()));
        }

        let x = Array1::from_vec(input.to_vec());
        let pre_activation = weights.dot(&x) + bias;
        let activation = self.activation;
        let output = pre_activation.mapv(|z| activation.activate(z));
        self.cache = Some(Cache {
            input: x,
            pre_activation,
        });
        Ok(Tensor::vector(output.to_vec()))
    }

    fn calculate_gradients(&mut self, deltas: &Tensor) -> Result<Tensor> {
        let Weights::Ready {
            input,
            weights,
            weight_gradients,
            bias_gradients,
            ..
        } = &mut self.weights
        else {
            return Err(Error::NotCompiled);
        };
        if deltas.len() != self.outputs {
            return Err(shape_mismatch(
                NAME,
                TensorSize::vector(self.outputs),
                deltas.size(),
            ));
        }
        let cache = self.cache.as_ref().ok_or(Error::NoForwardPass(NAME))?;

        let activation = self.activation;
        let mut pre_deltas = Array1::from_vec(deltas.to_vec());
        pre_deltas.zip_mut_with(&cache.pre_activation, |d, &z| *d *= activation.derivative(z));

        if self.trainable {
            let outer = pre_deltas
                .view()
                .insert_axis(Axis(1))
                .dot(&cache.input.view().insert_axis(Axis(0)));
            *weight_gradients += &outer;
            *bias_gradients += &pre_deltas;
        }

        let upstream = weights.t().dot(&pre_deltas);
        Tensor::from_shape_vec(*input, upstream.to_vec())
    }

    fn params(&mut self) -> Vec<Param<'_>> {
        match &mut self.weights {
            Weights::Ready {
                weights,
                bias,
                weight_gradients,
                bias_gradients,
                ..
            } if self.trainable => vec![
                Param {
                    value: weights.view_mut().into_dyn(),
                    gradient: weight_gradients.view_mut().into_dyn(),
                },
                Param {
                    value: bias.view_mut().into_dyn(),
                    gradient: bias_gradients.view_mut().into_dyn(),
                },
            ],
            _ => Vec::new(),
        }
    }

    fn weights(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        match &mut self.weights {
            Weights::Ready { weights, bias, .. } => {
                vec![weights.view_mut().into_dyn(), bias.view_mut().into_dyn()]
            }
            Weights::Pending => Vec::new(),
        }
    }

    fn zero_gradients(&mut self) {
        if let Weights::Ready {
            weight_gradients,
            bias_gradients,
            ..
        } = &mut self.weights
        {
            weight_gradients.fill(0.);
            bias_gradients.fill(0.);
        }
    }

    fn clear(&mut self) {
        self.zero_gradients();
        self.cache = None;
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::{Dense, Weights};
    use crate::activation::Activation;
    use crate::error::Error;
    use crate::initializer::Initializer;
    use crate::layers::testing::{check_gradients, random_tensor, rng};
    use crate::tensor::{Tensor, TensorSize};
    use crate::traits::Lobe;

    fn dense() -> Dense {
        let mut dense = Dense::new(2);
        dense.compile(TensorSize::vector(3), &mut rng()).unwrap();
        if let Weights::Ready { weights, bias, .. } = &mut dense.weights {
            *weights = array![[1., 0., -1.], [0.5, 0.5, 0.5]];
            *bias = array![0.5, -1.];
        }
        dense
    }

    #[test]
    fn should_apply_weights_and_bias() {
        let output = dense()
            .feed(&Tensor::vector(vec![1., 2., 3.]), false)
            .unwrap();
        assert_eq!(output, Tensor::vector(vec![-1.5, 2.]));
    }

    #[test]
    fn should_accumulate_outer_product_gradients() {
        let mut dense = dense();
        let input = Tensor::vector(vec![1., 2., 3.]);
        dense.feed(&input, true).unwrap();
        let upstream = dense
            .calculate_gradients(&Tensor::vector(vec![1., 2.]))
            .unwrap();
        assert_eq!(upstream, Tensor::vector(vec![2., 1., 0.]));

        dense.feed(&input, true).unwrap();
        dense
            .calculate_gradients(&Tensor::vector(vec![1., 2.]))
            .unwrap();
        let params = dense.params();
        assert_eq!(
            params[0].gradient,
            array![[2., 4., 6.], [4., 8., 12.]].into_dyn()
        );
        assert_eq!(params[1].gradient, array![2., 4.].into_dyn());
    }

    #[test]
    fn should_accept_unflattened_input() {
        let mut dense = Dense::new(4);
        let input_size = TensorSize::new(2, 3, 2);
        dense.compile(input_size, &mut rng()).unwrap();
        let input = random_tensor(input_size, &mut rng());
        dense.feed(&input, true).unwrap();
        let upstream = dense
            .calculate_gradients(&Tensor::filled(TensorSize::vector(4), 1.))
            .unwrap();
        assert_eq!(upstream.size(), input_size);
    }

    #[test]
    fn should_keep_weights_while_input_count_is_unchanged() {
        let mut dense = dense();
        dense
            .compile(TensorSize::new(3, 1, 1), &mut rng())
            .unwrap();
        let output = dense
            .feed(&Tensor::from_shape_vec(TensorSize::new(3, 1, 1), vec![1., 2., 3.]).unwrap(), false)
            .unwrap();
        assert_eq!(output, Tensor::vector(vec![-1.5, 2.]));
    }

    #[test]
    fn should_rebuild_weights_when_input_count_changes() {
        let mut dense = dense();
        dense.compile(TensorSize::vector(5), &mut rng()).unwrap();
        assert_eq!(dense.inputs(), Some(5));
        assert!(matches!(
            dense.feed(&Tensor::vector(vec![1., 2., 3.]), false),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn should_refuse_to_feed_before_compiling() {
        let result = Dense::new(2).feed(&Tensor::vector(vec![1.]), false);
        assert!(matches!(result, Err(Error::NotCompiled)));
    }

    #[test]
    fn should_match_numeric_gradients() {
        let input_size = TensorSize::new(2, 2, 2);
        let mut dense = Dense::new(3)
            .with_activation(Activation::Sigmoid)
            .with_initializer(Initializer::XavierNormal);
        dense.compile(input_size, &mut rng()).unwrap();
        check_gradients(&mut dense, &random_tensor(input_size, &mut rng()));
    }
}
