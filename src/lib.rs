pub mod activation;
pub mod config;
pub mod convolution;
pub mod device;
pub mod error;
pub mod gan;
pub mod initializer;
pub mod layers;
pub mod loss;
pub mod network;
pub mod optimizers;
pub mod tensor;
pub mod traits;
mod utils;

pub use activation::Activation;
pub use config::{GanConfig, OptimizerConfig, TrainingConfig, WeightRange};
pub use device::{CpuDevice, Device, Padding};
pub use error::{Error, Result};
pub use gan::{Gan, GanLoss, GanOutcome, GanRole};
pub use initializer::Initializer;
pub use loss::LossFunction;
pub use network::{Network, TrainingSample};
pub use tensor::{Tensor, TensorAxis, TensorSize};
pub use traits::{Lobe, Optimizer, Param, ParamKey};

#[cfg(test)]
mod conv_net_demo {
    use ndarray::{Array4, ArrayD};

    use crate::{
        initializer::Initializer,
        layers::{Conv2d, Dense, Flatten, MaxPool},
        loss::LossFunction,
        network::Network,
        optimizers::Sgd,
        tensor::{Tensor, TensorSize},
    };

    const IMAGE: TensorSize = TensorSize {
        rows: 28,
        columns: 28,
        depth: 1,
    };
    const FILTERS: usize = 2;
    const CLASSES: usize = 10;
    const POOLED: usize = 14 * 14;

    fn make_conv_net(weight: f32) -> Network {
        let mut net = Network::new(LossFunction::MeanSquareError, Box::new(Sgd::new(0.01)))
            .with_input_size(IMAGE);
        net.add(Conv2d::new(FILTERS, (3, 3)).with_initializer(Initializer::Constant(weight)))
            .add(MaxPool::default())
            .add(Flatten::new())
            .add(Dense::new(CLASSES).with_initializer(Initializer::Constant(weight)));
        net.compile().unwrap();
        net
    }

    fn single_pixel() -> Tensor {
        let mut image = Tensor::zeros(IMAGE);
        image.value_mut()[[0, 10, 10]] = 1.;
        image
    }

    /// Filter and dense weight gradients after one backward pass.
    fn gradients(net: &mut Network, input: &Tensor) -> (ArrayD<f32>, ArrayD<f32>, Tensor) {
        net.zero_gradients();
        let output = net.feed(input).unwrap();
        let deltas = net
            .output_deltas(&output, &Tensor::zeros(TensorSize::vector(CLASSES)))
            .unwrap();
        let input_deltas = net.backpropagate(&deltas).unwrap();

        let lobes = net.lobes_mut();
        let filters = lobes[0].params()[0].gradient.to_owned();
        let dense = lobes[3].params()[0].gradient.to_owned();
        (filters, dense, input_deltas)
    }

    #[test]
    fn should_stay_silent_for_zero_input_and_weights() {
        let mut net = make_conv_net(0.);
        assert_eq!(net.output_size(), Some(TensorSize::vector(CLASSES)));

        let zeros = Tensor::zeros(IMAGE);
        let output = net.feed(&zeros).unwrap();
        assert_eq!(output, Tensor::zeros(TensorSize::vector(CLASSES)));

        let (filters, dense, input_deltas) = gradients(&mut net, &zeros);
        assert!(filters.iter().all(|g| *g == 0.));
        assert!(dense.iter().all(|g| *g == 0.));
        assert_eq!(input_deltas, Tensor::zeros(IMAGE));
    }

    #[test]
    fn should_confine_gradients_to_the_receptive_field() {
        let mut net = make_conv_net(1.);
        let (filters, dense, _) = gradients(&mut net, &single_pixel());

        let mut expected = Array4::<f32>::zeros((FILTERS, 1, 3, 3));
        for f in 0..FILTERS {
            for (r, c) in [(1, 1), (1, 2), (2, 1), (2, 2)] {
                expected[[f, 0, r, c]] = 16.;
            }
        }
        for (a, b) in filters.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-4, "{filters:?}");
        }

        let receptive: Vec<usize> = (0..FILTERS)
            .flat_map(|f| [(4, 4), (4, 5), (5, 4), (5, 5)].map(|(r, c)| f * POOLED + r * 14 + c))
            .collect();
        for row in dense.outer_iter() {
            for (column, g) in row.iter().enumerate() {
                if receptive.contains(&column) {
                    assert!((g - 1.6).abs() < 1e-5);
                } else {
                    assert_eq!(*g, 0.);
                }
            }
        }
    }

    #[test]
    fn should_repeat_gradients_exactly() {
        let mut first = make_conv_net(1.);
        let mut second = make_conv_net(1.);
        let a = gradients(&mut first, &single_pixel());
        let b = gradients(&mut second, &single_pixel());
        assert_eq!(a, b);
    }
}
