use rand::RngCore;

use crate::error::{shape_mismatch, Error, Result};
use crate::tensor::{Tensor, TensorSize};
use crate::traits::Lobe;

const NAME: &str = "flatten";

/// Reshapes `(rows, columns, depth)` into one row, channel by channel, and
/// back again for the deltas.
#[derive(Default)]
pub struct Flatten {
    input: Option<TensorSize>,
}

impl Flatten {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Lobe for Flatten {
    fn name(&self) -> &'static str {
        NAME
    }

    fn compile(&mut self, input: TensorSize, _rng: &mut dyn RngCore) -> Result<TensorSize> {
        self.input = Some(input);
        Ok(TensorSize::vector(input.len()))
    }

    fn output_size(&self) -> Option<TensorSize> {
        self.input.map(|input| TensorSize::vector(input.len()))
    }

    fn feed(&mut self, input: &Tensor, _training: bool) -> Result<Tensor> {
        let expected = self.input.ok_or(Error::NotCompiled)?;
        if input.size() != expected {
            return Err(shape_mismatch(NAME, expected, input.size()));
        }
        Ok(input.flatten())
    }

    fn calculate_gradients(&mut self, deltas: &Tensor) -> Result<Tensor> {
        let input = self.input.ok_or(Error::NotCompiled)?;
        deltas.reshape(input)
    }

    fn clear(&mut self) {}
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::Flatten;
    use crate::layers::testing::{random_tensor, rng};
    use crate::tensor::{Tensor, TensorSize};
    use crate::traits::Lobe;

    #[test]
    fn should_flatten_channel_by_channel() {
        let mut flatten = Flatten::new();
        flatten.compile(TensorSize::new(2, 2, 2), &mut rng()).unwrap();
        let input = Tensor::new(array![[[1., 2.], [3., 4.]], [[5., 6.], [7., 8.]]]);
        let output = flatten.feed(&input, false).unwrap();
        assert_eq!(output, Tensor::vector(vec![1., 2., 3., 4., 5., 6., 7., 8.]));
    }

    #[test]
    fn should_restore_shape_and_values_on_the_way_back() {
        let size = TensorSize::new(3, 5, 4);
        let mut flatten = Flatten::new();
        assert_eq!(
            flatten.compile(size, &mut rng()).unwrap(),
            TensorSize::vector(60)
        );
        let input = random_tensor(size, &mut rng());
        let flat = flatten.feed(&input, true).unwrap();
        assert_eq!(flatten.calculate_gradients(&flat).unwrap(), input);
    }
}
