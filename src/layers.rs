mod batch_normalizer;
mod conv2d;
mod dense;
mod filter_bank;
mod flatten;
mod max_pool;
mod normalization;
mod softmax;
mod trans_conv2d;

pub use batch_normalizer::BatchNormalizer;
pub use conv2d::Conv2d;
pub use dense::Dense;
pub use flatten::Flatten;
pub use max_pool::MaxPool;
pub use normalization::Normalization;
pub use softmax::Softmax;
pub use trans_conv2d::TransConv2d;

#[cfg(test)]
pub(crate) mod testing {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use crate::tensor::{Tensor, TensorSize};
    use crate::traits::Lobe;

    const H: f32 = 1e-2;

    pub fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(7)
    }

    pub fn random_tensor(size: TensorSize, rng: &mut ChaCha20Rng) -> Tensor {
        let values = (0..size.len()).map(|_| rng.gen_range(-1f32..1.)).collect();
        Tensor::from_shape_vec(size, values).unwrap()
    }

    /// Checks the analytic parameter and input gradients of
    /// `sum(output * weights)` against central differences.
    pub fn check_gradients<L: Lobe>(lobe: &mut L, input: &Tensor) {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let weights = random_tensor(lobe.output_size().unwrap(), &mut rng);

        lobe.zero_gradients();
        lobe.feed(input, true).unwrap();
        let input_gradient = lobe.calculate_gradients(&weights).unwrap();
        let analytic: Vec<Vec<f32>> = lobe
            .params()
            .iter()
            .map(|param| param.gradient.iter().copied().collect())
            .collect();
        assert!(!analytic.is_empty());

        for (slot, gradients) in analytic.iter().enumerate() {
            for (index, &expected) in gradients.iter().enumerate() {
                let numeric = central_difference(lobe, input, &weights, |lobe, delta| {
                    let mut params = lobe.params();
                    if let Some(value) = params[slot].value.iter_mut().nth(index) {
                        *value += delta;
                    }
                });
                assert_close(expected, numeric, &format!("param {slot}[{index}]"));
            }
        }

        for (index, &expected) in input_gradient.value().iter().enumerate() {
            let plus = nudged(input, index, H);
            let minus = nudged(input, index, -H);
            let numeric =
                (objective(lobe, &plus, &weights) - objective(lobe, &minus, &weights)) / (2. * H);
            assert_close(expected, numeric, &format!("input[{index}]"));
        }
    }

    fn objective<L: Lobe>(lobe: &mut L, input: &Tensor, weights: &Tensor) -> f32 {
        let output = lobe.feed(input, true).unwrap();
        output
            .value()
            .iter()
            .zip(weights.value().iter())
            .map(|(o, w)| o * w)
            .sum()
    }

    fn central_difference<L: Lobe>(
        lobe: &mut L,
        input: &Tensor,
        weights: &Tensor,
        nudge: impl Fn(&mut L, f32),
    ) -> f32 {
        nudge(lobe, H);
        let plus = objective(lobe, input, weights);
        nudge(lobe, -2. * H);
        let minus = objective(lobe, input, weights);
        nudge(lobe, H);
        (plus - minus) / (2. * H)
    }

    fn nudged(input: &Tensor, index: usize, delta: f32) -> Tensor {
        let mut nudged = input.clone();
        if let Some(value) = nudged.value_mut().iter_mut().nth(index) {
            *value += delta;
        }
        nudged
    }

    fn assert_close(analytic: f32, numeric: f32, what: &str) {
        let tolerance = 1e-2 * analytic.abs().max(1.);
        assert!(
            (analytic - numeric).abs() <= tolerance,
            "{what}: analytic {analytic} vs numeric {numeric}"
        );
    }
}
