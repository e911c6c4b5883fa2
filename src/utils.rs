use num_traits::Float;

pub(crate) fn softmax<V: Float>(x: &[V]) -> Vec<V> {
    let max = x.iter().copied().fold(V::neg_infinity(), V::max);
    let exp = x.iter().map(|v| (*v - max).exp()).collect::<Vec<_>>();
    let exp_sum = exp.iter().fold(V::zero(), |a, b| a + *b);
    exp.into_iter().map(|v| v / exp_sum).collect()
}

/// `-sum(t * ln y)` with `y` clamped away from zero.
pub(crate) fn cross_entropy_error<V: Float>(y: &[V], t: &[V], epsilon: V) -> V {
    y.iter()
        .zip(t)
        .map(|(yi, ti)| -(*ti) * yi.max(epsilon).ln())
        .fold(V::zero(), |a, b| a + b)
}

pub(crate) fn squared_error<V: Float>(y: &[V], t: &[V]) -> V {
    y.iter()
        .zip(t)
        .map(|(yi, ti)| (*yi - *ti).powi(2))
        .fold(V::zero(), |a, b| a + b)
}
