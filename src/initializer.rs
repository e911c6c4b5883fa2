use ndarray::{Array, Dimension, ShapeBuilder};
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Initializer {
    #[default]
    HeUniform,
    HeNormal,
    XavierUniform,
    XavierNormal,
    Constant(f32),
}

impl Initializer {
    pub fn sample(&self, fan_in: usize, fan_out: usize, rng: &mut dyn RngCore) -> f32 {
        let fan_in = fan_in.max(1) as f32;
        let fan_sum = fan_in + fan_out as f32;
        match *self {
            Initializer::HeUniform => uniform((6. / fan_in).sqrt(), rng),
            Initializer::HeNormal => normal((2. / fan_in).sqrt(), rng),
            Initializer::XavierUniform => uniform((6. / fan_sum).sqrt(), rng),
            Initializer::XavierNormal => normal((2. / fan_sum).sqrt(), rng),
            Initializer::Constant(value) => value,
        }
    }

    pub fn build<Sh, D>(
        &self,
        shape: Sh,
        fan_in: usize,
        fan_out: usize,
        rng: &mut dyn RngCore,
    ) -> Array<f32, D>
    where
        Sh: ShapeBuilder<Dim = D>,
        D: Dimension,
    {
        Array::from_shape_simple_fn(shape, || self.sample(fan_in, fan_out, rng))
    }
}

fn uniform(limit: f32, rng: &mut dyn RngCore) -> f32 {
    rng.gen_range(-limit..=limit)
}

fn normal(std: f32, rng: &mut dyn RngCore) -> f32 {
    let z: f32 = rng.sample(StandardNormal);
    z * std
}
