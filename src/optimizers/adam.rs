use std::collections::HashMap;

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Zip};

use crate::traits::{Optimizer, ParamKey};

struct Moments {
    first: ArrayD<f32>,
    second: ArrayD<f32>,
}

/// Adam with bias correction. The timestep advances once per batch in
/// [`Optimizer::step`].
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    moments: HashMap<ParamKey, Moments>,
    t: i32,
}

impl Adam {
    pub fn new(learning_rate: f32) -> Self {
        Self::with_betas(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn with_betas(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            moments: HashMap::new(),
            t: 1,
        }
    }
}

impl Optimizer for Adam {
    fn update(&mut self, key: ParamKey, param: ArrayViewMutD<f32>, gradient: ArrayViewD<f32>) {
        let fresh = || Moments {
            first: ArrayD::zeros(gradient.raw_dim()),
            second: ArrayD::zeros(gradient.raw_dim()),
        };
        let moments = self.moments.entry(key).or_insert_with(fresh);
        // A rebuilt lobe reuses its key with a new shape.
        if moments.first.shape() != gradient.shape() {
            *moments = fresh();
        }
        let Moments { first, second } = moments;
        let (beta1, beta2) = (self.beta1, self.beta2);
        let first_correction = 1. - beta1.powi(self.t);
        let second_correction = 1. - beta2.powi(self.t);
        let (learning_rate, epsilon) = (self.learning_rate, self.epsilon);

        Zip::from(param)
            .and(first)
            .and(second)
            .and(&gradient)
            .for_each(|p, m, v, &g| {
                *m = beta1 * *m + (1. - beta1) * g;
                *v = beta2 * *v + (1. - beta2) * g * g;
                let m_hat = *m / first_correction;
                let v_hat = *v / second_correction;
                *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
            });
    }

    fn step(&mut self) {
        self.t += 1;
    }
}
