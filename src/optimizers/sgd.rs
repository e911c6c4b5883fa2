use std::collections::HashMap;

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};

use crate::traits::{Optimizer, ParamKey};

pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
    velocities: HashMap<ParamKey, ArrayD<f32>>,
}

impl Sgd {
    pub fn new(learning_rate: f32) -> Self {
        Self::with_momentum(learning_rate, 0.)
    }

    pub fn with_momentum(learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocities: HashMap::new(),
        }
    }
}

impl Optimizer for Sgd {
    fn update(&mut self, key: ParamKey, mut param: ArrayViewMutD<f32>, gradient: ArrayViewD<f32>) {
        if self.momentum == 0. {
            param.scaled_add(-self.learning_rate, &gradient);
            return;
        }
        let velocity = self
            .velocities
            .entry(key)
            .or_insert_with(|| ArrayD::zeros(gradient.raw_dim()));
        if velocity.shape() != gradient.shape() {
            *velocity = ArrayD::zeros(gradient.raw_dim());
        }
        *velocity *= self.momentum;
        velocity.scaled_add(self.learning_rate, &gradient);
        param -= &*velocity;
    }
}
