use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    None,
    ReLU,
    LeakyReLU(f32),
    Sigmoid,
    Tanh,
    Swish,
}

impl Activation {
    pub fn activate(&self, x: f32) -> f32 {
        match *self {
            Activation::None => x,
            Activation::ReLU => x.max(0.),
            Activation::LeakyReLU(limit) => {
                if x > 0. {
                    x
                } else {
                    limit * x
                }
            }
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => x.tanh(),
            Activation::Swish => x * sigmoid(x),
        }
    }

    /// Derivative at the pre-activation value `x`.
    pub fn derivative(&self, x: f32) -> f32 {
        match *self {
            Activation::None => 1.,
            Activation::ReLU => {
                if x > 0. {
                    1.
                } else {
                    0.
                }
            }
            Activation::LeakyReLU(limit) => {
                if x > 0. {
                    1.
                } else {
                    limit
                }
            }
            Activation::Sigmoid => {
                let s = sigmoid(x);
                s * (1. - s)
            }
            Activation::Tanh => 1. - x.tanh().powi(2),
            Activation::Swish => {
                let s = sigmoid(x);
                s + x * s * (1. - s)
            }
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}
