use ndarray::{arr0, Array0, Array1, ArrayView1};

use crate::traits::Param;

const EPSILON: f32 = 5e-5;
const MOMENTUM: f32 = 0.9;

/// Normalizes one activation vector with a learned scale (`gamma`) and
/// shift (`beta`).
///
/// Training passes use the statistics of the vector itself and fold them
/// into exponential moving averages, which inference passes use instead.
pub struct BatchNormalizer {
    gamma: Array0<f32>,
    beta: Array0<f32>,
    gamma_gradient: Array0<f32>,
    beta_gradient: Array0<f32>,
    moving_mean: f32,
    moving_variance: f32,
    momentum: f32,
    cache: Option<Cache>,
}

struct Cache {
    normalized: Array1<f32>,
    std: f32,
}

impl Default for BatchNormalizer {
    fn default() -> Self {
        Self::new(1., 0.)
    }
}

impl BatchNormalizer {
    pub fn new(gamma: f32, beta: f32) -> Self {
        Self {
            gamma: arr0(gamma),
            beta: arr0(beta),
            gamma_gradient: arr0(0.),
            beta_gradient: arr0(0.),
            moving_mean: 0.,
            moving_variance: 1.,
            momentum: MOMENTUM,
            cache: None,
        }
    }

    pub fn gamma(&self) -> f32 {
        self.gamma[()]
    }

    pub fn beta(&self) -> f32 {
        self.beta[()]
    }

    pub fn moving_mean(&self) -> f32 {
        self.moving_mean
    }

    pub fn moving_variance(&self) -> f32 {
        self.moving_variance
    }

    pub fn forward(&mut self, activations: ArrayView1<f32>, training: bool) -> Array1<f32> {
        let (mean, variance) = if training {
            let n = activations.len().max(1) as f32;
            let mean = activations.sum() / n;
            let variance = activations.mapv(|x| (x - mean).powi(2)).sum() / n;
            self.moving_mean = self.momentum * self.moving_mean + (1. - self.momentum) * mean;
            self.moving_variance =
                self.momentum * self.moving_variance + (1. - self.momentum) * variance;
            (mean, variance)
        } else {
            (self.moving_mean, self.moving_variance)
        };

        let std = (variance + EPSILON).sqrt();
        let normalized = activations.mapv(|x| (x - mean) / std);
        let output = normalized.mapv(|x| self.gamma() * x + self.beta());
        self.cache = Some(Cache { normalized, std });
        output
    }

    /// Accumulates the gamma and beta gradients and returns the gradient
    /// with respect to the activations of the last forward pass.
    ///
    /// Returns `None` when nothing has been fed yet.
    pub fn backward(&mut self, gradient: ArrayView1<f32>) -> Option<Array1<f32>> {
        let Cache { normalized, std } = self.cache.as_ref()?;
        let n = normalized.len() as f32;

        self.gamma_gradient[()] += (&gradient * normalized).sum();
        self.beta_gradient[()] += gradient.sum();

        let normalized_gradient = gradient.mapv(|g| g * self.gamma[()]);
        let sum = normalized_gradient.sum();
        let weighted = (&normalized_gradient * normalized).sum();
        Some((normalized_gradient * n - sum - normalized * weighted) / (n * std))
    }

    pub fn params(&mut self) -> Vec<Param<'_>> {
        vec![
            Param {
                value: self.gamma.view_mut().into_dyn(),
                gradient: self.gamma_gradient.view_mut().into_dyn(),
            },
            Param {
                value: self.beta.view_mut().into_dyn(),
                gradient: self.beta_gradient.view_mut().into_dyn(),
            },
        ]
    }

    pub fn zero_gradients(&mut self) {
        self.gamma_gradient.fill(0.);
        self.beta_gradient.fill(0.);
    }

    /// Forgets the cached pass and the moving statistics.
    pub fn clear(&mut self) {
        self.zero_gradients();
        self.moving_mean = 0.;
        self.moving_variance = 1.;
        self.cache = None;
    }
}
