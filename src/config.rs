use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::gan::GanLoss;
use crate::optimizers::{Adam, Sgd};
use crate::traits::Optimizer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OptimizerConfig {
    Sgd {
        learning_rate: f32,
        #[serde(default)]
        momentum: f32,
    },
    Adam {
        learning_rate: f32,
        #[serde(default = "default_beta1")]
        beta1: f32,
        #[serde(default = "default_beta2")]
        beta2: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_epsilon() -> f32 {
    1e-8
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Sgd {
            learning_rate: 0.01,
            momentum: 0.,
        }
    }
}

impl OptimizerConfig {
    pub fn learning_rate(&self) -> f32 {
        match *self {
            OptimizerConfig::Sgd { learning_rate, .. } | OptimizerConfig::Adam { learning_rate, .. } => {
                learning_rate
            }
        }
    }

    pub fn build(&self) -> Box<dyn Optimizer> {
        match *self {
            OptimizerConfig::Sgd {
                learning_rate,
                momentum,
            } => Box::new(Sgd::with_momentum(learning_rate, momentum)),
            OptimizerConfig::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::with_betas(learning_rate, beta1, beta2, epsilon)),
        }
    }

    fn validate(&self) -> Result<()> {
        let learning_rate = self.learning_rate();
        if !learning_rate.is_finite() || learning_rate <= 0. {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be positive, got {learning_rate}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Seeds weight initialization and shuffling.
    pub seed: u64,
    pub shuffle: bool,
    pub optimizer: OptimizerConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 16,
            seed: 42,
            shuffle: true,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be non-zero".into()));
        }
        self.optimizer.validate()
    }
}

/// Closed range discriminator weights are clipped into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightRange {
    pub min: f32,
    pub max: f32,
}

impl Default for WeightRange {
    fn default() -> Self {
        Self {
            min: -0.01,
            max: 0.01,
        }
    }
}

impl WeightRange {
    pub fn range(&self) -> RangeInclusive<f32> {
        self.min..=self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GanConfig {
    /// Training steps. Even steps train the discriminator, odd steps the
    /// generator.
    pub epochs: usize,
    pub batch_size: usize,
    /// Fake labels are drawn from `[1 - factor, 1]` while the factor is
    /// below one.
    pub discriminator_noise_factor: f32,
    pub weight_constraints: WeightRange,
    /// The validator sees a fresh sample every this many steps.
    pub validation_interval: usize,
    pub loss: GanLoss,
    pub seed: u64,
}

impl Default for GanConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 10,
            discriminator_noise_factor: 0.1,
            weight_constraints: WeightRange::default(),
            validation_interval: 5,
            loss: GanLoss::default(),
            seed: 42,
        }
    }
}

impl GanConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be non-zero".into()));
        }
        if self.validation_interval == 0 {
            return Err(Error::InvalidConfig(
                "validation_interval must be non-zero".into(),
            ));
        }
        let WeightRange { min, max } = self.weight_constraints;
        if !(min <= max) {
            return Err(Error::InvalidConfig(format!(
                "weight constraints {min}..={max} are empty"
            )));
        }
        if !self.discriminator_noise_factor.is_finite() {
            return Err(Error::InvalidConfig(
                "discriminator_noise_factor must be finite".into(),
            ));
        }
        Ok(())
    }
}
