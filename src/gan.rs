use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::GanConfig;
use crate::error::{Error, Result};
use crate::network::{Network, TrainingSample};
use crate::tensor::Tensor;

const REAL_LABEL: f32 = 0.;
const FAKE_LABEL: f32 = 1.;
const DEFAULT_NOISE_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GanRole {
    Generator,
    Discriminator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GanLoss {
    /// Every output delta is the critic loss computed from the running
    /// average scores.
    #[default]
    Wasserstein,
    /// Per-sample `output - label` deltas against real `0` and fake `1`.
    Minimax,
}

impl GanLoss {
    /// `fake` for the generator, `real - fake` for the discriminator.
    pub fn wasserstein(role: GanRole, real: f32, fake: f32) -> f32 {
        match role {
            GanRole::Generator => fake,
            GanRole::Discriminator => real - fake,
        }
    }

    fn evaluate(
        &self,
        role: GanRole,
        output: &Tensor,
        label: f32,
        scores: &CriticScores,
    ) -> (f32, Tensor) {
        match self {
            GanLoss::Wasserstein => {
                let loss = Self::wasserstein(role, scores.average_real(), scores.average_fake());
                (loss, Tensor::filled(output.size(), loss))
            }
            GanLoss::Minimax => {
                let deltas = output.map(|o| o - label);
                let loss = deltas.value().iter().map(|d| d * d).sum::<f32>() / 2.;
                (loss, deltas)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GanOutcome {
    Completed,
    /// The validator accepted a generated sample before the given step ran.
    Validated { step: usize },
}

#[derive(Debug, Clone, Copy)]
enum Critic {
    Real,
    Fake,
}

/// Critic scores of the current session, reset after each generator step.
#[derive(Debug, Default)]
struct CriticScores {
    real: Vec<f32>,
    fake: Vec<f32>,
}

impl CriticScores {
    fn record(&mut self, critic: Critic, output: &Tensor) {
        let Some(&score) = output.value().iter().next() else {
            return;
        };
        match critic {
            Critic::Real => self.real.push(score),
            Critic::Fake => self.fake.push(score),
        }
    }

    fn average_real(&self) -> f32 {
        mean(&self.real)
    }

    fn average_fake(&self) -> f32 {
        mean(&self.fake)
    }

    fn reset(&mut self) {
        self.real.clear();
        self.fake.clear();
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

pub type NoiseSource = Box<dyn FnMut(&mut ChaCha20Rng) -> Tensor + Send>;
pub type Validator = Box<dyn FnMut(&Tensor) -> bool + Send>;

pub struct Gan {
    generator: Option<Network>,
    discriminator: Option<Network>,
    config: GanConfig,
    noise: NoiseSource,
    validator: Validator,
    rng: ChaCha20Rng,
    scores: CriticScores,
    step: usize,
}

impl Gan {
    pub fn new(config: GanConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            generator: None,
            discriminator: None,
            rng: ChaCha20Rng::seed_from_u64(config.seed),
            config,
            noise: Box::new(|rng: &mut ChaCha20Rng| {
                Tensor::vector((0..DEFAULT_NOISE_LEN).map(|_| rng.gen_range(0f32..=1.)).collect())
            }),
            validator: Box::new(|_: &Tensor| false),
            scores: CriticScores::default(),
            step: 0,
        })
    }

    /// Replaces the generator input source, ten uniform values in `[0, 1]`
    /// by default.
    pub fn with_noise<F>(mut self, noise: F) -> Self
    where
        F: FnMut(&mut ChaCha20Rng) -> Tensor + Send + 'static,
    {
        self.noise = Box::new(noise);
        self
    }

    /// Returning `true` for a generated sample ends the training run.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: FnMut(&Tensor) -> bool + Send + 'static,
    {
        self.validator = Box::new(validator);
        self
    }

    pub fn add_generator(&mut self, mut generator: Network) -> Result<()> {
        generator.compile()?;
        self.generator = Some(generator);
        Ok(())
    }

    pub fn add_discriminator(&mut self, mut discriminator: Network) -> Result<()> {
        discriminator.compile()?;
        self.discriminator = Some(discriminator);
        Ok(())
    }

    pub fn generator(&self) -> Option<&Network> {
        self.generator.as_ref()
    }

    pub fn discriminator(&self) -> Option<&Network> {
        self.discriminator.as_ref()
    }

    pub fn config(&self) -> &GanConfig {
        &self.config
    }

    pub fn average_real_score(&self) -> f32 {
        self.scores.average_real()
    }

    pub fn average_fake_score(&self) -> f32 {
        self.scores.average_fake()
    }

    /// Steps taken so far. Its parity picks the next phase.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Runs the generator on fresh noise in inference mode.
    pub fn generate(&mut self) -> Result<Tensor> {
        let generator = self
            .generator
            .as_mut()
            .ok_or(Error::MissingComponent("generator"))?;
        let noise = (self.noise)(&mut self.rng);
        generator.predict(&noise)
    }

    pub fn discriminate(&mut self, input: &Tensor) -> Result<Tensor> {
        self.discriminator
            .as_mut()
            .ok_or(Error::MissingComponent("discriminator"))?
            .predict(input)
    }

    pub fn train(&mut self, data: &[TrainingSample]) -> Result<GanOutcome> {
        self.run(data, self.config.epochs)
    }

    /// Runs a single step, discriminator or generator by parity.
    pub fn train_step(&mut self, data: &[TrainingSample]) -> Result<GanOutcome> {
        self.run(data, 1)
    }

    fn run(&mut self, data: &[TrainingSample], steps: usize) -> Result<GanOutcome> {
        if self.generator.is_none() {
            return Err(Error::MissingComponent("generator"));
        }
        if self.discriminator.is_none() {
            return Err(Error::MissingComponent("discriminator"));
        }
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }

        let mut order: Vec<&TrainingSample> = data.iter().collect();
        order.shuffle(&mut self.rng);
        let batches: Vec<&[&TrainingSample]> = order.chunks(self.config.batch_size).collect();

        info!(steps, from = self.step, "gan training started");
        for _ in 0..steps {
            let step = self.step;
            if step % self.config.validation_interval == 0 {
                let sample = self.generate()?;
                if (self.validator)(&sample) {
                    info!(step, "generator output accepted, stopping");
                    return Ok(GanOutcome::Validated { step });
                }
            }

            if step % 2 == 0 {
                let real = batches.choose(&mut self.rng).copied().unwrap_or(&[]);
                self.train_discriminator(real, Critic::Real)?;
                let fake = self.fake_batch()?;
                let fake: Vec<&TrainingSample> = fake.iter().collect();
                self.train_discriminator(&fake, Critic::Fake)?;
            } else {
                self.train_generator()?;
                self.scores.reset();
            }
            self.step += 1;
        }
        info!(step = self.step, "gan training complete");
        Ok(GanOutcome::Completed)
    }

    /// Generated samples labelled fake, with label noise while the noise
    /// factor is below one.
    fn fake_batch(&mut self) -> Result<Vec<TrainingSample>> {
        let factor = self.config.discriminator_noise_factor;
        let mut batch = Vec::with_capacity(self.config.batch_size);
        for _ in 0..self.config.batch_size {
            let generator = self
                .generator
                .as_mut()
                .ok_or(Error::MissingComponent("generator"))?;
            let noise = (self.noise)(&mut self.rng);
            let data = generator.feed(&noise)?;
            let label = if factor < 1. {
                self.rng.gen_range(1. - factor.max(0.)..=FAKE_LABEL)
            } else {
                FAKE_LABEL
            };
            batch.push(TrainingSample::new(data, Tensor::vector(vec![label])));
        }
        Ok(batch)
    }

    fn train_discriminator(&mut self, batch: &[&TrainingSample], critic: Critic) -> Result<()> {
        let discriminator = self
            .discriminator
            .as_mut()
            .ok_or(Error::MissingComponent("discriminator"))?;
        let range = self.config.weight_constraints.range();

        for sample in batch {
            discriminator.zero_gradients();
            let output = discriminator.feed(&sample.data)?;
            self.scores.record(critic, &output);

            let label = match critic {
                Critic::Real => REAL_LABEL,
                Critic::Fake => sample.label.value().iter().next().copied().unwrap_or(FAKE_LABEL),
            };
            let (loss, deltas) =
                self.config
                    .loss
                    .evaluate(GanRole::Discriminator, &output, label, &self.scores);
            debug!(loss, ?critic, "discriminator loss");

            discriminator.backpropagate(&deltas)?;
            discriminator.adjust_weights(1);
            discriminator.clip_weights(range.clone())?;
        }
        discriminator.step_optimizer();
        Ok(())
    }

    fn train_generator(&mut self) -> Result<()> {
        let (Some(generator), Some(discriminator)) =
            (self.generator.as_mut(), self.discriminator.as_mut())
        else {
            return Err(Error::MissingComponent("generator and discriminator"));
        };

        for _ in 0..self.config.batch_size {
            generator.zero_gradients();
            let noise = (self.noise)(&mut self.rng);
            let sample = generator.feed(&noise)?;
            let output = discriminator.feed(&sample)?;
            self.scores.record(Critic::Fake, &output);

            let (loss, deltas) =
                self.config
                    .loss
                    .evaluate(GanRole::Generator, &output, REAL_LABEL, &self.scores);
            debug!(loss, "generator loss");

            let sample_deltas = discriminator.backpropagate(&deltas)?;
            discriminator.zero_gradients();
            generator.backpropagate(&sample_deltas)?;
            generator.adjust_weights(1);
        }
        generator.step_optimizer();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{Gan, GanLoss, GanOutcome, GanRole};
    use crate::activation::Activation;
    use crate::config::{GanConfig, WeightRange};
    use crate::error::Error;
    use crate::initializer::Initializer;
    use crate::layers::Dense;
    use crate::loss::LossFunction;
    use crate::network::{Network, TrainingSample};
    use crate::optimizers::Sgd;
    use crate::tensor::{Tensor, TensorSize};

    fn generator() -> Network {
        let mut network = Network::new(LossFunction::MeanSquareError, Box::new(Sgd::new(0.05)))
            .with_input_size(TensorSize::vector(10))
            .with_seed(1);
        network.add(Dense::new(4).with_activation(Activation::Tanh));
        network
    }

    fn discriminator() -> Network {
        let mut network = Network::new(LossFunction::MeanSquareError, Box::new(Sgd::new(0.05)))
            .with_input_size(TensorSize::vector(4))
            .with_seed(2);
        network
            .add(
                Dense::new(3)
                    .with_activation(Activation::LeakyReLU(0.1))
                    .with_initializer(Initializer::Constant(0.5)),
            )
            .add(Dense::new(1).with_initializer(Initializer::Constant(0.5)));
        network
    }

    fn real_data() -> Vec<TrainingSample> {
        (0..6)
            .map(|i| {
                TrainingSample::new(
                    Tensor::vector(vec![0.1 * i as f32, 0.5, -0.5, 1.]),
                    Tensor::vector(vec![0.]),
                )
            })
            .collect()
    }

    fn gan(config: GanConfig) -> Gan {
        let mut gan = Gan::new(config).unwrap();
        gan.add_generator(generator()).unwrap();
        gan.add_discriminator(discriminator()).unwrap();
        gan
    }

    fn config() -> GanConfig {
        GanConfig {
            epochs: 4,
            batch_size: 3,
            ..GanConfig::default()
        }
    }

    fn weights(network: &mut Network) -> Vec<f32> {
        network
            .lobes_mut()
            .iter_mut()
            .flat_map(|lobe| {
                lobe.weights()
                    .into_iter()
                    .flat_map(|weights| weights.iter().copied().collect::<Vec<_>>())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn should_score_with_wasserstein_loss() {
        assert_eq!(GanLoss::wasserstein(GanRole::Generator, 0.75, 0.25), 0.25);
        assert_eq!(GanLoss::wasserstein(GanRole::Discriminator, 0.75, 0.25), 0.5);
    }

    #[test]
    fn should_need_both_networks() {
        let mut gan = Gan::new(config()).unwrap();
        assert!(matches!(
            gan.train(&real_data()),
            Err(Error::MissingComponent("generator"))
        ));
        gan.add_generator(generator()).unwrap();
        assert!(matches!(
            gan.train(&real_data()),
            Err(Error::MissingComponent("discriminator"))
        ));
    }

    #[test]
    fn should_need_real_data() {
        assert!(matches!(gan(config()).train(&[]), Err(Error::EmptyInput)));
    }

    #[test]
    fn should_clip_discriminator_weights_after_every_update() {
        let mut gan = gan(config());
        gan.train_step(&real_data()).unwrap();

        let range = WeightRange::default().range();
        let weights = weights(gan.discriminator.as_mut().unwrap());
        assert!(!weights.is_empty());
        assert!(weights.iter().all(|w| range.contains(w)));
    }

    #[test]
    fn should_clip_frozen_discriminator_lobes() {
        let mut discriminator =
            Network::new(LossFunction::MeanSquareError, Box::new(Sgd::new(0.05)))
                .with_input_size(TensorSize::vector(4))
                .with_seed(2);
        discriminator
            .add(Dense::new(3).with_trainable(false))
            .add(Dense::new(1));
        let mut gan = Gan::new(config()).unwrap();
        gan.add_generator(generator()).unwrap();
        gan.add_discriminator(discriminator).unwrap();
        gan.train_step(&real_data()).unwrap();

        let range = WeightRange::default().range();
        let frozen = gan.discriminator.as_mut().unwrap().lobes_mut()[0].weights();
        assert!(!frozen.is_empty());
        assert!(frozen.iter().all(|weights| weights.iter().all(|w| range.contains(w))));
    }

    #[test]
    fn should_label_real_samples_as_real_under_minimax() {
        let minimax = GanConfig {
            loss: GanLoss::Minimax,
            weight_constraints: WeightRange { min: -10., max: 10. },
            ..config()
        };
        let relabelled: Vec<TrainingSample> = real_data()
            .into_iter()
            .map(|sample| TrainingSample::new(sample.data, Tensor::vector(vec![5.])))
            .collect();

        let mut expected = gan(minimax.clone());
        expected.train_step(&real_data()).unwrap();
        let mut actual = gan(minimax);
        actual.train_step(&relabelled).unwrap();

        assert_eq!(
            weights(actual.discriminator.as_mut().unwrap()),
            weights(expected.discriminator.as_mut().unwrap())
        );
    }

    #[test]
    fn should_leave_discriminator_alone_while_training_generator() {
        let mut gan = gan(GanConfig {
            weight_constraints: WeightRange { min: -1., max: 1. },
            ..config()
        });
        gan.train_step(&real_data()).unwrap();
        let discriminator_before = weights(gan.discriminator.as_mut().unwrap());
        let generator_before = weights(gan.generator.as_mut().unwrap());

        gan.train_step(&real_data()).unwrap();
        assert_eq!(gan.step(), 2);
        assert_eq!(weights(gan.discriminator.as_mut().unwrap()), discriminator_before);
        assert_ne!(weights(gan.generator.as_mut().unwrap()), generator_before);
    }

    #[test]
    fn should_reset_critic_scores_after_generator_step() {
        let mut gan = gan(config());
        gan.train_step(&real_data()).unwrap();
        assert!(gan.average_fake_score() != 0. || gan.average_real_score() != 0.);
        gan.train_step(&real_data()).unwrap();
        assert_eq!(gan.average_real_score(), 0.);
        assert_eq!(gan.average_fake_score(), 0.);
    }

    #[test]
    fn should_validate_every_fifth_step() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut gan = gan(GanConfig {
            epochs: 11,
            ..config()
        })
        .with_validator(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        });

        assert_eq!(gan.train(&real_data()).unwrap(), GanOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(gan.step(), 11);
    }

    #[test]
    fn should_stop_when_validator_accepts() {
        let mut gan = gan(config()).with_validator(|sample| sample.len() == 4);
        assert_eq!(
            gan.train(&real_data()).unwrap(),
            GanOutcome::Validated { step: 0 }
        );
        assert_eq!(gan.step(), 0);
    }

    #[test]
    fn should_draw_noisy_fake_labels() {
        let mut gan = gan(GanConfig {
            batch_size: 50,
            discriminator_noise_factor: 0.2,
            ..config()
        });
        let labels: Vec<f32> = gan
            .fake_batch()
            .unwrap()
            .iter()
            .map(|sample| sample.label.to_vec()[0])
            .collect();
        assert!(labels.iter().all(|l| (0.8..=1.).contains(l)));
        assert!(labels.iter().any(|l| *l < 1.));
    }

    #[test]
    fn should_use_fixed_fake_labels_without_noise() {
        let mut gan = gan(GanConfig {
            discriminator_noise_factor: 1.,
            ..config()
        });
        assert!(gan
            .fake_batch()
            .unwrap()
            .iter()
            .all(|sample| sample.label.to_vec() == vec![1.]));
    }

    #[test]
    fn should_train_with_minimax_loss() {
        let mut gan = gan(GanConfig {
            loss: GanLoss::Minimax,
            ..config()
        });
        assert_eq!(gan.train(&real_data()).unwrap(), GanOutcome::Completed);
        let score = gan.discriminate(&real_data()[0].data).unwrap();
        assert_eq!(score.size(), TensorSize::vector(1));
        assert_eq!(gan.generate().unwrap().size(), TensorSize::vector(4));
    }
}
