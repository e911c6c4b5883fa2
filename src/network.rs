use std::ops::RangeInclusive;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, error, info};

use crate::config::TrainingConfig;
use crate::error::{shape_mismatch, Error, Result};
use crate::loss::LossFunction;
use crate::tensor::{Tensor, TensorSize};
use crate::traits::{Lobe, Optimizer};

/// One input with the output the network should produce for it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub data: Tensor,
    pub label: Tensor,
}

impl TrainingSample {
    pub fn new(data: Tensor, label: Tensor) -> Self {
        Self { data, label }
    }
}

/// An ordered stack of lobes trained against one loss function.
///
/// A `feed` with a new input size compiles the chain again. Convolution
/// kernels survive a crop change, and dense weights are rebuilt only when
/// their input count changes.
pub struct Network {
    lobes: Vec<Box<dyn Lobe>>,
    loss_function: LossFunction,
    optimizer: Box<dyn Optimizer>,
    input_size: Option<TensorSize>,
    output_size: Option<TensorSize>,
    compiled: bool,
    rng: ChaCha20Rng,
    losses: Vec<f32>,
}

impl Network {
    pub fn new(loss_function: LossFunction, optimizer: Box<dyn Optimizer>) -> Self {
        Self {
            lobes: Vec::new(),
            loss_function,
            optimizer,
            input_size: None,
            output_size: None,
            compiled: false,
            rng: ChaCha20Rng::seed_from_u64(0),
            losses: Vec::new(),
        }
    }

    pub fn from_config(config: &TrainingConfig, loss_function: LossFunction) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(loss_function, config.optimizer.build()).with_seed(config.seed))
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha20Rng::seed_from_u64(seed);
        self
    }

    pub fn with_input_size(mut self, input_size: TensorSize) -> Self {
        self.input_size = Some(input_size);
        self
    }

    pub fn add<L: Lobe + 'static>(&mut self, lobe: L) -> &mut Self {
        self.lobes.push(Box::new(lobe));
        self.compiled = false;
        self
    }

    pub fn lobes(&self) -> &[Box<dyn Lobe>] {
        &self.lobes
    }

    pub fn lobes_mut(&mut self) -> &mut [Box<dyn Lobe>] {
        &mut self.lobes
    }

    pub fn input_size(&self) -> Option<TensorSize> {
        self.input_size
    }

    pub fn output_size(&self) -> Option<TensorSize> {
        self.output_size
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn loss_function(&self) -> LossFunction {
        self.loss_function
    }

    /// Average loss of every batch trained since the last `clear`.
    pub fn losses(&self) -> &[f32] {
        &self.losses
    }

    pub fn compile(&mut self) -> Result<TensorSize> {
        let input = self.input_size.ok_or_else(|| {
            error!("network compiled without an input size");
            Error::MissingComponent("input size")
        })?;
        self.compile_for(input)
    }

    fn compile_for(&mut self, input: TensorSize) -> Result<TensorSize> {
        self.compiled = false;
        if self.lobes.is_empty() {
            error!("network compiled without lobes");
            return Err(Error::MissingComponent("lobes"));
        }

        let mut size = input;
        for (index, lobe) in self.lobes.iter_mut().enumerate() {
            size = lobe.compile(size, &mut self.rng).map_err(|err| {
                error!(index, lobe = lobe.name(), %err, "compile failed");
                err
            })?;
        }
        debug!(%input, output = %size, lobes = self.lobes.len(), "network compiled");

        self.input_size = Some(input);
        self.output_size = Some(size);
        self.compiled = true;
        Ok(size)
    }

    pub fn feed(&mut self, input: &Tensor) -> Result<Tensor> {
        self.forward(input, true)
    }

    /// Forward pass in inference mode.
    pub fn predict(&mut self, input: &Tensor) -> Result<Tensor> {
        self.forward(input, false)
    }

    fn forward(&mut self, input: &Tensor, training: bool) -> Result<Tensor> {
        if !self.compiled {
            return Err(Error::NotCompiled);
        }
        if self.input_size != Some(input.size()) {
            info!(
                from = ?self.input_size.map(|size| size.to_string()),
                to = %input.size(),
                "input size changed, recompiling"
            );
            self.compile_for(input.size())?;
        }

        let mut output = input.clone();
        for lobe in self.lobes.iter_mut() {
            output = lobe.feed(&output, training)?;
        }
        Ok(output)
    }

    pub fn loss(&self, predicted: &Tensor, correct: &Tensor) -> Result<f32> {
        self.loss_function.calculate(predicted, correct)
    }

    /// Derivative of the loss with respect to each output value.
    pub fn output_deltas(&self, predicted: &Tensor, correct: &Tensor) -> Result<Tensor> {
        self.loss_function.derivative(predicted, correct)
    }

    /// Walks the lobes in reverse, accumulating their gradients, and
    /// returns the deltas with respect to the network input.
    pub fn backpropagate(&mut self, deltas: &Tensor) -> Result<Tensor> {
        if !self.compiled {
            return Err(Error::NotCompiled);
        }
        let mut deltas = deltas.clone();
        for lobe in self.lobes.iter_mut().rev() {
            deltas = lobe.calculate_gradients(&deltas)?;
        }
        Ok(deltas)
    }

    pub fn adjust_weights(&mut self, batch_size: usize) {
        for (index, lobe) in self.lobes.iter_mut().enumerate() {
            lobe.adjust_weights(index, batch_size, self.optimizer.as_mut());
        }
    }

    pub fn step_optimizer(&mut self) {
        self.optimizer.step();
    }

    pub fn zero_gradients(&mut self) {
        for lobe in self.lobes.iter_mut() {
            lobe.zero_gradients();
        }
    }

    pub fn clip_weights(&mut self, range: RangeInclusive<f32>) -> Result<()> {
        if !(range.start() <= range.end()) {
            return Err(Error::InvalidConfig(format!(
                "cannot clip weights to an empty range {range:?}"
            )));
        }
        for lobe in self.lobes.iter_mut() {
            lobe.clip_weights(range.clone());
        }
        Ok(())
    }

    /// Forgets the loss history and every lobe's cached state.
    pub fn clear(&mut self) {
        self.losses.clear();
        for lobe in self.lobes.iter_mut() {
            lobe.clear();
        }
    }

    pub fn train_on(&mut self, batch: &[TrainingSample]) -> Result<f32> {
        let batch: Vec<&TrainingSample> = batch.iter().collect();
        self.train_batch(&batch)
    }

    fn train_batch(&mut self, batch: &[&TrainingSample]) -> Result<f32> {
        let first = batch.first().ok_or(Error::EmptyInput)?;
        let size = first.data.size();
        if let Some(sample) = batch.iter().find(|sample| sample.data.size() != size) {
            return Err(shape_mismatch("batch", size, sample.data.size()));
        }

        self.zero_gradients();
        let mut batch_loss = 0.;
        for sample in batch {
            let output = self.feed(&sample.data)?;
            batch_loss += self.loss(&output, &sample.label)? / batch.len() as f32;
            let deltas = self.output_deltas(&output, &sample.label)?;
            self.backpropagate(&deltas)?;
        }
        self.adjust_weights(batch.len());
        self.step_optimizer();

        self.losses.push(batch_loss);
        Ok(batch_loss)
    }

    /// Runs `config.epochs` passes over `data` and returns the loss of
    /// every batch.
    pub fn train(&mut self, data: &[TrainingSample], config: &TrainingConfig) -> Result<Vec<f32>> {
        self.train_with(data, config, |_, _| {})
    }

    /// Like [`Network::train`], calling `on_epoch` with the epoch index and
    /// its average loss after each pass.
    pub fn train_with<F>(
        &mut self,
        data: &[TrainingSample],
        config: &TrainingConfig,
        mut on_epoch: F,
    ) -> Result<Vec<f32>>
    where
        F: FnMut(usize, f32),
    {
        config.validate()?;
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }
        if !self.compiled {
            error!("train called before compile");
            return Err(Error::NotCompiled);
        }

        info!(samples = data.len(), epochs = config.epochs, "training started");
        let mut order: Vec<&TrainingSample> = data.iter().collect();
        let mut losses = Vec::new();
        for epoch in 0..config.epochs {
            if config.shuffle {
                order.shuffle(&mut self.rng);
            }
            let mut epoch_loss = 0.;
            let mut batches = 0;
            for batch in order.chunks(config.batch_size) {
                let loss = self.train_batch(batch)?;
                losses.push(loss);
                epoch_loss += loss;
                batches += 1;
            }
            let average = epoch_loss / batches as f32;
            info!(epoch, loss = average, "epoch complete");
            on_epoch(epoch, average);
        }
        info!("training complete");
        Ok(losses)
    }
}
