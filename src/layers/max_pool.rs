use ndarray::{s, Array3, Axis};
use rand::RngCore;
use tracing::error;

use crate::error::{shape_mismatch, Error, Result};
use crate::tensor::{Tensor, TensorSize};
use crate::traits::Lobe;

const NAME: &str = "max_pool";

/// Max pooling over fixed windows. The winning position of each window is
/// recorded on `feed` and receives the whole delta on the way back. Ties go
/// to the first maximum in row-major order.
pub struct MaxPool {
    window: (usize, usize),
    stride: (usize, usize),
    sizes: Option<(TensorSize, TensorSize)>,
    positions: Option<Array3<(usize, usize)>>,
}

impl Default for MaxPool {
    fn default() -> Self {
        Self::new((2, 2))
    }
}

impl MaxPool {
    /// Non-overlapping pooling, the stride equals the window.
    pub fn new(window: (usize, usize)) -> Self {
        Self::with_stride(window, window)
    }

    pub fn with_stride(window: (usize, usize), stride: (usize, usize)) -> Self {
        Self {
            window,
            stride,
            sizes: None,
            positions: None,
        }
    }
}

impl Lobe for MaxPool {
    fn name(&self) -> &'static str {
        NAME
    }

    fn compile(&mut self, input: TensorSize, _rng: &mut dyn RngCore) -> Result<TensorSize> {
        let (window, stride) = (self.window, self.stride);
        if [window.0, window.1, stride.0, stride.1].contains(&0)
            || input.rows < window.0
            || input.columns < window.1
        {
            error!(lobe = NAME, %input, "pooling window does not fit");
            return Err(Error::InvalidConfig(format!(
                "{}x{} pooling window does not fit a {input} input",
                window.0, window.1
            )));
        }
        let output = TensorSize::new(
            (input.rows - window.0) / stride.0 + 1,
            (input.columns - window.1) / stride.1 + 1,
            input.depth,
        );
        if self.sizes.map(|(known, _)| known) != Some(input) {
            self.positions = None;
        }
        self.sizes = Some((input, output));
        Ok(output)
    }

    fn output_size(&self) -> Option<TensorSize> {
        self.sizes.map(|(_, output)| output)
    }

    fn feed(&mut self, input: &Tensor, _training: bool) -> Result<Tensor> {
        let (expected, output) = self.sizes.ok_or(Error::NotCompiled)?;
        if input.size() != expected {
            return Err(shape_mismatch(NAME, expected, input.size()));
        }

        let (window, stride) = (self.window, self.stride);
        let value = input.value();
        let positions = Array3::from_shape_fn(output.shape(), |(d, r, c)| {
            let (top, left) = (r * stride.0, c * stride.1);
            let patch = value.slice(s![d, top..top + window.0, left..left + window.1]);
            let mut best = (0, 0);
            for ((pr, pc), v) in patch.indexed_iter() {
                if *v > patch[best] {
                    best = (pr, pc);
                }
            }
            (top + best.0, left + best.1)
        });
        let pooled = Array3::from_shape_fn(output.shape(), |(d, r, c)| {
            let (row, column) = positions[[d, r, c]];
            value[[d, row, column]]
        });
        self.positions = Some(positions);
        Ok(Tensor::new(pooled))
    }

    fn calculate_gradients(&mut self, deltas: &Tensor) -> Result<Tensor> {
        let (input, output) = self.sizes.ok_or(Error::NotCompiled)?;
        if deltas.size() != output {
            return Err(shape_mismatch(NAME, output, deltas.size()));
        }
        let positions = self.positions.as_ref().ok_or(Error::NoForwardPass(NAME))?;

        let mut scattered = Tensor::zeros(input);
        let mut target = scattered.value_mut();
        for (depth, (plane, deltas)) in positions
            .axis_iter(Axis(0))
            .zip(deltas.value().axis_iter(Axis(0)))
            .enumerate()
        {
            for (&(row, column), delta) in plane.iter().zip(deltas.iter()) {
                target[[depth, row, column]] += delta;
            }
        }
        Ok(scattered)
    }

    fn clear(&mut self) {
        self.positions = None;
    }
}
