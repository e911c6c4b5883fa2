use std::fmt;
use std::ops::{Add, Mul, Sub};

use ndarray::{Array1, Array3, ArrayView1, ArrayView3, ArrayViewMut3, Axis};

use crate::error::{shape_mismatch, Error, Result};

/// Shape of one tensor as `(rows, columns, depth)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorSize {
    pub rows: usize,
    pub columns: usize,
    pub depth: usize,
}

impl TensorSize {
    pub fn new(rows: usize, columns: usize, depth: usize) -> Self {
        Self {
            rows,
            columns,
            depth,
        }
    }

    /// A single row of `len` columns, the shape dense lobes work with.
    pub fn vector(len: usize) -> Self {
        Self::new(1, len, 1)
    }

    pub fn len(&self) -> usize {
        self.rows * self.columns * self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn shape(&self) -> (usize, usize, usize) {
        (self.depth, self.rows, self.columns)
    }
}

impl fmt::Display for TensorSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.rows, self.columns, self.depth)
    }
}

/// Axis folded by a tensor reduction. The reduced axis is kept with size
/// one, and `All` folds everything into a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorAxis {
    Rows,
    Columns,
    Depth,
    All,
}

/// Numeric axes: `0` rows, `1` columns, `2` depth and `-1` everything.
impl TryFrom<isize> for TensorAxis {
    type Error = Error;

    fn try_from(axis: isize) -> Result<Self> {
        match axis {
            0 => Ok(TensorAxis::Rows),
            1 => Ok(TensorAxis::Columns),
            2 => Ok(TensorAxis::Depth),
            -1 => Ok(TensorAxis::All),
            _ => Err(Error::InvalidAxis(axis)),
        }
    }
}

/// Three dimensional value buffer laid out as `[depth][rows][columns]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    value: Array3<f32>,
}

#[derive(Debug, Clone, Copy)]
enum Reduction {
    Sum,
    Subtract,
    Multiply,
    Norm,
    SumOfSquares,
}

impl Reduction {
    fn lane(self, lane: ArrayView1<f32>) -> f32 {
        match self {
            Reduction::Subtract => {
                let mut values = lane.iter();
                let first = values.next().copied().unwrap_or(0.);
                values.fold(first, |acc, v| acc - v)
            }
            _ => self.all(lane.iter()),
        }
    }

    fn all<'a>(self, values: impl Iterator<Item = &'a f32>) -> f32 {
        match self {
            Reduction::Sum => values.sum(),
            Reduction::Subtract => values.fold(0., |acc, v| acc - v),
            Reduction::Multiply => values.product(),
            Reduction::Norm => values.map(|v| v * v).sum::<f32>().sqrt(),
            Reduction::SumOfSquares => values.map(|v| v * v).sum(),
        }
    }
}

impl Tensor {
    pub fn new(value: Array3<f32>) -> Self {
        Self { value }
    }

    pub fn zeros(size: TensorSize) -> Self {
        Self::new(Array3::zeros(size.shape()))
    }

    pub fn filled(size: TensorSize, value: f32) -> Self {
        Self::new(Array3::from_elem(size.shape(), value))
    }

    pub fn scalar(value: f32) -> Self {
        Self::filled(TensorSize::new(1, 1, 1), value)
    }

    pub fn vector(values: Vec<f32>) -> Self {
        Self::new(
            Array1::from_vec(values)
                .insert_axis(Axis(0))
                .insert_axis(Axis(0)),
        )
    }

    pub fn from_shape_vec(size: TensorSize, values: Vec<f32>) -> Result<Self> {
        let actual = TensorSize::vector(values.len());
        Array3::from_shape_vec(size.shape(), values)
            .map(Self::new)
            .map_err(|_| shape_mismatch("tensor", size, actual))
    }

    /// Builds a tensor from `[depth][rows][columns]` nested vectors.
    pub fn from_nested(values: Vec<Vec<Vec<f32>>>) -> Result<Self> {
        let depth = values.len();
        let rows = values.first().map_or(0, Vec::len);
        let columns = values
            .first()
            .and_then(|plane| plane.first())
            .map_or(0, Vec::len);
        let size = TensorSize::new(rows, columns, depth);
        let ragged = values
            .iter()
            .any(|plane| plane.len() != rows || plane.iter().any(|row| row.len() != columns));
        if ragged {
            return Err(Error::InvalidConfig(format!(
                "ragged nested values cannot form a {size} tensor"
            )));
        }
        Self::from_shape_vec(size, values.into_iter().flatten().flatten().collect())
    }

    pub fn size(&self) -> TensorSize {
        let (depth, rows, columns) = self.value.dim();
        TensorSize::new(rows, columns, depth)
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn value(&self) -> ArrayView3<f32> {
        self.value.view()
    }

    pub fn value_mut(&mut self) -> ArrayViewMut3<f32> {
        self.value.view_mut()
    }

    pub fn into_value(self) -> Array3<f32> {
        self.value
    }

    /// Values in `[depth][rows][columns]` order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.value.iter().copied().collect()
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Self::new(self.value.mapv(f))
    }

    pub fn flatten(&self) -> Tensor {
        Self::vector(self.to_vec())
    }

    pub fn reshape(&self, size: TensorSize) -> Result<Tensor> {
        if size.len() != self.len() {
            return Err(shape_mismatch("reshape", size, self.size()));
        }
        Self::from_shape_vec(size, self.to_vec())
    }

    pub fn sum(&self, axis: TensorAxis) -> Tensor {
        self.reduce(axis, Reduction::Sum)
    }

    /// Subtracts every later element along `axis` from the first one. Over
    /// all axes the fold starts from zero.
    pub fn subtract(&self, axis: TensorAxis) -> Tensor {
        self.reduce(axis, Reduction::Subtract)
    }

    pub fn multiply(&self, axis: TensorAxis) -> Tensor {
        self.reduce(axis, Reduction::Multiply)
    }

    pub fn norm(&self, axis: TensorAxis) -> Tensor {
        self.reduce(axis, Reduction::Norm)
    }

    pub fn sum_of_squares(&self, axis: TensorAxis) -> Tensor {
        self.reduce(axis, Reduction::SumOfSquares)
    }

    /// Shape equality plus element-wise equality within `tolerance`.
    pub fn is_value_equal(&self, other: &Tensor, tolerance: f32) -> bool {
        self.value.dim() == other.value.dim()
            && self
                .value
                .iter()
                .zip(other.value.iter())
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    fn reduce(&self, axis: TensorAxis, reduction: Reduction) -> Tensor {
        let axis = match axis {
            TensorAxis::Rows => Axis(1),
            TensorAxis::Columns => Axis(2),
            TensorAxis::Depth => Axis(0),
            TensorAxis::All => return Tensor::scalar(reduction.all(self.value.iter())),
        };
        let reduced = self.value.map_axis(axis, |lane| reduction.lane(lane));
        Tensor::new(reduced.insert_axis(axis))
    }
}

impl From<Array3<f32>> for Tensor {
    fn from(value: Array3<f32>) -> Self {
        Self::new(value)
    }
}

impl Add for &Tensor {
    type Output = Tensor;

    fn add(self, rhs: &Tensor) -> Tensor {
        Tensor::new(&self.value + &rhs.value)
    }
}

impl Sub for &Tensor {
    type Output = Tensor;

    fn sub(self, rhs: &Tensor) -> Tensor {
        Tensor::new(&self.value - &rhs.value)
    }
}

impl Mul for &Tensor {
    type Output = Tensor;

    fn mul(self, rhs: &Tensor) -> Tensor {
        Tensor::new(&self.value * &rhs.value)
    }
}

impl Mul<f32> for &Tensor {
    type Output = Tensor;

    fn mul(self, rhs: f32) -> Tensor {
        self.map(|v| v * rhs)
    }
}
