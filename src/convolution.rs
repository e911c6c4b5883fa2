use ndarray::{s, Array2, ArrayView2};

use crate::device::{Device, Padding};

pub fn output_length(input: usize, filter: usize, stride: usize, padding: Padding) -> usize {
    match padding {
        Padding::Valid if input < filter => 0,
        Padding::Valid => (input - filter) / stride + 1,
        Padding::Same => (input + stride - 1) / stride,
    }
}

pub fn transposed_output_length(
    input: usize,
    filter: usize,
    stride: usize,
    padding: Padding,
) -> usize {
    match padding {
        Padding::Valid => input.saturating_sub(1) * stride + filter,
        Padding::Same => input * stride,
    }
}

/// Leading and trailing zeros needed along one axis for `same` padding.
/// The trailing side takes the odd element.
pub fn same_padding(input: usize, filter: usize, stride: usize) -> (usize, usize) {
    let output = output_length(input, filter, stride, Padding::Same);
    let total = (output.saturating_sub(1) * stride + filter).saturating_sub(input);
    (total / 2, total - total / 2)
}

pub fn zero_pad(
    signal: ArrayView2<f32>,
    vertical: (usize, usize),
    horizontal: (usize, usize),
) -> Array2<f32> {
    let (rows, columns) = signal.dim();
    let mut padded = Array2::zeros((
        rows + vertical.0 + vertical.1,
        columns + horizontal.0 + horizontal.1,
    ));
    padded
        .slice_mut(s![
            vertical.0..vertical.0 + rows,
            horizontal.0..horizontal.0 + columns
        ])
        .assign(&signal);
    padded
}

/// Inserts `stride - 1` zeros between neighbouring samples.
pub fn dilate(signal: ArrayView2<f32>, stride: (usize, usize)) -> Array2<f32> {
    let (rows, columns) = signal.dim();
    if stride == (1, 1) || rows == 0 || columns == 0 {
        return signal.to_owned();
    }
    let mut dilated = Array2::zeros(((rows - 1) * stride.0 + 1, (columns - 1) * stride.1 + 1));
    dilated
        .slice_mut(s![..;stride.0, ..;stride.1])
        .assign(&signal);
    dilated
}

/// Picks every `stride`-th sample starting at `offset`, the inverse of
/// [`dilate`] followed by [`zero_pad`].
pub fn subsample(
    signal: ArrayView2<f32>,
    offset: (usize, usize),
    stride: (usize, usize),
    size: (usize, usize),
) -> Array2<f32> {
    Array2::from_shape_fn(size, |(r, c)| {
        signal[[offset.0 + r * stride.0, offset.1 + c * stride.1]]
    })
}

pub fn flip180(kernel: ArrayView2<f32>) -> Array2<f32> {
    kernel.slice(s![..;-1, ..;-1]).to_owned()
}

/// Gradient of the kernel: the padded forward signal correlated with the
/// stride-dilated delta, cropped to the kernel size.
pub fn filter_gradient(
    device: &dyn Device,
    padded: ArrayView2<f32>,
    delta: ArrayView2<f32>,
    stride: (usize, usize),
    filter: (usize, usize),
) -> Array2<f32> {
    let dilated = dilate(delta, stride);
    let full = device.correlate2d(padded, dilated.view(), (1, 1), Padding::Valid);
    full.slice(s![..filter.0, ..filter.1]).to_owned()
}

/// Gradient of the padded forward signal: full correlation of the
/// stride-dilated delta with the flipped kernel. Trailing rows and columns
/// that no output position reached receive the extra zeros.
pub fn signal_gradient(
    device: &dyn Device,
    delta: ArrayView2<f32>,
    kernel: ArrayView2<f32>,
    stride: (usize, usize),
    padded: (usize, usize),
) -> Array2<f32> {
    let dilated = dilate(delta, stride);
    let (kernel_rows, kernel_columns) = kernel.dim();
    let (rows, columns) = dilated.dim();
    let surrounded = zero_pad(
        dilated.view(),
        (kernel_rows - 1, padded.0.saturating_sub(rows)),
        (kernel_columns - 1, padded.1.saturating_sub(columns)),
    );
    device.correlate2d(
        surrounded.view(),
        flip180(kernel).view(),
        (1, 1),
        Padding::Valid,
    )
}
