use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::convolution::{output_length, same_padding, zero_pad};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// No implicit padding; the output shrinks with the filter.
    Valid,
    /// Zero padding so the output covers `ceil(input / stride)` positions.
    Same,
}

/// The one numeric primitive lobes delegate to: strided, padded 2D
/// cross-correlation of `signal` with `filter`.
pub trait Device: Send + Sync {
    fn correlate2d(
        &self,
        signal: ArrayView2<f32>,
        filter: ArrayView2<f32>,
        stride: (usize, usize),
        padding: Padding,
    ) -> Array2<f32>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuDevice;

impl Device for CpuDevice {
    fn correlate2d(
        &self,
        signal: ArrayView2<f32>,
        filter: ArrayView2<f32>,
        stride: (usize, usize),
        padding: Padding,
    ) -> Array2<f32> {
        let (rows, columns) = signal.dim();
        let (filter_rows, filter_columns) = filter.dim();
        let out_rows = output_length(rows, filter_rows, stride.0, padding);
        let out_columns = output_length(columns, filter_columns, stride.1, padding);

        let (vertical, horizontal) = match padding {
            Padding::Valid => ((0, 0), (0, 0)),
            Padding::Same => (
                same_padding(rows, filter_rows, stride.0),
                same_padding(columns, filter_columns, stride.1),
            ),
        };
        let padded = zero_pad(signal, vertical, horizontal);

        Array2::from_shape_fn((out_rows, out_columns), |(r, c)| {
            let (top, left) = (r * stride.0, c * stride.1);
            padded
                .slice(s![top..top + filter_rows, left..left + filter_columns])
                .iter()
                .zip(filter.iter())
                .map(|(x, w)| x * w)
                .sum()
        })
    }
}
