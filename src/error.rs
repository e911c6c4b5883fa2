use thiserror::Error;

use crate::tensor::TensorSize;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("network has not been compiled")]
    NotCompiled,
    #[error("shape mismatch in {lobe}: expected {expected}, got {actual}")]
    ShapeMismatch {
        lobe: String,
        expected: TensorSize,
        actual: TensorSize,
    },
    #[error("{0} received deltas before a forward pass")]
    NoForwardPass(&'static str),
    #[error("tensor axis {0} is out of range")]
    InvalidAxis(isize),
    #[error("training invoked with no samples")]
    EmptyInput,
    #[error("missing component: {0}")]
    MissingComponent(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub(crate) fn shape_mismatch(lobe: &str, expected: TensorSize, actual: TensorSize) -> Error {
    Error::ShapeMismatch {
        lobe: lobe.to_string(),
        expected,
        actual,
    }
}
