use numbers::ShapeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("the model has been disposed")]
    Disposed,
    #[error("the model has no optimizer, compile it before training")]
    NotCompiled,
    #[error("model state is unavailable after a panic in another thread")]
    Poisoned,
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("expected input of shape {expected:?}, received {received:?}")]
    InputShape {
        expected: Vec<usize>,
        received: Vec<usize>,
    },
    #[error("layer index {index} is out of range for a model with {layers} layers")]
    LayerIndex { index: usize, layers: usize },
    #[error("layer '{name}' is invalid: {reason}")]
    InvalidLayer { name: String, reason: String },
    #[error("weights do not match the architecture: {0}")]
    CorruptWeights(String),
    #[error("could not encode the model: {0}")]
    Encoding(String),
}

impl<T> From<std::sync::PoisonError<T>> for NetworkError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        NetworkError::Poisoned
    }
}
