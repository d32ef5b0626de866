mod device;
pub use device::*;

mod tensor;
pub use tensor::*;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("shape {shape:?} holds {expected} values, received {received}")]
    LengthMismatch {
        shape: Vec<usize>,
        expected: usize,
        received: usize,
    },
    #[error("shapes {lhs:?} and {rhs:?} are not compatible")]
    Incompatible { lhs: Vec<usize>, rhs: Vec<usize> },
    #[error("range {start}..{end} is outside of a dimension of size {size}")]
    OutOfRange {
        start: usize,
        end: usize,
        size: usize,
    },
    #[error("expected a tensor of rank {expected}, received rank {received}")]
    Rank { expected: usize, received: usize },
}

/// Attaches a device context to a value that was deserialized without one.
pub trait AddContext<C> {
    type FromType;
    fn add_context(t: &Self::FromType, ctx: &std::sync::Arc<C>) -> Self;
}
