use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::Tensor;
use crate::{AddContext, Device, ShapeError};

/// Tensor contents without a device, the form tensors are stored in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorNoContext {
    pub shape: Vec<usize>,
    pub contents: Vec<f32>,
}

impl TensorNoContext {
    pub fn is_consistent(&self) -> bool {
        self.shape.iter().product::<usize>() == self.contents.len()
    }

    pub fn into_tensor(self, ctx: &Arc<Device>) -> Result<Tensor, ShapeError> {
        Tensor::from_vec(&self.shape, self.contents, ctx)
    }
}

impl From<&Tensor> for TensorNoContext {
    fn from(value: &Tensor) -> Self {
        Self {
            shape: value.shape().to_vec(),
            contents: value.to_vec(),
        }
    }
}

impl AddContext<Device> for Tensor {
    type FromType = TensorNoContext;

    /// Inconsistent contents are truncated or zero padded to the shape;
    /// use [`TensorNoContext::into_tensor`] to reject them instead.
    fn add_context(t: &Self::FromType, ctx: &Arc<Device>) -> Self {
        let len = t.shape.iter().product();
        let mut contents = t.contents.clone();
        contents.resize(len, 0.0);
        Tensor::with_contents(&t.shape, contents.into_boxed_slice(), ctx)
    }
}
