use serde::Serialize;
use std::{fmt::Debug, sync::Arc};

use crate::{Device, ShapeError};

mod noctx;
pub use noctx::TensorNoContext;

mod ops;

/// Dense row-major `f32` buffer with a dynamic shape.
///
/// Images are laid out NHWC (`[batch, height, width, channels]`), dense
/// activations as `[batch, units]`.
pub struct Tensor {
    shape: Box<[usize]>,
    contents: Box<[f32]>,
    context: Arc<Device>,
}

fn shape_len(shape: &[usize]) -> usize {
    shape.iter().product()
}

impl Tensor {
    fn with_contents(shape: &[usize], contents: Box<[f32]>, ctx: &Arc<Device>) -> Self {
        ctx.register(contents.len());
        Self {
            shape: shape.into(),
            contents,
            context: Arc::clone(ctx),
        }
    }

    pub fn zeros(shape: &[usize], ctx: &Arc<Device>) -> Self {
        Self::filled(shape, 0.0, ctx)
    }

    pub fn filled(shape: &[usize], value: f32, ctx: &Arc<Device>) -> Self {
        let contents = vec![value; shape_len(shape)].into_boxed_slice();
        Self::with_contents(shape, contents, ctx)
    }

    pub fn from_vec(shape: &[usize], contents: Vec<f32>, ctx: &Arc<Device>) -> Result<Self, ShapeError> {
        let expected = shape_len(shape);
        if expected != contents.len() {
            return Err(ShapeError::LengthMismatch {
                shape: shape.to_vec(),
                expected,
                received: contents.len(),
            });
        }

        Ok(Self::with_contents(shape, contents.into_boxed_slice(), ctx))
    }

    pub fn from_slice(shape: &[usize], contents: &[f32], ctx: &Arc<Device>) -> Result<Self, ShapeError> {
        Self::from_vec(shape, contents.to_vec(), ctx)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn context(&self) -> &Arc<Device> {
        &self.context
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.contents
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.contents
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.contents.to_vec()
    }

    /// Size of the leading dimension (the batch for layer activations).
    pub fn outer_dim(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Number of values in one entry of the leading dimension.
    pub fn sample_len(&self) -> usize {
        shape_len(&self.shape[1.min(self.shape.len())..])
    }

    pub fn reshape(mut self, shape: &[usize]) -> Result<Self, ShapeError> {
        let expected = shape_len(shape);
        if expected != self.contents.len() {
            return Err(ShapeError::LengthMismatch {
                shape: shape.to_vec(),
                expected,
                received: self.contents.len(),
            });
        }
        self.shape = shape.into();
        Ok(self)
    }

    /// Copies `len` entries of the leading dimension starting at `start`.
    pub fn slice_outer(&self, start: usize, len: usize) -> Result<Self, ShapeError> {
        let outer = self.outer_dim();
        if start + len > outer {
            return Err(ShapeError::OutOfRange {
                start,
                end: start + len,
                size: outer,
            });
        }

        let stride = self.sample_len();
        let mut shape = self.shape.to_vec();
        if let Some(first) = shape.first_mut() {
            *first = len;
        }
        let contents: Box<[f32]> = self.contents[start * stride..(start + len) * stride].into();

        Ok(Self::with_contents(&shape, contents, &self.context))
    }

    /// Stacks tensors with identical shapes along the leading dimension.
    pub fn concat_outer(parts: &[Tensor], ctx: &Arc<Device>) -> Result<Self, ShapeError> {
        let Some(first) = parts.first() else {
            return Ok(Self::zeros(&[0], ctx));
        };
        let inner = &first.shape[1.min(first.shape.len())..];

        let mut outer = 0;
        let mut contents = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
        for part in parts {
            if &part.shape[1.min(part.shape.len())..] != inner {
                return Err(ShapeError::Incompatible {
                    lhs: first.shape.to_vec(),
                    rhs: part.shape.to_vec(),
                });
            }
            outer += part.outer_dim();
            contents.extend_from_slice(&part.contents);
        }

        let mut shape = vec![outer];
        shape.extend_from_slice(inner);
        Self::from_vec(&shape, contents, ctx)
    }

    /// Flat offset of a multi-dimensional index.
    pub fn offset(&self, index: &[usize]) -> usize {
        debug_assert_eq!(index.len(), self.shape.len());
        index
            .iter()
            .zip(self.shape.iter())
            .fold(0, |acc, (i, dim)| acc * dim + i)
    }

    pub fn get(&self, index: &[usize]) -> f32 {
        self.contents[self.offset(index)]
    }

    pub fn map(&self, func: impl Fn(f32) -> f32) -> Self {
        let contents = self.contents.iter().map(|v| func(*v)).collect();
        Self::with_contents(&self.shape, contents, &self.context)
    }

    pub fn apply(&mut self, func: impl Fn(f32) -> f32) {
        self.contents.iter_mut().for_each(|v| *v = func(*v));
    }

    /// Deep copy onto another device.
    pub fn switch_context(&self, ctx: &Arc<Device>) -> Self {
        Self::with_contents(&self.shape, self.contents.clone(), ctx)
    }
}

#[cfg(feature = "rand")]
impl Tensor {
    pub fn random(
        shape: &[usize],
        rng: &mut dyn rand::RngCore,
        generator: impl Fn(&mut dyn rand::RngCore) -> f32,
        ctx: &Arc<Device>,
    ) -> Self {
        let contents = (0..shape_len(shape)).map(|_| generator(rng)).collect();
        Self::with_contents(shape, contents, ctx)
    }
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        Self::with_contents(&self.shape, self.contents.clone(), &self.context)
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        self.context.release(self.contents.len());
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.contents == other.contents
    }
}

impl Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Tensor{:?} {:?}", self.shape, self.contents))
    }
}

impl Serialize for Tensor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        TensorNoContext::from(self).serialize(serializer)
    }
}
