use numbers::Tensor;
use serde::{Deserialize, Serialize};

mod relu;
pub use relu::*;

mod softmax;
pub use softmax::*;

pub trait ActivationFn: std::fmt::Debug + Sync + Send {
    fn activate_multiple(&self, lst: &mut Tensor);

    /// Maps the gradient with respect to the activated values onto the
    /// gradient with respect to the values before activation.
    fn backpropagate(&self, activated: &Tensor, gradient: Tensor) -> Tensor;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinearAF {}

impl ActivationFn for LinearAF {
    fn activate_multiple(&self, _lst: &mut Tensor) {}

    fn backpropagate(&self, _activated: &Tensor, gradient: Tensor) -> Tensor {
        gradient
    }
}

/// Activation stored in a layer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Softmax,
}

impl Activation {
    pub fn activation_fn(&self) -> &'static dyn ActivationFn {
        match self {
            Activation::Linear => &LinearAF {},
            Activation::Relu => &ReLUAF {},
            Activation::Softmax => &SoftmaxAF {},
        }
    }
}
