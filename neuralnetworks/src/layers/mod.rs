use numbers::Tensor;
use serde::{Deserialize, Serialize};

use crate::{af::Activation, metrics::LossFunction, NetworkError};

mod conv2d;
pub use conv2d::*;
mod dense;
pub use dense::*;
mod dropout;
pub use dropout::*;
mod flatten;
pub use flatten::*;
mod pool;
pub use pool::*;

/// What a layer receives during backpropagation.
pub enum LayerOutput<'a> {
    /// The layer is the last one; it derives its error from the loss.
    FinalOutput {
        expected: &'a Tensor,
        loss_fn: &'a dyn LossFunction,
    },
    /// Gradient of the loss with respect to this layer's output.
    Intermediate(Tensor),
}

impl<'a> LayerOutput<'a> {
    /// Gradient with respect to an output that went through `activation`.
    pub fn into_delta(self, activation: Activation, received: &Tensor) -> Tensor {
        match self {
            LayerOutput::Intermediate(grad) => {
                activation.activation_fn().backpropagate(received, grad)
            }
            LayerOutput::FinalOutput { expected, loss_fn } => {
                let combined = match activation {
                    Activation::Softmax => loss_fn.softmax_cost_derivative(received, expected),
                    _ => None,
                };
                match combined {
                    Some(delta) => delta,
                    None => activation
                        .activation_fn()
                        .backpropagate(received, loss_fn.cost_derivative(received, expected)),
                }
            }
        }
    }
}

/// State kept between the forward and backward pass of one batch.
pub enum TrainCache {
    None,
    Mask(Tensor),
    Routes(Vec<usize>),
}

pub struct ErrorBackpropagation {
    /// Gradient with respect to the layer input.
    pub error: Tensor,
    /// One gradient per parameter, in [`Layer::parameters`] order.
    pub gradients: Vec<Tensor>,
}

pub trait Layer: Send + Sync {
    fn name(&self) -> &str;
    fn update_name(&mut self, name: &str);
    fn kind(&self) -> LayerKind;
    /// Shape of one sample entering the layer.
    fn input_shape(&self) -> &[usize];

    fn execute_layer(&self, arr: &Tensor) -> Result<Tensor, NetworkError>;
    fn pre_train(
        &self,
        input: &Tensor,
        rng: &mut dyn rand::RngCore,
    ) -> Result<(Tensor, TrainCache), NetworkError>;
    fn train(
        &self,
        input: &Tensor,
        received: (Tensor, TrainCache),
        expected: LayerOutput,
    ) -> Result<ErrorBackpropagation, NetworkError>;

    fn parameters(&self) -> Vec<&Tensor>;
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    fn param_count(&self) -> usize {
        self.parameters().iter().map(|p| p.len()).sum()
    }

    fn get_weights(&self) -> Vec<Tensor> {
        self.parameters().into_iter().cloned().collect()
    }

    fn set_weights(&mut self, weights: Vec<Tensor>) -> Result<(), NetworkError> {
        let name = self.name().to_owned();
        let mut params = self.parameters_mut();
        if params.len() != weights.len() {
            return Err(NetworkError::CorruptWeights(format!(
                "layer '{}' expects {} tensors, received {}",
                name,
                params.len(),
                weights.len()
            )));
        }
        if let Some((p, w)) = params
            .iter()
            .zip(weights.iter())
            .find(|(p, w)| p.shape() != w.shape())
        {
            return Err(NetworkError::CorruptWeights(format!(
                "layer '{}' expects a tensor of shape {:?}, received {:?}",
                name,
                p.shape(),
                w.shape()
            )));
        }

        for (p, w) in params.iter_mut().zip(weights.into_iter()) {
            p.as_mut_slice().copy_from_slice(w.as_slice());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    #[default]
    Valid,
    Same,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2DConfig {
    pub filters: usize,
    pub kernel_size: [usize; 2],
    pub strides: [usize; 2],
    #[serde(default)]
    pub padding: Padding,
    #[serde(default)]
    pub activation: Activation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxPool2DConfig {
    pub pool_size: [usize; 2],
    pub strides: [usize; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseConfig {
    pub units: usize,
    #[serde(default)]
    pub activation: Activation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropoutConfig {
    pub rate: f32,
}

/// The closed set of layers a model can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class_name", content = "config")]
pub enum LayerKind {
    Convolution(Conv2DConfig),
    Pooling(MaxPool2DConfig),
    Flatten,
    Dense(DenseConfig),
    Dropout(DropoutConfig),
}

impl LayerKind {
    pub fn conv2d(filters: usize, kernel: usize, activation: Activation) -> Self {
        LayerKind::Convolution(Conv2DConfig {
            filters,
            kernel_size: [kernel, kernel],
            strides: [1, 1],
            padding: Padding::Valid,
            activation,
        })
    }

    pub fn max_pool(size: usize) -> Self {
        LayerKind::Pooling(MaxPool2DConfig {
            pool_size: [size, size],
            strides: [size, size],
        })
    }

    pub fn dense(units: usize, activation: Activation) -> Self {
        LayerKind::Dense(DenseConfig { units, activation })
    }

    pub fn dropout(rate: f32) -> Self {
        LayerKind::Dropout(DropoutConfig { rate })
    }

    /// Prefix used to name layers, `conv2d_1`, `dense_2`...
    pub fn label(&self) -> &'static str {
        match self {
            LayerKind::Convolution(_) => "conv2d",
            LayerKind::Pooling(_) => "max_pooling2d",
            LayerKind::Flatten => "flatten",
            LayerKind::Dense(_) => "dense",
            LayerKind::Dropout(_) => "dropout",
        }
    }

    pub fn is_convolution(&self) -> bool {
        matches!(self, LayerKind::Convolution(_))
    }

    /// Per-sample output shape for a per-sample input shape.
    pub fn output_shape(&self, name: &str, input: &[usize]) -> Result<Vec<usize>, NetworkError> {
        let invalid = |reason: String| NetworkError::InvalidLayer {
            name: name.to_owned(),
            reason,
        };
        let spatial = |input: &[usize]| -> Result<(usize, usize, usize), NetworkError> {
            match input {
                [h, w, c] => Ok((*h, *w, *c)),
                _ => Err(invalid(format!(
                    "expects a [height, width, channels] input, received {:?}",
                    input
                ))),
            }
        };

        match self {
            LayerKind::Convolution(config) => {
                let (h, w, _) = spatial(input)?;
                if config.filters == 0 || config.strides.contains(&0) || config.kernel_size.contains(&0) {
                    return Err(invalid("filters, kernel and strides must be positive".to_owned()));
                }
                let (oh, ow) = match config.padding {
                    Padding::Valid => {
                        if config.kernel_size[0] > h || config.kernel_size[1] > w {
                            return Err(invalid(format!(
                                "kernel {:?} is larger than the input {}x{}",
                                config.kernel_size, h, w
                            )));
                        }
                        (
                            (h - config.kernel_size[0]) / config.strides[0] + 1,
                            (w - config.kernel_size[1]) / config.strides[1] + 1,
                        )
                    }
                    Padding::Same => (
                        h.div_ceil(config.strides[0]),
                        w.div_ceil(config.strides[1]),
                    ),
                };
                Ok(vec![oh, ow, config.filters])
            }
            LayerKind::Pooling(config) => {
                let (h, w, c) = spatial(input)?;
                if config.strides.contains(&0) || config.pool_size.contains(&0) {
                    return Err(invalid("pool size and strides must be positive".to_owned()));
                }
                if config.pool_size[0] > h || config.pool_size[1] > w {
                    return Err(invalid(format!(
                        "pool {:?} is larger than the input {}x{}",
                        config.pool_size, h, w
                    )));
                }
                Ok(vec![
                    (h - config.pool_size[0]) / config.strides[0] + 1,
                    (w - config.pool_size[1]) / config.strides[1] + 1,
                    c,
                ])
            }
            LayerKind::Flatten => Ok(vec![input.iter().product()]),
            LayerKind::Dense(config) => match input {
                [_] if config.units > 0 => Ok(vec![config.units]),
                [_] => Err(invalid("units must be positive".to_owned())),
                _ => Err(invalid(format!(
                    "expects a flat input, received {:?}",
                    input
                ))),
            },
            LayerKind::Dropout(config) => {
                if !(0.0..1.0).contains(&config.rate) {
                    return Err(invalid(format!("rate {} is outside [0, 1)", config.rate)));
                }
                Ok(input.to_vec())
            }
        }
    }

    /// Number of trainable values for a per-sample input shape.
    pub fn param_count(&self, input: &[usize]) -> usize {
        match self {
            LayerKind::Convolution(config) => {
                let channels = input.last().copied().unwrap_or(1);
                config.kernel_size[0] * config.kernel_size[1] * channels * config.filters
                    + config.filters
            }
            LayerKind::Dense(config) => {
                let inputs: usize = input.iter().product();
                inputs * config.units + config.units
            }
            LayerKind::Pooling(_) | LayerKind::Flatten | LayerKind::Dropout(_) => 0,
        }
    }
}

/// Instantiates the layer described by `kind` with freshly initialized
/// parameters.
pub fn build_layer(
    name: &str,
    kind: &LayerKind,
    input_shape: &[usize],
    rng: &mut dyn rand::RngCore,
    ctx: &std::sync::Arc<numbers::Device>,
) -> Result<Box<dyn Layer>, NetworkError> {
    // validates the configuration against the input
    kind.output_shape(name, input_shape)?;

    let mut layer: Box<dyn Layer> = match kind {
        LayerKind::Convolution(config) => {
            Box::new(Conv2DLayer::new_random(config.clone(), input_shape, rng, ctx))
        }
        LayerKind::Pooling(config) => Box::new(MaxPool2DLayer::new(config.clone(), input_shape)),
        LayerKind::Flatten => Box::new(FlattenLayer::new(input_shape)),
        LayerKind::Dense(config) => {
            Box::new(DenseLayer::new_random(config.clone(), input_shape, rng, ctx))
        }
        LayerKind::Dropout(config) => Box::new(DropoutLayer::new(config.clone(), input_shape)),
    };
    layer.update_name(name);

    Ok(layer)
}

/// Checks that a batch matches the per-sample shape a layer expects.
pub(crate) fn check_batch_shape(expected: &[usize], input: &Tensor) -> Result<usize, NetworkError> {
    if input.rank() != expected.len() + 1 || &input.shape()[1..] != expected {
        let mut full = vec![input.outer_dim()];
        full.extend_from_slice(expected);
        return Err(NetworkError::InputShape {
            expected: full,
            received: input.shape().to_vec(),
        });
    }
    Ok(input.outer_dim())
}
