use numbers::{Device, Tensor};
use rand::distributions::Distribution;
use std::sync::Arc;

use super::{
    check_batch_shape, DenseConfig, ErrorBackpropagation, Layer, LayerKind, LayerOutput, TrainCache,
};
use crate::{profiling::evaluate, NetworkError};

/// Fully connected layer, `y = act(x·W + b)` with `W` stored as
/// `[inputs, units]`.
pub struct DenseLayer {
    name: String,
    config: DenseConfig,
    input_shape: Vec<usize>,
    weights: Tensor,
    bias: Tensor,
}

impl DenseLayer {
    /// Glorot-normal weights, zero bias.
    pub fn new_random(
        config: DenseConfig,
        input_shape: &[usize],
        rng: &mut dyn rand::RngCore,
        ctx: &Arc<Device>,
    ) -> Self {
        let inputs: usize = input_shape.iter().product();
        let std = (2.0 / (inputs + config.units).max(1) as f32).sqrt();
        let dist = rand_distr::Normal::new(0.0, std).expect("Should create distribution");

        Self {
            name: "unnamed".to_owned(),
            weights: Tensor::random(&[inputs, config.units], rng, |rng| dist.sample(rng), ctx),
            bias: Tensor::zeros(&[config.units], ctx),
            config,
            input_shape: input_shape.to_vec(),
        }
    }

    pub fn with_weights(
        config: DenseConfig,
        input_shape: &[usize],
        weights: Tensor,
        bias: Tensor,
    ) -> Result<Self, NetworkError> {
        LayerKind::Dense(config.clone()).output_shape("dense", input_shape)?;
        let inputs: usize = input_shape.iter().product();
        let ctx = Arc::clone(weights.context());

        let mut layer = Self {
            name: "unnamed".to_owned(),
            weights: Tensor::zeros(&[inputs, config.units], &ctx),
            bias: Tensor::zeros(&[config.units], &ctx),
            config,
            input_shape: input_shape.to_vec(),
        };
        layer.set_weights(vec![weights, bias])?;

        Ok(layer)
    }
}

impl Layer for DenseLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Dense(self.config.clone())
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn execute_layer(&self, arr: &Tensor) -> Result<Tensor, NetworkError> {
        check_batch_shape(&self.input_shape, arr)?;

        evaluate!(&self.name, "ExecuteLayer", {
            let mut out = arr.matmul(&self.weights)?;
            let units = self.config.units;
            out.as_mut_slice()
                .chunks_mut(units)
                .for_each(|row| {
                    row.iter_mut()
                        .zip(self.bias.as_slice().iter())
                        .for_each(|(v, b)| *v += b)
                });
            self.config.activation.activation_fn().activate_multiple(&mut out);
            Ok(out)
        })
    }

    fn pre_train(
        &self,
        input: &Tensor,
        _rng: &mut dyn rand::RngCore,
    ) -> Result<(Tensor, TrainCache), NetworkError> {
        Ok((self.execute_layer(input)?, TrainCache::None))
    }

    fn train(
        &self,
        input: &Tensor,
        received: (Tensor, TrainCache),
        expected: LayerOutput,
    ) -> Result<ErrorBackpropagation, NetworkError> {
        check_batch_shape(&self.input_shape, input)?;
        let delta = expected.into_delta(self.config.activation, &received.0);
        drop(received);

        evaluate!(&self.name, "Backpropagate", {
            let d_weights = input.transpose()?.matmul(&delta)?;

            let mut d_bias = Tensor::zeros(&[self.config.units], input.context());
            delta
                .as_slice()
                .chunks(self.config.units)
                .for_each(|row| {
                    d_bias
                        .as_mut_slice()
                        .iter_mut()
                        .zip(row.iter())
                        .for_each(|(b, d)| *b += d)
                });

            let error = delta.matmul(&self.weights.transpose()?)?;

            Ok(ErrorBackpropagation {
                error,
                gradients: vec![d_weights, d_bias],
            })
        })
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weights, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.weights, &mut self.bias]
    }
}

#[cfg(test)]
mod test {
    use numbers::{Device, Tensor};

    use crate::{
        af::Activation,
        layers::{DenseConfig, DenseLayer, Layer, LayerOutput, TrainCache},
        metrics::CategoricalCrossEntropy,
    };

    fn layer(activation: Activation) -> DenseLayer {
        let ctx = Device::cpu();
        let weights =
            Tensor::from_vec(&[3, 2], vec![1.0, -1.0, 0.5, 0.0, 0.0, 2.0], &ctx).unwrap();
        let bias = Tensor::from_vec(&[2], vec![0.5, -0.5], &ctx).unwrap();
        DenseLayer::with_weights(DenseConfig { units: 2, activation }, &[3], weights, bias).unwrap()
    }

    #[test]
    fn test_forward() {
        let layer = layer(Activation::Linear);
        let input =
            Tensor::from_vec(&[1, 3], vec![1.0, 2.0, 3.0], layer.parameters()[0].context()).unwrap();
        let out = layer.execute_layer(&input).unwrap();
        assert_eq!(out.as_slice(), &[2.5, 4.5]);
    }

    #[test]
    fn test_wrong_weight_shapes_are_rejected() {
        let ctx = Device::cpu();
        let res = DenseLayer::with_weights(
            DenseConfig {
                units: 2,
                activation: Activation::Linear,
            },
            &[3],
            Tensor::zeros(&[2, 3], &ctx),
            Tensor::zeros(&[2], &ctx),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_gradients() {
        let layer = layer(Activation::Linear);
        let ctx = layer.parameters()[0].context().clone();
        let input = Tensor::from_vec(&[2, 3], vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0], &ctx).unwrap();
        let out = layer.execute_layer(&input).unwrap();

        let grad = Tensor::from_vec(&[2, 2], vec![1.0, 0.0, 0.0, 1.0], &ctx).unwrap();
        let back = layer
            .train(&input, (out, TrainCache::None), LayerOutput::Intermediate(grad))
            .unwrap();

        // dW = xᵀ·δ
        assert_eq!(
            back.gradients[0].as_slice(),
            &[1.0, -1.0, 2.0, 0.0, 3.0, 1.0]
        );
        assert_eq!(back.gradients[1].as_slice(), &[1.0, 1.0]);
        // dx = δ·Wᵀ
        assert_eq!(
            back.error.as_slice(),
            &[1.0, 0.5, 0.0, -1.0, 0.0, 2.0]
        );
    }

    #[test]
    fn test_softmax_output_trains_towards_target() {
        let mut layer = layer(Activation::Softmax);
        let ctx = layer.parameters()[0].context().clone();
        let input = Tensor::from_vec(&[1, 3], vec![1.0, 2.0, 3.0], &ctx).unwrap();
        let target = Tensor::from_vec(&[1, 2], vec![1.0, 0.0], &ctx).unwrap();
        let loss_fn = CategoricalCrossEntropy {};

        let before = layer.execute_layer(&input).unwrap();
        for _ in 0..20 {
            let out = layer.execute_layer(&input).unwrap();
            let back = layer
                .train(
                    &input,
                    (out, TrainCache::None),
                    LayerOutput::FinalOutput {
                        expected: &target,
                        loss_fn: &loss_fn,
                    },
                )
                .unwrap();
            for (p, g) in layer.parameters_mut().into_iter().zip(back.gradients.iter()) {
                p.as_mut_slice()
                    .iter_mut()
                    .zip(g.as_slice().iter())
                    .for_each(|(p, g)| *p -= 0.1 * g);
            }
        }
        let after = layer.execute_layer(&input).unwrap();

        assert!(after.as_slice()[0] > before.as_slice()[0]);
        assert!((after.as_slice().iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
}
