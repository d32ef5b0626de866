use numbers::Tensor;

use super::{
    check_batch_shape, ErrorBackpropagation, Layer, LayerKind, LayerOutput, MaxPool2DConfig,
    TrainCache,
};
use crate::{af::Activation, NetworkError};

/// Max pooling over NHWC batches. During training it remembers which input
/// cell won every window so the gradient flows back only to that cell.
pub struct MaxPool2DLayer {
    name: String,
    config: MaxPool2DConfig,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
}

impl MaxPool2DLayer {
    pub fn new(config: MaxPool2DConfig, input_shape: &[usize]) -> Self {
        let output_shape = LayerKind::Pooling(config.clone())
            .output_shape("max_pooling2d", input_shape)
            .unwrap_or_default();

        Self {
            name: "unnamed".to_owned(),
            config,
            input_shape: input_shape.to_vec(),
            output_shape,
        }
    }

    /// Pooled output and, for every output value, the flat input offset it
    /// was taken from.
    fn pool(&self, input: &Tensor) -> Result<(Tensor, Vec<usize>), NetworkError> {
        let n = check_batch_shape(&self.input_shape, input)?;
        let (h, w, c) = (self.input_shape[0], self.input_shape[1], self.input_shape[2]);
        let (oh, ow) = (self.output_shape[0], self.output_shape[1]);
        let [ph, pw] = self.config.pool_size;
        let [sh, sw] = self.config.strides;

        let mut out = Tensor::zeros(&[n, oh, ow, c], input.context());
        let mut routes = Vec::with_capacity(out.len());
        let x = input.as_slice();
        let o = out.as_mut_slice();

        for s in 0..n {
            for oy in 0..oh {
                for ox in 0..ow {
                    for ch in 0..c {
                        let mut best = ((s * h + oy * sh) * w + ox * sw) * c + ch;
                        for py in 0..ph {
                            for px in 0..pw {
                                let idx = ((s * h + oy * sh + py) * w + ox * sw + px) * c + ch;
                                if x[idx] > x[best] {
                                    best = idx;
                                }
                            }
                        }
                        o[routes.len()] = x[best];
                        routes.push(best);
                    }
                }
            }
        }

        Ok((out, routes))
    }
}

impl Layer for MaxPool2DLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Pooling(self.config.clone())
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn execute_layer(&self, arr: &Tensor) -> Result<Tensor, NetworkError> {
        Ok(self.pool(arr)?.0)
    }

    fn pre_train(
        &self,
        input: &Tensor,
        _rng: &mut dyn rand::RngCore,
    ) -> Result<(Tensor, TrainCache), NetworkError> {
        let (out, routes) = self.pool(input)?;
        Ok((out, TrainCache::Routes(routes)))
    }

    fn train(
        &self,
        input: &Tensor,
        received: (Tensor, TrainCache),
        expected: LayerOutput,
    ) -> Result<ErrorBackpropagation, NetworkError> {
        let (output, cache) = received;
        let routes = match cache {
            TrainCache::Routes(routes) => routes,
            _ => self.pool(input)?.1,
        };
        let delta = expected.into_delta(Activation::Linear, &output);

        let mut error = Tensor::zeros(input.shape(), input.context());
        let e = error.as_mut_slice();
        for (route, g) in routes.iter().zip(delta.as_slice().iter()) {
            e[*route] += g;
        }

        Ok(ErrorBackpropagation {
            error,
            gradients: vec![],
        })
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }
}

#[cfg(test)]
mod test {
    use numbers::{Device, Tensor};
    use rand::SeedableRng;

    use crate::layers::{Layer, LayerOutput, MaxPool2DConfig, MaxPool2DLayer};

    fn layer() -> MaxPool2DLayer {
        MaxPool2DLayer::new(
            MaxPool2DConfig {
                pool_size: [2, 2],
                strides: [2, 2],
            },
            &[4, 4, 1],
        )
    }

    fn input() -> Tensor {
        #[rustfmt::skip]
        let values = vec![
            1.0, 2.0, 5.0, 0.0,
            3.0, 4.0, 1.0, 1.0,
            0.0, 0.0, 7.0, 8.0,
            9.0, 0.0, 6.0, 8.0,
        ];
        Tensor::from_vec(&[1, 4, 4, 1], values, &Device::cpu()).unwrap()
    }

    #[test]
    fn test_forward_takes_window_max() {
        let out = layer().execute_layer(&input()).unwrap();
        assert_eq!(out.shape(), &[1, 2, 2, 1]);
        assert_eq!(out.as_slice(), &[4.0, 5.0, 9.0, 8.0]);
    }

    #[test]
    fn test_gradient_goes_to_the_max() {
        let layer = layer();
        let input = input();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);
        let received = layer.pre_train(&input, &mut rng).unwrap();

        let grad = Tensor::from_vec(&[1, 2, 2, 1], vec![1.0, 2.0, 3.0, 4.0], input.context()).unwrap();
        let back = layer
            .train(&input, received, LayerOutput::Intermediate(grad))
            .unwrap();

        #[rustfmt::skip]
        let expected = [
            0.0, 0.0, 2.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 4.0,
            3.0, 0.0, 0.0, 0.0,
        ];
        // ties (8.0 twice) go to the first cell in scan order
        assert_eq!(back.error.as_slice(), &expected);
        assert!(back.gradients.is_empty());
    }
}
