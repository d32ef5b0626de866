use numbers::Tensor;

use super::{check_batch_shape, ErrorBackpropagation, Layer, LayerKind, LayerOutput, TrainCache};
use crate::{af::Activation, NetworkError};

pub struct FlattenLayer {
    name: String,
    input_shape: Vec<usize>,
}

impl FlattenLayer {
    pub fn new(input_shape: &[usize]) -> Self {
        Self {
            name: "unnamed".to_owned(),
            input_shape: input_shape.to_vec(),
        }
    }
}

impl Layer for FlattenLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Flatten
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn execute_layer(&self, arr: &Tensor) -> Result<Tensor, NetworkError> {
        let n = check_batch_shape(&self.input_shape, arr)?;
        let units = self.input_shape.iter().product();
        Ok(arr.clone().reshape(&[n, units])?)
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
        let delta = expected.into_delta(Activation::Linear, &received.0);
        Ok(ErrorBackpropagation {
            error: delta.reshape(input.shape())?,
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

    use crate::layers::{FlattenLayer, Layer, LayerOutput, TrainCache};

    #[test]
    fn test_flatten_round_trip_shapes() {
        let ctx = Device::cpu();
        let layer = FlattenLayer::new(&[2, 2, 3]);
        let input = Tensor::filled(&[5, 2, 2, 3], 1.5, &ctx);

        let out = layer.execute_layer(&input).unwrap();
        assert_eq!(out.shape(), &[5, 12]);

        let grad = Tensor::filled(&[5, 12], 1.0, &ctx);
        let back = layer
            .train(&input, (out, TrainCache::None), LayerOutput::Intermediate(grad))
            .unwrap();
        assert_eq!(back.error.shape(), input.shape());
    }
}
