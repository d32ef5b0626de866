use numbers::Tensor;
use rand::Rng;

use super::{check_batch_shape, DropoutConfig, ErrorBackpropagation, Layer, LayerKind, LayerOutput, TrainCache};
use crate::{af::Activation, NetworkError};

/// Inverted dropout: identity at inference, during training every value is
/// either zeroed or scaled by `1 / (1 - rate)`.
pub struct DropoutLayer {
    name: String,
    config: DropoutConfig,
    input_shape: Vec<usize>,
}

impl DropoutLayer {
    pub fn new(config: DropoutConfig, input_shape: &[usize]) -> Self {
        Self {
            name: "unnamed".to_owned(),
            config,
            input_shape: input_shape.to_vec(),
        }
    }
}

impl Layer for DropoutLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Dropout(self.config.clone())
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn execute_layer(&self, arr: &Tensor) -> Result<Tensor, NetworkError> {
        check_batch_shape(&self.input_shape, arr)?;
        Ok(arr.clone())
    }

    fn pre_train(
        &self,
        input: &Tensor,
        rng: &mut dyn rand::RngCore,
    ) -> Result<(Tensor, TrainCache), NetworkError> {
        check_batch_shape(&self.input_shape, input)?;
        let rate = self.config.rate;
        if rate <= 0.0 {
            return Ok((input.clone(), TrainCache::None));
        }

        let keep = 1.0 / (1.0 - rate);
        let mask = Tensor::random(
            input.shape(),
            rng,
            |rng| if rng.gen::<f32>() >= rate { keep } else { 0.0 },
            input.context(),
        );
        let output = input.clone().hadamard_prod(&mask);

        Ok((output, TrainCache::Mask(mask)))
    }

    fn train(
        &self,
        _input: &Tensor,
        received: (Tensor, TrainCache),
        expected: LayerOutput,
    ) -> Result<ErrorBackpropagation, NetworkError> {
        let (output, cache) = received;
        let delta = expected.into_delta(Activation::Linear, &output);
        let error = match cache {
            TrainCache::Mask(mask) => delta.hadamard_prod(&mask),
            _ => delta,
        };

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
