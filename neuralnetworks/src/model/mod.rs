use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, RwLock};

use numbers::{Device, Tensor};

use crate::{
    layers::{check_batch_shape, Layer, LayerKind, LayerOutput, TrainCache},
    metrics::{BatchMetrics, CategoricalAccuracyMetric, CategoricalCrossEntropy, Metric},
    optimizer::{Optimizer, OptimizerState},
    NetworkError,
};

mod architecture;
mod builder;
mod serialization;

pub use architecture::*;
pub use builder::ModelBuilder;

/// Upper bound on the samples evaluated in one forward pass.
const EVAL_CHUNK: usize = 256;

pub(crate) struct ModelState {
    layers: Vec<Box<dyn Layer>>,
    optimizer: Option<OptimizerState>,
}

/// A sequential network. All layer state sits behind one lock: a training
/// step holds the write lock for one batch, inference holds the read lock
/// for one call.
pub struct Model {
    architecture: ModelArchitecture,
    summaries: Vec<LayerSummary>,
    state: RwLock<Option<ModelState>>,
    context: Arc<Device>,
    rng: Mutex<ChaCha8Rng>,
    threads: usize,
    loss_fn: CategoricalCrossEntropy,
    accuracy: CategoricalAccuracyMetric,
}

fn run_layers(layers: &[Box<dyn Layer>], input: &Tensor) -> Result<Tensor, NetworkError> {
    let mut current: Option<Tensor> = None;
    for layer in layers {
        let next = layer.execute_layer(current.as_ref().unwrap_or(input))?;
        current = Some(next);
    }
    Ok(current.unwrap_or_else(|| input.clone()))
}

impl Model {
    pub fn architecture(&self) -> &ModelArchitecture {
        &self.architecture
    }

    pub fn context(&self) -> &Arc<Device> {
        &self.context
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.architecture.input_shape
    }

    pub fn layer_summaries(&self) -> &[LayerSummary] {
        &self.summaries
    }

    pub fn layer_kind(&self, index: usize) -> Option<&LayerKind> {
        self.architecture.layers.get(index).map(|l| &l.kind)
    }

    pub fn last_conv_layer(&self) -> Option<usize> {
        self.architecture.last_conv_layer()
    }

    /// Resets the optimizer. Moments from earlier runs are discarded.
    pub fn compile(&self, optimizer: Optimizer) -> Result<(), NetworkError> {
        let mut lock = self.state.write()?;
        let state = lock.as_mut().ok_or(NetworkError::Disposed)?;
        info!(
            "[Model::compile] Compiling with {:?} (learning rate {})",
            optimizer,
            optimizer.learning_rate()
        );
        state.optimizer = Some(OptimizerState::new(optimizer));
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.state.read().as_deref(), Ok(Some(s)) if s.optimizer.is_some())
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor, NetworkError> {
        let lock = self.state.read()?;
        let state = lock.as_ref().ok_or(NetworkError::Disposed)?;
        run_layers(&state.layers, input)
    }

    /// Class probabilities for a single flattened sample.
    pub fn predict_one(&self, sample: &[f32]) -> Result<Vec<f32>, NetworkError> {
        let mut shape = vec![1];
        shape.extend_from_slice(self.input_shape());
        let input = Tensor::from_slice(&shape, sample, &self.context)?;
        Ok(self.forward(&input)?.to_vec())
    }

    /// Output of layer `index` after running every layer up to it.
    pub fn layer_output(&self, index: usize, input: &Tensor) -> Result<Tensor, NetworkError> {
        let lock = self.state.read()?;
        let state = lock.as_ref().ok_or(NetworkError::Disposed)?;
        if index >= state.layers.len() {
            return Err(NetworkError::LayerIndex {
                index,
                layers: state.layers.len(),
            });
        }
        run_layers(&state.layers[..=index], input)
    }

    /// One gradient update on a batch. Returns the loss and accuracy of the
    /// batch as seen by the forward pass of this update.
    pub fn train_on_batch(&self, x: &Tensor, y: &Tensor) -> Result<BatchMetrics, NetworkError> {
        let mut lock = self.state.write()?;
        let ModelState { layers, optimizer } = lock.as_mut().ok_or(NetworkError::Disposed)?;
        let optimizer = optimizer.as_mut().ok_or(NetworkError::NotCompiled)?;
        check_batch_shape(self.input_shape(), x)?;

        let mut rng = self.rng.lock()?;

        let mut activations: Vec<Tensor> = Vec::with_capacity(layers.len() + 1);
        let mut caches: Vec<TrainCache> = Vec::with_capacity(layers.len());
        activations.push(x.clone());
        for layer in layers.iter() {
            let (output, cache) =
                layer.pre_train(&activations[activations.len() - 1], &mut *rng)?;
            activations.push(output);
            caches.push(cache);
        }
        drop(rng);

        let received = &activations[activations.len() - 1];
        if received.shape() != y.shape() {
            return Err(NetworkError::InputShape {
                expected: received.shape().to_vec(),
                received: y.shape().to_vec(),
            });
        }
        let metrics = BatchMetrics {
            loss: self.loss_fn.calc_metric(y, received),
            accuracy: self.accuracy.calc_metric(y, received),
        };

        let mut gradients: Vec<Vec<Tensor>> = Vec::with_capacity(layers.len());
        let mut upstream: Option<Tensor> = None;
        for (i, layer) in layers.iter().enumerate().rev() {
            let (Some(output), Some(cache)) = (activations.pop(), caches.pop()) else {
                break;
            };
            let expected = match upstream.take() {
                None => LayerOutput::FinalOutput {
                    expected: y,
                    loss_fn: &self.loss_fn,
                },
                Some(grad) => LayerOutput::Intermediate(grad),
            };
            trace!("[Model::train_on_batch] Backpropagating layer {}", i);
            let back = layer.train(&activations[i], (output, cache), expected)?;
            upstream = Some(back.error);
            gradients.push(back.gradients);
        }
        drop(upstream);
        drop(activations);

        optimizer.begin_step();
        let mut index = 0;
        for (layer, grads) in layers.iter_mut().zip(gradients.into_iter().rev()) {
            for (param, grad) in layer.parameters_mut().into_iter().zip(grads.iter()) {
                optimizer.apply(index, param, grad);
                index += 1;
            }
        }

        Ok(metrics)
    }

    /// Loss and accuracy over a whole set, weighted by sample.
    pub fn evaluate(&self, x: &Tensor, y: &Tensor) -> Result<BatchMetrics, NetworkError> {
        let n = x.outer_dim();
        if y.outer_dim() != n {
            return Err(NetworkError::InputShape {
                expected: vec![n],
                received: y.shape().to_vec(),
            });
        }
        if n == 0 {
            return Ok(BatchMetrics::default());
        }

        let lock = self.state.read()?;
        let state = lock.as_ref().ok_or(NetworkError::Disposed)?;

        let chunk = n.div_ceil(self.threads).clamp(1, EVAL_CHUNK);
        let starts: Vec<usize> = (0..n).step_by(chunk).collect();
        trace!(
            "[Model::evaluate] Evaluating {} samples in {} chunks",
            n,
            starts.len()
        );

        let eval_chunk = |start: usize| -> Result<(f32, f32), NetworkError> {
            let len = chunk.min(n - start);
            let received = run_layers(&state.layers, &x.slice_outer(start, len)?)?;
            let expected = y.slice_outer(start, len)?;
            Ok((
                self.loss_fn.calc_metric(&expected, &received) * len as f32,
                self.accuracy.calc_metric(&expected, &received) * len as f32,
            ))
        };

        #[cfg(feature = "rayon")]
        let parts = {
            use rayon::prelude::{IntoParallelIterator, ParallelIterator};
            starts
                .into_par_iter()
                .map(eval_chunk)
                .collect::<Result<Vec<_>, _>>()?
        };
        #[cfg(not(feature = "rayon"))]
        let parts = starts
            .into_iter()
            .map(eval_chunk)
            .collect::<Result<Vec<_>, _>>()?;

        let (loss, accuracy) = parts
            .iter()
            .fold((0.0, 0.0), |acc, (l, a)| (acc.0 + l, acc.1 + a));
        Ok(BatchMetrics {
            loss: loss / n as f32,
            accuracy: accuracy / n as f32,
        })
    }

    /// Deep copies of the parameters of layer `index`.
    pub fn layer_weights(&self, index: usize) -> Result<Vec<Tensor>, NetworkError> {
        let lock = self.state.read()?;
        let state = lock.as_ref().ok_or(NetworkError::Disposed)?;
        state
            .layers
            .get(index)
            .map(|l| l.get_weights())
            .ok_or(NetworkError::LayerIndex {
                index,
                layers: state.layers.len(),
            })
    }

    /// Deep copies of every parameter, grouped by layer.
    pub fn weights(&self) -> Result<Vec<Vec<Tensor>>, NetworkError> {
        let lock = self.state.read()?;
        let state = lock.as_ref().ok_or(NetworkError::Disposed)?;
        Ok(state.layers.iter().map(|l| l.get_weights()).collect())
    }

    /// Replaces every parameter. Nothing is changed unless all shapes match.
    pub fn load_weights(&self, weights: Vec<Vec<Tensor>>) -> Result<(), NetworkError> {
        let mut lock = self.state.write()?;
        let state = lock.as_mut().ok_or(NetworkError::Disposed)?;
        if weights.len() != state.layers.len() {
            return Err(NetworkError::CorruptWeights(format!(
                "expected weights for {} layers, received {}",
                state.layers.len(),
                weights.len()
            )));
        }
        for (layer, tensors) in state.layers.iter().zip(weights.iter()) {
            let expected: Vec<&[usize]> = layer.parameters().iter().map(|p| p.shape()).collect();
            let received: Vec<&[usize]> = tensors.iter().map(|t| t.shape()).collect();
            if expected != received {
                return Err(NetworkError::CorruptWeights(format!(
                    "layer '{}' expects shapes {:?}, received {:?}",
                    layer.name(),
                    expected,
                    received
                )));
            }
        }

        for (layer, tensors) in state.layers.iter_mut().zip(weights.into_iter()) {
            layer.set_weights(tensors)?;
        }
        Ok(())
    }

    /// Drops every layer and the optimizer. Later calls fail with
    /// [`NetworkError::Disposed`].
    pub fn dispose(&self) {
        let mut lock = match self.state.write() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        if lock.take().is_some() {
            info!("[Model::dispose] Released model parameters");
        }
    }

    pub fn is_disposed(&self) -> bool {
        !matches!(self.state.read().as_deref(), Ok(Some(_)))
    }
}

#[cfg(test)]
mod test {
    use numbers::{Device, Tensor};
    use rand::{Rng, SeedableRng};

    use crate::{af::Activation, layers::LayerKind, optimizer::Optimizer, NetworkError};

    use super::{Model, ModelBuilder};

    pub(crate) fn small_model(ctx: &std::sync::Arc<Device>) -> Model {
        ModelBuilder::new(&[6, 6, 1])
            .add_layer(LayerKind::conv2d(3, 3, Activation::Relu))
            .add_layer(LayerKind::max_pool(2))
            .add_layer(LayerKind::Flatten)
            .add_layer(LayerKind::dropout(0.1))
            .add_layer(LayerKind::dense(2, Activation::Softmax))
            .seed(5)
            .build(ctx)
            .unwrap()
    }

    /// Bright left half is class 0, bright right half class 1.
    pub(crate) fn halves(n: usize, ctx: &std::sync::Arc<Device>) -> (Tensor, Tensor) {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(9);
        let mut x = Vec::with_capacity(n * 36);
        let mut y = Vec::with_capacity(n * 2);
        for i in 0..n {
            let class = i % 2;
            for _ in 0..6 {
                for col in 0..6 {
                    let bright = (col < 3) == (class == 0);
                    let noise: f32 = rng.gen_range(0.0..0.2);
                    x.push(if bright { 0.8 + noise } else { noise });
                }
            }
            y.extend_from_slice(if class == 0 { &[1.0, 0.0] } else { &[0.0, 1.0] });
        }
        (
            Tensor::from_vec(&[n, 6, 6, 1], x, ctx).unwrap(),
            Tensor::from_vec(&[n, 2], y, ctx).unwrap(),
        )
    }

    #[test]
    fn test_training_reduces_loss() {
        let ctx = Device::cpu();
        let model = small_model(&ctx);
        let (x, y) = halves(32, &ctx);

        assert!(matches!(
            model.train_on_batch(&x, &y),
            Err(NetworkError::NotCompiled)
        ));
        model.compile(Optimizer::adam(0.02)).unwrap();

        let before = model.evaluate(&x, &y).unwrap();
        for _ in 0..50 {
            let m = model.train_on_batch(&x, &y).unwrap();
            assert!((0.0..=1.0).contains(&m.accuracy));
        }
        let after = model.evaluate(&x, &y).unwrap();

        assert!(after.loss < before.loss);
        assert!(after.accuracy >= 0.9);
    }

    #[test]
    fn test_forward_and_layer_output() {
        let ctx = Device::cpu();
        let model = small_model(&ctx);
        let (x, _) = halves(3, &ctx);

        let out = model.forward(&x).unwrap();
        assert_eq!(out.shape(), &[3, 2]);
        for row in out.as_slice().chunks(2) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }

        let conv = model.layer_output(0, &x).unwrap();
        assert_eq!(conv.shape(), &[3, 4, 4, 3]);
        assert!(matches!(
            model.layer_output(5, &x),
            Err(NetworkError::LayerIndex { index: 5, layers: 5 })
        ));

        let one = model.predict_one(&x.as_slice()[..36]).unwrap();
        assert_eq!(one, out.as_slice()[..2].to_vec());
        assert!(model.predict_one(&[0.0; 35]).is_err());
    }

    #[test]
    fn test_weights_are_deep_copies() {
        let ctx = Device::cpu();
        let model = small_model(&ctx);
        let (x, y) = halves(8, &ctx);
        model.compile(Optimizer::sgd(0.1)).unwrap();

        let saved = model.weights().unwrap();
        let before = model.forward(&x).unwrap();
        model.train_on_batch(&x, &y).unwrap();
        assert_ne!(model.forward(&x).unwrap(), before);

        model.load_weights(saved).unwrap();
        assert_eq!(model.forward(&x).unwrap(), before);

        let mut wrong = model.weights().unwrap();
        wrong[0].pop();
        assert!(matches!(
            model.load_weights(wrong),
            Err(NetworkError::CorruptWeights(_))
        ));
        assert_eq!(model.forward(&x).unwrap(), before);
    }

    #[test]
    fn test_dispose_releases_tensors() {
        let ctx = Device::cpu();
        let model = small_model(&ctx);
        assert!(ctx.live_tensors() > 0);
        assert_eq!(model.layer_summaries().len(), 5);
        assert_eq!(model.last_conv_layer(), Some(0));

        model.dispose();
        assert!(model.is_disposed());
        assert_eq!(ctx.live_tensors(), 0);
        assert!(matches!(
            model.forward(&Tensor::zeros(&[1, 6, 6, 1], &ctx)),
            Err(NetworkError::Disposed)
        ));
        model.dispose();
    }

    #[test]
    fn test_evaluate_weights_chunks_by_size() {
        let ctx = Device::cpu();
        let model = ModelBuilder::new(&[6, 6, 1])
            .add_layer(LayerKind::Flatten)
            .add_layer(LayerKind::dense(2, Activation::Softmax))
            .threads(3)
            .build(&ctx)
            .unwrap();
        let (x, y) = halves(7, &ctx);

        let whole = model.evaluate(&x, &y).unwrap();
        let manual = model.forward(&x).unwrap();
        let loss = crate::metrics::Metric::calc_metric(&model.loss_fn, &y, &manual);
        assert!((whole.loss - loss).abs() < 1e-5);
    }

    #[test]
    fn test_builder_rejects_bad_stacks() {
        let ctx = Device::cpu();
        assert!(ModelBuilder::new(&[6, 6, 1]).build(&ctx).is_err());
        assert!(ModelBuilder::new(&[6, 6, 1])
            .add_layer(LayerKind::dense(2, Activation::Softmax))
            .build(&ctx)
            .is_err());
    }
}
