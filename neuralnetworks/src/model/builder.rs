use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, RwLock};

use numbers::Device;

use super::{LayerDescriptor, Model, ModelArchitecture, ModelState};
use crate::{
    layers::{build_layer, LayerKind},
    metrics::{CategoricalAccuracyMetric, CategoricalCrossEntropy},
    NetworkError,
};

pub struct ModelBuilder {
    architecture: ModelArchitecture,
    seed: u64,
    threads: usize,
}

impl ModelBuilder {
    pub fn new(input_shape: &[usize]) -> ModelBuilder {
        ModelBuilder {
            architecture: ModelArchitecture::from_kinds(input_shape, vec![]),
            seed: 0,
            threads: 1,
        }
    }

    /// Keeps the layer names stored in `architecture`.
    pub fn from_architecture(architecture: ModelArchitecture) -> ModelBuilder {
        ModelBuilder {
            architecture,
            seed: 0,
            threads: 1,
        }
    }

    pub fn add_layer(mut self, kind: LayerKind) -> ModelBuilder {
        let n = self
            .architecture
            .layers
            .iter()
            .filter(|l| l.kind.label() == kind.label())
            .count()
            + 1;
        self.architecture.layers.push(LayerDescriptor {
            name: format!("{}_{}", kind.label(), n),
            kind,
        });
        self
    }

    /// Seed for parameter initialization and dropout masks.
    pub fn seed(mut self, seed: u64) -> ModelBuilder {
        self.seed = seed;
        self
    }

    /// Number of chunks evaluation is split into.
    pub fn threads(mut self, threads: usize) -> ModelBuilder {
        self.threads = threads.max(1);
        self
    }

    pub fn build(self, ctx: &Arc<Device>) -> Result<Model, NetworkError> {
        let architecture = self.architecture;
        if architecture.layers.is_empty() {
            return Err(NetworkError::InvalidLayer {
                name: "model".to_owned(),
                reason: "a model needs at least one layer".to_owned(),
            });
        }
        for (i, layer) in architecture.layers.iter().enumerate() {
            if architecture.layers[..i].iter().any(|l| l.name == layer.name) {
                return Err(NetworkError::InvalidLayer {
                    name: layer.name.clone(),
                    reason: "layer names must be unique".to_owned(),
                });
            }
        }

        let shapes = architecture.shapes()?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let layers = architecture
            .layers
            .iter()
            .zip(shapes.iter())
            .map(|(layer, input_shape)| {
                build_layer(&layer.name, &layer.kind, input_shape, &mut rng, ctx)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let summaries = architecture.layer_summaries()?;

        info!(
            "[ModelBuilder::build] Built model with {} layers and {} parameters",
            layers.len(),
            summaries.iter().map(|s| s.param_count).sum::<usize>()
        );

        Ok(Model {
            architecture,
            summaries,
            state: RwLock::new(Some(ModelState {
                layers,
                optimizer: None,
            })),
            context: Arc::clone(ctx),
            rng: Mutex::new(rng),
            threads: self.threads,
            loss_fn: CategoricalCrossEntropy {},
            accuracy: CategoricalAccuracyMetric {},
        })
    }
}
