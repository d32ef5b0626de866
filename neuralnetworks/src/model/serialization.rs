use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use numbers::{Device, TensorNoContext};

use super::{Model, ModelArchitecture, ModelBuilder};
use crate::{ModelWeights, NetworkError, SerializableModel};

#[derive(Serialize, Deserialize)]
struct WeightBlob {
    fingerprint: String,
    layers: Vec<LayerBlob>,
}

#[derive(Serialize, Deserialize)]
struct LayerBlob {
    name: String,
    tensors: Vec<TensorNoContext>,
}

fn corrupt(reason: impl ToString) -> NetworkError {
    NetworkError::CorruptWeights(reason.to_string())
}

impl Model {
    /// Architecture descriptor plus a CBOR blob with every parameter tensor,
    /// tagged with the architecture fingerprint.
    pub fn serialize(&self) -> Result<(ModelArchitecture, Vec<u8>), NetworkError> {
        let weights = self.weights()?;
        let blob = WeightBlob {
            fingerprint: self.architecture.fingerprint()?,
            layers: self
                .architecture
                .layers
                .iter()
                .zip(weights.iter())
                .map(|(layer, tensors)| LayerBlob {
                    name: layer.name.clone(),
                    tensors: tensors.iter().map(TensorNoContext::from).collect(),
                })
                .collect(),
        };

        let mut bytes = vec![];
        ciborium::into_writer(&blob, &mut bytes)
            .map_err(|e| NetworkError::Encoding(e.to_string()))?;
        Ok((self.architecture.clone(), bytes))
    }

    /// Rebuilds a model from a matched architecture and weight blob. Shards
    /// of a split blob must be concatenated in order first.
    pub fn deserialize(
        architecture: ModelArchitecture,
        bytes: &[u8],
        ctx: &Arc<Device>,
    ) -> Result<Model, NetworkError> {
        let blob: WeightBlob = ciborium::from_reader(bytes).map_err(corrupt)?;

        let fingerprint = architecture.fingerprint()?;
        if blob.fingerprint != fingerprint {
            return Err(corrupt(format!(
                "weights were saved for architecture {}, not {}",
                blob.fingerprint, fingerprint
            )));
        }
        if blob.layers.len() != architecture.layers.len() {
            return Err(corrupt(format!(
                "expected {} layers, received {}",
                architecture.layers.len(),
                blob.layers.len()
            )));
        }

        let mut weights = Vec::with_capacity(blob.layers.len());
        for (descriptor, layer) in architecture.layers.iter().zip(blob.layers) {
            if descriptor.name != layer.name {
                return Err(corrupt(format!(
                    "expected layer '{}', received '{}'",
                    descriptor.name, layer.name
                )));
            }
            let tensors = layer
                .tensors
                .into_iter()
                .map(|t| t.into_tensor(ctx))
                .collect::<Result<Vec<_>, _>>()
                .map_err(corrupt)?;
            weights.push(tensors);
        }

        let model = ModelBuilder::from_architecture(architecture).build(ctx)?;
        model.load_weights(weights)?;
        debug!("[Model::deserialize] Restored model {}", fingerprint);

        Ok(model)
    }
}

impl SerializableModel for Model {
    fn get_weights(&self) -> Result<ModelWeights, NetworkError> {
        let mut weights = ModelWeights::default();
        for tensors in self.weights()? {
            let tensors: Vec<TensorNoContext> = tensors.iter().map(TensorNoContext::from).collect();
            let mut bytes = vec![];
            ciborium::into_writer(&tensors, &mut bytes)
                .map_err(|e| NetworkError::Encoding(e.to_string()))?;
            weights.layers.push(general_purpose::STANDARD.encode(bytes));
        }
        Ok(weights)
    }

    fn set_weights(&self, weights: ModelWeights) -> Result<(), NetworkError> {
        let mut layers = Vec::with_capacity(weights.layers.len());
        for encoded in weights.layers {
            let bytes = general_purpose::STANDARD.decode(encoded).map_err(corrupt)?;
            let tensors: Vec<TensorNoContext> =
                ciborium::from_reader(bytes.as_slice()).map_err(corrupt)?;
            layers.push(
                tensors
                    .into_iter()
                    .map(|t| t.into_tensor(&self.context))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(corrupt)?,
            );
        }
        self.load_weights(layers)
    }
}

#[cfg(test)]
mod test {
    use base64::{engine::general_purpose, Engine as _};
    use numbers::{Device, TensorNoContext};

    use super::super::test::{halves, small_model};
    use crate::{
        af::Activation, layers::LayerKind, Model, ModelArchitecture, NetworkError,
        SerializableModel,
    };

    #[test]
    fn test_serialize_round_trip_predicts_identically() {
        let ctx = Device::cpu();
        let model = small_model(&ctx);
        let (x, _) = halves(4, &ctx);

        let (arch, bytes) = model.serialize().unwrap();
        let first = Model::deserialize(arch.clone(), &bytes, &ctx).unwrap();
        let second = Model::deserialize(arch, &bytes, &ctx).unwrap();

        let expected = model.forward(&x).unwrap();
        assert_eq!(first.forward(&x).unwrap(), expected);
        assert_eq!(second.forward(&x).unwrap(), expected);
    }

    #[test]
    fn test_mismatched_pair_is_rejected() {
        let ctx = Device::cpu();
        let (_, bytes) = small_model(&ctx).serialize().unwrap();

        let other = ModelArchitecture::from_kinds(
            &[6, 6, 1],
            vec![LayerKind::Flatten, LayerKind::dense(2, Activation::Softmax)],
        );
        assert!(matches!(
            Model::deserialize(other, &bytes, &ctx),
            Err(NetworkError::CorruptWeights(_))
        ));

        let (arch, _) = small_model(&ctx).serialize().unwrap();
        assert!(matches!(
            Model::deserialize(arch.clone(), &bytes[..bytes.len() / 2], &ctx),
            Err(NetworkError::CorruptWeights(_))
        ));
        assert!(matches!(
            Model::deserialize(arch, b"not cbor at all", &ctx),
            Err(NetworkError::CorruptWeights(_))
        ));
    }

    #[test]
    fn test_base64_checkpoint_round_trip() {
        let ctx = Device::cpu();
        let source = small_model(&ctx);
        let target = crate::ModelBuilder::from_architecture(source.architecture().clone())
            .seed(99)
            .build(&ctx)
            .unwrap();
        let (x, _) = halves(2, &ctx);
        assert_ne!(source.forward(&x).unwrap(), target.forward(&x).unwrap());

        let weights = source.get_weights().unwrap();
        assert_eq!(weights.layers.len(), 5);
        let json = serde_json::to_string(&weights).unwrap();
        target
            .set_weights(serde_json::from_str(&json).unwrap())
            .unwrap();
        assert_eq!(source.forward(&x).unwrap(), target.forward(&x).unwrap());

        let mut broken = source.get_weights().unwrap();
        broken.layers[0] = "%%%".to_owned();
        assert!(target.set_weights(broken).is_err());
    }

    #[test]
    fn test_truncated_checkpoint_tensor_is_rejected() {
        let ctx = Device::cpu();
        let source = small_model(&ctx);
        let mut weights = source.get_weights().unwrap();

        let bytes = general_purpose::STANDARD.decode(&weights.layers[0]).unwrap();
        let mut tensors: Vec<TensorNoContext> = ciborium::from_reader(bytes.as_slice()).unwrap();
        tensors[0].contents.truncate(3);
        let mut bytes = vec![];
        ciborium::into_writer(&tensors, &mut bytes).unwrap();
        weights.layers[0] = general_purpose::STANDARD.encode(bytes);

        let (x, _) = halves(2, &ctx);
        let before = source.forward(&x).unwrap();
        assert!(matches!(
            source.set_weights(weights),
            Err(NetworkError::CorruptWeights(_))
        ));
        assert_eq!(source.forward(&x).unwrap(), before);
    }
}
