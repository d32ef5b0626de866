use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use neuralnetworks::{Model, ModelArchitecture};
use numbers::Tensor;

use super::TrainingController;
use crate::LabError;

/// Name of the architecture file `load_pretrained` reads.
pub const PRETRAINED_FILE: &str = "model.json";

/// In-memory copy of a model, independent of the live one.
pub struct SavedSnapshot {
    pub name: String,
    pub saved_at: NaiveDateTime,
    pub architecture: ModelArchitecture,
    weights: Vec<Vec<Tensor>>,
}

/// The architecture file of an exported model. Weight shards sit next to it
/// and are concatenated in the listed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFile {
    pub architecture: ModelArchitecture,
    pub weight_shards: Vec<String>,
}

fn corrupt(path: &Path, err: impl std::fmt::Display) -> LabError {
    LabError::CorruptModel(format!("{}: {}", path.display(), err))
}

impl TrainingController {
    /// Keeps a deep copy of the active model's weights, replacing any
    /// earlier snapshot.
    pub fn save_snapshot(&self, name: &str) -> Result<(), LabError> {
        self.ensure_idle()?;
        let model = self.active_model()?;
        let snapshot = SavedSnapshot {
            name: name.to_owned(),
            saved_at: Utc::now().naive_utc(),
            architecture: model.architecture().clone(),
            weights: model.weights()?,
        };
        *self.snapshot.lock()? = Some(snapshot);
        info!("[TrainingController::save_snapshot] Saved snapshot '{}'", name);
        Ok(())
    }

    pub fn snapshot_name(&self) -> Option<String> {
        self.snapshot
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.name.clone()))
    }

    /// Activates a new model built from the snapshot. The snapshot is kept.
    pub fn restore_snapshot(&self) -> Result<(), LabError> {
        self.ensure_idle()?;
        let model = {
            let lock = self.snapshot.lock()?;
            let snapshot = lock
                .as_ref()
                .ok_or_else(|| LabError::NotReady("no snapshot has been saved".to_owned()))?;
            let model = self
                .builder(snapshot.architecture.clone())
                .build(&self.context)?;
            model.load_weights(snapshot.weights.clone())?;
            model
        };
        self.swap_model(model)
    }

    /// Writes `<name>.json` plus weight shards `<name>.weights.<i>.bin` into
    /// `dir`. Returns every written path, the architecture file first.
    pub fn export_model(&self, dir: &Path, name: &str) -> Result<Vec<PathBuf>, LabError> {
        self.ensure_idle()?;
        let model = self.active_model()?;
        let (architecture, bytes) = model.serialize()?;

        std::fs::create_dir_all(dir).map_err(|e| LabError::io(dir, e))?;
        let mut written = vec![dir.join(format!("{}.json", name))];
        let mut weight_shards = vec![];
        for (i, shard) in bytes.chunks(self.config.shard_bytes).enumerate() {
            let file_name = format!("{}.weights.{}.bin", name, i);
            let path = dir.join(&file_name);
            std::fs::write(&path, shard).map_err(|e| LabError::io(&path, e))?;
            weight_shards.push(file_name);
            written.push(path);
        }

        let file = ModelFile {
            architecture,
            weight_shards,
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| LabError::CorruptModel(e.to_string()))?;
        std::fs::write(&written[0], json).map_err(|e| LabError::io(&written[0], e))?;

        info!(
            "[TrainingController::export_model] Exported '{}' as {} files",
            name,
            written.len()
        );
        Ok(written)
    }

    /// Loads an exported model. `weight_paths` overrides the shards listed
    /// in the architecture file. The active model is kept on failure.
    pub fn load_model(&self, arch_path: &Path, weight_paths: &[PathBuf]) -> Result<(), LabError> {
        self.ensure_idle()?;

        let reader = File::open(arch_path)
            .map(BufReader::new)
            .map_err(|e| LabError::io(arch_path, e))?;
        let file: ModelFile = serde_json::from_reader(reader).map_err(|e| corrupt(arch_path, e))?;

        let shards: Vec<PathBuf> = if weight_paths.is_empty() {
            let base = arch_path.parent().unwrap_or_else(|| Path::new(""));
            file.weight_shards.iter().map(|s| base.join(s)).collect()
        } else {
            weight_paths.to_vec()
        };
        if shards.is_empty() {
            return Err(corrupt(arch_path, "no weight files were given"));
        }

        let mut bytes = vec![];
        for shard in &shards {
            let mut part = std::fs::read(shard).map_err(|e| LabError::io(shard, e))?;
            bytes.append(&mut part);
        }

        let model = Model::deserialize(file.architecture, &bytes, &self.context)?;
        self.swap_model(model)?;
        info!(
            "[TrainingController::load_model] Loaded '{}' from {} weight files",
            arch_path.display(),
            shards.len()
        );
        Ok(())
    }

    /// Loads `model.json` and its shards from the pretrained directory.
    pub fn load_pretrained(&self) -> Result<(), LabError> {
        let path = self.config.pretrained_dir.join(PRETRAINED_FILE);
        self.load_model(&path, &[])
    }
}

#[cfg(test)]
mod test {
    use numbers::Device;

    use super::super::test::{controller, tiny_architecture};
    use crate::{LabError, Sample, TrainingController};

    /// Shifts every parameter of the active model.
    fn perturb(controller: &TrainingController) {
        let model = controller.model().unwrap();
        let shifted: Vec<Vec<_>> = model
            .weights()
            .unwrap()
            .into_iter()
            .map(|layer| layer.iter().map(|t| t.map(|v| v + 0.1)).collect())
            .collect();
        model.load_weights(shifted).unwrap();
    }

    #[test]
    fn test_snapshot_survives_model_replacement() {
        let ctx = Device::cpu();
        let controller = controller(&ctx);
        assert!(matches!(
            controller.restore_snapshot(),
            Err(LabError::NotReady(_))
        ));

        controller.new_model_from(tiny_architecture()).unwrap();
        let sample = Sample::new(vec![0.5; 784]).unwrap();
        let before = controller.predict(&sample).unwrap();
        controller.save_snapshot("first").unwrap();
        assert_eq!(controller.snapshot_name().as_deref(), Some("first"));

        perturb(&controller);
        assert_ne!(controller.predict(&sample).unwrap(), before);
        controller.restore_snapshot().unwrap();
        assert_eq!(controller.predict(&sample).unwrap(), before);
    }

    #[test]
    fn test_export_splits_weights_into_shards() {
        let ctx = Device::cpu();
        let dir = tempfile::tempdir().unwrap();
        let mut config = controller(&ctx).config().clone();
        config.shard_bytes = 256;
        let controller = TrainingController::new(
            config,
            Box::new(crate::dataset::SyntheticDataSource::new(10, 5, 1)),
            &ctx,
        )
        .unwrap();
        controller.new_model_from(tiny_architecture()).unwrap();
        let sample = Sample::new(vec![0.25; 784]).unwrap();
        let before = controller.predict(&sample).unwrap();

        let written = controller.export_model(dir.path(), "tiny").unwrap();
        assert!(written.len() > 2);
        assert!(written[0].ends_with("tiny.json"));

        perturb(&controller);
        controller.load_model(&written[0], &[]).unwrap();
        assert_eq!(controller.predict(&sample).unwrap(), before);

        let missing = controller.load_model(&dir.path().join("nope.json"), &[]);
        assert!(matches!(missing, Err(LabError::IOFailure(_))));
    }
}
