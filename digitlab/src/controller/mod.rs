//! The training controller owns the active model and dataset, drives the
//! training loop and serves predictions and explanations.

use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, RwLock,
};

use neuralnetworks::{EpochRecord, Model, ModelArchitecture, ModelBuilder};
use numbers::Device;

use crate::{
    config::LabConfig,
    dataset::{
        CsvDataSource, DataSource, DataVariant, Dataset, DatasetInfo, IdxDataSource,
    },
    explain::{compute_cam, CamResult},
    LabError, Sample,
};

mod controls;
mod history;
mod persistence;
mod run;
mod training;

pub use controls::*;
pub use history::*;
pub use persistence::*;
pub use run::*;
pub use training::batch_ranges;

/// Class probabilities of one sample and the winning class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub probabilities: Vec<f32>,
    pub class: usize,
    pub confidence: f32,
}

impl Prediction {
    fn from_probabilities(probabilities: Vec<f32>) -> Self {
        let (class, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });
        Self {
            probabilities,
            class,
            confidence: confidence.max(0.0),
        }
    }
}

pub struct TrainingController {
    config: LabConfig,
    context: Arc<Device>,
    model: RwLock<Option<Arc<Model>>>,
    dataset: RwLock<Option<Arc<Dataset>>>,
    source: Box<dyn DataSource>,
    run: Arc<RunHandle>,
    history: Mutex<MetricsHistory>,
    trained_epochs: AtomicUsize,
    snapshot: Mutex<Option<SavedSnapshot>>,
}

impl TrainingController {
    pub fn new(
        config: LabConfig,
        source: Box<dyn DataSource>,
        ctx: &Arc<Device>,
    ) -> Result<Self, LabError> {
        config.validate()?;
        Ok(Self {
            config,
            context: Arc::clone(ctx),
            model: RwLock::new(None),
            dataset: RwLock::new(None),
            source,
            run: Arc::new(RunHandle::default()),
            history: Mutex::new(MetricsHistory::default()),
            trained_epochs: AtomicUsize::new(0),
            snapshot: Mutex::new(None),
        })
    }

    /// Reads IDX files when `data_dir` holds them, CSV files otherwise.
    pub fn from_config(config: LabConfig) -> Result<Self, LabError> {
        let source: Box<dyn DataSource> =
            if config.data_dir.join("train-images-idx3-ubyte").exists() {
                Box::new(IdxDataSource::new(&config.data_dir))
            } else {
                Box::new(CsvDataSource::new(&config.data_dir))
            };
        Self::new(config, source, &Device::cpu())
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<Device> {
        &self.context
    }

    pub fn run(&self) -> &Arc<RunHandle> {
        &self.run
    }

    pub fn status(&self) -> RunStatus {
        self.run.status()
    }

    pub fn progress(&self) -> TrainingRun {
        self.run.progress()
    }

    pub fn pause(&self) {
        self.run.pause();
    }

    pub fn resume(&self) {
        self.run.resume();
    }

    pub fn toggle_pause(&self) -> bool {
        self.run.toggle_pause()
    }

    pub fn stop(&self) {
        self.run.stop();
    }

    pub fn model(&self) -> Option<Arc<Model>> {
        self.model.read().ok().and_then(|slot| slot.clone())
    }

    pub fn dataset(&self) -> Option<Arc<Dataset>> {
        self.dataset.read().ok().and_then(|slot| slot.clone())
    }

    pub fn history(&self) -> Result<Vec<EpochRecord>, LabError> {
        Ok(self.history.lock()?.records().to_vec())
    }

    /// Epochs finished on the active model, summed over every run.
    pub fn trained_epochs(&self) -> usize {
        self.trained_epochs.load(Ordering::SeqCst)
    }

    fn active_model(&self) -> Result<Arc<Model>, LabError> {
        self.model()
            .ok_or_else(|| LabError::NotReady("no model exists, create or load one first".to_owned()))
    }

    fn ensure_idle(&self) -> Result<(), LabError> {
        if self.run.status().is_active() {
            return Err(LabError::Busy);
        }
        Ok(())
    }

    /// Puts `model` in the slot and disposes the one it replaces. Rejected
    /// while a run is active, in which case `model` is disposed instead.
    pub(crate) fn swap_model(&self, model: Model) -> Result<(), LabError> {
        let mut slot = self.model.write()?;
        if let Err(e) = self.ensure_idle() {
            model.dispose();
            return Err(e);
        }

        let previous = self.activate(&mut slot, model)?;
        drop(slot);

        if let Some(previous) = previous {
            previous.dispose();
        }
        Ok(())
    }

    /// Fills the write-locked `slot` with `model` and forgets the history of
    /// the one it replaces, which is returned for disposal.
    fn activate(
        &self,
        slot: &mut Option<Arc<Model>>,
        model: Model,
    ) -> Result<Option<Arc<Model>>, LabError> {
        self.history.lock()?.clear();
        self.trained_epochs.store(0, Ordering::SeqCst);
        info!("[TrainingController::activate] Activated a new model");
        Ok(slot.replace(Arc::new(model)))
    }

    fn builder(&self, architecture: ModelArchitecture) -> ModelBuilder {
        ModelBuilder::from_architecture(architecture)
            .seed(self.config.seed())
            .threads(self.config.num_threads)
    }

    /// Replaces the active model with a freshly initialized digit classifier.
    pub fn new_model(&self) -> Result<(), LabError> {
        self.new_model_from(ModelArchitecture::digit_classifier())
    }

    pub fn new_model_from(&self, architecture: ModelArchitecture) -> Result<(), LabError> {
        self.ensure_idle()?;
        let model = self.builder(architecture).build(&self.context)?;
        self.swap_model(model)
    }

    /// Loads `variant` from the data source. On failure the previous dataset
    /// stays loaded.
    pub fn select_data_source(
        &self,
        variant: DataVariant,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<DatasetInfo, LabError> {
        info!(
            "[TrainingController::select_data_source] Loading the {} dataset",
            variant
        );
        let dataset = match self.source.load(variant, on_progress, &self.context) {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!(
                    "[TrainingController::select_data_source] Keeping the previous dataset: {}",
                    e
                );
                return Err(e);
            }
        };
        self.load_dataset(dataset)
    }

    pub fn load_dataset(&self, dataset: Dataset) -> Result<DatasetInfo, LabError> {
        let info = dataset.info();
        *self.dataset.write()? = Some(Arc::new(dataset));
        info!(
            "[TrainingController::load_dataset] Loaded {} training and {} test samples",
            info.num_train, info.num_test
        );
        Ok(info)
    }

    pub fn predict(&self, sample: &Sample) -> Result<Prediction, LabError> {
        let model = self.active_model()?;
        let probabilities = model.predict_one(sample.pixels())?;
        Ok(Prediction::from_probabilities(probabilities))
    }

    /// Prediction plus the class-activation map of the predicted class. A
    /// failed explanation is logged and withheld.
    pub fn predict_and_explain(
        &self,
        sample: &Sample,
    ) -> Result<(Prediction, Option<CamResult>), LabError> {
        let model = self.active_model()?;
        let prediction = Prediction::from_probabilities(model.predict_one(sample.pixels())?);
        let cam = match compute_cam(&model, sample, prediction.class) {
            Ok(cam) => Some(cam),
            Err(e) => {
                warn!(
                    "[TrainingController::predict_and_explain] Explanation withheld: {}",
                    e
                );
                None
            }
        };
        Ok((prediction, cam))
    }
}
