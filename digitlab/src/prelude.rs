pub use crate::{
    config::{LabConfig, TrainOptions},
    controller::{Prediction, RunOutcome, RunStatus, TrainingController},
    dataset::{DataSource, DataVariant, Dataset},
    explain::CamResult,
    preprocess::{canvas_to_sample, Sample},
    LabError,
};
pub use ::neuralnetworks::{
    trainers::{ConsoleObserver, FileObserver, ForwardObserverBuilder, StoreModelObserver},
    EpochRecord, ModelArchitecture, TrainObserver, TrainStatus,
};
pub use ::numbers::Device;
