use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::NetworkError;

pub trait SerializableModel {
    fn get_weights(&self) -> Result<ModelWeights, NetworkError>;
    fn set_weights(&self, weights: ModelWeights) -> Result<(), NetworkError>;
}

/// Base64 encoded weights, one entry per layer in layer order.
#[derive(Default, Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ModelWeights {
    pub layers: Vec<String>,
}

/// Receives progress events from a training loop.
pub trait TrainObserver: Send + Sync {
    fn send_status(&self, status: &TrainStatus);
}

impl<F: Fn(&TrainStatus) + Send + Sync> TrainObserver for F {
    fn send_status(&self, status: &TrainStatus) {
        self(status)
    }
}

/// Metrics of a fully completed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f32,
    pub train_accuracy: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
}

pub enum TrainStatus<'a> {
    TrainSuspended {
        since: NaiveDateTime,
    },
    TrainStart {
        at: NaiveDateTime,
        total_epochs: usize,
        total_batches: usize,
    },
    EpochStart {
        epoch: usize,
        at: NaiveDateTime,
    },
    EpochUpdate {
        current_epoch: usize,
        total_epochs: usize,
        current_batch: usize,
        total_batches: usize,
        batch_start: NaiveDateTime,
        batch_end: NaiveDateTime,
        loss: f32,
        accuracy: f32,
    },
    EpochEnd {
        total_epochs: usize,
        start: NaiveDateTime,
        end: NaiveDateTime,
        record: &'a EpochRecord,
        history: &'a [EpochRecord],
        get_weights: &'a dyn Fn() -> Result<ModelWeights, NetworkError>,
    },
    TrainEnd {
        start: NaiveDateTime,
        end: NaiveDateTime,
        completed_epochs: usize,
        stopped: bool,
    },
    TrainAborted {
        at: NaiveDateTime,
        reason: &'a str,
    },
}
