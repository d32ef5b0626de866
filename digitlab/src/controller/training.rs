use chrono::Utc;
use std::{sync::Arc, time::Duration};

use neuralnetworks::{
    optimizer::Optimizer, EpochRecord, Model, SerializableModel, TrainObserver, TrainStatus,
};

use super::{batch_mean, RunOutcome, RunStatus, TrainingController};
use crate::{config::TrainOptions, dataset::Dataset, LabError};

/// `(start, len)` of every batch of an epoch. The last batch is clipped to
/// the end of the set.
pub fn batch_ranges(num_train: usize, batch_size: usize) -> impl Iterator<Item = (usize, usize)> {
    let total = if batch_size == 0 {
        0
    } else {
        num_train.div_ceil(batch_size)
    };
    (0..total).map(move |batch| {
        let start = (batch * batch_size) % num_train;
        (start, batch_size.min(num_train - start))
    })
}

impl TrainingController {
    /// Trains the active model, or `model_override` which replaces it first.
    /// Blocks until every epoch finished, the run was stopped or it failed.
    /// Pause and stop are issued from other threads or from `observer`.
    pub fn start(
        &self,
        options: TrainOptions,
        model_override: Option<Model>,
        observer: &dyn TrainObserver,
    ) -> Result<RunOutcome, LabError> {
        options.validate()?;
        let (model, dataset) = self.begin_run(&options, model_override)?;

        match self.run_epochs(&model, &dataset, &options, observer) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let reason = e.to_string();
                error!("[TrainingController::start] Training aborted: {}", reason);
                observer.send_status(&TrainStatus::TrainAborted {
                    at: Utc::now().naive_utc(),
                    reason: &reason,
                });
                self.run.set_status(RunStatus::Idle);
                Err(e)
            }
        }
    }

    /// Checks the run can start, then activates `model_override` and marks
    /// the run as started. A rejected override is disposed and the active
    /// model is left untouched.
    fn begin_run(
        &self,
        options: &TrainOptions,
        model_override: Option<Model>,
    ) -> Result<(Arc<Model>, Arc<Dataset>), LabError> {
        let mut slot = self.model.write()?;
        let ready = self.ensure_idle().and_then(|_| {
            if slot.is_none() && model_override.is_none() {
                return Err(LabError::NotReady(
                    "no model exists, create or load one first".to_owned(),
                ));
            }
            self.dataset()
                .ok_or_else(|| LabError::NotReady("no dataset is loaded".to_owned()))
        });
        let dataset = match ready {
            Ok(dataset) => dataset,
            Err(e) => {
                if let Some(model) = model_override {
                    model.dispose();
                }
                return Err(e);
            }
        };

        let previous = match model_override {
            Some(model) => self.activate(&mut slot, model)?,
            None => None,
        };
        let model = slot.clone().ok_or_else(|| {
            LabError::NotReady("no model exists, create or load one first".to_owned())
        })?;

        let total_batches = dataset.num_train().div_ceil(options.batch_size);
        let begun = self.run.try_begin(options.epochs, total_batches);
        drop(slot);
        if let Some(previous) = previous {
            previous.dispose();
        }
        if !begun {
            return Err(LabError::Busy);
        }

        if let Err(e) = model.compile(Optimizer::adam(options.learning_rate)) {
            self.run.set_status(RunStatus::Idle);
            return Err(e.into());
        }
        Ok((model, dataset))
    }

    /// Waits while paused. Returns `false` once a stop was requested.
    fn checkpoint(&self, observer: &dyn TrainObserver) -> bool {
        if self.run.stop_requested() {
            return false;
        }
        if self.run.pause_requested() {
            let since = Utc::now().naive_utc();
            info!("[TrainingController::checkpoint] Training paused");
            let poll = Duration::from_millis(self.config.pause_poll_ms.max(1));
            while self.run.pause_requested() && !self.run.stop_requested() {
                std::thread::sleep(poll);
                observer.send_status(&TrainStatus::TrainSuspended { since });
            }
            info!("[TrainingController::checkpoint] Training resumed");
        }
        !self.run.stop_requested()
    }

    fn run_epochs(
        &self,
        model: &Model,
        dataset: &Dataset,
        options: &TrainOptions,
        observer: &dyn TrainObserver,
    ) -> Result<RunOutcome, LabError> {
        let num_train = dataset.num_train();
        let batch_size = options.batch_size;
        let total_batches = num_train.div_ceil(batch_size);
        let epochs = options.epochs;
        let previous_epochs = self.trained_epochs();

        let mut completed_epochs = 0;
        let mut stopped = false;

        let train_start = Utc::now().naive_utc();
        observer.send_status(&TrainStatus::TrainStart {
            at: train_start,
            total_epochs: epochs,
            total_batches,
        });
        info!(
            "[TrainingController::run_epochs] Training {} epochs of {} batches at learning rate {}",
            epochs, total_batches, options.learning_rate
        );

        'outer: for epoch in 0..epochs {
            trace!("[TrainingController::run_epochs] Starting epoch {} of {}", epoch, epochs);
            if !self.checkpoint(observer) {
                stopped = true;
                break 'outer;
            }

            let epoch_number = epoch + 1;
            self.run.set_epoch(epoch_number);
            let epoch_start = Utc::now().naive_utc();
            observer.send_status(&TrainStatus::EpochStart {
                epoch: epoch_number,
                at: epoch_start,
            });

            let mut losses = Vec::with_capacity(total_batches);
            let mut accuracies = Vec::with_capacity(total_batches);

            for (batch, (start, len)) in batch_ranges(num_train, batch_size).enumerate() {
                if !self.checkpoint(observer) {
                    stopped = true;
                    break 'outer;
                }

                let batch_start = Utc::now().naive_utc();
                let metrics = {
                    let (x, y) = dataset.batch(start, len)?;
                    model.train_on_batch(&x, &y)?
                };
                losses.push(metrics.loss);
                accuracies.push(metrics.accuracy);
                self.run.set_batch(batch + 1);

                observer.send_status(&TrainStatus::EpochUpdate {
                    current_epoch: epoch_number,
                    total_epochs: epochs,
                    current_batch: batch + 1,
                    total_batches,
                    batch_start,
                    batch_end: Utc::now().naive_utc(),
                    loss: metrics.loss,
                    accuracy: metrics.accuracy,
                });

                if self.config.yield_every > 0 && (batch + 1) % self.config.yield_every == 0 {
                    std::thread::yield_now();
                }
            }

            if self.run.stop_requested() {
                stopped = true;
                break 'outer;
            }

            let validation = model.evaluate(dataset.test_images(), dataset.test_labels())?;
            let record = EpochRecord {
                epoch: previous_epochs + epoch_number,
                train_loss: batch_mean(&losses),
                train_accuracy: batch_mean(&accuracies),
                val_loss: validation.loss,
                val_accuracy: validation.accuracy,
            };
            let history = {
                let mut history = self.history.lock()?;
                history.push(record);
                history.records().to_vec()
            };
            self.trained_epochs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            completed_epochs += 1;

            observer.send_status(&TrainStatus::EpochEnd {
                total_epochs: epochs,
                start: epoch_start,
                end: Utc::now().naive_utc(),
                record: &record,
                history: &history,
                get_weights: &|| model.get_weights(),
            });
            trace!(
                "[TrainingController::run_epochs] Epoch {}: loss {:.4}, accuracy {:.4}, val_loss {:.4}, val_accuracy {:.4}",
                record.epoch,
                record.train_loss,
                record.train_accuracy,
                record.val_loss,
                record.val_accuracy
            );

            std::thread::yield_now();
        }

        if !stopped {
            self.run.set_status(RunStatus::Completed);
        }
        observer.send_status(&TrainStatus::TrainEnd {
            start: train_start,
            end: Utc::now().naive_utc(),
            completed_epochs,
            stopped,
        });
        self.run.set_status(RunStatus::Idle);
        info!(
            "[TrainingController::run_epochs] Finished {} of {} epochs{}",
            completed_epochs,
            epochs,
            if stopped { ", stopped" } else { "" }
        );

        Ok(RunOutcome {
            completed_epochs,
            stopped,
            history: self.history()?,
        })
    }
}
