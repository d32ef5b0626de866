use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use neuralnetworks::EpochRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Paused,
    Stopping,
    Completed,
}

impl RunStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunStatus::Running,
            2 => RunStatus::Paused,
            3 => RunStatus::Stopping,
            4 => RunStatus::Completed,
            _ => RunStatus::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            RunStatus::Idle => 0,
            RunStatus::Running => 1,
            RunStatus::Paused => 2,
            RunStatus::Stopping => 3,
            RunStatus::Completed => 4,
        }
    }

    /// A run exists and has not returned to idle yet.
    pub fn is_active(self) -> bool {
        !matches!(self, RunStatus::Idle)
    }
}

/// Position of the current run, as last published by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrainingRun {
    pub requested_epochs: usize,
    /// 1-based, `0` before the first epoch starts.
    pub current_epoch: usize,
    /// Batches finished in the current epoch.
    pub current_batch: usize,
    pub total_batches: usize,
}

/// Run state shared between the controller and its training loop. The loop
/// only reads the flags at its check points.
#[derive(Debug, Default)]
pub struct RunHandle {
    status: AtomicU8,
    stop: AtomicBool,
    pause: AtomicBool,
    requested_epochs: AtomicUsize,
    current_epoch: AtomicUsize,
    current_batch: AtomicUsize,
    total_batches: AtomicUsize,
}

impl RunHandle {
    pub fn status(&self) -> RunStatus {
        RunStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub(crate) fn set_status(&self, status: RunStatus) {
        self.status.store(status.as_u8(), Ordering::SeqCst);
    }

    /// Moves from idle to running, fails if another run holds the handle.
    pub(crate) fn try_begin(&self, requested_epochs: usize, total_batches: usize) -> bool {
        let begun = self.transition(RunStatus::Idle, RunStatus::Running);
        if begun {
            self.stop.store(false, Ordering::SeqCst);
            self.pause.store(false, Ordering::SeqCst);
            self.requested_epochs.store(requested_epochs, Ordering::SeqCst);
            self.current_epoch.store(0, Ordering::SeqCst);
            self.current_batch.store(0, Ordering::SeqCst);
            self.total_batches.store(total_batches, Ordering::SeqCst);
        }
        begun
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.status() == RunStatus::Stopping
    }

    /// True from the moment the status reads `Paused`, before the flag
    /// itself is stored.
    pub fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst) || self.status() == RunStatus::Paused
    }

    /// Requests termination and clears any pending pause. Does nothing when
    /// no run is active.
    pub fn stop(&self) {
        if self.transition(RunStatus::Running, RunStatus::Stopping)
            || self.transition(RunStatus::Paused, RunStatus::Stopping)
        {
            self.stop.store(true, Ordering::SeqCst);
            self.pause.store(false, Ordering::SeqCst);
        }
    }

    fn transition(&self, from: RunStatus, to: RunStatus) -> bool {
        self.status
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn pause(&self) {
        if self.transition(RunStatus::Running, RunStatus::Paused) {
            self.pause.store(true, Ordering::SeqCst);
        }
    }

    pub fn resume(&self) {
        if self.transition(RunStatus::Paused, RunStatus::Running) {
            self.pause.store(false, Ordering::SeqCst);
        }
    }

    /// Returns whether the run is paused afterwards.
    pub fn toggle_pause(&self) -> bool {
        if self.pause_requested() {
            self.resume();
        } else {
            self.pause();
        }
        self.pause_requested()
    }

    pub(crate) fn set_epoch(&self, epoch: usize) {
        self.current_epoch.store(epoch, Ordering::SeqCst);
        self.current_batch.store(0, Ordering::SeqCst);
    }

    pub(crate) fn set_batch(&self, batch: usize) {
        self.current_batch.store(batch, Ordering::SeqCst);
    }

    pub fn progress(&self) -> TrainingRun {
        TrainingRun {
            requested_epochs: self.requested_epochs.load(Ordering::SeqCst),
            current_epoch: self.current_epoch.load(Ordering::SeqCst),
            current_batch: self.current_batch.load(Ordering::SeqCst),
            total_batches: self.total_batches.load(Ordering::SeqCst),
        }
    }
}

/// What a call to `start` accomplished.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub completed_epochs: usize,
    pub stopped: bool,
    pub history: Vec<EpochRecord>,
}
