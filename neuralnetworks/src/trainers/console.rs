use std::{
    io::{stdout, Stdout, Write},
    sync::Mutex,
};

use crossterm::{cursor, terminal, ExecutableCommand};

use crate::{TrainObserver, TrainStatus};

const RULE: &str = "========================================================";

/// Progress line on the terminal, one summary line per epoch.
pub struct ConsoleObserver {
    ioout: Mutex<Stdout>,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self {
            ioout: Mutex::new(stdout()),
        }
    }

    fn write_status(&self, ioout: &mut Stdout, status: &TrainStatus) -> std::io::Result<()> {
        match status {
            TrainStatus::TrainStart {
                total_epochs,
                total_batches,
                ..
            } => {
                ioout.execute(cursor::Hide)?;
                writeln!(ioout, "{}", RULE)?;
                writeln!(
                    ioout,
                    "Training {} epochs of {} batches",
                    total_epochs, total_batches
                )?;
                writeln!(ioout, "{}", RULE)?;
            }
            TrainStatus::EpochUpdate {
                current_epoch,
                total_epochs,
                current_batch,
                total_batches,
                batch_start,
                batch_end,
                loss,
                accuracy,
            } => {
                let duration = batch_end.signed_duration_since(*batch_start);
                let remaining = total_batches.saturating_sub(*current_batch) as i32;
                ioout.execute(terminal::Clear(terminal::ClearType::CurrentLine))?;
                ioout.execute(cursor::SavePosition)?;
                write!(
                    ioout,
                    "Epoch {}/{}: {} of {} ({}ms, remaining {}s) loss: {:.4} accuracy: {:.4}",
                    current_epoch,
                    total_epochs,
                    current_batch,
                    total_batches,
                    duration.num_milliseconds(),
                    (duration * remaining).num_seconds(),
                    loss,
                    accuracy
                )?;
                ioout.execute(cursor::RestorePosition)?;
                ioout.flush()?;
            }
            TrainStatus::EpochEnd {
                total_epochs,
                start,
                end,
                record,
                ..
            } => {
                ioout.execute(terminal::Clear(terminal::ClearType::CurrentLine))?;
                writeln!(
                    ioout,
                    "Epoch {}/{} - {}s: loss: {:.4}, accuracy: {:.4} val: loss: {:.4}, accuracy: {:.4}",
                    record.epoch,
                    total_epochs,
                    end.signed_duration_since(*start).num_seconds(),
                    record.train_loss,
                    record.train_accuracy,
                    record.val_loss,
                    record.val_accuracy
                )?;
            }
            TrainStatus::TrainSuspended { .. } => {
                ioout.execute(terminal::Clear(terminal::ClearType::CurrentLine))?;
                ioout.execute(cursor::SavePosition)?;
                write!(ioout, "Paused")?;
                ioout.execute(cursor::RestorePosition)?;
                ioout.flush()?;
            }
            TrainStatus::TrainEnd {
                start,
                end,
                completed_epochs,
                stopped,
            } => {
                ioout.execute(terminal::Clear(terminal::ClearType::CurrentLine))?;
                writeln!(ioout, "{}", RULE)?;
                writeln!(
                    ioout,
                    "Training {} after {} epochs in {}s",
                    if *stopped { "stopped" } else { "finished" },
                    completed_epochs,
                    end.signed_duration_since(*start).num_seconds()
                )?;
                writeln!(ioout, "{}", RULE)?;
                ioout.execute(cursor::Show)?;
            }
            TrainStatus::TrainAborted { reason, .. } => {
                writeln!(ioout)?;
                writeln!(ioout, "Training aborted: {}", reason)?;
                ioout.execute(cursor::Show)?;
            }
            TrainStatus::EpochStart { .. } => {}
        }
        Ok(())
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainObserver for ConsoleObserver {
    fn send_status(&self, status: &TrainStatus) {
        let Ok(mut ioout) = self.ioout.lock() else {
            return;
        };
        if let Err(e) = self.write_status(&mut ioout, status) {
            warn!("[ConsoleObserver::send_status] Could not write to the console: {}", e);
        }
    }
}
