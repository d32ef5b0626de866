use std::{io::Write, sync::Mutex};

use crate::{TrainObserver, TrainStatus};

struct SinkState {
    header_written: bool,
    writer: Box<dyn Write + Send + Sync>,
}

/// Writes one `;` separated line per completed epoch to any writer.
pub struct SinkObserver {
    state: Mutex<SinkState>,
}

impl SinkObserver {
    pub fn new<W: Write + Send + Sync + 'static>(writer: W) -> Self {
        Self {
            state: Mutex::new(SinkState {
                header_written: false,
                writer: Box::new(writer),
            }),
        }
    }

    fn write_status(state: &mut SinkState, status: &TrainStatus) -> std::io::Result<()> {
        match status {
            TrainStatus::EpochEnd {
                start, end, record, ..
            } => {
                if !state.header_written {
                    writeln!(
                        &mut state.writer,
                        "Epoch;Duration;loss;accuracy;val_loss;val_accuracy"
                    )?;
                    state.header_written = true;
                }

                writeln!(
                    &mut state.writer,
                    "{};{};{};{};{};{}",
                    record.epoch,
                    end.signed_duration_since(*start).num_seconds(),
                    record.train_loss,
                    record.train_accuracy,
                    record.val_loss,
                    record.val_accuracy
                )?;
            }
            TrainStatus::TrainEnd { .. } | TrainStatus::TrainAborted { .. } => {
                state.writer.flush()?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl TrainObserver for SinkObserver {
    fn send_status(&self, status: &TrainStatus) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if let Err(e) = Self::write_status(&mut state, status) {
            error!("[SinkObserver::send_status] Could not write epoch metrics: {}", e);
        }
    }
}
