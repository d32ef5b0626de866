use crate::{TrainObserver, TrainStatus};
use std::{fs::File, path::PathBuf};

/// Saves a JSON weight checkpoint (`<base_name>_<epoch>.json`) after every
/// completed epoch.
pub struct StoreModelObserver {
    dir: PathBuf,
    base_name: String,
}

impl StoreModelObserver {
    pub fn new(dir: impl Into<PathBuf>, base_name: &str) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            base_name: base_name.to_string(),
        })
    }
}

impl TrainObserver for StoreModelObserver {
    fn send_status(&self, status: &TrainStatus) {
        if let TrainStatus::EpochEnd {
            record,
            get_weights,
            ..
        } = status
        {
            let file_path = self
                .dir
                .join(format!("{}_{}.json", self.base_name, record.epoch));

            let weights = match get_weights() {
                Ok(weights) => weights,
                Err(e) => {
                    error!(
                        "[StoreModelObserver::send_status] Could not read weights on epoch {}: {}",
                        record.epoch, e
                    );
                    return;
                }
            };

            let Ok(mut file) = File::create(&file_path) else {
                error!(
                    "[StoreModelObserver::send_status] Could not create epoch file '{}'",
                    file_path.display()
                );
                return;
            };

            let Ok(_) = serde_json::to_writer(&mut file, &weights) else {
                error!(
                    "[StoreModelObserver::send_status] Could not serialize model on epoch {}",
                    record.epoch
                );
                return;
            };
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use crate::{trainers::StoreModelObserver, EpochRecord, ModelWeights, TrainObserver, TrainStatus};

    #[test]
    fn test_writes_checkpoint_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let observer = StoreModelObserver::new(dir.path(), "digits").unwrap();
        let now = Utc::now().naive_utc();
        let record = EpochRecord {
            epoch: 3,
            train_loss: 0.1,
            train_accuracy: 0.9,
            val_loss: 0.2,
            val_accuracy: 0.8,
        };
        let weights = ModelWeights {
            layers: vec!["AAAA".to_owned()],
        };

        observer.send_status(&TrainStatus::EpochEnd {
            total_epochs: 3,
            start: now,
            end: now,
            record: &record,
            history: std::slice::from_ref(&record),
            get_weights: &|| Ok(weights.clone()),
        });

        let file = std::fs::read_to_string(dir.path().join("digits_3.json")).unwrap();
        let stored: ModelWeights = serde_json::from_str(&file).unwrap();
        assert_eq!(stored, weights);
    }
}
