use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::LabError;

/// Runtime settings, read from the environment by [`LabConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// `DIGITLAB_DATA_DIR`
    pub data_dir: PathBuf,
    /// `DIGITLAB_PRETRAINED_DIR`
    pub pretrained_dir: PathBuf,
    /// `NUM_THREADS`, how many chunks evaluation is split into.
    pub num_threads: usize,
    /// `SEED`, random when unset.
    pub seed: Option<u64>,
    /// `DIGITLAB_PAUSE_POLL_MS`
    pub pause_poll_ms: u64,
    /// `DIGITLAB_YIELD_EVERY`, batches between yields to the scheduler.
    pub yield_every: usize,
    /// `DIGITLAB_SHARD_BYTES`, maximum size of one exported weight file.
    pub shard_bytes: usize,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            pretrained_dir: PathBuf::from("pretrained"),
            num_threads: 16,
            seed: None,
            pause_poll_ms: 50,
            yield_every: 16,
            shard_bytes: 4 * 1024 * 1024,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T, LabError> {
    value
        .trim()
        .parse()
        .map_err(|_| LabError::InvalidConfig(format!("{} has an invalid value '{}'", key, value)))
}

impl LabConfig {
    pub fn from_env() -> Result<Self, LabError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, unset keys keep their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LabError> {
        let mut config = Self::default();

        if let Some(v) = lookup("DIGITLAB_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DIGITLAB_PRETRAINED_DIR") {
            config.pretrained_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("NUM_THREADS") {
            config.num_threads = parse("NUM_THREADS", v)?;
        }
        if let Some(v) = lookup("SEED") {
            config.seed = Some(parse("SEED", v)?);
        }
        if let Some(v) = lookup("DIGITLAB_PAUSE_POLL_MS") {
            config.pause_poll_ms = parse("DIGITLAB_PAUSE_POLL_MS", v)?;
        }
        if let Some(v) = lookup("DIGITLAB_YIELD_EVERY") {
            config.yield_every = parse("DIGITLAB_YIELD_EVERY", v)?;
        }
        if let Some(v) = lookup("DIGITLAB_SHARD_BYTES") {
            config.shard_bytes = parse("DIGITLAB_SHARD_BYTES", v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LabError> {
        if self.num_threads == 0 {
            return Err(LabError::InvalidConfig("NUM_THREADS must be positive".to_owned()));
        }
        if self.shard_bytes == 0 {
            return Err(LabError::InvalidConfig(
                "DIGITLAB_SHARD_BYTES must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// The configured seed, or a fresh random one.
    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            use rand::RngCore;
            rand::thread_rng().next_u64()
        })
    }
}

/// Parameters of one training run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            learning_rate: 0.001,
        }
    }
}

impl TrainOptions {
    pub fn validate(&self) -> Result<(), LabError> {
        if self.epochs == 0 {
            return Err(LabError::InvalidConfig("epochs must be positive".to_owned()));
        }
        if self.batch_size == 0 {
            return Err(LabError::InvalidConfig("batch size must be positive".to_owned()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(LabError::InvalidConfig(format!(
                "learning rate must be positive, received {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}
