use super::SinkObserver;
use crate::{TrainObserver, TrainStatus};
use std::{fs::File, path::Path};

/// [`SinkObserver`] writing to `dir/name`.
pub struct FileObserver {
    sink: SinkObserver,
}

impl FileObserver {
    pub fn new(dir: impl AsRef<Path>, name: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let file = File::create(dir.as_ref().join(name))?;
        Ok(Self {
            sink: SinkObserver::new(file),
        })
    }
}

impl TrainObserver for FileObserver {
    fn send_status(&self, status: &TrainStatus) {
        self.sink.send_status(status)
    }
}
