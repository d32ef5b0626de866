use std::{path::PathBuf, sync::Arc};

use numbers::Device;

use super::{DataSource, DataVariant, Dataset, IMAGE_LEN, IMAGE_SIZE};
use crate::LabError;

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

/// The standard MNIST IDX files. The sample variant keeps the first
/// `sample_train` / `sample_test` records of the same files.
pub struct IdxDataSource {
    dir: PathBuf,
    sample_train: usize,
    sample_test: usize,
}

impl IdxDataSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sample_train: 5_000,
            sample_test: 1_000,
        }
    }

    pub fn with_sample_size(mut self, train: usize, test: usize) -> Self {
        self.sample_train = train;
        self.sample_test = test;
        self
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, LabError> {
        let path = self.dir.join(name);
        std::fs::read(&path).map_err(|e| LabError::io(&path, e))
    }
}

fn header(bytes: &[u8], name: &str, magic: u32, dims: usize) -> Result<Vec<usize>, LabError> {
    let fields = 1 + dims;
    if bytes.len() < fields * 4 {
        return Err(LabError::IOFailure(format!("{}: truncated header", name)));
    }
    let words: Vec<u32> = bytes[..fields * 4]
        .chunks(4)
        .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    if words[0] != magic {
        return Err(LabError::IOFailure(format!(
            "{}: bad magic number {:#010x}, expected {:#010x}",
            name, words[0], magic
        )));
    }
    Ok(words[1..].iter().map(|w| *w as usize).collect())
}

/// Pixels of the first `limit` images of an IDX3 file.
pub fn parse_idx_images(bytes: &[u8], name: &str, limit: usize) -> Result<Vec<u8>, LabError> {
    let dims = header(bytes, name, IMAGES_MAGIC, 3)?;
    if dims[1] != IMAGE_SIZE || dims[2] != IMAGE_SIZE {
        return Err(LabError::IOFailure(format!(
            "{}: images are {}x{}, expected 28x28",
            name, dims[1], dims[2]
        )));
    }
    let count = dims[0].min(limit);
    let body = &bytes[16..];
    if body.len() < count * IMAGE_LEN {
        return Err(LabError::IOFailure(format!(
            "{}: truncated, expected {} images",
            name, count
        )));
    }
    Ok(body[..count * IMAGE_LEN].to_vec())
}

/// The first `limit` labels of an IDX1 file.
pub fn parse_idx_labels(bytes: &[u8], name: &str, limit: usize) -> Result<Vec<u8>, LabError> {
    let dims = header(bytes, name, LABELS_MAGIC, 1)?;
    let count = dims[0].min(limit);
    let body = &bytes[8..];
    if body.len() < count {
        return Err(LabError::IOFailure(format!(
            "{}: truncated, expected {} labels",
            name, count
        )));
    }
    Ok(body[..count].to_vec())
}

impl DataSource for IdxDataSource {
    fn load(
        &self,
        variant: DataVariant,
        on_progress: &mut dyn FnMut(f32),
        ctx: &Arc<Device>,
    ) -> Result<Dataset, LabError> {
        let (train_limit, test_limit) = match variant {
            DataVariant::Sample => (self.sample_train, self.sample_test),
            DataVariant::Full => (usize::MAX, usize::MAX),
        };
        info!(
            "[IdxDataSource::load] Loading {} data from '{}'",
            variant,
            self.dir.display()
        );

        let mut parts = vec![];
        let files = [
            ("train-images-idx3-ubyte", true, train_limit),
            ("train-labels-idx1-ubyte", false, train_limit),
            ("t10k-images-idx3-ubyte", true, test_limit),
            ("t10k-labels-idx1-ubyte", false, test_limit),
        ];
        for (i, (name, images, limit)) in files.iter().enumerate() {
            let bytes = self.read(name)?;
            parts.push(if *images {
                parse_idx_images(&bytes, name, *limit)?
            } else {
                parse_idx_labels(&bytes, name, *limit)?
            });
            on_progress((i + 1) as f32 / (files.len() + 1) as f32);
        }

        for (images, labels, what) in [(0, 1, "train"), (2, 3, "test")] {
            if parts[images].len() != parts[labels].len() * IMAGE_LEN {
                return Err(LabError::IOFailure(format!(
                    "{} images and labels hold a different number of records",
                    what
                )));
            }
        }

        let dataset = Dataset::from_bytes((&parts[0], &parts[1]), (&parts[2], &parts[3]), ctx)?;
        on_progress(1.0);
        Ok(dataset)
    }
}

#[cfg(test)]
mod test {
    use numbers::Device;

    use super::*;

    fn images_file(count: u32) -> Vec<u8> {
        let mut bytes = vec![];
        for word in [IMAGES_MAGIC, count, 28, 28] {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes.extend((0..count as usize * IMAGE_LEN).map(|i| (i % 256) as u8));
        bytes
    }

    fn labels_file(labels: &[u8]) -> Vec<u8> {
        let mut bytes = vec![];
        for word in [LABELS_MAGIC, labels.len() as u32] {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes.extend_from_slice(labels);
        bytes
    }

    #[test]
    fn test_parse_checks_magic_and_length() {
        let images = images_file(3);
        assert_eq!(parse_idx_images(&images, "i", 2).unwrap().len(), 2 * IMAGE_LEN);
        assert!(parse_idx_images(&images[..images.len() - 1], "i", 3).is_err());
        assert!(parse_idx_images(&labels_file(&[1]), "i", 1).is_err());

        let labels = labels_file(&[7, 8, 9]);
        assert_eq!(parse_idx_labels(&labels, "l", 10).unwrap(), vec![7, 8, 9]);
        assert!(parse_idx_labels(&labels[..3], "l", 10).is_err());
    }

    #[test]
    fn test_loads_sample_variant() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("train-images-idx3-ubyte"), images_file(4)).unwrap();
        std::fs::write(dir.path().join("train-labels-idx1-ubyte"), labels_file(&[0, 1, 2, 3])).unwrap();
        std::fs::write(dir.path().join("t10k-images-idx3-ubyte"), images_file(2)).unwrap();
        std::fs::write(dir.path().join("t10k-labels-idx1-ubyte"), labels_file(&[5, 6])).unwrap();

        let ctx = Device::cpu();
        let mut progress = vec![];
        let dataset = IdxDataSource::new(dir.path())
            .with_sample_size(3, 1)
            .load(DataVariant::Sample, &mut |p| progress.push(p), &ctx)
            .unwrap();

        assert_eq!(dataset.num_train(), 3);
        assert_eq!(dataset.num_test(), 1);
        assert_eq!(progress.last(), Some(&1.0));
        assert!(progress.windows(2).all(|w| w[0] < w[1]));

        std::fs::remove_file(dir.path().join("t10k-labels-idx1-ubyte")).unwrap();
        let missing = IdxDataSource::new(dir.path()).load(DataVariant::Full, &mut |_| {}, &ctx);
        assert!(matches!(missing, Err(LabError::IOFailure(_))));
    }
}
