use serde::{Deserialize, Serialize};
use std::{fmt::Display, sync::Arc};

use numbers::{Device, Tensor};

use crate::{LabError, Sample};

mod csv_source;
pub use csv_source::*;
mod idx_source;
pub use idx_source::*;
mod synthetic;
pub use synthetic::*;

pub const IMAGE_SIZE: usize = 28;
pub const IMAGE_LEN: usize = IMAGE_SIZE * IMAGE_SIZE;
pub const NUM_CLASSES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataVariant {
    /// The bundled subset, quick to load.
    #[default]
    Sample,
    Full,
}

impl Display for DataVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataVariant::Sample => write!(f, "sample"),
            DataVariant::Full => write!(f, "full"),
        }
    }
}

/// Somewhere a [`Dataset`] can be loaded from.
pub trait DataSource: Send + Sync {
    /// `on_progress` receives a monotone fraction in `[0, 1]` and is called
    /// with `1.0` once loading succeeded.
    fn load(
        &self,
        variant: DataVariant,
        on_progress: &mut dyn FnMut(f32),
        ctx: &Arc<Device>,
    ) -> Result<Dataset, LabError>;
}

/// Train and test images `[N, 28, 28, 1]` in `[0, 1]` with one-hot labels
/// `[N, 10]`.
pub struct Dataset {
    train_images: Tensor,
    train_labels: Tensor,
    test_images: Tensor,
    test_labels: Tensor,
}

/// Counts shown alongside a loaded dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub num_train: usize,
    pub num_test: usize,
    pub class_counts: [usize; NUM_CLASSES],
}

fn check_pair(what: &str, images: &Tensor, labels: &Tensor) -> Result<usize, LabError> {
    let n = images.outer_dim();
    if images.shape() != [n, IMAGE_SIZE, IMAGE_SIZE, 1] {
        return Err(LabError::InvalidConfig(format!(
            "{} images must have shape [N, 28, 28, 1], received {:?}",
            what,
            images.shape()
        )));
    }
    if labels.shape() != [n, NUM_CLASSES] {
        return Err(LabError::InvalidConfig(format!(
            "{} labels must have shape [{}, 10], received {:?}",
            what,
            n,
            labels.shape()
        )));
    }
    Ok(n)
}

/// One-hot encodes digit labels.
pub fn one_hot(labels: &[u8], ctx: &Arc<Device>) -> Result<Tensor, LabError> {
    let mut values = vec![0.0; labels.len() * NUM_CLASSES];
    for (i, label) in labels.iter().enumerate() {
        let label = *label as usize;
        if label >= NUM_CLASSES {
            return Err(LabError::InvalidConfig(format!("label {} is not a digit", label)));
        }
        values[i * NUM_CLASSES + label] = 1.0;
    }
    Ok(Tensor::from_vec(&[labels.len(), NUM_CLASSES], values, ctx)?)
}

impl Dataset {
    pub fn from_arrays(
        train_images: Tensor,
        train_labels: Tensor,
        test_images: Tensor,
        test_labels: Tensor,
    ) -> Result<Self, LabError> {
        let num_train = check_pair("train", &train_images, &train_labels)?;
        check_pair("test", &test_images, &test_labels)?;
        if num_train == 0 {
            return Err(LabError::InvalidConfig("the training set is empty".to_owned()));
        }

        Ok(Self {
            train_images,
            train_labels,
            test_images,
            test_labels,
        })
    }

    /// Builds the tensors from raw 8-bit pixels and digit labels.
    pub fn from_bytes(
        train: (&[u8], &[u8]),
        test: (&[u8], &[u8]),
        ctx: &Arc<Device>,
    ) -> Result<Self, LabError> {
        let images = |pixels: &[u8], count: usize| -> Result<Tensor, LabError> {
            let values = pixels.iter().map(|p| *p as f32 / 255.0).collect();
            Ok(Tensor::from_vec(&[count, IMAGE_SIZE, IMAGE_SIZE, 1], values, ctx)?)
        };

        Self::from_arrays(
            images(train.0, train.1.len())?,
            one_hot(train.1, ctx)?,
            images(test.0, test.1.len())?,
            one_hot(test.1, ctx)?,
        )
    }

    pub fn num_train(&self) -> usize {
        self.train_images.outer_dim()
    }

    pub fn num_test(&self) -> usize {
        self.test_images.outer_dim()
    }

    /// Owned copies of `len` training samples starting at `start`.
    pub fn batch(&self, start: usize, len: usize) -> Result<(Tensor, Tensor), LabError> {
        Ok((
            self.train_images.slice_outer(start, len)?,
            self.train_labels.slice_outer(start, len)?,
        ))
    }

    pub fn test_images(&self) -> &Tensor {
        &self.test_images
    }

    pub fn test_labels(&self) -> &Tensor {
        &self.test_labels
    }

    /// Test sample `index` and its label.
    pub fn test_sample(&self, index: usize) -> Result<(Sample, usize), LabError> {
        let image = self.test_images.slice_outer(index, 1)?;
        let label = self.test_labels.slice_outer(index, 1)?.argmax_rows();
        Ok((
            Sample::new(image.to_vec())?,
            label.first().copied().unwrap_or_default(),
        ))
    }

    pub fn class_counts(&self) -> [usize; NUM_CLASSES] {
        let mut counts = [0; NUM_CLASSES];
        for class in self.train_labels.argmax_rows() {
            counts[class.min(NUM_CLASSES - 1)] += 1;
        }
        counts
    }

    pub fn info(&self) -> DatasetInfo {
        DatasetInfo {
            num_train: self.num_train(),
            num_test: self.num_test(),
            class_counts: self.class_counts(),
        }
    }
}
