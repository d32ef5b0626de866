use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

use numbers::Device;

use super::{DataSource, DataVariant, Dataset, IMAGE_LEN, IMAGE_SIZE, NUM_CLASSES};
use crate::LabError;

/// Generated digit-like images: class `c` is a bright 8×8 block at its own
/// position on a noisy background. Used when no real data is around.
pub struct SyntheticDataSource {
    num_train: usize,
    num_test: usize,
    seed: u64,
}

impl SyntheticDataSource {
    pub fn new(num_train: usize, num_test: usize, seed: u64) -> Self {
        Self {
            num_train,
            num_test,
            seed,
        }
    }
}

const BLOCK: usize = 8;

fn block_origin(class: usize) -> (usize, usize) {
    // 3 rows by 4 columns of positions, classes use the first ten
    let step = (IMAGE_SIZE - BLOCK) / 3;
    (step / 2 + (class / 4) * step, (class % 4) * step)
}

fn generate(count: usize, rng: &mut ChaCha8Rng) -> (Vec<u8>, Vec<u8>) {
    let mut pixels = vec![0u8; count * IMAGE_LEN];
    let mut labels = Vec::with_capacity(count);
    for (i, image) in pixels.chunks_mut(IMAGE_LEN).enumerate() {
        let class = i % NUM_CLASSES;
        let (top, left) = block_origin(class);
        for (p, pixel) in image.iter_mut().enumerate() {
            let (y, x) = (p / IMAGE_SIZE, p % IMAGE_SIZE);
            let inside = (top..top + BLOCK).contains(&y) && (left..left + BLOCK).contains(&x);
            *pixel = if inside {
                rng.gen_range(180..=255)
            } else {
                rng.gen_range(0..40)
            };
        }
        labels.push(class as u8);
    }
    (pixels, labels)
}

/// Seeded synthetic dataset with `num_train` / `num_test` samples.
pub fn synthetic_dataset(
    num_train: usize,
    num_test: usize,
    seed: u64,
    ctx: &Arc<Device>,
) -> Result<Dataset, LabError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (train_pixels, train_labels) = generate(num_train, &mut rng);
    let (test_pixels, test_labels) = generate(num_test, &mut rng);
    Dataset::from_bytes(
        (&train_pixels, &train_labels),
        (&test_pixels, &test_labels),
        ctx,
    )
}

impl DataSource for SyntheticDataSource {
    fn load(
        &self,
        variant: DataVariant,
        on_progress: &mut dyn FnMut(f32),
        ctx: &Arc<Device>,
    ) -> Result<Dataset, LabError> {
        let scale = match variant {
            DataVariant::Sample => 1,
            DataVariant::Full => 4,
        };
        let dataset =
            synthetic_dataset(self.num_train * scale, self.num_test * scale, self.seed, ctx)?;
        on_progress(1.0);
        Ok(dataset)
    }
}

#[cfg(test)]
mod test {
    use numbers::Device;

    use super::*;

    #[test]
    fn test_is_seeded_and_balanced() {
        let ctx = Device::cpu();
        let a = synthetic_dataset(50, 10, 3, &ctx).unwrap();
        let b = synthetic_dataset(50, 10, 3, &ctx).unwrap();

        assert_eq!(a.class_counts(), [5; NUM_CLASSES]);
        assert_eq!(a.test_images(), b.test_images());
        assert!(a
            .test_images()
            .as_slice()
            .iter()
            .all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_blocks_fit_in_the_image() {
        for class in 0..NUM_CLASSES {
            let (top, left) = block_origin(class);
            assert!(top + BLOCK <= IMAGE_SIZE && left + BLOCK <= IMAGE_SIZE);
        }
        assert_ne!(block_origin(0), block_origin(4));
    }

    #[test]
    fn test_full_variant_is_larger() {
        let ctx = Device::cpu();
        let source = SyntheticDataSource::new(20, 5, 1);
        let full = source.load(DataVariant::Full, &mut |_| {}, &ctx).unwrap();
        assert_eq!(full.num_train(), 80);
    }
}
