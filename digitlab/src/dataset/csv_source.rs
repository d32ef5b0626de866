use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use numbers::Device;

use super::{DataSource, DataVariant, Dataset, IMAGE_LEN, NUM_CLASSES};
use crate::LabError;

/// Reads `label,p0,…,p783` rows with pixels in `0..=255`. A header row is
/// skipped when its first field is not a number.
pub struct CsvDataSource {
    dir: PathBuf,
    sample_files: (String, String),
    full_files: (String, String),
}

struct Rows {
    pixels: Vec<u8>,
    labels: Vec<u8>,
}

const PROGRESS_EVERY: usize = 500;

impl CsvDataSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sample_files: (
                "mnist_train_sample.csv".to_owned(),
                "mnist_test_sample.csv".to_owned(),
            ),
            full_files: ("mnist_train.csv".to_owned(), "mnist_test.csv".to_owned()),
        }
    }

    pub fn with_files(mut self, variant: DataVariant, train: &str, test: &str) -> Self {
        let files = (train.to_owned(), test.to_owned());
        match variant {
            DataVariant::Sample => self.sample_files = files,
            DataVariant::Full => self.full_files = files,
        }
        self
    }

    fn files(&self, variant: DataVariant) -> (PathBuf, PathBuf) {
        let (train, test) = match variant {
            DataVariant::Sample => &self.sample_files,
            DataVariant::Full => &self.full_files,
        };
        (self.dir.join(train), self.dir.join(test))
    }
}

fn read_rows(path: &Path, on_bytes: &mut dyn FnMut(u64)) -> Result<Rows, LabError> {
    let file = File::open(path).map_err(|e| LabError::io(path, e))?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut rows = Rows {
        pixels: vec![],
        labels: vec![],
    };
    let mut record = csv::StringRecord::new();
    for i in 0.. {
        if !rdr
            .read_record(&mut record)
            .map_err(|e| LabError::io(path, e))?
        {
            break;
        }
        let bad_row = |reason: String| LabError::io(path, format!("row {}: {}", i + 1, reason));

        let Some(label) = record.get(0).and_then(|v| v.trim().parse::<u8>().ok()) else {
            if i == 0 {
                continue;
            }
            return Err(bad_row(format!("invalid label {:?}", record.get(0))));
        };
        if label as usize >= NUM_CLASSES {
            return Err(bad_row(format!("label {} is not a digit", label)));
        }
        if record.len() != IMAGE_LEN + 1 {
            return Err(bad_row(format!(
                "expected {} fields, found {}",
                IMAGE_LEN + 1,
                record.len()
            )));
        }

        for field in record.iter().skip(1) {
            let value: f32 = field
                .trim()
                .parse()
                .map_err(|_| bad_row(format!("invalid pixel '{}'", field)))?;
            if !(0.0..=255.0).contains(&value) {
                return Err(bad_row(format!("pixel {} is outside 0..=255", value)));
            }
            rows.pixels.push(value.round() as u8);
        }
        rows.labels.push(label);

        if rows.labels.len() % PROGRESS_EVERY == 0 {
            on_bytes(rdr.position().byte());
        }
    }

    Ok(rows)
}

impl DataSource for CsvDataSource {
    fn load(
        &self,
        variant: DataVariant,
        on_progress: &mut dyn FnMut(f32),
        ctx: &Arc<Device>,
    ) -> Result<Dataset, LabError> {
        let (train_path, test_path) = self.files(variant);
        info!(
            "[CsvDataSource::load] Loading {} data from '{}' and '{}'",
            variant,
            train_path.display(),
            test_path.display()
        );

        let size = |path: &Path| std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let train_size = size(&train_path);
        let total = (train_size + size(&test_path)).max(1) as f32;

        let mut last = 0.0f32;
        let mut report = |done: u64| {
            let fraction = (done as f32 / total).min(0.99);
            if fraction > last {
                last = fraction;
                on_progress(fraction);
            }
        };

        let train = read_rows(&train_path, &mut |b| report(b))?;
        let test = read_rows(&test_path, &mut |b| report(train_size + b))?;

        let dataset = Dataset::from_bytes(
            (&train.pixels, &train.labels),
            (&test.pixels, &test.labels),
            ctx,
        )?;
        on_progress(1.0);

        Ok(dataset)
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use numbers::Device;

    use super::*;

    fn write_rows(path: &Path, header: bool, labels: &[u8]) {
        let mut file = File::create(path).unwrap();
        if header {
            let names: Vec<String> = (0..IMAGE_LEN).map(|i| format!("p{}", i)).collect();
            writeln!(file, "label,{}", names.join(",")).unwrap();
        }
        for label in labels {
            let pixels: Vec<String> = (0..IMAGE_LEN).map(|i| ((i * 7) % 256).to_string()).collect();
            writeln!(file, "{},{}", label, pixels.join(",")).unwrap();
        }
    }

    #[test]
    fn test_loads_with_and_without_header() {
        let dir = tempfile::tempdir().unwrap();
        write_rows(&dir.path().join("mnist_train_sample.csv"), true, &[1, 2, 3]);
        write_rows(&dir.path().join("mnist_test_sample.csv"), false, &[4]);

        let ctx = Device::cpu();
        let mut progress = vec![];
        let dataset = CsvDataSource::new(dir.path())
            .load(DataVariant::Sample, &mut |p| progress.push(p), &ctx)
            .unwrap();

        assert_eq!(dataset.num_train(), 3);
        assert_eq!(dataset.num_test(), 1);
        assert_eq!(dataset.test_labels().argmax_rows(), vec![4]);
        assert_eq!(progress.last(), Some(&1.0));
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_failures_are_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Device::cpu();
        let source = CsvDataSource::new(dir.path());

        let missing = source.load(DataVariant::Full, &mut |_| {}, &ctx);
        assert!(matches!(missing, Err(LabError::IOFailure(_))));

        write_rows(&dir.path().join("mnist_train.csv"), false, &[1]);
        std::fs::write(dir.path().join("mnist_test.csv"), "1,2,3\n").unwrap();
        let short = source.load(DataVariant::Full, &mut |_| {}, &ctx);
        assert!(matches!(short, Err(LabError::IOFailure(_))));
    }

    #[test]
    fn test_large_files_report_intermediate_progress() {
        let dir = tempfile::tempdir().unwrap();
        let labels: Vec<u8> = (0..1200).map(|i| (i % 10) as u8).collect();
        write_rows(&dir.path().join("mnist_train_sample.csv"), false, &labels);
        write_rows(&dir.path().join("mnist_test_sample.csv"), false, &labels[..10]);

        let ctx = Device::cpu();
        let mut progress = vec![];
        let dataset = CsvDataSource::new(dir.path())
            .load(DataVariant::Sample, &mut |p| progress.push(p), &ctx)
            .unwrap();

        assert_eq!(dataset.num_train(), 1200);
        assert_eq!(progress.len(), 3);
        assert!(progress[0] > 0.3 && progress[0] < progress[1]);
        assert!(progress[1] < 0.99);
        assert_eq!(progress[2], 1.0);
    }
}
